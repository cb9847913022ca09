use crate::error::{Result, StackshardError};
use crate::index::schema::ShardSchema;
use crate::tenancy::MultiTenancyStrategy;
use crate::types::{Document, DocumentId, FieldValue};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tantivy::schema::OwnedValue;
use tantivy::{TantivyDocument, Term};

/// A document as read back from a shard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredDocument {
    pub id: DocumentId,
    pub routing_key: Option<String>,
    pub source: serde_json::Value,
}

/// Converts between [`Document`]s and the shard's physical schema.
#[derive(Debug, Clone)]
pub struct DocumentConverter {
    schema: ShardSchema,
    tenancy: Arc<dyn MultiTenancyStrategy>,
}

impl DocumentConverter {
    pub fn new(schema: ShardSchema, tenancy: Arc<dyn MultiTenancyStrategy>) -> Self {
        DocumentConverter { schema, tenancy }
    }

    pub fn schema(&self) -> &ShardSchema {
        &self.schema
    }

    pub fn tenancy(&self) -> &Arc<dyn MultiTenancyStrategy> {
        &self.tenancy
    }

    /// Rejects documents the shard cannot index. Checked per operation so one
    /// bad document does not fail the rest of its batch.
    pub fn validate(doc: &Document) -> Result<()> {
        if doc.id.is_empty() {
            return Err(StackshardError::InvalidDocument(
                "document identifier must not be empty".to_string(),
            ));
        }
        for name in doc.fields.keys() {
            if name.starts_with('_') {
                return Err(StackshardError::InvalidDocument(format!(
                    "field name '{}' uses the reserved '_' prefix (document '{}')",
                    name, doc.id
                )));
            }
            if name.is_empty() || name.contains('=') {
                return Err(StackshardError::InvalidDocument(format!(
                    "invalid field name '{}' (document '{}')",
                    name, doc.id
                )));
            }
        }
        Ok(())
    }

    pub fn to_tantivy(&self, tenant_id: Option<&str>, doc: &Document) -> Result<TantivyDocument> {
        Self::validate(doc)?;
        let mut tantivy_doc = TantivyDocument::new();

        tantivy_doc.add_text(self.schema.id, &doc.id);
        tantivy_doc.add_text(
            self.schema.uid,
            self.tenancy.document_uid(tenant_id, &doc.id),
        );
        tantivy_doc.add_text(self.schema.tenant, self.tenancy.tenant_value(tenant_id));
        tantivy_doc.add_text(self.schema.routing, doc.routing_key());

        for term in exact_terms(&doc.fields) {
            tantivy_doc.add_text(self.schema.terms, term);
        }

        let source = serde_json::to_string(&doc.body_json())?;
        tantivy_doc.add_text(self.schema.source, source);

        Ok(tantivy_doc)
    }

    /// Term matching exactly one document of one tenant.
    pub fn uid_term(&self, tenant_id: Option<&str>, document_id: &str) -> Term {
        Term::from_field_text(
            self.schema.uid,
            &self.tenancy.document_uid(tenant_id, document_id),
        )
    }

    pub fn tenant_term(&self, tenant: &str) -> Term {
        Term::from_field_text(self.schema.tenant, tenant)
    }

    pub fn routing_term(&self, routing_key: &str) -> Term {
        Term::from_field_text(self.schema.routing, routing_key)
    }

    pub fn exact_term(&self, field: &str, value: &str) -> Term {
        Term::from_field_text(self.schema.terms, &format!("{}={}", field, value))
    }

    pub fn id_term(&self, document_id: &str) -> Term {
        Term::from_field_text(self.schema.id, document_id)
    }

    pub fn from_tantivy(&self, tantivy_doc: &TantivyDocument) -> Result<StoredDocument> {
        let id = self
            .stored_text(tantivy_doc, self.schema.id)
            .ok_or_else(|| StackshardError::MissingField("_id".to_string()))?;
        let routing = self
            .stored_text(tantivy_doc, self.schema.routing)
            .filter(|r| *r != id);
        let source = match self.stored_text(tantivy_doc, self.schema.source) {
            Some(raw) => serde_json::from_str(&raw)?,
            None => serde_json::Value::Object(serde_json::Map::new()),
        };
        Ok(StoredDocument {
            id,
            routing_key: routing,
            source,
        })
    }

    fn stored_text(&self, doc: &TantivyDocument, field: tantivy::schema::Field) -> Option<String> {
        doc.get_first(field).and_then(|v| {
            let owned: OwnedValue = v.into();
            match owned {
                OwnedValue::Str(s) => Some(s),
                _ => None,
            }
        })
    }
}

/// `path=value` tokens for every scalar in the document, nested objects
/// flattened with dots and array elements indexed individually.
pub fn exact_terms(fields: &BTreeMap<String, FieldValue>) -> Vec<String> {
    let mut terms = Vec::new();
    for (name, value) in fields {
        collect_terms(name, value, &mut terms);
    }
    terms
}

fn collect_terms(path: &str, value: &FieldValue, out: &mut Vec<String>) {
    match value {
        FieldValue::Array(items) => {
            for item in items {
                collect_terms(path, item, out);
            }
        }
        FieldValue::Object(nested) => {
            for (key, child) in nested {
                collect_terms(&format!("{}.{}", path, key), child, out);
            }
        }
        scalar => {
            if let Some(term) = scalar.as_term() {
                out.push(format!("{}={}", path, term));
            }
        }
    }
}
