use crate::error::{Result, StackshardError};
use tantivy::schema::{Field, Schema as TantivySchema, FAST, STORED, STRING};

pub const ID_FIELD: &str = "_id";
pub const UID_FIELD: &str = "_uid";
pub const TENANT_FIELD: &str = "_tenant";
pub const ROUTING_FIELD: &str = "_routing";
pub const TERMS_FIELD: &str = "_terms";
pub const SOURCE_FIELD: &str = "_source";

const SYSTEM_FIELDS: &[&str] = &[
    ID_FIELD,
    UID_FIELD,
    TENANT_FIELD,
    ROUTING_FIELD,
    TERMS_FIELD,
    SOURCE_FIELD,
];

/// The fixed physical schema every shard is created with.
///
/// Document bodies are not mapped field by field: scalar values are indexed
/// as `field=value` tokens in `_terms` for exact matching, and the body is
/// kept verbatim in `_source`.
#[derive(Debug, Clone)]
pub struct ShardSchema {
    schema: TantivySchema,
    pub id: Field,
    pub uid: Field,
    pub tenant: Field,
    pub routing: Field,
    pub terms: Field,
    pub source: Field,
}

impl ShardSchema {
    pub fn build() -> Self {
        let mut builder = TantivySchema::builder();
        let id = builder.add_text_field(ID_FIELD, STRING | STORED | FAST);
        let uid = builder.add_text_field(UID_FIELD, STRING);
        let tenant = builder.add_text_field(TENANT_FIELD, STRING | STORED);
        let routing = builder.add_text_field(ROUTING_FIELD, STRING | STORED);
        let terms = builder.add_text_field(TERMS_FIELD, STRING);
        let source = builder.add_text_field(SOURCE_FIELD, STORED);
        ShardSchema {
            schema: builder.build(),
            id,
            uid,
            tenant,
            routing,
            terms,
            source,
        }
    }

    /// Bind to the schema of an index that already exists on disk.
    pub fn from_existing(schema: TantivySchema) -> Result<Self> {
        Self::resolve(schema)
    }

    fn resolve(schema: TantivySchema) -> Result<Self> {
        let field = |name: &str| {
            schema
                .get_field(name)
                .map_err(|_| StackshardError::MissingField(name.to_string()))
        };
        Ok(ShardSchema {
            id: field(ID_FIELD)?,
            uid: field(UID_FIELD)?,
            tenant: field(TENANT_FIELD)?,
            routing: field(ROUTING_FIELD)?,
            terms: field(TERMS_FIELD)?,
            source: field(SOURCE_FIELD)?,
            schema,
        })
    }

    pub fn tantivy(&self) -> &TantivySchema {
        &self.schema
    }

    /// Differences between an on-disk schema and the expected one, as messages.
    pub fn diff(expected: &TantivySchema, actual: &TantivySchema) -> Vec<String> {
        let mut problems = Vec::new();
        for name in SYSTEM_FIELDS {
            let expected_entry = expected
                .get_field(name)
                .ok()
                .map(|f| expected.get_field_entry(f));
            match actual.get_field(name) {
                Err(_) => problems.push(format!("missing field '{}'", name)),
                Ok(field) => {
                    let actual_entry = actual.get_field_entry(field);
                    if let Some(expected_entry) = expected_entry {
                        if expected_entry != actual_entry {
                            problems.push(format!("field '{}' has unexpected options", name));
                        }
                    }
                }
            }
        }
        problems
    }
}
