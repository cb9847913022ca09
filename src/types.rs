use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Logical index name, e.g. `"products"`.
pub type IndexName = String;
/// Document identifier, unique within a tenant of a logical index.
pub type DocumentId = String;
/// Physical shard identifier. `None` is the single shard of an unsharded index.
pub type ShardId = Option<String>;

/// A document with an identifier, an optional routing key and named fields.
///
/// The routing key decides which shard receives the document; when absent the
/// document identifier is used instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_key: Option<String>,
    pub fields: BTreeMap<String, FieldValue>,
}

impl Document {
    pub fn new(id: impl Into<DocumentId>) -> Self {
        Document {
            id: id.into(),
            routing_key: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = Some(routing_key.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// The key the sharding strategy routes on.
    pub fn routing_key(&self) -> &str {
        self.routing_key.as_deref().unwrap_or(&self.id)
    }

    /// Parse a [`Document`] from a JSON object.
    ///
    /// The identifier is read from `"id"` (or `"_id"`), the optional routing
    /// key from `"routing"`. Every other member becomes a field; `null` members
    /// are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StackshardError::MissingField`] if there is no string
    /// identifier, or [`crate::StackshardError::InvalidDocument`] if the value
    /// is not a JSON object.
    pub fn from_json(json: &serde_json::Value) -> crate::error::Result<Self> {
        use crate::error::StackshardError;

        let obj = json
            .as_object()
            .ok_or_else(|| StackshardError::InvalidDocument("Expected JSON object".to_string()))?;

        let id = obj
            .get("id")
            .or_else(|| obj.get("_id"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| StackshardError::MissingField("id".to_string()))?
            .to_string();

        let routing_key = obj
            .get("routing")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let mut fields = BTreeMap::new();
        for (key, val) in obj {
            if key == "id" || key == "_id" || key == "routing" {
                continue;
            }
            if let Some(field_value) = json_value_to_field_value(val) {
                fields.insert(key.clone(), field_value);
            }
        }

        Ok(Document {
            id,
            routing_key,
            fields,
        })
    }

    /// The document body as a JSON object, without the identifier.
    pub fn body_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (key, field_value) in &self.fields {
            map.insert(key.clone(), field_value_to_json_value(field_value));
        }
        serde_json::Value::Object(map)
    }
}

pub fn json_value_to_field_value(val: &serde_json::Value) -> Option<FieldValue> {
    match val {
        serde_json::Value::String(s) => Some(FieldValue::Text(s.clone())),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(FieldValue::Integer(i))
            } else {
                n.as_f64().map(FieldValue::Float)
            }
        }
        serde_json::Value::Bool(b) => Some(FieldValue::Bool(*b)),
        serde_json::Value::Array(arr) => {
            let items: Vec<FieldValue> = arr.iter().filter_map(json_value_to_field_value).collect();
            if items.is_empty() {
                None
            } else {
                Some(FieldValue::Array(items))
            }
        }
        serde_json::Value::Object(obj) => {
            let nested: BTreeMap<String, FieldValue> = obj
                .iter()
                .filter_map(|(k, v)| json_value_to_field_value(v).map(|fv| (k.clone(), fv)))
                .collect();
            if nested.is_empty() {
                None
            } else {
                Some(FieldValue::Object(nested))
            }
        }
        serde_json::Value::Null => None,
    }
}

pub fn field_value_to_json_value(field_value: &FieldValue) -> serde_json::Value {
    match field_value {
        FieldValue::Text(s) => serde_json::Value::String(s.clone()),
        FieldValue::Integer(i) => serde_json::json!(i),
        FieldValue::Float(f) => serde_json::json!(f),
        FieldValue::Bool(b) => serde_json::Value::Bool(*b),
        FieldValue::Array(arr) => {
            serde_json::Value::Array(arr.iter().map(field_value_to_json_value).collect())
        }
        FieldValue::Object(obj) => {
            let mut map = serde_json::Map::new();
            for (k, v) in obj {
                map.insert(k.clone(), field_value_to_json_value(v));
            }
            serde_json::Value::Object(map)
        }
    }
}

/// A dynamically-typed field value stored in a [`Document`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Object(BTreeMap<String, FieldValue>),
    Array(Vec<FieldValue>),
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl FieldValue {
    /// Exact-match token for scalar values; `None` for arrays and objects.
    pub fn as_term(&self) -> Option<String> {
        match self {
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::Integer(i) => Some(i.to_string()),
            FieldValue::Float(f) => Some(f.to_string()),
            FieldValue::Bool(b) => Some(b.to_string()),
            FieldValue::Array(_) | FieldValue::Object(_) => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Integer(i)
    }
}

impl From<f64> for FieldValue {
    fn from(f: f64) -> Self {
        FieldValue::Float(f)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

/// Whether writes must be durable before a unit's handle resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommitStrategy {
    #[default]
    None,
    Force,
}

/// Whether writes must be visible to searches before a unit's handle resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefreshStrategy {
    #[default]
    None,
    Force,
}

/// Per-session state checked by the tenancy guard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub tenant_id: Option<String>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        SessionContext {
            tenant_id: Some(tenant_id.into()),
        }
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }
}
