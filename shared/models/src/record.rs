//! Loosely-typed records produced by the extraction collaborators.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One raw row or image record as emitted by an extraction path.
///
/// Keys follow whatever convention the producer used. Lookups accept dotted
/// paths (`classification.hs_code`) for nested objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(Map<String, Value>);

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Look up a key or a dotted path into nested objects.
    pub fn get(&self, path: &str) -> Option<&Value> {
        if let Some(value) = self.0.get(path) {
            return Some(value);
        }

        let mut segments = path.split('.');
        let mut current = self.0.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl TryFrom<Value> for RawRecord {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(format!("expected a JSON object record, got {}", json_kind(&other))),
        }
    }
}

impl From<Map<String, Value>> for RawRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dotted_lookup() {
        let record = RawRecord::try_from(json!({
            "hsCode": "8518.22",
            "classification": { "hs_code": "851822", "confidence": 0.8 }
        }))
        .unwrap();

        assert_eq!(record.get("hsCode"), Some(&json!("8518.22")));
        assert_eq!(record.get("classification.hs_code"), Some(&json!("851822")));
        assert_eq!(record.get("classification.missing"), None);
        assert_eq!(record.get("hsCode.nested"), None);
    }

    #[test]
    fn test_rejects_non_objects() {
        assert!(RawRecord::try_from(json!([1, 2])).is_err());
        assert!(RawRecord::try_from(json!("row")).is_err());
    }
}
