//! Record value model
//!
//! Records arrive from firmware and backend producers whose schemas drift
//! over time, so a record is an open mapping from string keys to a small
//! tagged union of JSON-like values.

use crate::error::AggregateError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Dynamically-typed field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Number(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Number(v as f64)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Number(f64::from(v))
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<Record> for FieldValue {
    fn from(v: Record) -> Self {
        FieldValue::Map(v.fields)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, FieldValue>> {
        match self {
            FieldValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

/// One semi-structured observation from the record source.
///
/// Keys are kept in a `BTreeMap`, so iteration order is the byte order of
/// the keys. The resolver's normalized fallback depends on that order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a record from a JSON object
    pub fn from_json(json: &str) -> Result<Self, AggregateError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Convert a JSON value into a record; only objects are accepted
    pub fn from_value(value: serde_json::Value) -> Result<Self, AggregateError> {
        if !value.is_object() {
            return Err(AggregateError::Parse(format!(
                "expected a JSON object, got {}",
                json_kind(&value)
            )));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// String tag stored under `key` (e.g. the event type)
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(FieldValue::as_str)
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Record {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_mixed_record() {
        let record = Record::from_json(
            r#"{
                "event": "ALERT",
                "AmpRatio": 0.82,
                "PAD_ms": "232.0",
                "flagged": true,
                "note": null,
                "samples": [1, 2, 3],
                "metrics": { "dSUT_ms": 20 }
            }"#,
        )
        .unwrap();

        assert_eq!(record.len(), 7);
        assert_eq!(record.tag("event"), Some("ALERT"));
        assert_eq!(record.get("AmpRatio"), Some(&FieldValue::Number(0.82)));
        assert_eq!(record.get("PAD_ms"), Some(&FieldValue::from("232.0")));
        assert_eq!(record.get("flagged"), Some(&FieldValue::Bool(true)));
        assert!(record.get("note").unwrap().is_null());
        assert!(matches!(record.get("samples"), Some(FieldValue::List(items)) if items.len() == 3));

        let nested = record.get("metrics").and_then(FieldValue::as_map).unwrap();
        assert_eq!(nested.get("dSUT_ms"), Some(&FieldValue::Number(20.0)));
    }

    #[test]
    fn test_rejects_non_object() {
        let err = Record::from_json("[1, 2]").unwrap_err();
        assert!(err.to_string().contains("array"));
    }

    #[test]
    fn test_builder_and_iteration_order() {
        let record = Record::new()
            .with("b", 2.0)
            .with("a", 1)
            .with("c", Record::new().with("inner", "x"));

        let keys: Vec<&str> = record.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert!(record.tag("a").is_none());
    }
}
