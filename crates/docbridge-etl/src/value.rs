//! Store-neutral representation of document values
//!
//! Both document drivers (BSON from the document store, JSON payloads from
//! the relational staging table) are converted into [`SourceValue`] before
//! projection and coercion, so the rest of the pipeline never sees a driver
//! type.

use chrono::{DateTime, FixedOffset};
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use sqlx::types::BigDecimal;
use std::str::FromStr;

/// A dynamically typed value read from a document
#[derive(Debug, Clone, PartialEq)]
pub enum SourceValue {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
    Decimal(BigDecimal),
    String(String),
    DateTime(DateTime<FixedOffset>),
    Binary(Vec<u8>),
    Array(Vec<SourceValue>),
    Document(IndexMap<String, SourceValue>),
}

impl SourceValue {
    /// Build a document from key/value pairs, preserving order
    pub fn document<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, SourceValue)>,
    {
        SourceValue::Document(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Member lookup; `None` for anything that is not a document
    pub fn get(&self, key: &str) -> Option<&SourceValue> {
        match self {
            SourceValue::Document(map) => map.get(key),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SourceValue::Null)
    }

    pub fn is_compound(&self) -> bool {
        matches!(self, SourceValue::Array(_) | SourceValue::Document(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SourceValue::Null => "null",
            SourceValue::Boolean(_) => "boolean",
            SourceValue::Int32(_) => "int32",
            SourceValue::Int64(_) => "int64",
            SourceValue::Double(_) => "double",
            SourceValue::Decimal(_) => "decimal",
            SourceValue::String(_) => "string",
            SourceValue::DateTime(_) => "datetime",
            SourceValue::Binary(_) => "binary",
            SourceValue::Array(_) => "array",
            SourceValue::Document(_) => "document",
        }
    }

    /// Render as JSON. Decimals keep their exact digits as strings, binary
    /// becomes base64, timestamps become RFC 3339.
    pub fn to_json(&self) -> JsonValue {
        use base64::Engine;

        match self {
            SourceValue::Null => JsonValue::Null,
            SourceValue::Boolean(b) => JsonValue::Bool(*b),
            SourceValue::Int32(i) => JsonValue::from(*i),
            SourceValue::Int64(i) => JsonValue::from(*i),
            SourceValue::Double(d) => serde_json::Number::from_f64(*d)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            SourceValue::Decimal(d) => JsonValue::String(d.to_string()),
            SourceValue::String(s) => JsonValue::String(s.clone()),
            SourceValue::DateTime(dt) => JsonValue::String(dt.to_rfc3339()),
            SourceValue::Binary(bytes) => {
                JsonValue::String(base64::engine::general_purpose::STANDARD.encode(bytes))
            }
            SourceValue::Array(items) => JsonValue::Array(items.iter().map(Self::to_json).collect()),
            SourceValue::Document(map) => JsonValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<JsonValue> for SourceValue {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => SourceValue::Null,
            JsonValue::Bool(b) => SourceValue::Boolean(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    match i32::try_from(i) {
                        Ok(small) => SourceValue::Int32(small),
                        Err(_) => SourceValue::Int64(i),
                    }
                } else if let Some(u) = n.as_u64() {
                    SourceValue::Decimal(BigDecimal::from(u))
                } else {
                    // as_f64 is always Some without arbitrary_precision
                    match n.as_f64() {
                        Some(f) => SourceValue::Double(f),
                        None => BigDecimal::from_str(&n.to_string())
                            .map(SourceValue::Decimal)
                            .unwrap_or(SourceValue::Null),
                    }
                }
            }
            JsonValue::String(s) => SourceValue::String(s),
            JsonValue::Array(items) => {
                SourceValue::Array(items.into_iter().map(SourceValue::from).collect())
            }
            JsonValue::Object(map) => SourceValue::Document(
                map.into_iter()
                    .map(|(k, v)| (k, SourceValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for SourceValue {
    fn from(value: &str) -> Self {
        SourceValue::String(value.to_string())
    }
}

impl From<String> for SourceValue {
    fn from(value: String) -> Self {
        SourceValue::String(value)
    }
}

impl From<i32> for SourceValue {
    fn from(value: i32) -> Self {
        SourceValue::Int32(value)
    }
}

impl From<i64> for SourceValue {
    fn from(value: i64) -> Self {
        SourceValue::Int64(value)
    }
}

impl From<f64> for SourceValue {
    fn from(value: f64) -> Self {
        SourceValue::Double(value)
    }
}

impl From<bool> for SourceValue {
    fn from(value: bool) -> Self {
        SourceValue::Boolean(value)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_numbers() {
        assert_eq!(SourceValue::from(json!(7)), SourceValue::Int32(7));
        assert_eq!(
            SourceValue::from(json!(9_000_000_000_i64)),
            SourceValue::Int64(9_000_000_000)
        );
        assert_eq!(SourceValue::from(json!(1.5)), SourceValue::Double(1.5));
        assert_eq!(
            SourceValue::from(json!(u64::MAX)),
            SourceValue::Decimal(BigDecimal::from(u64::MAX))
        );
    }

    #[test]
    fn test_from_json_nested() {
        let value = SourceValue::from(json!({"b": 1, "a": {"c": null}}));
        match &value {
            SourceValue::Document(map) => {
                let keys: Vec<_> = map.keys().cloned().collect();
                assert_eq!(keys.len(), 2);
            }
            other => panic!("expected document, got {:?}", other),
        }
        assert!(value.get("a").unwrap().get("c").unwrap().is_null());
        assert!(value.get("missing").is_none());
    }

    #[test]
    fn test_to_json() {
        let value = SourceValue::document([
            ("Amount", SourceValue::Decimal(BigDecimal::from_str("12.50").unwrap())),
            ("Tags", SourceValue::Array(vec!["a".into(), 2i32.into()])),
            ("Raw", SourceValue::Binary(vec![1, 2, 3])),
        ]);
        assert_eq!(
            value.to_json(),
            json!({"Amount": "12.50", "Tags": ["a", 2], "Raw": "AQID"})
        );
    }

    #[test]
    fn test_nan_renders_as_null() {
        assert_eq!(SourceValue::Double(f64::NAN).to_json(), JsonValue::Null);
    }
}
