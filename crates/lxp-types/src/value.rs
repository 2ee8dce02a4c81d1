use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Number;

use crate::error::{TupleError, TupleResult};
use crate::reference::StoreReference;

/// The kind of a field value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValueKind {
    Long,
    Double,
    Boolean,
    String,
    List,
    Reference,
}

impl ValueKind {
    /// Upper-case name used in persisted type descriptors.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Long => "LONG",
            Self::Double => "DOUBLE",
            Self::Boolean => "BOOLEAN",
            Self::String => "STRING",
            Self::List => "LIST",
            Self::Reference => "REFERENCE",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueKind {
    type Err = TupleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LONG" => Ok(Self::Long),
            "DOUBLE" => Ok(Self::Double),
            "BOOLEAN" => Ok(Self::Boolean),
            "STRING" => Ok(Self::String),
            "LIST" => Ok(Self::List),
            "REFERENCE" => Ok(Self::Reference),
            other => Err(TupleError::Malformed(format!("unknown value kind {other:?}"))),
        }
    }
}

/// A single field value held by a tuple.
///
/// Lists hold scalars or references only; nested lists are rejected on
/// decode.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Long(i64),
    Double(f64),
    Boolean(bool),
    String(String),
    List(Vec<Value>),
    Reference(StoreReference),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Long(_) => ValueKind::Long,
            Self::Double(_) => ValueKind::Double,
            Self::Boolean(_) => ValueKind::Boolean,
            Self::String(_) => ValueKind::String,
            Self::List(_) => ValueKind::List,
            Self::Reference(_) => ValueKind::Reference,
        }
    }

    /// The string under which this value is filed in a secondary index.
    ///
    /// Lists have no index key.
    pub fn index_key(&self) -> Option<String> {
        match self {
            Self::Long(v) => Some(v.to_string()),
            Self::Double(v) => Some(v.to_string()),
            Self::Boolean(v) => Some(v.to_string()),
            Self::String(v) => Some(v.clone()),
            Self::Reference(r) => Some(r.to_string()),
            Self::List(_) => None,
        }
    }

    /// Encode as a JSON value. References become `repository/bucket/oid`.
    pub fn to_json(&self) -> TupleResult<serde_json::Value> {
        Ok(match self {
            Self::Long(v) => serde_json::Value::from(*v),
            Self::Double(v) => Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .ok_or_else(|| TupleError::Malformed(format!("non-finite double {v}")))?,
            Self::Boolean(v) => serde_json::Value::Bool(*v),
            Self::String(v) => serde_json::Value::String(v.clone()),
            Self::Reference(r) => serde_json::Value::String(r.to_string()),
            Self::List(items) => serde_json::Value::Array(
                items.iter().map(Value::to_json).collect::<TupleResult<_>>()?,
            ),
        })
    }

    /// Decode a JSON value. Objects, `null`, and nested arrays are rejected.
    pub fn from_json(json: &serde_json::Value) -> TupleResult<Self> {
        match json {
            serde_json::Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    if item.is_array() {
                        return Err(TupleError::Malformed("nested list".into()));
                    }
                    out.push(Self::scalar_from_json(item)?);
                }
                Ok(Self::List(out))
            }
            other => Self::scalar_from_json(other),
        }
    }

    fn scalar_from_json(json: &serde_json::Value) -> TupleResult<Self> {
        match json {
            serde_json::Value::Bool(b) => Ok(Self::Boolean(*b)),
            serde_json::Value::String(s) => Ok(Self::String(s.clone())),
            serde_json::Value::Number(n) => {
                if let Some(v) = n.as_i64() {
                    Ok(Self::Long(v))
                } else if let Some(v) = n.as_f64() {
                    Ok(Self::Double(v))
                } else {
                    Err(TupleError::Malformed(format!("number out of range: {n}")))
                }
            }
            serde_json::Value::Null => Err(TupleError::Malformed("null field value".into())),
            serde_json::Value::Object(_) => {
                Err(TupleError::Malformed("nested object field value".into()))
            }
            serde_json::Value::Array(_) => Err(TupleError::Malformed("nested list".into())),
        }
    }

    /// Coerce to `kind` where a lossless conversion exists.
    ///
    /// Longs widen to doubles and reference-shaped strings become
    /// references; everything else must already match.
    pub fn coerce(self, kind: ValueKind) -> Option<Self> {
        match (self, kind) {
            (v, k) if v.kind() == k => Some(v),
            (Self::Long(v), ValueKind::Double) => Some(Self::Double(v as f64)),
            (Self::String(s), ValueKind::Reference) => {
                StoreReference::parse(&s).ok().map(Self::Reference)
            }
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Long(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::List(v)
    }
}

impl From<StoreReference> for Value {
    fn from(v: StoreReference) -> Self {
        Self::Reference(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid::Oid;
    use serde_json::json;

    #[test]
    fn kind_names_roundtrip() {
        for kind in [
            ValueKind::Long,
            ValueKind::Double,
            ValueKind::Boolean,
            ValueKind::String,
            ValueKind::List,
            ValueKind::Reference,
        ] {
            assert_eq!(kind.as_str().parse::<ValueKind>().unwrap(), kind);
        }
        assert!("INT".parse::<ValueKind>().is_err());
    }

    #[test]
    fn integers_decode_as_long_and_fractions_as_double() {
        assert_eq!(Value::from_json(&json!(7)).unwrap(), Value::Long(7));
        assert_eq!(Value::from_json(&json!(2.5)).unwrap(), Value::Double(2.5));
    }

    #[test]
    fn rejects_null_objects_and_nested_lists() {
        assert!(Value::from_json(&json!(null)).is_err());
        assert!(Value::from_json(&json!({"a": 1})).is_err());
        assert!(Value::from_json(&json!([[1], 2])).is_err());
        assert!(Value::from_json(&json!([{"a": 1}])).is_err());
    }

    #[test]
    fn reference_encodes_as_path_string() {
        let r = StoreReference::new("people", "births", Oid::new(9).unwrap());
        assert_eq!(
            Value::Reference(r).to_json().unwrap(),
            json!("people/births/9")
        );
    }

    #[test]
    fn non_finite_double_cannot_be_encoded() {
        assert!(Value::Double(f64::NAN).to_json().is_err());
    }

    #[test]
    fn coercions() {
        assert_eq!(Value::Long(3).coerce(ValueKind::Double), Some(Value::Double(3.0)));
        assert!(matches!(
            Value::from("a/b/5").coerce(ValueKind::Reference),
            Some(Value::Reference(_))
        ));
        assert_eq!(Value::from("nope").coerce(ValueKind::Reference), None);
        assert_eq!(Value::Boolean(true).coerce(ValueKind::Long), None);
    }

    #[test]
    fn index_keys() {
        assert_eq!(Value::Long(-4).index_key().as_deref(), Some("-4"));
        assert_eq!(Value::from("x").index_key().as_deref(), Some("x"));
        assert_eq!(Value::List(vec![]).index_key(), None);
    }
}
