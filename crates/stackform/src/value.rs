//! Template values.
//!
//! [`CfnValue`] is the value space of a CloudFormation document, before and
//! after resolution. Strings (and NaN-boxed numbers) may carry embedded
//! token markers; everything else is plain data. The resolver walks this
//! sum type exhaustively, so "is this a string, a list or a map" is a
//! pattern match rather than a runtime type probe.

use std::collections::BTreeMap;

/// A CloudFormation document value.
///
/// `Null` stands for "omit this value": after resolution, map entries and
/// list elements that came out `Null` are dropped from the document.
#[derive(Clone, Debug, PartialEq)]
pub enum CfnValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<CfnValue>),
    Map(BTreeMap<String, CfnValue>),
}

impl CfnValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CfnValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CfnValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[CfnValue]> {
        match self {
            CfnValue::List(xs) => Some(xs),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, CfnValue>> {
        match self {
            CfnValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// A short kind name, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            CfnValue::Null => "null",
            CfnValue::Bool(_) => "bool",
            CfnValue::Number(_) => "number",
            CfnValue::String(_) => "string",
            CfnValue::List(_) => "list",
            CfnValue::Map(_) => "map",
        }
    }

    /// Build a map value from key/value entries.
    pub fn object<K, I>(entries: I) -> CfnValue
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, CfnValue)>,
    {
        CfnValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect::<BTreeMap<String, CfnValue>>(),
        )
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            CfnValue::Null => serde_json::Value::Null,
            CfnValue::Bool(b) => serde_json::Value::Bool(*b),
            CfnValue::Number(n) => {
                // Render integral numbers without a fractional part.
                if n.fract() == 0.0 && n.is_finite() && *n >= i64::MIN as f64 && *n <= i64::MAX as f64
                {
                    serde_json::Value::Number(serde_json::Number::from(*n as i64))
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null)
                }
            }
            CfnValue::String(s) => serde_json::Value::String(s.clone()),
            CfnValue::List(xs) => {
                serde_json::Value::Array(xs.iter().map(CfnValue::to_json).collect())
            }
            CfnValue::Map(m) => serde_json::Value::Object(
                m.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect::<serde_json::Map<String, serde_json::Value>>(),
            ),
        }
    }

    pub fn from_json(value: &serde_json::Value) -> CfnValue {
        match value {
            serde_json::Value::Null => CfnValue::Null,
            serde_json::Value::Bool(b) => CfnValue::Bool(*b),
            serde_json::Value::Number(n) => CfnValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => CfnValue::String(s.clone()),
            serde_json::Value::Array(xs) => {
                CfnValue::List(xs.iter().map(CfnValue::from_json).collect())
            }
            serde_json::Value::Object(m) => CfnValue::Map(
                m.iter()
                    .map(|(k, v)| (k.clone(), CfnValue::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for CfnValue {
    fn from(value: &str) -> Self {
        CfnValue::String(value.to_owned())
    }
}

impl From<String> for CfnValue {
    fn from(value: String) -> Self {
        CfnValue::String(value)
    }
}

impl From<bool> for CfnValue {
    fn from(value: bool) -> Self {
        CfnValue::Bool(value)
    }
}

impl From<f64> for CfnValue {
    fn from(value: f64) -> Self {
        CfnValue::Number(value)
    }
}

impl From<i64> for CfnValue {
    fn from(value: i64) -> Self {
        CfnValue::Number(value as f64)
    }
}

impl From<Vec<String>> for CfnValue {
    fn from(value: Vec<String>) -> Self {
        CfnValue::List(value.into_iter().map(CfnValue::String).collect())
    }
}

impl From<Vec<CfnValue>> for CfnValue {
    fn from(value: Vec<CfnValue>) -> Self {
        CfnValue::List(value)
    }
}

impl<T: Into<CfnValue>> From<Option<T>> for CfnValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(CfnValue::Null)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn json_round_trip() {
        let value = CfnValue::object([
            ("Name", CfnValue::from("my-bucket")),
            ("Versioned", CfnValue::from(true)),
            ("Count", CfnValue::from(3i64)),
            (
                "Tags",
                CfnValue::from(vec!["a".to_owned(), "b".to_owned()]),
            ),
        ]);
        let json = value.to_json();
        assert_eq!(
            serde_json::json!({
                "Name": "my-bucket",
                "Versioned": true,
                "Count": 3,
                "Tags": ["a", "b"],
            }),
            json
        );
        assert_eq!(value, CfnValue::from_json(&json));
    }

    #[test]
    fn integral_numbers_render_without_fraction() {
        assert_eq!(serde_json::json!(42), CfnValue::Number(42.0).to_json());
        assert_eq!(serde_json::json!(1.5), CfnValue::Number(1.5).to_json());
    }
}
