//! Configuration properties
//!
//! [`Properties`] is an insertion-ordered map with case-insensitive keys.
//! The spelling of the first insertion of a key is kept for iteration.

use cfgadmin_filter::{AttributeValue, Attributes};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Property naming the configuration a map belongs to
pub const SERVICE_PID: &str = "service.pid";

/// Property naming the factory of a factory member configuration
pub const SERVICE_FACTORY_PID: &str = "service.factoryPid";

/// Property holding the static owner location in persisted maps
pub const SERVICE_BUNDLE_LOCATION: &str = "service.bundleLocation";

/// A single property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
}

impl Value {
    /// String content, if this is a string value
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer content, if this is an integer value
    #[inline]
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Boolean content, if this is a boolean value
    #[inline]
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    fn as_attribute(&self) -> AttributeValue<'_> {
        match self {
            Self::Boolean(b) => AttributeValue::Bool(*b),
            Self::Integer(i) => AttributeValue::Int(*i),
            Self::Float(f) => AttributeValue::Float(*f),
            Self::String(s) => AttributeValue::Str(s),
            Self::List(items) => AttributeValue::List(items.iter().map(Self::as_attribute).collect()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => f.write_str(s),
            Self::List(items) => {
                f.write_str("[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Self::List(value.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    key: String,
    value: Value,
}

/// Case-insensitive, insertion-ordered property map
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "IndexMap<String, Value>", into = "IndexMap<String, Value>")]
pub struct Properties {
    entries: IndexMap<String, Entry>,
}

impl Properties {
    /// Create empty properties
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, returning the previous value for the key.
    ///
    /// Replacing a value keeps the original key spelling.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.entries.get_mut(&key.to_lowercase()) {
            Some(entry) => Some(std::mem::replace(&mut entry.value, value)),
            None => {
                self.entries.insert(key.to_lowercase(), Entry { key, value });
                None
            }
        }
    }

    /// Builder-style insert
    #[inline]
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Look up a value, ignoring key case
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(&key.to_lowercase()).map(|e| &e.value)
    }

    /// Look up a string value
    #[inline]
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Remove a value, ignoring key case
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries
            .shift_remove(&key.to_lowercase())
            .map(|e| e.value)
    }

    /// Check for a key, ignoring case
    #[inline]
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_lowercase())
    }

    /// Number of entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in insertion order with their original key spelling
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.values().map(|e| (e.key.as_str(), &e.value))
    }

    /// Keys in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(|e| e.key.as_str())
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut props = Self::new();
        for (k, v) in iter {
            props.insert(k, v);
        }
        props
    }
}

impl From<IndexMap<String, Value>> for Properties {
    fn from(map: IndexMap<String, Value>) -> Self {
        map.into_iter().collect()
    }
}

impl From<Properties> for IndexMap<String, Value> {
    fn from(props: Properties) -> Self {
        props
            .entries
            .into_values()
            .map(|e| (e.key, e.value))
            .collect()
    }
}

impl Attributes for Properties {
    fn attribute(&self, name: &str) -> Option<AttributeValue<'_>> {
        self.get(name).map(Value::as_attribute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfgadmin_filter::Filter;

    #[test]
    fn keys_are_case_insensitive() {
        let mut props = Properties::new();
        props.insert("Level", 5);
        assert_eq!(props.get("level"), Some(&Value::Integer(5)));
        assert_eq!(props.get("LEVEL"), Some(&Value::Integer(5)));

        let previous = props.insert("LEVEL", 6);
        assert_eq!(previous, Some(Value::Integer(5)));
        assert_eq!(props.len(), 1);
        assert_eq!(props.keys().collect::<Vec<_>>(), vec!["Level"]);
    }

    #[test]
    fn iteration_keeps_insertion_order() {
        let props = Properties::new().with("b", 1).with("a", 2).with("c", 3);
        let keys: Vec<_> = props.keys().collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn remove_keeps_remaining_order() {
        let mut props = Properties::new().with("a", 1).with("b", 2).with("c", 3);
        assert_eq!(props.remove("B"), Some(Value::Integer(2)));
        assert_eq!(props.keys().collect::<Vec<_>>(), vec!["a", "c"]);
        assert!(!props.contains_key("b"));
    }

    #[test]
    fn equality_ignores_order() {
        let a = Properties::new().with("x", 1).with("y", "two");
        let b = Properties::new().with("y", "two").with("x", 1);
        assert_eq!(a, b);
    }

    #[test]
    fn filters_match_properties() {
        let props = Properties::new()
            .with(SERVICE_PID, "svc.A")
            .with("level", 5)
            .with("hosts", vec!["a", "b"]);
        let filter = Filter::parse("(&(Service.Pid=svc.A)(level>=5)(hosts=b))").unwrap();
        assert!(filter.matches(&props));
    }

    #[test]
    fn deserializes_untagged_values() {
        let props: Properties = serde_json::from_str(
            r#"{"service.pid": "svc.A", "Level": 5, "ratio": 0.5, "debug": true, "hosts": ["a", "b"]}"#,
        )
        .unwrap();

        assert_eq!(props.get_str(SERVICE_PID), Some("svc.A"));
        assert_eq!(props.get("level"), Some(&Value::Integer(5)));
        assert_eq!(props.get("ratio"), Some(&Value::Float(0.5)));
        assert_eq!(props.get("debug").and_then(Value::as_bool), Some(true));
        assert_eq!(props.get("hosts"), Some(&Value::from(vec!["a", "b"])));

        let json = serde_json::to_value(&props).unwrap();
        assert_eq!(json["Level"], serde_json::json!(5));
    }

    #[test]
    fn value_display() {
        assert_eq!(Value::from(vec![1, 2]).to_string(), "[1, 2]");
        assert_eq!(Value::from("x").to_string(), "x");
    }
}
