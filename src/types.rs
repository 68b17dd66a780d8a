//! Primitive property values and maps
//!
//! `PropValue` is the closed set of primitives the external database can
//! store natively. Descriptors encode typed attribute values into these and
//! decode them back; nothing richer ever crosses the store boundary.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Stable identifier of a persistable type (derived from the type name)
pub type TypeId = String;

/// Flat key -> primitive map, preserving insertion order
pub type PropMap = IndexMap<String, PropValue>;

// ============================================================================
// PropValue
// ============================================================================

/// A primitive value storable as a graph property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
  Bool(bool),
  Int(i64),
  Float(f64),
  Text(String),
  /// Homogeneous list of primitives (used by choice lists)
  List(Vec<PropValue>),
}

impl PropValue {
  /// Name of this value's kind, for error messages
  pub fn kind_name(&self) -> &'static str {
    match self {
      PropValue::Bool(_) => "bool",
      PropValue::Int(_) => "int",
      PropValue::Float(_) => "float",
      PropValue::Text(_) => "text",
      PropValue::List(_) => "list",
    }
  }

  pub fn as_text(&self) -> Option<&str> {
    match self {
      PropValue::Text(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_int(&self) -> Option<i64> {
    match self {
      PropValue::Int(i) => Some(*i),
      _ => None,
    }
  }

  pub fn as_bool(&self) -> Option<bool> {
    match self {
      PropValue::Bool(b) => Some(*b),
      _ => None,
    }
  }

  pub fn as_float(&self) -> Option<f64> {
    match self {
      PropValue::Float(f) => Some(*f),
      _ => None,
    }
  }
}

impl std::fmt::Display for PropValue {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      PropValue::Bool(b) => write!(f, "{}", b),
      PropValue::Int(i) => write!(f, "{}", i),
      PropValue::Float(x) => write!(f, "{}", x),
      PropValue::Text(s) => write!(f, "{}", s),
      PropValue::List(items) => {
        write!(f, "[")?;
        for (i, item) in items.iter().enumerate() {
          if i > 0 {
            write!(f, ", ")?;
          }
          write!(f, "{}", item)?;
        }
        write!(f, "]")
      }
    }
  }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<bool> for PropValue {
  fn from(v: bool) -> Self {
    PropValue::Bool(v)
  }
}

impl From<i64> for PropValue {
  fn from(v: i64) -> Self {
    PropValue::Int(v)
  }
}

impl From<i32> for PropValue {
  fn from(v: i32) -> Self {
    PropValue::Int(v as i64)
  }
}

impl From<f64> for PropValue {
  fn from(v: f64) -> Self {
    PropValue::Float(v)
  }
}

impl From<&str> for PropValue {
  fn from(v: &str) -> Self {
    PropValue::Text(v.to_string())
  }
}

impl From<String> for PropValue {
  fn from(v: String) -> Self {
    PropValue::Text(v)
  }
}

impl From<uuid::Uuid> for PropValue {
  fn from(v: uuid::Uuid) -> Self {
    PropValue::Text(v.to_string())
  }
}

impl From<chrono::DateTime<chrono::Utc>> for PropValue {
  fn from(v: chrono::DateTime<chrono::Utc>) -> Self {
    PropValue::Text(v.to_rfc3339())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_kind_names() {
    assert_eq!(PropValue::Bool(true).kind_name(), "bool");
    assert_eq!(PropValue::Int(3).kind_name(), "int");
    assert_eq!(PropValue::Text("x".into()).kind_name(), "text");
  }

  #[test]
  fn test_accessors() {
    assert_eq!(PropValue::Int(7).as_int(), Some(7));
    assert_eq!(PropValue::Int(7).as_text(), None);
    assert_eq!(PropValue::Text("a".into()).as_text(), Some("a"));
  }

  #[test]
  fn test_serde_untagged() {
    let v: PropValue = serde_json::from_str("42").unwrap();
    assert_eq!(v, PropValue::Int(42));
    let v: PropValue = serde_json::from_str("\"hi\"").unwrap();
    assert_eq!(v, PropValue::Text("hi".into()));
    assert_eq!(serde_json::to_string(&PropValue::Bool(true)).unwrap(), "true");
  }
}
