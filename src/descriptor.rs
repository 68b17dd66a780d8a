//! Attribute and relationship descriptors
//!
//! A descriptor declares one typed slot on a persistable type. Scalar
//! descriptors own the encode/decode of a single value to and from a graph
//! primitive; relationship descriptors carry no value encoding, they tag
//! which slots are graph edges and in which direction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{PropValue, TypeId};

// ============================================================================
// Attribute kinds
// ============================================================================

/// Closed set of scalar attribute kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "of")]
pub enum AttrKind {
  Bool,
  Int,
  Float,
  Text,
  /// UUID, stored as canonical hyphenated text
  Uuid,
  /// Timestamp, stored as RFC 3339 text
  DateTime,
  /// Text restricted to a closed list of admissible values
  Choice(Vec<String>),
}

impl AttrKind {
  /// Human-readable kind name for validation errors
  pub fn name(&self) -> &'static str {
    match self {
      AttrKind::Bool => "bool",
      AttrKind::Int => "int",
      AttrKind::Float => "float",
      AttrKind::Text => "text",
      AttrKind::Uuid => "uuid",
      AttrKind::DateTime => "datetime",
      AttrKind::Choice(_) => "choice",
    }
  }

  /// Check and normalize `value` into its stored primitive form.
  ///
  /// Total for all values admissible by the kind; anything else is a
  /// validation failure. Ints widen to floats for `Float`; `Uuid` and
  /// `DateTime` accept text and re-render it canonically.
  fn coerce(&self, value: &PropValue) -> Option<PropValue> {
    match (self, value) {
      (AttrKind::Bool, PropValue::Bool(_)) => Some(value.clone()),
      (AttrKind::Int, PropValue::Int(_)) => Some(value.clone()),
      (AttrKind::Float, PropValue::Float(_)) => Some(value.clone()),
      (AttrKind::Float, PropValue::Int(i)) => Some(PropValue::Float(*i as f64)),
      (AttrKind::Text, PropValue::Text(_)) => Some(value.clone()),
      (AttrKind::Uuid, PropValue::Text(s)) => {
        let parsed = Uuid::parse_str(s).ok()?;
        Some(PropValue::Text(parsed.to_string()))
      }
      (AttrKind::DateTime, PropValue::Text(s)) => {
        let parsed = DateTime::parse_from_rfc3339(s).ok()?;
        Some(PropValue::Text(parsed.with_timezone(&Utc).to_rfc3339()))
      }
      (AttrKind::Choice(choices), PropValue::Text(s)) => {
        if choices.iter().any(|c| c == s) {
          Some(value.clone())
        } else {
          None
        }
      }
      _ => None,
    }
  }
}

// ============================================================================
// Relationship direction
// ============================================================================

/// Direction of a relationship slot, seen from the declaring type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
  Outgoing,
  Incoming,
}

// ============================================================================
// Attribute descriptor
// ============================================================================

/// Declaration of one scalar attribute on a persistable type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttrDef {
  /// Attribute name; unique within the owning type's inheritance chain
  pub name: String,
  /// Value kind
  pub kind: AttrKind,
  /// Enforce a store-level uniqueness constraint on this attribute
  pub unique: bool,
  /// Reject saves where this attribute has no value and no default
  pub required: bool,
  /// Value used when an instance carries none
  pub default: Option<PropValue>,
}

impl AttrDef {
  fn new(name: &str, kind: AttrKind) -> Self {
    Self {
      name: name.to_string(),
      kind,
      unique: false,
      required: false,
      default: None,
    }
  }

  pub fn bool(name: &str) -> Self {
    Self::new(name, AttrKind::Bool)
  }

  pub fn int(name: &str) -> Self {
    Self::new(name, AttrKind::Int)
  }

  pub fn float(name: &str) -> Self {
    Self::new(name, AttrKind::Float)
  }

  pub fn text(name: &str) -> Self {
    Self::new(name, AttrKind::Text)
  }

  pub fn uuid(name: &str) -> Self {
    Self::new(name, AttrKind::Uuid)
  }

  pub fn datetime(name: &str) -> Self {
    Self::new(name, AttrKind::DateTime)
  }

  pub fn choice(name: &str, choices: &[&str]) -> Self {
    Self::new(
      name,
      AttrKind::Choice(choices.iter().map(|c| c.to_string()).collect()),
    )
  }

  pub fn unique(mut self) -> Self {
    self.unique = true;
    self
  }

  pub fn required(mut self) -> Self {
    self.required = true;
    self
  }

  pub fn default(mut self, value: impl Into<PropValue>) -> Self {
    self.default = Some(value.into());
    self
  }

  /// Encode a present value into its stored primitive form
  pub fn encode(&self, value: &PropValue) -> Result<PropValue> {
    self
      .kind
      .coerce(value)
      .ok_or_else(|| Error::validation(&self.name, self.kind.name(), value))
  }

  /// Encode an optional value, falling back to the default.
  ///
  /// A missing `Uuid` value generates a fresh v4 identifier, which is how
  /// instance identity gets established at first save. Missing required
  /// values fail validation; missing optional values encode to nothing.
  pub fn encode_opt(&self, value: Option<&PropValue>) -> Result<Option<PropValue>> {
    match value {
      Some(v) => self.encode(v).map(Some),
      None => match (&self.default, &self.kind) {
        (Some(d), _) => self.encode(d).map(Some),
        (None, AttrKind::Uuid) => Ok(Some(PropValue::Text(Uuid::new_v4().to_string()))),
        (None, _) if self.required => Err(Error::Validation {
          attr: self.name.clone(),
          expected: self.kind.name(),
          got: "nothing".to_string(),
        }),
        (None, _) => Ok(None),
      },
    }
  }

  /// Decode a stored primitive back into an attribute value
  pub fn decode(&self, value: &PropValue) -> Result<PropValue> {
    self
      .kind
      .coerce(value)
      .ok_or_else(|| Error::validation(&self.name, self.kind.name(), value))
  }
}

// ============================================================================
// Relationship descriptor
// ============================================================================

/// Declaration of one relationship slot on a persistable type.
///
/// The slot's values are edges of type `rel_type`, not node properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelDef {
  /// Slot name; unique within the owning type's inheritance chain
  pub name: String,
  /// Direction seen from the declaring type
  pub direction: Direction,
  /// Type id of the relation type travelling over this slot
  pub rel_type: TypeId,
}

impl RelDef {
  pub fn outgoing(name: &str, rel_type: &str) -> Self {
    Self {
      name: name.to_string(),
      direction: Direction::Outgoing,
      rel_type: rel_type.to_string(),
    }
  }

  pub fn incoming(name: &str, rel_type: &str) -> Self {
    Self {
      name: name.to_string(),
      direction: Direction::Incoming,
      rel_type: rel_type.to_string(),
    }
  }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_encode_matching_kinds() {
    assert_eq!(
      AttrDef::int("age").encode(&PropValue::Int(4)).unwrap(),
      PropValue::Int(4)
    );
    assert_eq!(
      AttrDef::bool("alive").encode(&PropValue::Bool(true)).unwrap(),
      PropValue::Bool(true)
    );
  }

  #[test]
  fn test_encode_rejects_mismatched_kind() {
    let err = AttrDef::int("age").encode(&PropValue::Text("four".into()));
    assert!(matches!(err, Err(Error::Validation { .. })));
  }

  #[test]
  fn test_float_widens_int() {
    assert_eq!(
      AttrDef::float("weight").encode(&PropValue::Int(3)).unwrap(),
      PropValue::Float(3.0)
    );
  }

  #[test]
  fn test_uuid_canonicalizes() {
    let attr = AttrDef::uuid("id");
    let got = attr
      .encode(&PropValue::Text("936DA01F9ABD4d9d80C702AF85C822A8".into()))
      .unwrap();
    assert_eq!(
      got,
      PropValue::Text("936da01f-9abd-4d9d-80c7-02af85c822a8".into())
    );
  }

  #[test]
  fn test_uuid_generates_when_missing() {
    let attr = AttrDef::uuid("id").unique();
    let a = attr.encode_opt(None).unwrap().unwrap();
    let b = attr.encode_opt(None).unwrap().unwrap();
    assert_ne!(a, b);
    assert!(Uuid::parse_str(a.as_text().unwrap()).is_ok());
  }

  #[test]
  fn test_datetime_round_trip() {
    let attr = AttrDef::datetime("seen_at");
    let encoded = attr
      .encode(&PropValue::Text("2024-05-01T12:30:00+02:00".into()))
      .unwrap();
    // normalized to UTC
    assert_eq!(encoded.as_text().unwrap(), "2024-05-01T10:30:00+00:00");
    assert_eq!(attr.decode(&encoded).unwrap(), encoded);
  }

  #[test]
  fn test_choice_membership() {
    let attr = AttrDef::choice("mood", &["happy", "grumpy"]);
    assert!(attr.encode(&PropValue::Text("happy".into())).is_ok());
    assert!(attr.encode(&PropValue::Text("bored".into())).is_err());
  }

  #[test]
  fn test_required_without_value_fails() {
    let attr = AttrDef::text("name").required();
    assert!(attr.encode_opt(None).is_err());
  }

  #[test]
  fn test_default_fills_missing_value() {
    let attr = AttrDef::int("legs").default(4);
    assert_eq!(attr.encode_opt(None).unwrap(), Some(PropValue::Int(4)));
  }
}
