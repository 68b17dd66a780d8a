//! Error types for taxograph

use thiserror::Error;

/// Convenience result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// All errors surfaced by the mapping engine
#[derive(Debug, Error)]
pub enum Error {
  /// A value does not match its descriptor's declared kind.
  /// Raised locally at encode time; never persisted.
  #[error("invalid value for attribute '{attr}': expected {expected}, got {got}")]
  Validation {
    attr: String,
    expected: &'static str,
    got: String,
  },

  /// Two distinct type definitions claim the same type id
  #[error("type '{0}' is already registered with a different definition")]
  DuplicateType(String),

  /// An attribute name collides with one declared elsewhere in the
  /// inheritance chain, or with a reserved property name
  #[error("attribute '{attr}' on type '{type_id}' conflicts with a declaration on '{declared_on}'")]
  DuplicateAttribute {
    type_id: String,
    attr: String,
    declared_on: String,
  },

  /// A base named in a type definition is not registered
  #[error("base '{base}' of type '{type_id}' is not registered")]
  UnknownBase { type_id: String, base: String },

  /// Saving would violate a uniqueness constraint on another node
  #[error("value {value} for unique attribute '{label}.{attr}' already exists")]
  Uniqueness {
    label: String,
    attr: String,
    value: String,
  },

  /// A persisted type id has no definition in the in-process registry
  #[error("unknown type '{0}'")]
  UnknownType(String),

  /// An operation needed an object that does not exist in the store
  #[error("not found: {0}")]
  NotFound(String),

  /// An operation required a unique attribute but the type declares none
  #[error("type '{0}' has no unique attribute to identify instances by")]
  NoUniqueAttribute(String),

  /// Persisted data could not be turned back into an object
  #[error("deserialization failed: {0}")]
  Deserialization(String),

  /// An error surfaced by the underlying store or its transport
  #[error("store error: {0}")]
  Store(String),
}

impl Error {
  /// Build a `Validation` error for `attr` given the observed value
  pub fn validation(attr: &str, expected: &'static str, got: &crate::types::PropValue) -> Self {
    Error::Validation {
      attr: attr.to_string(),
      expected,
      got: got.kind_name().to_string(),
    }
  }
}
