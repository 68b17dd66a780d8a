//! Database boundary
//!
//! The mapping engine never talks to a graph database directly; it issues a
//! small, fixed set of operations against the [`GraphStore`] trait:
//!
//! - idempotent get-or-create of a type node, keyed by type id
//! - edge creation guarded by existence checks
//! - flat key -> primitive property writes
//! - pattern matches parameterized by type id and property filters
//!
//! Two implementations ship with the crate: [`MemoryStore`] for embedded use
//! and the test suite, and [`CypherGraph`] which renders every operation to
//! parameterized Cypher for an injected executor.

pub mod cypher;
pub mod memory;

pub use cypher::{CypherExecutor, CypherGraph, Row};
pub use memory::MemoryStore;

use crate::descriptor::Direction;
use crate::error::Result;
use crate::types::{PropMap, PropValue, TypeId};

/// Store-assigned node identifier, opaque to the mapping engine
pub type NodeId = u64;

// ============================================================================
// Query specification
// ============================================================================

/// A polymorphic instance match: all nodes whose instance-of chain reaches
/// `type_id`, restricted by equality filters on encoded properties.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchSpec {
  pub type_id: TypeId,
  pub filters: PropMap,
}

impl MatchSpec {
  pub fn of(type_id: &str) -> Self {
    Self {
      type_id: type_id.to_string(),
      filters: PropMap::new(),
    }
  }

  pub fn filter(mut self, attr: &str, value: impl Into<PropValue>) -> Self {
    self.filters.insert(attr.to_string(), value.into());
    self
  }
}

// ============================================================================
// Result rows
// ============================================================================

/// A matched node with its stored properties
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRow {
  pub id: NodeId,
  pub props: PropMap,
}

/// One neighbor reached over a typed edge
#[derive(Debug, Clone, PartialEq)]
pub struct RelatedRow {
  pub edge_props: PropMap,
  pub neighbor: NodeRow,
}

/// One persisted type node with its base list restored to declared order
#[derive(Debug, Clone, PartialEq)]
pub struct TypeRow {
  pub type_id: TypeId,
  pub bases: Vec<TypeId>,
  pub props: PropMap,
}

/// A relationship edge written together with a new instance node
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeWrite {
  pub edge_type: String,
  pub target: NodeId,
  /// True: instance -> target; false: target -> instance
  pub outgoing: bool,
  pub props: PropMap,
}

// ============================================================================
// GraphStore
// ============================================================================

/// The fixed operation set the mapping engine issues against a database.
///
/// Implementations own all genuine concurrency control: get-or-create must be
/// atomic (two concurrent callers resolve to one surviving node) and property
/// writes must check uniqueness constraints atomically with the write,
/// reporting violations as [`crate::Error::Uniqueness`].
pub trait GraphStore: Send + Sync {
  // ---- type graph ----

  /// Atomic get-or-create of the type node identified by `props["id"]`.
  /// An already existing node is success, not an error.
  fn ensure_type_node(&self, type_id: &str, props: PropMap) -> Result<NodeId>;

  /// Create the `ISA` edge from `child`'s type node to `base`'s unless it
  /// already exists; `base_index` records the declared parent position
  fn ensure_isa_edge(&self, child: &str, base: &str, base_index: usize) -> Result<()>;

  /// Declare a named uniqueness constraint over `(label, attr)`; idempotent
  fn declare_unique(&self, label: &str, attr: &str) -> Result<()>;

  /// Every persisted type node, ordered ancestors before descendants
  fn type_hierarchy(&self) -> Result<Vec<TypeRow>>;

  // ---- instance writes ----

  /// Create an instance node, its `INSTANCEOF` edge to the type node for
  /// `type_id`, and every pending relationship edge, as one atomic write.
  /// Constraint violations and missing edge targets write nothing.
  fn create_instance(
    &self,
    labels: &[String],
    props: PropMap,
    type_id: &str,
    edges: &[EdgeWrite],
  ) -> Result<NodeId>;

  /// Apply a property diff to an instance node. Values overwrite; names in
  /// `removed` are dropped. Constraint-checked like `create_instance`.
  fn update_instance(&self, node: NodeId, changes: PropMap, removed: &[String]) -> Result<()>;

  /// Create a typed, attribute-bearing edge between two existing nodes
  fn create_edge(&self, edge_type: &str, start: NodeId, end: NodeId, props: PropMap)
    -> Result<()>;

  /// Remove an instance node together with all incident edges.
  /// Returns (nodes removed, edges removed).
  fn delete_instance(&self, node: NodeId) -> Result<(u64, u64)>;

  /// Remove matching typed edges between two nodes; returns the count
  fn delete_edge(&self, edge_type: &str, start: NodeId, end: NodeId) -> Result<u64>;

  // ---- reads ----

  /// Point lookup through a uniqueness constraint index
  fn find_by_unique(&self, label: &str, attr: &str, value: &PropValue)
    -> Result<Option<NodeRow>>;

  /// Stored properties of one node, if it exists
  fn node_props(&self, node: NodeId) -> Result<Option<PropMap>>;

  /// Polymorphic pattern match over the instance-of / is-a chain
  fn match_instances(&self, spec: &MatchSpec) -> Result<Vec<NodeRow>>;

  /// Neighbors of `node` over `edge_type` in the given direction
  fn related(&self, node: NodeId, edge_type: &str, direction: Direction)
    -> Result<Vec<RelatedRow>>;
}
