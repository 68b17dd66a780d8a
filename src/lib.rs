//! Taxograph - object-graph mapping with a persisted type hierarchy
//!
//! Persists typed application objects - and the class hierarchy itself -
//! into a property graph, so type membership is queryable in the graph
//! rather than only in process memory.
//!
//! # Architecture
//!
//! - **Descriptors**: declarative typed attributes with encode/decode to
//!   graph primitives
//! - **Registry**: process-wide, append-only catalog of type definitions
//! - **Synchronizer**: projects the hierarchy into type nodes + is-a edges,
//!   idempotently
//! - **Mapper**: instance records to node/edge payloads and back
//! - **Manager**: the save/query/delete façade over a pluggable store
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use taxograph::{AttrDef, Instance, Manager, MatchSpec, MemoryStore, TypeDef, TypeRegistry};
//!
//! # fn main() -> taxograph::Result<()> {
//! let registry = Arc::new(TypeRegistry::new());
//! registry.register(TypeDef::named("Entity").attr(AttrDef::uuid("id").unique()))?;
//! registry.register(
//!   TypeDef::named("Animal")
//!     .base("Entity")
//!     .attr(AttrDef::text("name").unique()),
//! )?;
//! registry.register(TypeDef::named("Lion").base("Animal"))?;
//!
//! let manager = Manager::new(Arc::new(MemoryStore::new()), registry);
//! manager.save(&Instance::of("Lion").set("name", "Tom"))?;
//!
//! // polymorphic: querying the base type finds the Lion
//! let found = manager.query(MatchSpec::of("Animal")).first()?.unwrap();
//! assert_eq!(found.type_id, "Lion");
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]

pub mod constants;
pub mod descriptor;
pub mod error;
pub mod manager;
pub mod mapper;
pub mod registry;
pub mod store;
pub mod sync;
pub mod types;

// Re-export commonly used items
pub use descriptor::{AttrDef, AttrKind, Direction, RelDef};
pub use error::{Error, Result};
pub use manager::{Manager, Query};
pub use mapper::{Instance, Relation};
pub use registry::{TypeDef, TypeRegistry};
pub use store::{
  CypherExecutor, CypherGraph, EdgeWrite, GraphStore, MatchSpec, MemoryStore, NodeRow,
  RelatedRow, Row, TypeRow,
};
pub use sync::Synchronizer;
pub use types::{PropMap, PropValue, TypeId};
