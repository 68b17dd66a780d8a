//! Type-graph synchronization
//!
//! Projects the registry's inheritance graph into persisted type nodes and
//! `ISA` edges. Ancestors are always written before descendants, every write
//! is a guarded get-or-create against the store, and a per-manager session
//! cache keeps established types from being re-examined on every save.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{PROP_ATTRS, PROP_ID, PROP_TYPE, TYPE_NODE_TYPE};
use crate::descriptor::{AttrDef, RelDef};
use crate::error::{Error, Result};
use crate::registry::{TypeDef, TypeRegistry};
use crate::store::GraphStore;
use crate::types::{PropMap, PropValue, TypeId};

// ============================================================================
// Declared-slot projection
// ============================================================================

/// JSON shape of a type node's `attrs` property: the descriptors the type
/// declares itself (inherited ones live on their declaring type's node)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeclaredSlots {
  pub attrs: Vec<AttrDef>,
  pub rels: Vec<RelDef>,
}

impl DeclaredSlots {
  pub fn of(def: &TypeDef) -> Self {
    Self {
      attrs: def.attrs.clone(),
      rels: def.rels.clone(),
    }
  }
}

/// Properties written onto the type node for `def`
pub fn type_node_props(def: &TypeDef) -> Result<PropMap> {
  let slots = serde_json::to_string(&DeclaredSlots::of(def))
    .map_err(|e| Error::Deserialization(e.to_string()))?;

  let mut props = PropMap::new();
  props.insert(
    PROP_TYPE.to_string(),
    PropValue::Text(TYPE_NODE_TYPE.to_string()),
  );
  props.insert(PROP_ID.to_string(), PropValue::Text(def.id.clone()));
  props.insert(PROP_ATTRS.to_string(), PropValue::Text(slots));
  Ok(props)
}

// ============================================================================
// Synchronizer
// ============================================================================

/// Keeps the persisted type graph consistent with the registry.
///
/// The cache is per-synchronizer (and so per-manager) session state, not
/// global: a fresh manager re-verifies against the store, which is what
/// makes concurrent first-use races safe — both callers issue guarded
/// get-or-creates and "already exists" is success.
#[derive(Default)]
pub struct Synchronizer {
  synced: Mutex<HashSet<TypeId>>,
}

impl Synchronizer {
  pub fn new() -> Self {
    Self::default()
  }

  /// True if this session already established `type_id`
  pub fn is_synced(&self, type_id: &str) -> bool {
    self.synced.lock().contains(type_id)
  }

  /// Mark a type as established without writing (used after loading
  /// the hierarchy from the store)
  pub fn mark_synced(&self, type_id: &str) {
    self.synced.lock().insert(type_id.to_string());
  }

  /// Ensure type nodes and is-a edges exist for `type_id` and every
  /// ancestor. Idempotent; repeat calls in one session write nothing.
  pub fn ensure_persisted(
    &self,
    registry: &TypeRegistry,
    store: &dyn GraphStore,
    type_id: &str,
  ) -> Result<()> {
    if self.is_synced(type_id) {
      return Ok(());
    }

    let chain = registry.chain(type_id)?;

    // ancestors before descendants: order by inheritance depth so every
    // is-a edge is created after both of its endpoints
    let mut depths: HashMap<&str, usize> = HashMap::new();
    for def in chain.iter().rev() {
      let depth = def
        .bases
        .iter()
        .filter_map(|base| depths.get(base.as_str()))
        .max()
        .map_or(0, |d| d + 1);
      depths.insert(def.id.as_str(), depth);
    }
    let mut ordered: Vec<_> = chain.iter().collect();
    ordered.sort_by_key(|def| depths.get(def.id.as_str()).copied().unwrap_or(0));

    let mut synced = self.synced.lock();
    for def in ordered {
      if synced.contains(&def.id) {
        continue;
      }
      debug!(type_id = %def.id, "synchronizing type node");
      store.ensure_type_node(&def.id, type_node_props(def)?)?;

      for (index, base) in def.bases.iter().enumerate() {
        store.ensure_isa_edge(&def.id, base, index)?;
      }

      for attr in &def.attrs {
        if attr.unique {
          store.declare_unique(&def.id, &attr.name)?;
        }
      }

      synced.insert(def.id.clone());
    }
    Ok(())
  }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
  use super::*;
  use crate::constants::REL_ISA;
  use crate::descriptor::AttrDef;
  use crate::store::MemoryStore;

  fn registry() -> TypeRegistry {
    let registry = TypeRegistry::new();
    registry
      .register(TypeDef::named("Entity").attr(AttrDef::uuid("id").unique()))
      .unwrap();
    registry
      .register(
        TypeDef::named("Animal")
          .base("Entity")
          .attr(AttrDef::text("name").unique()),
      )
      .unwrap();
    registry
      .register(TypeDef::named("Lion").base("Animal"))
      .unwrap();
    registry
  }

  #[test]
  fn test_whole_chain_is_persisted() {
    let registry = registry();
    let store = MemoryStore::new();
    let sync = Synchronizer::new();

    sync.ensure_persisted(&registry, &store, "Lion").unwrap();

    assert_eq!(store.node_count(), 3);
    assert_eq!(store.edge_count(REL_ISA), 2);
    let ids: Vec<_> = store
      .type_hierarchy()
      .unwrap()
      .into_iter()
      .map(|row| row.type_id)
      .collect();
    assert_eq!(ids, vec!["Entity", "Animal", "Lion"]);
  }

  #[test]
  fn test_repeat_sync_writes_nothing() {
    let registry = registry();
    let store = MemoryStore::new();
    let sync = Synchronizer::new();

    sync.ensure_persisted(&registry, &store, "Lion").unwrap();
    sync.ensure_persisted(&registry, &store, "Lion").unwrap();
    // and a fresh session against the same store converges too
    Synchronizer::new()
      .ensure_persisted(&registry, &store, "Lion")
      .unwrap();

    assert_eq!(store.node_count(), 3);
    assert_eq!(store.edge_count(REL_ISA), 2);
  }

  #[test]
  fn test_diamond_gets_one_edge_per_parent_pair() {
    let registry = TypeRegistry::new();
    registry.register(TypeDef::named("Entity")).unwrap();
    registry
      .register(TypeDef::named("Flying").base("Entity"))
      .unwrap();
    registry
      .register(TypeDef::named("Swimming").base("Entity"))
      .unwrap();
    registry
      .register(TypeDef::named("Duck").base("Flying").base("Swimming"))
      .unwrap();

    let store = MemoryStore::new();
    let sync = Synchronizer::new();
    sync.ensure_persisted(&registry, &store, "Duck").unwrap();

    // Entity once, despite two paths; four edges total
    assert_eq!(store.node_count(), 4);
    assert_eq!(store.edge_count(REL_ISA), 4);

    let rows = store.type_hierarchy().unwrap();
    let duck = rows.iter().find(|row| row.type_id == "Duck").unwrap();
    assert_eq!(duck.bases, vec!["Flying", "Swimming"]);
  }

  #[test]
  fn test_constraints_declared_on_declaring_type() {
    let registry = registry();
    let store = MemoryStore::new();
    Synchronizer::new()
      .ensure_persisted(&registry, &store, "Lion")
      .unwrap();

    // name is constrained on Animal; creating two Animal-labelled nodes
    // with the same name must now fail at the store
    let mut props = PropMap::new();
    props.insert("name".to_string(), PropValue::Text("Tom".to_string()));
    let labels = vec!["Animal".to_string()];
    store
      .create_instance(&labels, props.clone(), "Animal", &[])
      .unwrap();
    let err = store.create_instance(&labels, props, "Animal", &[]);
    assert!(matches!(err, Err(Error::Uniqueness { .. })));
  }
}
