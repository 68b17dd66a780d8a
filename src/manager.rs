//! Persistence manager
//!
//! The public façade over a graph-backed object store. Any instance can be
//! saved as long as its type is registered; type nodes, is-a edges and
//! instance-of edges are generated automatically on the way in.

use std::sync::Arc;

use tracing::debug;

use crate::constants::{PROP_TYPE, RESERVED_PROPS};
use crate::descriptor::{AttrKind, Direction};
use crate::error::{Error, Result};
use crate::mapper::{self, edge_type_name, Instance, Relation};
use crate::registry::{TypeDef, TypeRegistry};
use crate::store::{EdgeWrite, GraphStore, MatchSpec, NodeId, NodeRow};
use crate::sync::{DeclaredSlots, Synchronizer};
use crate::types::{PropMap, PropValue};

// ============================================================================
// Manager
// ============================================================================

/// Orchestrates save / query / delete against an external graph store.
///
/// Holds no instance state between calls; every operation is a fresh round
/// trip. The only session state is the synchronizer's established-types
/// cache, so independent managers over one store stay consistent.
pub struct Manager {
  store: Arc<dyn GraphStore>,
  registry: Arc<TypeRegistry>,
  sync: Synchronizer,
}

impl Manager {
  pub fn new(store: Arc<dyn GraphStore>, registry: Arc<TypeRegistry>) -> Self {
    Self {
      store,
      registry,
      sync: Synchronizer::new(),
    }
  }

  pub fn registry(&self) -> &TypeRegistry {
    &self.registry
  }

  /// Project `type_id` and its ancestors into the store (idempotent)
  pub fn ensure_type(&self, type_id: &str) -> Result<()> {
    self.sync.ensure_persisted(&self.registry, self.store.as_ref(), type_id)
  }

  // ==========================================================================
  // Save
  // ==========================================================================

  /// Persist an instance.
  ///
  /// A not-yet-persisted instance becomes a node plus its instance-of edge
  /// (one atomic store write); an instance found again through its identity
  /// attribute gets a property diff instead, and never a second instance-of
  /// edge. Returns the saved instance with generated values (identity UUIDs,
  /// defaults) filled in — keep it for subsequent saves.
  pub fn save(&self, instance: &Instance) -> Result<Instance> {
    self.ensure_type(&instance.type_id)?;

    let node = mapper::to_graph(&self.registry, instance)?;

    // resolve every link target before writing anything; a missing target
    // must not leave a half-written instance behind
    let mut edge_writes = Vec::new();
    for edge in &node.edges {
      self.ensure_type(&edge.rel_type)?;
      let target = self
        .locate(&edge.target)?
        .ok_or_else(|| Error::NotFound(format!("link target '{}'", edge.target.type_id)))?;
      let mut props = PropMap::new();
      props.insert(PROP_TYPE.to_string(), PropValue::Text(edge.rel_type.clone()));
      edge_writes.push((edge, EdgeWrite {
        edge_type: edge.edge_type.clone(),
        target: target.id,
        outgoing: edge.direction == Direction::Outgoing,
        props,
      }));
    }

    let node_id = match self.locate(instance)? {
      Some(row) => {
        let stored_type = row.props.get(PROP_TYPE).and_then(PropValue::as_text);
        if stored_type != Some(instance.type_id.as_str()) {
          let (label, attr, value) = self.identity_of(instance)?;
          return Err(Error::Uniqueness { label, attr, value });
        }
        let node_id = self.apply_diff(instance, &row, node.props.clone())?;

        // write only links the store does not already hold
        for (edge, write) in &edge_writes {
          let already = self
            .store
            .related(node_id, &write.edge_type, edge.direction)?
            .iter()
            .any(|row| row.neighbor.id == write.target);
          if !already {
            let (start, end) = if write.outgoing {
              (node_id, write.target)
            } else {
              (write.target, node_id)
            };
            self
              .store
              .create_edge(&write.edge_type, start, end, write.props.clone())?;
          }
        }
        node_id
      }
      None => {
        debug!(type_id = %instance.type_id, "creating instance node");
        let writes: Vec<EdgeWrite> =
          edge_writes.into_iter().map(|(_, write)| write).collect();
        self
          .store
          .create_instance(&node.labels, node.props.clone(), &instance.type_id, &writes)?
      }
    };

    let stored = self
      .store
      .node_props(node_id)?
      .ok_or_else(|| Error::NotFound(format!("node {}", node_id)))?;
    mapper::from_graph(&self.registry, &stored)
  }

  /// Diff the encoded state against the stored row and update if anything
  /// changed. Generated identifiers the caller did not supply keep their
  /// stored values rather than being re-generated.
  fn apply_diff(&self, instance: &Instance, row: &NodeRow, mut next: PropMap) -> Result<NodeId> {
    let attrs = self.registry.attrs_in_chain(&instance.type_id)?;
    for (name, (_, attr)) in &attrs {
      let freshly_generated = matches!(attr.kind, AttrKind::Uuid)
        && instance.props.get(name).is_none()
        && attr.default.is_none();
      if freshly_generated {
        if let Some(stored) = row.props.get(name) {
          next.insert(name.clone(), stored.clone());
        }
      }
    }

    let mut changes = PropMap::new();
    for (name, value) in &next {
      if row.props.get(name) != Some(value) {
        changes.insert(name.clone(), value.clone());
      }
    }
    let removed: Vec<String> = row
      .props
      .keys()
      .filter(|name| !RESERVED_PROPS.contains(&name.as_str()) && !next.contains_key(*name))
      .cloned()
      .collect();

    if !changes.is_empty() || !removed.is_empty() {
      debug!(type_id = %instance.type_id, node = row.id, "updating instance node");
      self.store.update_instance(row.id, changes, &removed)?;
    }
    Ok(row.id)
  }

  /// Persist a relation as a typed edge between two existing instances
  pub fn save_relation(&self, relation: &Relation) -> Result<()> {
    self.ensure_type(&relation.type_id)?;

    let start = self
      .locate(&relation.start)?
      .ok_or_else(|| Error::NotFound(format!("relation start '{}'", relation.start.type_id)))?;
    let end = self
      .locate(&relation.end)?
      .ok_or_else(|| Error::NotFound(format!("relation end '{}'", relation.end.type_id)))?;

    let props = mapper::relation_to_graph(&self.registry, relation)?;
    self
      .store
      .create_edge(&edge_type_name(&relation.type_id), start.id, end.id, props)
  }

  // ==========================================================================
  // Read
  // ==========================================================================

  /// Point lookup by a unique attribute
  pub fn get(&self, type_id: &str, attr: &str, value: impl Into<PropValue>) -> Result<Option<Instance>> {
    let uniques = self.registry.unique_attrs(type_id)?;
    let Some((declaring, attr_def)) = uniques.into_iter().find(|(_, a)| a.name == attr) else {
      return Err(Error::NoUniqueAttribute(type_id.to_string()));
    };

    let encoded = attr_def.encode(&value.into())?;
    let Some(row) = self.store.find_by_unique(&declaring, attr, &encoded)? else {
      return Ok(None);
    };

    let found = mapper::from_graph(&self.registry, &row.props)?;
    // the unique attribute may be declared on a shared ancestor; only
    // answer for instances that actually are-a `type_id`
    let in_chain = self
      .registry
      .chain(&found.type_id)?
      .iter()
      .any(|def| def.id == type_id);
    Ok(in_chain.then_some(found))
  }

  /// Build a lazy, restartable polymorphic query
  pub fn query(&self, spec: MatchSpec) -> Query<'_> {
    Query { manager: self, spec }
  }

  /// Neighbors over the relationship slot `slot`, as (neighbor, relation)
  /// pairs
  pub fn related(&self, instance: &Instance, slot: &str) -> Result<Vec<(Instance, Instance)>> {
    let node = self
      .locate(instance)?
      .ok_or_else(|| Error::NotFound(format!("instance of '{}'", instance.type_id)))?;

    let rels = self.registry.rels_in_chain(&instance.type_id)?;
    let Some((_, rel)) = rels.get(slot) else {
      return Err(Error::Validation {
        attr: slot.to_string(),
        expected: "a declared relationship slot",
        got: format!("undeclared name on '{}'", instance.type_id),
      });
    };

    let rows = self
      .store
      .related(node.id, &edge_type_name(&rel.rel_type), rel.direction)?;

    let mut out = Vec::new();
    for row in rows {
      let neighbor = mapper::from_graph(&self.registry, &row.neighbor.props)?;
      let relation = mapper::from_graph(&self.registry, &row.edge_props)?;
      out.push((neighbor, relation));
    }
    Ok(out)
  }

  // ==========================================================================
  // Delete
  // ==========================================================================

  /// Remove an instance node, its instance-of edge and incident relation
  /// edges. Type nodes and is-a edges are never touched: types are immortal
  /// once synchronized. Returns (nodes removed, edges removed).
  pub fn delete(&self, instance: &Instance) -> Result<(u64, u64)> {
    if self.registry.unique_attrs(&instance.type_id)?.is_empty() {
      return Err(Error::NoUniqueAttribute(instance.type_id.clone()));
    }
    let node = self
      .locate(instance)?
      .ok_or_else(|| Error::NotFound(format!("instance of '{}'", instance.type_id)))?;
    debug!(type_id = %instance.type_id, node = node.id, "deleting instance node");
    self.store.delete_instance(node.id)
  }

  /// Remove the edges persisted for `relation`; returns the count
  pub fn delete_relation(&self, relation: &Relation) -> Result<u64> {
    let start = self
      .locate(&relation.start)?
      .ok_or_else(|| Error::NotFound(format!("relation start '{}'", relation.start.type_id)))?;
    let end = self
      .locate(&relation.end)?
      .ok_or_else(|| Error::NotFound(format!("relation end '{}'", relation.end.type_id)))?;
    self
      .store
      .delete_edge(&edge_type_name(&relation.type_id), start.id, end.id)
  }

  // ==========================================================================
  // Type loading
  // ==========================================================================

  /// Register every persisted type missing from the in-memory registry,
  /// reconstructing descriptors from the type nodes' declared-slot JSON.
  /// Returns the number of newly registered types.
  pub fn load_types(&self) -> Result<usize> {
    let mut loaded = 0;
    for row in self.store.type_hierarchy()? {
      if self.registry.contains(&row.type_id) {
        self.sync.mark_synced(&row.type_id);
        continue;
      }

      let slots = match row.props.get(crate::constants::PROP_ATTRS).and_then(PropValue::as_text) {
        Some(json) => serde_json::from_str::<DeclaredSlots>(json)
          .map_err(|e| Error::Deserialization(format!("type '{}': {}", row.type_id, e)))?,
        None => DeclaredSlots { attrs: Vec::new(), rels: Vec::new() },
      };

      // rows arrive ancestors first, so bases are always registered already
      self.registry.register(TypeDef {
        id: row.type_id.clone(),
        bases: row.bases.clone(),
        attrs: slots.attrs,
        rels: slots.rels,
      })?;
      self.sync.mark_synced(&row.type_id);
      loaded += 1;
    }
    debug!(loaded, "loaded persisted types");
    Ok(loaded)
  }

  // ==========================================================================
  // Identity
  // ==========================================================================

  /// Find the stored node for `instance` through the first unique attribute
  /// the instance carries a value for (declared order, ancestors first)
  fn locate(&self, instance: &Instance) -> Result<Option<NodeRow>> {
    for (declaring, attr) in self.registry.unique_attrs(&instance.type_id)? {
      let value = instance
        .props
        .get(&attr.name)
        .cloned()
        .or_else(|| attr.default.clone());
      let Some(value) = value else { continue };
      let encoded = attr.encode(&value)?;
      return self.store.find_by_unique(&declaring, &attr.name, &encoded);
    }
    Ok(None)
  }

  /// (label, attr, value) triple describing an instance's identity, for
  /// uniqueness errors
  fn identity_of(&self, instance: &Instance) -> Result<(String, String, String)> {
    for (declaring, attr) in self.registry.unique_attrs(&instance.type_id)? {
      if let Some(value) = instance.props.get(&attr.name) {
        return Ok((declaring, attr.name, value.to_string()));
      }
    }
    Err(Error::NoUniqueAttribute(instance.type_id.clone()))
  }
}

// ============================================================================
// Query
// ============================================================================

/// A polymorphic query bound to a manager.
///
/// Lazy and restartable: every call to [`Query::iter`] (or any method built
/// on it) re-issues the match against the store — results are never cached
/// client-side.
pub struct Query<'a> {
  manager: &'a Manager,
  spec: MatchSpec,
}

impl Query<'_> {
  /// Issue the match and decode each row
  pub fn iter(&self) -> Result<impl Iterator<Item = Result<Instance>> + '_> {
    let spec = self.encoded_spec()?;
    let rows = self.manager.store.match_instances(&spec)?;
    debug!(type_id = %self.spec.type_id, matches = rows.len(), "query issued");
    Ok(
      rows
        .into_iter()
        .map(move |row| mapper::from_graph(&self.manager.registry, &row.props)),
    )
  }

  /// All matching instances
  pub fn collect(&self) -> Result<Vec<Instance>> {
    self.iter()?.collect()
  }

  /// First matching instance, if any
  pub fn first(&self) -> Result<Option<Instance>> {
    self.iter()?.next().transpose()
  }

  /// Number of matching instances
  pub fn count(&self) -> Result<usize> {
    Ok(self.iter()?.count())
  }

  /// Encode filter values through their descriptors so stored and filtered
  /// representations agree
  fn encoded_spec(&self) -> Result<MatchSpec> {
    let attrs = self.manager.registry.attrs_in_chain(&self.spec.type_id)?;
    let mut spec = MatchSpec::of(&self.spec.type_id);
    for (name, value) in &self.spec.filters {
      let Some((_, attr)) = attrs.get(name) else {
        return Err(Error::Validation {
          attr: name.clone(),
          expected: "a declared attribute",
          got: format!("undeclared name on '{}'", self.spec.type_id),
        });
      };
      spec.filters.insert(name.clone(), attr.encode(value)?);
    }
    Ok(spec)
  }
}

// ============================================================================
// Tests
// ============================================================================
