//! Instance mapping
//!
//! Converts application objects to graph payloads and back. Instances are
//! explicit records (a type id plus a property map), not reflected language
//! objects; everything the mapper needs to know about a type comes from the
//! registry.

use tracing::trace;

use crate::constants::{PROP_TYPE, RESERVED_PROPS};
use crate::descriptor::Direction;
use crate::error::{Error, Result};
use crate::registry::TypeRegistry;
use crate::types::{PropMap, PropValue, TypeId};

// ============================================================================
// Instance
// ============================================================================

/// A runtime object of some persistable type
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
  pub type_id: TypeId,
  /// Scalar attribute values, keyed by descriptor name
  pub props: PropMap,
  /// Pending relationship links: (slot name, target instance)
  pub links: Vec<(String, Instance)>,
}

impl Instance {
  pub fn of(type_id: &str) -> Self {
    Self {
      type_id: type_id.to_string(),
      props: PropMap::new(),
      links: Vec::new(),
    }
  }

  pub fn set(mut self, name: &str, value: impl Into<PropValue>) -> Self {
    self.props.insert(name.to_string(), value.into());
    self
  }

  /// Queue an edge over the relationship slot `name` to `target`.
  /// The edge is written when this instance is saved; the target must
  /// already be persisted by then.
  pub fn link(mut self, name: &str, target: Instance) -> Self {
    self.links.push((name.to_string(), target));
    self
  }

  pub fn get(&self, name: &str) -> Option<&PropValue> {
    self.props.get(name)
  }
}

// ============================================================================
// Relation
// ============================================================================

/// A typed, attribute-bearing relationship between two instances,
/// persisted as a graph edge
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
  pub type_id: TypeId,
  pub start: Instance,
  pub end: Instance,
  pub props: PropMap,
}

impl Relation {
  pub fn of(type_id: &str, start: Instance, end: Instance) -> Self {
    Self {
      type_id: type_id.to_string(),
      start,
      end,
      props: PropMap::new(),
    }
  }

  pub fn set(mut self, name: &str, value: impl Into<PropValue>) -> Self {
    self.props.insert(name.to_string(), value.into());
    self
  }
}

/// Edge kind under which relations of `type_id` are stored
pub fn edge_type_name(type_id: &str) -> String {
  type_id.to_uppercase()
}

// ============================================================================
// Graph payloads
// ============================================================================

/// One edge queued by a relationship slot
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEdge {
  pub rel_type: TypeId,
  pub edge_type: String,
  pub direction: Direction,
  pub target: Instance,
}

/// Everything needed to write one instance node
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
  pub labels: Vec<String>,
  pub props: PropMap,
  pub edges: Vec<PendingEdge>,
}

// ============================================================================
// Mapping
// ============================================================================

/// Encode an instance into its node payload.
///
/// Every declared scalar attribute is encoded through its descriptor (this
/// is where defaults apply and missing unique ids are generated); every
/// queued link resolves to a pending edge spec. Values for names the chain
/// does not declare are an error, not a silent drop.
pub fn to_graph(registry: &TypeRegistry, instance: &Instance) -> Result<GraphNode> {
  let attrs = registry.attrs_in_chain(&instance.type_id)?;
  let rels = registry.rels_in_chain(&instance.type_id)?;

  for name in instance.props.keys() {
    if !attrs.contains_key(name) {
      return Err(Error::Validation {
        attr: name.clone(),
        expected: "a declared attribute",
        got: format!("undeclared name on '{}'", instance.type_id),
      });
    }
  }

  let mut props = PropMap::new();
  props.insert(
    PROP_TYPE.to_string(),
    PropValue::Text(instance.type_id.clone()),
  );
  for (name, (_, attr)) in &attrs {
    if let Some(encoded) = attr.encode_opt(instance.props.get(name))? {
      trace!(type_id = %instance.type_id, attr = %name, "encoded attribute");
      props.insert(name.clone(), encoded);
    }
  }

  let mut edges = Vec::new();
  for (name, target) in &instance.links {
    let Some((_, rel)) = rels.get(name) else {
      return Err(Error::Validation {
        attr: name.clone(),
        expected: "a declared relationship slot",
        got: format!("undeclared name on '{}'", instance.type_id),
      });
    };
    edges.push(PendingEdge {
      rel_type: rel.rel_type.clone(),
      edge_type: edge_type_name(&rel.rel_type),
      direction: rel.direction,
      target: target.clone(),
    });
  }

  Ok(GraphNode {
    labels: registry.labels_for(&instance.type_id)?,
    props,
    edges,
  })
}

/// Decode stored node or edge properties back into an instance.
///
/// The most-derived type comes from the stored `__type__`; a persisted type
/// with no registered definition is reported as `UnknownType`, never skipped.
pub fn from_graph(registry: &TypeRegistry, stored: &PropMap) -> Result<Instance> {
  let type_id = stored
    .get(PROP_TYPE)
    .and_then(PropValue::as_text)
    .ok_or_else(|| {
      Error::Deserialization(format!("stored properties carry no '{}' key", PROP_TYPE))
    })?
    .to_string();

  let attrs = registry.attrs_in_chain(&type_id)?;

  let mut instance = Instance::of(&type_id);
  for (name, value) in stored {
    if RESERVED_PROPS.contains(&name.as_str()) {
      continue;
    }
    match attrs.get(name) {
      Some((_, attr)) => {
        instance.props.insert(name.clone(), attr.decode(value)?);
      }
      // a property written by a later schema revision; carry nothing
      None => trace!(type_id = %type_id, attr = %name, "stored property has no descriptor"),
    }
  }
  Ok(instance)
}

/// Encode a relation's own attributes into edge properties
pub fn relation_to_graph(registry: &TypeRegistry, relation: &Relation) -> Result<PropMap> {
  let attrs = registry.attrs_in_chain(&relation.type_id)?;

  for name in relation.props.keys() {
    if !attrs.contains_key(name) {
      return Err(Error::Validation {
        attr: name.clone(),
        expected: "a declared attribute",
        got: format!("undeclared name on '{}'", relation.type_id),
      });
    }
  }

  let mut props = PropMap::new();
  props.insert(
    PROP_TYPE.to_string(),
    PropValue::Text(relation.type_id.clone()),
  );
  for (name, (_, attr)) in &attrs {
    if let Some(encoded) = attr.encode_opt(relation.props.get(name))? {
      props.insert(name.clone(), encoded);
    }
  }
  Ok(props)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
  use super::*;
  use crate::descriptor::{AttrDef, RelDef};
  use crate::registry::TypeDef;

  fn registry() -> TypeRegistry {
    let registry = TypeRegistry::new();
    registry
      .register(TypeDef::named("Entity").attr(AttrDef::uuid("id").unique()))
      .unwrap();
    registry
      .register(
        TypeDef::named("Animal")
          .base("Entity")
          .attr(AttrDef::text("name").unique())
          .attr(AttrDef::int("age")),
      )
      .unwrap();
    registry
  }

  #[test]
  fn test_to_graph_encodes_declared_attributes() {
    let registry = registry();
    let tom = Instance::of("Animal").set("name", "Tom").set("age", 4);
    let node = to_graph(&registry, &tom).unwrap();

    assert_eq!(node.props.get(PROP_TYPE), Some(&PropValue::Text("Animal".into())));
    assert_eq!(node.props.get("name"), Some(&PropValue::Text("Tom".into())));
    assert_eq!(node.props.get("age"), Some(&PropValue::Int(4)));
    // identity uuid was generated
    assert!(node.props.get("id").is_some());
    assert_eq!(node.labels, vec!["Animal", "Entity"]);
  }

  #[test]
  fn test_to_graph_rejects_undeclared_names() {
    let registry = registry();
    let odd = Instance::of("Animal").set("wings", 2);
    assert!(matches!(to_graph(&registry, &odd), Err(Error::Validation { .. })));
  }

  #[test]
  fn test_round_trip_preserves_values() {
    let registry = registry();
    let tom = Instance::of("Animal").set("name", "Tom").set("age", 4);
    let node = to_graph(&registry, &tom).unwrap();
    let back = from_graph(&registry, &node.props).unwrap();

    assert_eq!(back.type_id, "Animal");
    assert_eq!(back.get("name"), tom.get("name"));
    assert_eq!(back.get("age"), tom.get("age"));
  }

  #[test]
  fn test_from_graph_requires_registered_type() {
    let registry = registry();
    let mut stored = PropMap::new();
    stored.insert(PROP_TYPE.to_string(), PropValue::Text("Ghost".into()));
    let err = from_graph(&registry, &stored);
    assert!(matches!(err, Err(Error::UnknownType(id)) if id == "Ghost"));
  }

  #[test]
  fn test_from_graph_requires_type_key() {
    let registry = registry();
    let err = from_graph(&registry, &PropMap::new());
    assert!(matches!(err, Err(Error::Deserialization(_))));
  }

  #[test]
  fn test_links_become_pending_edges() {
    let registry = registry();
    registry
      .register(TypeDef::named("Guards"))
      .unwrap();
    registry
      .register(
        TypeDef::named("Keeper")
          .base("Entity")
          .attr(AttrDef::text("name").unique())
          .rel(RelDef::outgoing("guards", "Guards")),
      )
      .unwrap();

    let tom = Instance::of("Animal").set("name", "Tom");
    let keeper = Instance::of("Keeper").set("name", "Joe").link("guards", tom);
    let node = to_graph(&registry, &keeper).unwrap();

    assert_eq!(node.edges.len(), 1);
    assert_eq!(node.edges[0].edge_type, "GUARDS");
    assert_eq!(node.edges[0].direction, Direction::Outgoing);
    assert_eq!(node.edges[0].target.type_id, "Animal");
  }

  #[test]
  fn test_unknown_slot_link_is_rejected() {
    let registry = registry();
    let tom = Instance::of("Animal").set("name", "Tom");
    let broken = Instance::of("Animal").set("name", "Bo").link("friends", tom);
    assert!(matches!(to_graph(&registry, &broken), Err(Error::Validation { .. })));
  }
}
