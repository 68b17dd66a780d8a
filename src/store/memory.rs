//! Embedded in-memory store
//!
//! A reference `GraphStore` holding the whole graph behind one lock, in the
//! shape of plain adjacency and property maps. All multi-structure writes
//! (node + instance-of edge, constraint check + property write) happen under
//! a single write guard, which is what makes them atomic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::{EdgeWrite, GraphStore, MatchSpec, NodeId, NodeRow, RelatedRow, TypeRow};
use crate::constants::{PROP_BASE_INDEX, PROP_ID, REL_INSTANCE_OF, REL_ISA, TYPE_NODE_TYPE};
use crate::descriptor::Direction;
use crate::error::{Error, Result};
use crate::types::{PropMap, PropValue};

// ============================================================================
// Graph data
// ============================================================================

#[derive(Debug, Clone)]
struct NodeRecord {
  labels: Vec<String>,
  props: PropMap,
}

#[derive(Debug, Clone)]
struct EdgeRecord {
  edge_type: String,
  start: NodeId,
  end: NodeId,
  props: PropMap,
}

#[derive(Default)]
struct GraphData {
  nodes: IndexMap<NodeId, NodeRecord>,
  edges: Vec<EdgeRecord>,
  /// Declared (label, attribute) uniqueness constraints
  constraints: Vec<(String, String)>,
}

impl GraphData {
  fn type_node(&self, type_id: &str) -> Option<NodeId> {
    self.nodes.iter().find_map(|(id, rec)| {
      let is_type = rec.labels.iter().any(|l| l == TYPE_NODE_TYPE);
      let matches = rec.props.get(PROP_ID).and_then(PropValue::as_text) == Some(type_id);
      (is_type && matches).then_some(*id)
    })
  }

  /// First other node violating a declared constraint for the given
  /// label/property combination, if any
  fn constraint_conflict(
    &self,
    labels: &[String],
    props: &PropMap,
    exempt: Option<NodeId>,
  ) -> Option<(String, String, PropValue)> {
    for (label, attr) in &self.constraints {
      if !labels.iter().any(|l| l == label) {
        continue;
      }
      let Some(value) = props.get(attr) else { continue };
      let taken = self.nodes.iter().any(|(id, rec)| {
        Some(*id) != exempt
          && rec.labels.iter().any(|l| l == label)
          && rec.props.get(attr) == Some(value)
      });
      if taken {
        return Some((label.clone(), attr.clone(), value.clone()));
      }
    }
    None
  }

  /// Type ids of `type_id` and every type whose is-a chain reaches it
  fn subtype_closure(&self, target: NodeId) -> Vec<NodeId> {
    let mut closure = vec![target];
    let mut grew = true;
    while grew {
      grew = false;
      for edge in &self.edges {
        if edge.edge_type == REL_ISA
          && closure.contains(&edge.end)
          && !closure.contains(&edge.start)
        {
          closure.push(edge.start);
          grew = true;
        }
      }
    }
    closure
  }
}

// ============================================================================
// MemoryStore
// ============================================================================

/// In-process `GraphStore` backed by maps; suitable for embedded use and as
/// the test suite's database
#[derive(Default)]
pub struct MemoryStore {
  data: RwLock<GraphData>,
  next_node_id: AtomicU64,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn alloc_node_id(&self) -> NodeId {
    self.next_node_id.fetch_add(1, Ordering::SeqCst) + 1
  }

  /// Total node count (diagnostics and tests)
  pub fn node_count(&self) -> usize {
    self.data.read().nodes.len()
  }

  /// Count of edges of one kind (diagnostics and tests)
  pub fn edge_count(&self, edge_type: &str) -> usize {
    self
      .data
      .read()
      .edges
      .iter()
      .filter(|e| e.edge_type == edge_type)
      .count()
  }
}

impl GraphStore for MemoryStore {
  fn ensure_type_node(&self, type_id: &str, props: PropMap) -> Result<NodeId> {
    let mut data = self.data.write();
    if let Some(existing) = data.type_node(type_id) {
      return Ok(existing);
    }
    let id = self.alloc_node_id();
    data.nodes.insert(
      id,
      NodeRecord {
        labels: vec![TYPE_NODE_TYPE.to_string()],
        props,
      },
    );
    Ok(id)
  }

  fn ensure_isa_edge(&self, child: &str, base: &str, base_index: usize) -> Result<()> {
    let mut data = self.data.write();
    let child_node = data
      .type_node(child)
      .ok_or_else(|| Error::NotFound(format!("type node '{}'", child)))?;
    let base_node = data
      .type_node(base)
      .ok_or_else(|| Error::NotFound(format!("type node '{}'", base)))?;

    let exists = data.edges.iter().any(|e| {
      e.edge_type == REL_ISA && e.start == child_node && e.end == base_node
    });
    if exists {
      return Ok(());
    }

    let mut props = PropMap::new();
    props.insert(PROP_BASE_INDEX.to_string(), PropValue::Int(base_index as i64));
    data.edges.push(EdgeRecord {
      edge_type: REL_ISA.to_string(),
      start: child_node,
      end: base_node,
      props,
    });
    Ok(())
  }

  fn declare_unique(&self, label: &str, attr: &str) -> Result<()> {
    let mut data = self.data.write();
    let entry = (label.to_string(), attr.to_string());
    if !data.constraints.contains(&entry) {
      data.constraints.push(entry);
    }
    Ok(())
  }

  fn type_hierarchy(&self) -> Result<Vec<TypeRow>> {
    let data = self.data.read();

    let mut rows: Vec<(NodeId, TypeRow)> = Vec::new();
    for (id, rec) in &data.nodes {
      if !rec.labels.iter().any(|l| l == TYPE_NODE_TYPE) {
        continue;
      }
      let type_id = rec
        .props
        .get(PROP_ID)
        .and_then(PropValue::as_text)
        .ok_or_else(|| Error::Deserialization("type node without id".to_string()))?
        .to_string();

      let mut bases: Vec<(i64, NodeId)> = data
        .edges
        .iter()
        .filter(|e| e.edge_type == REL_ISA && e.start == *id)
        .map(|e| {
          let index = e.props.get(PROP_BASE_INDEX).and_then(PropValue::as_int).unwrap_or(0);
          (index, e.end)
        })
        .collect();
      bases.sort_by_key(|(index, _)| *index);

      let base_ids = bases
        .into_iter()
        .filter_map(|(_, node)| {
          data.nodes.get(&node).and_then(|rec| {
            rec.props.get(PROP_ID).and_then(PropValue::as_text).map(str::to_string)
          })
        })
        .collect();

      rows.push((
        *id,
        TypeRow {
          type_id,
          bases: base_ids,
          props: rec.props.clone(),
        },
      ));
    }

    // ancestors before descendants: depth = longest is-a path above a type
    let mut depths: HashMap<NodeId, usize> = HashMap::new();
    fn depth(
      node: NodeId,
      data: &GraphData,
      depths: &mut HashMap<NodeId, usize>,
    ) -> usize {
      if let Some(d) = depths.get(&node) {
        return *d;
      }
      depths.insert(node, 0); // cycle guard
      let d = data
        .edges
        .iter()
        .filter(|e| e.edge_type == REL_ISA && e.start == node)
        .map(|e| depth(e.end, data, depths) + 1)
        .max()
        .unwrap_or(0);
      depths.insert(node, d);
      d
    }
    rows.sort_by_key(|(id, _)| depth(*id, &data, &mut depths));

    Ok(rows.into_iter().map(|(_, row)| row).collect())
  }

  fn create_instance(
    &self,
    labels: &[String],
    props: PropMap,
    type_id: &str,
    edges: &[EdgeWrite],
  ) -> Result<NodeId> {
    let mut data = self.data.write();
    let type_node = data
      .type_node(type_id)
      .ok_or_else(|| Error::NotFound(format!("type node '{}'", type_id)))?;

    if let Some((label, attr, value)) = data.constraint_conflict(labels, &props, None) {
      return Err(Error::Uniqueness {
        label,
        attr,
        value: value.to_string(),
      });
    }
    for edge in edges {
      if !data.nodes.contains_key(&edge.target) {
        return Err(Error::NotFound(format!("node {}", edge.target)));
      }
    }

    let id = self.alloc_node_id();
    data.nodes.insert(
      id,
      NodeRecord {
        labels: labels.to_vec(),
        props,
      },
    );
    data.edges.push(EdgeRecord {
      edge_type: REL_INSTANCE_OF.to_string(),
      start: id,
      end: type_node,
      props: PropMap::new(),
    });
    for edge in edges {
      let (start, end) = if edge.outgoing {
        (id, edge.target)
      } else {
        (edge.target, id)
      };
      data.edges.push(EdgeRecord {
        edge_type: edge.edge_type.clone(),
        start,
        end,
        props: edge.props.clone(),
      });
    }
    Ok(id)
  }

  fn update_instance(&self, node: NodeId, changes: PropMap, removed: &[String]) -> Result<()> {
    let mut data = self.data.write();
    let record = data
      .nodes
      .get(&node)
      .ok_or_else(|| Error::NotFound(format!("node {}", node)))?;

    let mut next = record.props.clone();
    for (key, value) in &changes {
      next.insert(key.clone(), value.clone());
    }
    for key in removed {
      next.shift_remove(key);
    }

    let labels = record.labels.clone();
    if let Some((label, attr, value)) = data.constraint_conflict(&labels, &next, Some(node)) {
      return Err(Error::Uniqueness {
        label,
        attr,
        value: value.to_string(),
      });
    }

    if let Some(rec) = data.nodes.get_mut(&node) {
      rec.props = next;
    }
    Ok(())
  }

  fn create_edge(
    &self,
    edge_type: &str,
    start: NodeId,
    end: NodeId,
    props: PropMap,
  ) -> Result<()> {
    let mut data = self.data.write();
    for endpoint in [start, end] {
      if !data.nodes.contains_key(&endpoint) {
        return Err(Error::NotFound(format!("node {}", endpoint)));
      }
    }
    data.edges.push(EdgeRecord {
      edge_type: edge_type.to_string(),
      start,
      end,
      props,
    });
    Ok(())
  }

  fn delete_instance(&self, node: NodeId) -> Result<(u64, u64)> {
    let mut data = self.data.write();
    if data.nodes.shift_remove(&node).is_none() {
      return Ok((0, 0));
    }
    let before = data.edges.len();
    data.edges.retain(|e| e.start != node && e.end != node);
    Ok((1, (before - data.edges.len()) as u64))
  }

  fn delete_edge(&self, edge_type: &str, start: NodeId, end: NodeId) -> Result<u64> {
    let mut data = self.data.write();
    let before = data.edges.len();
    data
      .edges
      .retain(|e| !(e.edge_type == edge_type && e.start == start && e.end == end));
    Ok((before - data.edges.len()) as u64)
  }

  fn find_by_unique(
    &self,
    label: &str,
    attr: &str,
    value: &PropValue,
  ) -> Result<Option<NodeRow>> {
    let data = self.data.read();
    Ok(data.nodes.iter().find_map(|(id, rec)| {
      let hit = rec.labels.iter().any(|l| l == label) && rec.props.get(attr) == Some(value);
      hit.then(|| NodeRow {
        id: *id,
        props: rec.props.clone(),
      })
    }))
  }

  fn node_props(&self, node: NodeId) -> Result<Option<PropMap>> {
    Ok(self.data.read().nodes.get(&node).map(|rec| rec.props.clone()))
  }

  fn match_instances(&self, spec: &MatchSpec) -> Result<Vec<NodeRow>> {
    let data = self.data.read();
    let Some(target) = data.type_node(&spec.type_id) else {
      return Ok(Vec::new());
    };
    let admissible = data.subtype_closure(target);

    let mut out = Vec::new();
    for edge in &data.edges {
      if edge.edge_type != REL_INSTANCE_OF || !admissible.contains(&edge.end) {
        continue;
      }
      let Some(rec) = data.nodes.get(&edge.start) else { continue };
      let matches = spec
        .filters
        .iter()
        .all(|(attr, value)| rec.props.get(attr) == Some(value));
      if matches {
        out.push(NodeRow {
          id: edge.start,
          props: rec.props.clone(),
        });
      }
    }
    Ok(out)
  }

  fn related(
    &self,
    node: NodeId,
    edge_type: &str,
    direction: Direction,
  ) -> Result<Vec<RelatedRow>> {
    let data = self.data.read();
    let mut out = Vec::new();
    for edge in &data.edges {
      if edge.edge_type != edge_type {
        continue;
      }
      let neighbor = match direction {
        Direction::Outgoing if edge.start == node => edge.end,
        Direction::Incoming if edge.end == node => edge.start,
        _ => continue,
      };
      let Some(rec) = data.nodes.get(&neighbor) else { continue };
      out.push(RelatedRow {
        edge_props: edge.props.clone(),
        neighbor: NodeRow {
          id: neighbor,
          props: rec.props.clone(),
        },
      });
    }
    Ok(out)
  }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
  use super::*;

  fn type_props(id: &str) -> PropMap {
    let mut props = PropMap::new();
    props.insert(
      crate::constants::PROP_TYPE.to_string(),
      PropValue::Text(TYPE_NODE_TYPE.to_string()),
    );
    props.insert(PROP_ID.to_string(), PropValue::Text(id.to_string()));
    props
  }

  #[test]
  fn test_ensure_type_node_is_get_or_create() {
    let store = MemoryStore::new();
    let a = store.ensure_type_node("Entity", type_props("Entity")).unwrap();
    let b = store.ensure_type_node("Entity", type_props("Entity")).unwrap();
    assert_eq!(a, b);
    assert_eq!(store.node_count(), 1);
  }

  #[test]
  fn test_isa_edges_are_deduplicated() {
    let store = MemoryStore::new();
    store.ensure_type_node("Entity", type_props("Entity")).unwrap();
    store.ensure_type_node("Animal", type_props("Animal")).unwrap();
    store.ensure_isa_edge("Animal", "Entity", 0).unwrap();
    store.ensure_isa_edge("Animal", "Entity", 0).unwrap();
    assert_eq!(store.edge_count(REL_ISA), 1);
  }

  #[test]
  fn test_unique_constraint_rejects_second_writer() {
    let store = MemoryStore::new();
    store.ensure_type_node("Animal", type_props("Animal")).unwrap();
    store.declare_unique("Animal", "name").unwrap();

    let labels = vec!["Animal".to_string()];
    let mut props = PropMap::new();
    props.insert("name".to_string(), PropValue::Text("Tom".to_string()));

    store.create_instance(&labels, props.clone(), "Animal", &[]).unwrap();
    let err = store.create_instance(&labels, props, "Animal", &[]);
    assert!(matches!(err, Err(Error::Uniqueness { .. })));
    // the failed save wrote nothing
    assert_eq!(store.edge_count(REL_INSTANCE_OF), 1);
  }

  #[test]
  fn test_update_may_keep_own_unique_value() {
    let store = MemoryStore::new();
    store.ensure_type_node("Animal", type_props("Animal")).unwrap();
    store.declare_unique("Animal", "name").unwrap();

    let labels = vec!["Animal".to_string()];
    let mut props = PropMap::new();
    props.insert("name".to_string(), PropValue::Text("Tom".to_string()));
    let node = store.create_instance(&labels, props, "Animal", &[]).unwrap();

    let mut changes = PropMap::new();
    changes.insert("name".to_string(), PropValue::Text("Tom".to_string()));
    changes.insert("age".to_string(), PropValue::Int(4));
    store.update_instance(node, changes, &[]).unwrap();

    let props = store.node_props(node).unwrap().unwrap();
    assert_eq!(props.get("age"), Some(&PropValue::Int(4)));
  }

  #[test]
  fn test_match_walks_subtype_closure() {
    let store = MemoryStore::new();
    for id in ["Entity", "Animal", "Lion"] {
      store.ensure_type_node(id, type_props(id)).unwrap();
    }
    store.ensure_isa_edge("Animal", "Entity", 0).unwrap();
    store.ensure_isa_edge("Lion", "Animal", 0).unwrap();

    let mut props = PropMap::new();
    props.insert("name".to_string(), PropValue::Text("Tom".to_string()));
    store
      .create_instance(&["Lion".to_string()], props, "Lion", &[])
      .unwrap();

    let hits = store.match_instances(&MatchSpec::of("Entity")).unwrap();
    assert_eq!(hits.len(), 1);
    let hits = store.match_instances(&MatchSpec::of("Lion")).unwrap();
    assert_eq!(hits.len(), 1);
    // filters restrict
    let hits = store
      .match_instances(&MatchSpec::of("Animal").filter("name", "Jerry"))
      .unwrap();
    assert!(hits.is_empty());
  }

  #[test]
  fn test_delete_instance_removes_incident_edges() {
    let store = MemoryStore::new();
    store.ensure_type_node("Animal", type_props("Animal")).unwrap();
    let node = store
      .create_instance(&["Animal".to_string()], PropMap::new(), "Animal", &[])
      .unwrap();
    let (nodes, edges) = store.delete_instance(node).unwrap();
    assert_eq!((nodes, edges), (1, 1));
    assert_eq!(store.edge_count(REL_INSTANCE_OF), 0);
  }

  #[test]
  fn test_type_hierarchy_orders_ancestors_first() {
    let store = MemoryStore::new();
    // insert children before parents to prove ordering is computed
    store.ensure_type_node("Lion", type_props("Lion")).unwrap();
    store.ensure_type_node("Animal", type_props("Animal")).unwrap();
    store.ensure_type_node("Entity", type_props("Entity")).unwrap();
    store.ensure_isa_edge("Animal", "Entity", 0).unwrap();
    store.ensure_isa_edge("Lion", "Animal", 0).unwrap();

    let ids: Vec<_> = store
      .type_hierarchy()
      .unwrap()
      .into_iter()
      .map(|row| row.type_id)
      .collect();
    assert_eq!(ids, vec!["Entity", "Animal", "Lion"]);
  }
}
