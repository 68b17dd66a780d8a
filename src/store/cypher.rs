//! Cypher-rendering store adapter
//!
//! `CypherGraph` implements the store boundary by translating every
//! operation into a parameterized Cypher statement and handing it to an
//! injected [`CypherExecutor`] — the seam where a Bolt driver plugs in.
//! Identifiers (labels, attribute names) come from registered type
//! definitions and are interpolated; all values travel as parameters.
//!
//! Executor contract: rows come back as JSON values. A node renders as
//! `{"__gid": <id>, "labels": [..], "props": {..}}`, an edge as
//! `{"props": {..}}`, scalars as themselves. Executors must surface
//! uniqueness-constraint violations as [`Error::Uniqueness`] so a failed
//! save is reported, and "already exists" merge outcomes as plain success.

use serde_json::{Map, Value};

use super::{EdgeWrite, GraphStore, MatchSpec, NodeId, NodeRow, RelatedRow, TypeRow};
use crate::constants::{PROP_BASE_INDEX, PROP_ID, REL_INSTANCE_OF, REL_ISA, TYPE_NODE_TYPE};
use crate::descriptor::Direction;
use crate::error::{Error, Result};
use crate::types::{PropMap, PropValue};

/// One result row: the RETURN items of a statement, as JSON values
#[derive(Debug, Clone, PartialEq)]
pub struct Row(pub Vec<Value>);

/// Transport seam executing one parameterized Cypher statement
pub trait CypherExecutor: Send + Sync {
  fn run(&self, statement: &str, params: &Map<String, Value>) -> Result<Vec<Row>>;
}

// ============================================================================
// Value conversion
// ============================================================================

fn prop_to_json(value: &PropValue) -> Value {
  match value {
    PropValue::Bool(b) => Value::Bool(*b),
    PropValue::Int(i) => Value::from(*i),
    PropValue::Float(f) => Value::from(*f),
    PropValue::Text(s) => Value::String(s.clone()),
    PropValue::List(items) => Value::Array(items.iter().map(prop_to_json).collect()),
  }
}

fn json_to_prop(value: &Value) -> Result<PropValue> {
  match value {
    Value::Bool(b) => Ok(PropValue::Bool(*b)),
    Value::Number(n) => n
      .as_i64()
      .map(PropValue::Int)
      .or_else(|| n.as_f64().map(PropValue::Float))
      .ok_or_else(|| Error::Deserialization(format!("unstorable number {}", n))),
    Value::String(s) => Ok(PropValue::Text(s.clone())),
    Value::Array(items) => items
      .iter()
      .map(json_to_prop)
      .collect::<Result<Vec<_>>>()
      .map(PropValue::List),
    other => Err(Error::Deserialization(format!(
      "value {} is not a graph primitive",
      other
    ))),
  }
}

fn props_to_json(props: &PropMap) -> Value {
  Value::Object(
    props
      .iter()
      .map(|(k, v)| (k.clone(), prop_to_json(v)))
      .collect(),
  )
}

fn json_to_props(value: &Value) -> Result<PropMap> {
  let Value::Object(map) = value else {
    return Err(Error::Deserialization(format!(
      "expected a property map, got {}",
      value
    )));
  };
  let mut props = PropMap::new();
  for (key, value) in map {
    if value.is_null() {
      continue;
    }
    props.insert(key.clone(), json_to_prop(value)?);
  }
  Ok(props)
}

fn node_row(value: &Value) -> Result<NodeRow> {
  let gid = value
    .get("__gid")
    .and_then(Value::as_u64)
    .ok_or_else(|| Error::Deserialization("node row without __gid".to_string()))?;
  let props = value
    .get("props")
    .map(json_to_props)
    .transpose()?
    .unwrap_or_default();
  Ok(NodeRow { id: gid, props })
}

// ============================================================================
// CypherGraph
// ============================================================================

/// `GraphStore` over any Cypher-speaking transport
pub struct CypherGraph<E> {
  executor: E,
}

impl<E: CypherExecutor> CypherGraph<E> {
  pub fn new(executor: E) -> Self {
    Self { executor }
  }

  fn run(&self, statement: &str, params: Map<String, Value>) -> Result<Vec<Row>> {
    tracing::debug!(statement, "issuing cypher");
    self.executor.run(statement, &params)
  }

  fn single_node(&self, statement: &str, params: Map<String, Value>) -> Result<Option<NodeRow>> {
    let rows = self.run(statement, params)?;
    match rows.first().and_then(|row| row.0.first()) {
      Some(value) => node_row(value).map(Some),
      None => Ok(None),
    }
  }
}

impl<E: CypherExecutor> GraphStore for CypherGraph<E> {
  fn ensure_type_node(&self, type_id: &str, props: PropMap) -> Result<NodeId> {
    let statement = format!(
      "MERGE (type:{label} {{{id_prop}: $id}})\n\
       ON CREATE SET type = $props\n\
       RETURN type",
      label = TYPE_NODE_TYPE,
      id_prop = PROP_ID,
    );
    let mut params = Map::new();
    params.insert("id".to_string(), Value::String(type_id.to_string()));
    params.insert("props".to_string(), props_to_json(&props));

    self
      .single_node(&statement, params)?
      .map(|row| row.id)
      .ok_or_else(|| Error::Store(format!("merge of type '{}' returned no node", type_id)))
  }

  fn ensure_isa_edge(&self, child: &str, base: &str, base_index: usize) -> Result<()> {
    let statement = format!(
      "MATCH (child:{label} {{{id_prop}: $child}}), (base:{label} {{{id_prop}: $base}})\n\
       MERGE (child)-[r:{isa}]->(base)\n\
       ON CREATE SET r.{index_prop} = $base_index",
      label = TYPE_NODE_TYPE,
      id_prop = PROP_ID,
      isa = REL_ISA,
      index_prop = PROP_BASE_INDEX,
    );
    let mut params = Map::new();
    params.insert("child".to_string(), Value::String(child.to_string()));
    params.insert("base".to_string(), Value::String(base.to_string()));
    params.insert("base_index".to_string(), Value::from(base_index as i64));
    self.run(&statement, params)?;
    Ok(())
  }

  fn declare_unique(&self, label: &str, attr: &str) -> Result<()> {
    let statement = format!(
      "CREATE CONSTRAINT IF NOT EXISTS FOR (n:{label}) REQUIRE n.{attr} IS UNIQUE",
    );
    self.run(&statement, Map::new())?;
    Ok(())
  }

  fn type_hierarchy(&self) -> Result<Vec<TypeRow>> {
    let statement = format!(
      "MATCH p = (t:{label})-[:{isa}*0..]->(:{label})\n\
       WITH t, max(length(p)) AS level\n\
       OPTIONAL MATCH (t)-[isa:{isa}]->(b:{label})\n\
       WITH t, level, collect([isa.{index_prop}, b.{id_prop}]) AS bases\n\
       ORDER BY level\n\
       RETURN t, bases",
      label = TYPE_NODE_TYPE,
      isa = REL_ISA,
      id_prop = PROP_ID,
      index_prop = PROP_BASE_INDEX,
    );

    let mut out = Vec::new();
    for row in self.run(&statement, Map::new())? {
      let node = row
        .0
        .first()
        .ok_or_else(|| Error::Deserialization("hierarchy row without node".to_string()))?;
      let node = node_row(node)?;
      let type_id = node
        .props
        .get(PROP_ID)
        .and_then(PropValue::as_text)
        .ok_or_else(|| Error::Deserialization("type node without id".to_string()))?
        .to_string();

      let mut bases: Vec<(i64, String)> = Vec::new();
      if let Some(Value::Array(pairs)) = row.0.get(1) {
        for pair in pairs {
          let index = pair.get(0).and_then(Value::as_i64);
          let base = pair.get(1).and_then(Value::as_str);
          if let (Some(index), Some(base)) = (index, base) {
            bases.push((index, base.to_string()));
          }
        }
      }
      bases.sort_by_key(|(index, _)| *index);

      out.push(TypeRow {
        type_id,
        bases: bases.into_iter().map(|(_, base)| base).collect(),
        props: node.props,
      });
    }
    Ok(out)
  }

  fn create_instance(
    &self,
    labels: &[String],
    props: PropMap,
    type_id: &str,
    edges: &[EdgeWrite],
  ) -> Result<NodeId> {
    let label_pattern = if labels.is_empty() {
      String::new()
    } else {
      format!(":{}", labels.join(":"))
    };

    let mut params = Map::new();
    params.insert("type_id".to_string(), Value::String(type_id.to_string()));
    params.insert("props".to_string(), props_to_json(&props));

    // one statement, so node, instance-of edge and relationship edges
    // commit or fail together
    let mut lines = vec![format!(
      "MATCH (cls:{type_label} {{{id_prop}: $type_id}})",
      type_label = TYPE_NODE_TYPE,
      id_prop = PROP_ID,
    )];
    for (i, edge) in edges.iter().enumerate() {
      lines.push(format!("MATCH (t{i}) WHERE id(t{i}) = $t{i}"));
      params.insert(format!("t{i}"), Value::from(edge.target));
    }
    lines.push(format!(
      "CREATE (n{label_pattern} $props)-[:{instance_of}]->(cls)",
      instance_of = REL_INSTANCE_OF,
    ));
    for (i, edge) in edges.iter().enumerate() {
      let pattern = if edge.outgoing {
        format!("CREATE (n)-[:{} $e{i}]->(t{i})", edge.edge_type)
      } else {
        format!("CREATE (t{i})-[:{} $e{i}]->(n)", edge.edge_type)
      };
      params.insert(format!("e{i}"), props_to_json(&edge.props));
      lines.push(pattern);
    }
    lines.push("RETURN n".to_string());

    self
      .single_node(&lines.join("\n"), params)?
      .map(|row| row.id)
      .ok_or_else(|| Error::NotFound(format!("type node '{}'", type_id)))
  }

  fn update_instance(&self, node: NodeId, changes: PropMap, removed: &[String]) -> Result<()> {
    // null values make SET += drop the key
    let mut change_map: Map<String, Value> = changes
      .iter()
      .map(|(k, v)| (k.clone(), prop_to_json(v)))
      .collect();
    for name in removed {
      change_map.insert(name.clone(), Value::Null);
    }

    let statement = "MATCH (n) WHERE id(n) = $gid\n\
                     SET n += $changes\n\
                     RETURN n";
    let mut params = Map::new();
    params.insert("gid".to_string(), Value::from(node));
    params.insert("changes".to_string(), Value::Object(change_map));

    let rows = self.run(statement, params)?;
    if rows.is_empty() {
      return Err(Error::NotFound(format!("node {}", node)));
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
    let statement = format!(
      "MATCH (a), (b) WHERE id(a) = $start AND id(b) = $end\n\
       CREATE (a)-[r:{edge_type} $props]->(b)\n\
       RETURN r",
    );
    let mut params = Map::new();
    params.insert("start".to_string(), Value::from(start));
    params.insert("end".to_string(), Value::from(end));
    params.insert("props".to_string(), props_to_json(&props));

    let rows = self.run(&statement, params)?;
    if rows.is_empty() {
      return Err(Error::NotFound(format!("nodes {} and {}", start, end)));
    }
    Ok(())
  }

  fn delete_instance(&self, node: NodeId) -> Result<(u64, u64)> {
    let statement = "MATCH (n) WHERE id(n) = $gid\n\
                     OPTIONAL MATCH (n)-[r]-()\n\
                     DELETE n, r\n\
                     RETURN count(DISTINCT n), count(DISTINCT r)";
    let mut params = Map::new();
    params.insert("gid".to_string(), Value::from(node));

    let rows = self.run(statement, params)?;
    let Some(row) = rows.first() else {
      return Ok((0, 0));
    };
    let nodes = row.0.first().and_then(Value::as_u64).unwrap_or(0);
    let edges = row.0.get(1).and_then(Value::as_u64).unwrap_or(0);
    Ok((nodes, edges))
  }

  fn delete_edge(&self, edge_type: &str, start: NodeId, end: NodeId) -> Result<u64> {
    let statement = format!(
      "MATCH (a)-[r:{edge_type}]->(b)\n\
       WHERE id(a) = $start AND id(b) = $end\n\
       DELETE r\n\
       RETURN count(r)",
    );
    let mut params = Map::new();
    params.insert("start".to_string(), Value::from(start));
    params.insert("end".to_string(), Value::from(end));

    let rows = self.run(&statement, params)?;
    Ok(
      rows
        .first()
        .and_then(|row| row.0.first())
        .and_then(Value::as_u64)
        .unwrap_or(0),
    )
  }

  fn find_by_unique(
    &self,
    label: &str,
    attr: &str,
    value: &PropValue,
  ) -> Result<Option<NodeRow>> {
    let statement = format!(
      "MATCH (n:{label}) WHERE n.{attr} = $value RETURN n",
    );
    let mut params = Map::new();
    params.insert("value".to_string(), prop_to_json(value));
    self.single_node(&statement, params)
  }

  fn node_props(&self, node: NodeId) -> Result<Option<PropMap>> {
    let statement = "MATCH (n) WHERE id(n) = $gid RETURN n";
    let mut params = Map::new();
    params.insert("gid".to_string(), Value::from(node));
    Ok(self.single_node(statement, params)?.map(|row| row.props))
  }

  fn match_instances(&self, spec: &MatchSpec) -> Result<Vec<NodeRow>> {
    let mut conditions = Vec::new();
    let mut params = Map::new();
    params.insert("type_id".to_string(), Value::String(spec.type_id.clone()));
    for (attr, value) in &spec.filters {
      conditions.push(format!("n.{attr} = $f_{attr}"));
      params.insert(format!("f_{attr}"), prop_to_json(value));
    }
    let where_clause = if conditions.is_empty() {
      String::new()
    } else {
      format!("WHERE {}\n", conditions.join(" AND "))
    };

    let statement = format!(
      "MATCH (n)-[:{instance_of}]->(:{type_label})-[:{isa}*0..]->\
       (target:{type_label} {{{id_prop}: $type_id}})\n\
       {where_clause}RETURN n",
      instance_of = REL_INSTANCE_OF,
      isa = REL_ISA,
      type_label = TYPE_NODE_TYPE,
      id_prop = PROP_ID,
    );

    let rows = self.run(&statement, params)?;
    rows
      .iter()
      .filter_map(|row| row.0.first())
      .map(node_row)
      .collect()
  }

  fn related(
    &self,
    node: NodeId,
    edge_type: &str,
    direction: Direction,
  ) -> Result<Vec<RelatedRow>> {
    let pattern = match direction {
      Direction::Outgoing => format!("(n)-[r:{edge_type}]->(m)"),
      Direction::Incoming => format!("(n)<-[r:{edge_type}]-(m)"),
    };
    let statement = format!(
      "MATCH (n) WHERE id(n) = $gid\n\
       MATCH {pattern}\n\
       RETURN r, m",
    );
    let mut params = Map::new();
    params.insert("gid".to_string(), Value::from(node));

    let mut out = Vec::new();
    for row in self.run(&statement, params)? {
      let edge_props = row
        .0
        .first()
        .and_then(|edge| edge.get("props"))
        .map(json_to_props)
        .transpose()?
        .unwrap_or_default();
      let neighbor = row
        .0
        .get(1)
        .ok_or_else(|| Error::Deserialization("related row without neighbor".to_string()))?;
      out.push(RelatedRow {
        edge_props,
        neighbor: node_row(neighbor)?,
      });
    }
    Ok(out)
  }
}

// ============================================================================
// Tests
// ============================================================================
