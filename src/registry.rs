//! Process-wide catalog of persistable types
//!
//! The registry owns every `TypeDef` for the lifetime of the process. It is
//! append-only: types are registered once and never evicted, mirroring the
//! fact that type identity is a process-lifetime concept. Registration is
//! serialized behind a write lock; reads are concurrent.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::constants::RESERVED_PROPS;
use crate::descriptor::{AttrDef, RelDef};
use crate::error::{Error, Result};
use crate::types::TypeId;

// ============================================================================
// TypeDef
// ============================================================================

/// Explicit record describing one persistable type.
///
/// Base order is the declared order and is preserved verbatim; chain walks
/// visit bases depth-first in that order with first-visit-wins deduplication.
/// There is no other linearization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDef {
  /// Stable type id
  pub id: TypeId,
  /// Direct bases, in declared order
  pub bases: Vec<TypeId>,
  /// Scalar attributes declared on this type (not inherited ones)
  pub attrs: Vec<AttrDef>,
  /// Relationship slots declared on this type
  pub rels: Vec<RelDef>,
}

impl TypeDef {
  /// Start a definition for the type named `id`
  pub fn named(id: &str) -> Self {
    Self {
      id: id.to_string(),
      bases: Vec::new(),
      attrs: Vec::new(),
      rels: Vec::new(),
    }
  }

  pub fn base(mut self, base: &str) -> Self {
    self.bases.push(base.to_string());
    self
  }

  pub fn attr(mut self, attr: AttrDef) -> Self {
    self.attrs.push(attr);
    self
  }

  pub fn rel(mut self, rel: RelDef) -> Self {
    self.rels.push(rel);
    self
  }

  /// True for hierarchy roots (no declared bases)
  pub fn is_root(&self) -> bool {
    self.bases.is_empty()
  }
}

// ============================================================================
// TypeRegistry
// ============================================================================

/// Append-only catalog of registered types.
///
/// Held as an explicit `Arc` handle and passed to each `Manager`, so tests
/// can construct isolated registries instead of sharing ambient state.
#[derive(Default)]
pub struct TypeRegistry {
  types: RwLock<IndexMap<TypeId, Arc<TypeDef>>>,
}

impl TypeRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a type definition.
  ///
  /// Idempotent: re-registering an identical definition returns the existing
  /// entry. A different definition under the same id is a `DuplicateType`
  /// error. All bases must already be registered, and no attribute or
  /// relationship name may shadow one declared anywhere in the chain.
  pub fn register(&self, def: TypeDef) -> Result<Arc<TypeDef>> {
    let mut types = self.types.write();

    if let Some(existing) = types.get(&def.id) {
      if **existing == def {
        return Ok(Arc::clone(existing));
      }
      return Err(Error::DuplicateType(def.id));
    }

    for base in &def.bases {
      if !types.contains_key(base) {
        return Err(Error::UnknownBase {
          type_id: def.id.clone(),
          base: base.clone(),
        });
      }
    }

    self.check_slot_names(&types, &def)?;

    let def = Arc::new(def);
    types.insert(def.id.clone(), Arc::clone(&def));
    Ok(def)
  }

  /// Reject reserved, duplicated, or chain-shadowed slot names
  fn check_slot_names(
    &self,
    types: &IndexMap<TypeId, Arc<TypeDef>>,
    def: &TypeDef,
  ) -> Result<()> {
    let mut inherited: IndexMap<String, TypeId> = IndexMap::new();
    for base in &def.bases {
      for ancestor in Self::chain_of(types, base) {
        for attr in &ancestor.attrs {
          inherited
            .entry(attr.name.clone())
            .or_insert_with(|| ancestor.id.clone());
        }
        for rel in &ancestor.rels {
          inherited
            .entry(rel.name.clone())
            .or_insert_with(|| ancestor.id.clone());
        }
      }
    }

    let declared = def
      .attrs
      .iter()
      .map(|a| a.name.as_str())
      .chain(def.rels.iter().map(|r| r.name.as_str()));

    let mut seen: Vec<&str> = Vec::new();
    for name in declared {
      if RESERVED_PROPS.contains(&name) {
        return Err(Error::DuplicateAttribute {
          type_id: def.id.clone(),
          attr: name.to_string(),
          declared_on: "<reserved>".to_string(),
        });
      }
      if seen.contains(&name) {
        return Err(Error::DuplicateAttribute {
          type_id: def.id.clone(),
          attr: name.to_string(),
          declared_on: def.id.clone(),
        });
      }
      if let Some(owner) = inherited.get(name) {
        return Err(Error::DuplicateAttribute {
          type_id: def.id.clone(),
          attr: name.to_string(),
          declared_on: owner.clone(),
        });
      }
      seen.push(name);
    }
    Ok(())
  }

  /// Look up a registered type
  pub fn get(&self, id: &str) -> Result<Arc<TypeDef>> {
    self
      .types
      .read()
      .get(id)
      .cloned()
      .ok_or_else(|| Error::UnknownType(id.to_string()))
  }

  pub fn contains(&self, id: &str) -> bool {
    self.types.read().contains_key(id)
  }

  /// Inheritance chain of `id`, leaf first.
  ///
  /// Depth-first over declared base order; a type reachable over two paths
  /// (diamond) appears once, at its first visit.
  pub fn chain(&self, id: &str) -> Result<Vec<Arc<TypeDef>>> {
    let types = self.types.read();
    if !types.contains_key(id) {
      return Err(Error::UnknownType(id.to_string()));
    }
    Ok(Self::chain_of(&types, id))
  }

  fn chain_of(types: &IndexMap<TypeId, Arc<TypeDef>>, id: &str) -> Vec<Arc<TypeDef>> {
    let mut out: Vec<Arc<TypeDef>> = Vec::new();
    let mut stack: Vec<&str> = vec![id];
    while let Some(current) = stack.pop() {
      let Some(def) = types.get(current) else { continue };
      if out.iter().any(|d| d.id == def.id) {
        continue;
      }
      out.push(Arc::clone(def));
      // push declared bases in reverse so they pop in declared order
      for base in def.bases.iter().rev() {
        stack.push(base);
      }
    }
    out
  }

  /// All scalar attributes visible on `id`, keyed by name, with the
  /// declaring type. Inherited declarations come before the type's own,
  /// in reverse chain order, so a hierarchy root's identity attribute
  /// precedes everything declared below it.
  pub fn attrs_in_chain(&self, id: &str) -> Result<IndexMap<String, (TypeId, AttrDef)>> {
    let mut out = IndexMap::new();
    for def in self.chain(id)?.into_iter().rev() {
      for attr in &def.attrs {
        out.insert(attr.name.clone(), (def.id.clone(), attr.clone()));
      }
    }
    Ok(out)
  }

  /// All relationship slots visible on `id`, root-most first
  pub fn rels_in_chain(&self, id: &str) -> Result<IndexMap<String, (TypeId, RelDef)>> {
    let mut out = IndexMap::new();
    for def in self.chain(id)?.into_iter().rev() {
      for rel in &def.rels {
        out.insert(rel.name.clone(), (def.id.clone(), rel.clone()));
      }
    }
    Ok(out)
  }

  /// Unique attributes visible on `id` with their declaring type, in
  /// chain-inherited order. The first entry is the identity attribute.
  pub fn unique_attrs(&self, id: &str) -> Result<Vec<(TypeId, AttrDef)>> {
    Ok(
      self
        .attrs_in_chain(id)?
        .into_iter()
        .filter(|(_, (_, attr))| attr.unique)
        .map(|(_, entry)| entry)
        .collect(),
    )
  }

  /// Labels an instance node of `id` carries: its own type id plus every
  /// chain type that declares a unique attribute. Uniqueness constraints
  /// are declared per (label, attribute), so the declaring type's label
  /// must be present on the node for the constraint to apply.
  pub fn labels_for(&self, id: &str) -> Result<Vec<String>> {
    let mut labels = vec![id.to_string()];
    for (declaring, _) in self.unique_attrs(id)? {
      if !labels.contains(&declaring) {
        labels.push(declaring);
      }
    }
    Ok(labels)
  }

  /// Ids of every registered type, in registration order
  pub fn type_ids(&self) -> Vec<TypeId> {
    self.types.read().keys().cloned().collect()
  }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
  use super::*;

  fn registry_with_entity() -> TypeRegistry {
    let registry = TypeRegistry::new();
    registry
      .register(TypeDef::named("Entity").attr(AttrDef::uuid("id").unique()))
      .unwrap();
    registry
  }

  #[test]
  fn test_register_is_idempotent() {
    let registry = registry_with_entity();
    let def = TypeDef::named("Entity").attr(AttrDef::uuid("id").unique());
    registry.register(def).unwrap();
    assert_eq!(registry.type_ids(), vec!["Entity"]);
  }

  #[test]
  fn test_conflicting_definition_is_rejected() {
    let registry = registry_with_entity();
    let err = registry.register(TypeDef::named("Entity").attr(AttrDef::text("name")));
    assert!(matches!(err, Err(Error::DuplicateType(id)) if id == "Entity"));
  }

  #[test]
  fn test_unregistered_base_is_rejected() {
    let registry = TypeRegistry::new();
    let err = registry.register(TypeDef::named("Lion").base("Animal"));
    assert!(matches!(err, Err(Error::UnknownBase { .. })));
  }

  #[test]
  fn test_shadowed_attribute_is_rejected() {
    let registry = registry_with_entity();
    registry
      .register(
        TypeDef::named("Animal")
          .base("Entity")
          .attr(AttrDef::text("name").unique()),
      )
      .unwrap();
    let err = registry.register(
      TypeDef::named("Lion").base("Animal").attr(AttrDef::text("name")),
    );
    match err {
      Err(Error::DuplicateAttribute { declared_on, .. }) => {
        assert_eq!(declared_on, "Animal")
      }
      other => panic!("expected DuplicateAttribute, got {:?}", other),
    }
  }

  #[test]
  fn test_reserved_names_are_rejected() {
    let registry = TypeRegistry::new();
    let err = registry.register(TypeDef::named("Broken").attr(AttrDef::text("__type__")));
    assert!(matches!(err, Err(Error::DuplicateAttribute { .. })));
  }

  #[test]
  fn test_chain_prefers_first_declared_base() {
    let registry = registry_with_entity();
    registry
      .register(TypeDef::named("Flying").base("Entity"))
      .unwrap();
    registry
      .register(TypeDef::named("Swimming").base("Entity"))
      .unwrap();
    registry
      .register(TypeDef::named("Duck").base("Flying").base("Swimming"))
      .unwrap();

    let ids: Vec<_> = registry
      .chain("Duck")
      .unwrap()
      .iter()
      .map(|d| d.id.clone())
      .collect();
    // depth-first in declared order; Entity claimed by the first path
    assert_eq!(ids, vec!["Duck", "Flying", "Entity", "Swimming"]);
  }

  #[test]
  fn test_identity_attr_is_root_most_unique() {
    let registry = registry_with_entity();
    registry
      .register(
        TypeDef::named("Animal")
          .base("Entity")
          .attr(AttrDef::text("name").unique()),
      )
      .unwrap();

    let unique = registry.unique_attrs("Animal").unwrap();
    let names: Vec<_> = unique.iter().map(|(t, a)| (t.as_str(), a.name.as_str())).collect();
    assert_eq!(names, vec![("Entity", "id"), ("Animal", "name")]);
  }

  #[test]
  fn test_labels_cover_unique_declaring_types() {
    let registry = registry_with_entity();
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

    assert_eq!(
      registry.labels_for("Lion").unwrap(),
      vec!["Lion", "Entity", "Animal"]
    );
  }
}
