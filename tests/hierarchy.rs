//! Type-graph synchronization and reload tests

use std::sync::Arc;

use taxograph::{
  constants::REL_ISA, AttrDef, AttrKind, Error, Instance, Manager, MatchSpec, MemoryStore,
  PropValue, TypeDef, TypeRegistry,
};

fn base_registry() -> Arc<TypeRegistry> {
  let registry = Arc::new(TypeRegistry::new());
  registry
    .register(TypeDef::named("Entity").attr(AttrDef::text("id").unique()))
    .unwrap();
  registry
}

#[test]
fn test_sync_converges_across_managers() {
  let store = Arc::new(MemoryStore::new());
  let registry = base_registry();
  registry
    .register(TypeDef::named("Animal").base("Entity"))
    .unwrap();

  let first = Manager::new(store.clone(), registry.clone());
  let second = Manager::new(store.clone(), registry);

  // independent sessions racing to establish the same chain end up with
  // one node per type and one is-a edge per parent pair
  first.ensure_type("Animal").unwrap();
  second.ensure_type("Animal").unwrap();
  first.ensure_type("Animal").unwrap();

  assert_eq!(store.node_count(), 2);
  assert_eq!(store.edge_count(REL_ISA), 1);
}

#[test]
fn test_duplicate_type_id_is_rejected() {
  let registry = base_registry();
  let err = registry.register(
    TypeDef::named("Entity").attr(AttrDef::uuid("id").unique()),
  );
  assert!(matches!(err, Err(Error::DuplicateType(id)) if id == "Entity"));
}

#[test]
fn test_diamond_hierarchy_instances_query_from_every_path() {
  let store = Arc::new(MemoryStore::new());
  let registry = base_registry();
  registry
    .register(TypeDef::named("Flying").base("Entity"))
    .unwrap();
  registry
    .register(TypeDef::named("Swimming").base("Entity"))
    .unwrap();
  registry
    .register(TypeDef::named("Duck").base("Flying").base("Swimming"))
    .unwrap();
  let manager = Manager::new(store.clone(), registry);

  manager.save(&Instance::of("Duck").set("id", "d1")).unwrap();

  // one shared Entity node, no duplicate edges over the redundant path
  assert_eq!(store.edge_count(REL_ISA), 4);

  // the duck is reachable through both parents and the shared root
  for type_id in ["Duck", "Flying", "Swimming", "Entity"] {
    assert_eq!(manager.query(MatchSpec::of(type_id)).count().unwrap(), 1, "{}", type_id);
  }
}

#[test]
fn test_multiple_inheritance_merges_attribute_chains() {
  let registry = base_registry();
  registry
    .register(
      TypeDef::named("Flying")
        .base("Entity")
        .attr(AttrDef::int("wingspan")),
    )
    .unwrap();
  registry
    .register(
      TypeDef::named("Swimming")
        .base("Entity")
        .attr(AttrDef::float("depth")),
    )
    .unwrap();
  registry
    .register(TypeDef::named("Duck").base("Flying").base("Swimming"))
    .unwrap();

  let manager = Manager::new(Arc::new(MemoryStore::new()), registry);
  let duck = manager
    .save(
      &Instance::of("Duck")
        .set("id", "d1")
        .set("wingspan", 90)
        .set("depth", 2.5),
    )
    .unwrap();

  assert_eq!(duck.get("wingspan"), Some(&PropValue::Int(90)));
  assert_eq!(duck.get("depth"), Some(&PropValue::Float(2.5)));
}

#[test]
fn test_load_types_rebuilds_registry_from_the_graph() {
  let store = Arc::new(MemoryStore::new());
  let registry = base_registry();
  registry
    .register(
      TypeDef::named("Animal")
        .base("Entity")
        .attr(AttrDef::text("name").unique())
        .attr(AttrDef::choice("mood", &["happy", "grumpy"])),
    )
    .unwrap();
  registry
    .register(TypeDef::named("Lion").base("Animal"))
    .unwrap();

  let writer = Manager::new(store.clone(), registry);
  writer
    .save(&Instance::of("Lion").set("id", "l1").set("name", "Tom").set("mood", "grumpy"))
    .unwrap();

  // a process that declared nothing loads the hierarchy from the store
  let fresh = Arc::new(TypeRegistry::new());
  let reader = Manager::new(store, fresh.clone());
  assert_eq!(reader.load_types().unwrap(), 3);

  // ids, base order and descriptors all came back
  let animal = fresh.get("Animal").unwrap();
  assert_eq!(animal.bases, vec!["Entity"]);
  assert_eq!(animal.attrs.len(), 2);
  assert_eq!(animal.attrs[1].kind, AttrKind::Choice(vec![
    "happy".to_string(),
    "grumpy".to_string(),
  ]));

  // and instances of the loaded types materialize
  let tom = reader.query(MatchSpec::of("Animal")).first().unwrap().unwrap();
  assert_eq!(tom.type_id, "Lion");
  assert_eq!(tom.get("mood"), Some(&PropValue::Text("grumpy".into())));

  // loading again registers nothing new
  assert_eq!(reader.load_types().unwrap(), 0);
}

#[test]
fn test_load_types_preserves_declared_base_order() {
  let store = Arc::new(MemoryStore::new());
  let registry = base_registry();
  registry
    .register(TypeDef::named("Flying").base("Entity"))
    .unwrap();
  registry
    .register(TypeDef::named("Swimming").base("Entity"))
    .unwrap();
  registry
    .register(TypeDef::named("Duck").base("Flying").base("Swimming"))
    .unwrap();
  Manager::new(store.clone(), registry).ensure_type("Duck").unwrap();

  let fresh = Arc::new(TypeRegistry::new());
  let reader = Manager::new(store, fresh.clone());
  reader.load_types().unwrap();

  assert_eq!(fresh.get("Duck").unwrap().bases, vec!["Flying", "Swimming"]);
}
