use std::sync::Arc;

use redlilium_prefab::codec::{PropertyKind, SchemaRegistry, TypeSchema};
use redlilium_prefab::{
    Document, EnumValue, ExternalKey, Format, Graph, InstantiateError, InstantiateOptions,
    Instantiator, NestedRef, NoExternals, NodePath, NodeHandle, NodeRecord, ObjectValue,
    OverridePath, OverrideSet, PrefabHop, PrefabInstance, PropertyPath, PropertyValue, Registry,
    SerializeError, SerializeOptions, Serializer, Value, Warning, duplicate, instantiate, serialize,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Group with two leaves (x = 5 and x = 10); the second leaf links to the
/// first. Returns `(group, first, second)`.
fn build_scene(graph: &mut Graph) -> (NodeHandle, NodeHandle, NodeHandle) {
    let group = graph.spawn_named("Group", "group");
    let first = graph.spawn_named("Leaf", "first");
    let second = graph.spawn_named("Leaf", "second");
    graph.set_parent(first, group).unwrap();
    graph.set_parent(second, group).unwrap();
    graph.set_property(first, "x", PropertyValue::Int(5)).unwrap();
    graph.set_property(second, "x", PropertyValue::Int(10)).unwrap();
    graph
        .set_property(second, "link", PropertyValue::reference(first))
        .unwrap();
    (group, first, second)
}

// ---------------------------------------------------------------------------
// Round trips
// ---------------------------------------------------------------------------

#[test]
fn group_scenario_document_shape() {
    init_logging();
    let mut graph = Graph::new();
    let (group, _, _) = build_scene(&mut graph);

    let doc = serialize(&graph, group).unwrap();
    assert_eq!(doc.len(), 3);
    assert_eq!(doc.root, 0);
    assert_eq!(doc.nodes[0].children, vec![1, 2]);
    assert_eq!(doc.nodes[1].property("x"), Some(&Value::Int(5)));
    assert_eq!(doc.nodes[2].property("x"), Some(&Value::Int(10)));
    assert_eq!(doc.nodes[2].property("link"), Some(&Value::LocalRef(1)));
    assert!(doc.externals.is_empty());

    let mut other = Graph::new();
    let instance = instantiate(&doc, &OverrideSet::new(), &NoExternals, &mut other).unwrap();
    let children = other.children(instance.root).to_vec();
    assert_eq!(children.len(), 2);
    assert_eq!(
        other.property(children[1], "link"),
        Some(&PropertyValue::reference(children[0]))
    );
    assert_eq!(other.property(children[0], "x"), Some(&PropertyValue::Int(5)));
    assert_eq!(other.property(children[1], "x"), Some(&PropertyValue::Int(10)));
}

#[test]
fn round_trip_is_structurally_equal() {
    init_logging();
    let mut graph = Graph::new();
    let (group, first, _) = build_scene(&mut graph);
    graph
        .set_property(first, "ratio", PropertyValue::Float(0.1 + 0.2))
        .unwrap();
    graph
        .set_property(first, "mode", EnumValue::new("BodyType", "Dynamic").into())
        .unwrap();
    graph
        .set_property(
            first,
            "socket",
            ObjectValue::new("Socket")
                .with_field("offset", PropertyValue::Array(vec![1.0.into(), 2.0.into()]))
                .with_field("target", PropertyValue::reference(group))
                .into(),
        )
        .unwrap();
    graph
        .set_property(group, "nothing", PropertyValue::null_reference())
        .unwrap();

    let doc = serialize(&graph, group).unwrap();
    for format in [Format::Ron, Format::Bincode] {
        let loaded = Document::from_bytes(&doc.to_bytes(format).unwrap(), format).unwrap();
        let mut other = Graph::new();
        let instance =
            instantiate(&loaded, &OverrideSet::new(), &NoExternals, &mut other).unwrap();
        assert!(graph.structurally_eq(group, &other, instance.root));
    }
}

#[test]
fn external_references_round_trip_through_registry() {
    let mut graph = Graph::new();
    let sun = graph.spawn("Sun");
    let (group, first, _) = build_scene(&mut graph);
    graph
        .set_property(first, "light", PropertyValue::reference(sun))
        .unwrap();

    let registry = Registry::new();
    registry.insert("scene/sun", sun);

    let doc = Serializer::<NodeHandle>::new()
        .with_keys(&registry)
        .serialize(&graph, group)
        .unwrap();
    assert_eq!(doc.externals, vec![ExternalKey::from("scene/sun")]);
    assert_eq!(
        doc.nodes[1].property("light"),
        Some(&Value::ExternalRef("scene/sun".into()))
    );

    let instance = instantiate(&doc, &OverrideSet::new(), &registry, &mut graph).unwrap();
    assert!(graph.structurally_eq(group, &graph, instance.root));
    assert_eq!(
        graph.property(instance.nodes[1], "light"),
        Some(&PropertyValue::reference(sun))
    );
}

#[test]
fn reference_cycle_resolves() {
    let mut graph = Graph::new();
    let (group, first, second) = build_scene(&mut graph);
    graph
        .set_property(first, "peer", PropertyValue::reference(second))
        .unwrap();
    graph
        .set_property(second, "peer", PropertyValue::reference(first))
        .unwrap();

    let doc = serialize(&graph, group).unwrap();
    let mut other = Graph::new();
    let instance = instantiate(&doc, &OverrideSet::new(), &NoExternals, &mut other).unwrap();
    let a = instance.nodes[1];
    let b = instance.nodes[2];
    assert_eq!(other.property(a, "peer"), Some(&PropertyValue::reference(b)));
    assert_eq!(other.property(b, "peer"), Some(&PropertyValue::reference(a)));
    assert!(graph.structurally_eq(group, &other, instance.root));
}

#[test]
fn serialization_is_deterministic() {
    let mut graph = Graph::new();
    let (group, first, _) = build_scene(&mut graph);
    graph
        .set_property(first, "ratio", PropertyValue::Float(1.0 / 3.0))
        .unwrap();

    let a = serialize(&graph, group).unwrap();
    let b = serialize(&graph, group).unwrap();
    for format in [Format::Ron, Format::Bincode] {
        assert_eq!(a.to_bytes(format).unwrap(), b.to_bytes(format).unwrap());
    }

    // A fresh graph built the same way serializes to the same bytes.
    let mut again = Graph::new();
    let (group2, first2, _) = build_scene(&mut again);
    again
        .set_property(first2, "ratio", PropertyValue::Float(1.0 / 3.0))
        .unwrap();
    let c = serialize(&again, group2).unwrap();
    assert_eq!(
        a.to_bytes(Format::Ron).unwrap(),
        c.to_bytes(Format::Ron).unwrap()
    );
}

// ---------------------------------------------------------------------------
// Overrides
// ---------------------------------------------------------------------------

#[test]
fn override_replaces_only_targeted_value() {
    let mut graph = Graph::new();
    let (group, _, _) = build_scene(&mut graph);
    let doc = serialize(&graph, group).unwrap();

    let overrides = OverrideSet::new().with(
        OverridePath::new(NodePath::root().child(1), "x"),
        Value::Int(42),
    );
    let mut other = Graph::new();
    let instance = instantiate(&doc, &overrides, &NoExternals, &mut other).unwrap();
    let first = instance.nodes[1];
    let second = instance.nodes[2];
    assert_eq!(other.property(second, "x"), Some(&PropertyValue::Int(42)));
    assert_eq!(other.property(first, "x"), Some(&PropertyValue::Int(5)));
    assert_eq!(
        other.property(second, "link"),
        Some(&PropertyValue::reference(first))
    );
    assert!(instance.warnings.is_empty());
}

#[test]
fn override_by_name_and_nested_segment() {
    let doc = Document::new(0)
        .with_node(NodeRecord::new(0, "Group").with_children([1]))
        .with_node(
            NodeRecord::new(1, "Rig").with_name("rig").with_property(
                "bones",
                Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
            ),
        );
    let overrides = OverrideSet::new().with(
        OverridePath::new(NodePath::root().named("rig"), PropertyPath::new("bones").index(1)),
        Value::Int(20),
    );
    let mut graph = Graph::new();
    let instance = instantiate(&doc, &overrides, &NoExternals, &mut graph).unwrap();
    assert_eq!(
        graph.property(instance.nodes[1], "bones"),
        Some(&PropertyValue::Array(vec![
            PropertyValue::Int(1),
            PropertyValue::Int(20),
            PropertyValue::Int(3),
        ]))
    );
}

#[test]
fn override_can_point_at_another_record() {
    let mut graph = Graph::new();
    let (group, _, _) = build_scene(&mut graph);
    let doc = serialize(&graph, group).unwrap();

    // Relink the second leaf to the group itself (local id 0).
    let overrides = OverrideSet::new().with(
        OverridePath::new(NodePath::root().child(1), "link"),
        Value::LocalRef(0),
    );
    let mut other = Graph::new();
    let instance = instantiate(&doc, &overrides, &NoExternals, &mut other).unwrap();
    assert_eq!(
        other.property(instance.nodes[2], "link"),
        Some(&PropertyValue::reference(instance.root))
    );
}

#[test]
fn stale_override_is_a_warning() {
    let mut graph = Graph::new();
    let (group, _, _) = build_scene(&mut graph);
    let doc = serialize(&graph, group).unwrap();

    let stale = OverridePath::new(NodePath::root().child(7), "x");
    let overrides = OverrideSet::new()
        .with(stale.clone(), Value::Int(1))
        .with(
            OverridePath::new(NodePath::root().child(0), "missing"),
            Value::Int(2),
        );
    let mut other = Graph::new();
    let instance = instantiate(&doc, &overrides, &NoExternals, &mut other).unwrap();
    assert_eq!(instance.warnings.len(), 2);
    assert_eq!(instance.warnings[0], Warning::StaleOverride { path: stale });
    assert!(graph.structurally_eq(group, &other, instance.root));
}

#[test]
fn diff_and_prune_maintain_override_sets() {
    let mut graph = Graph::new();
    let (group, _, second) = build_scene(&mut graph);
    let base = serialize(&graph, group).unwrap();

    graph.set_property(second, "x", PropertyValue::Int(11)).unwrap();
    let edited = serialize(&graph, group).unwrap();

    let mut overrides = OverrideSet::diff(&base, &edited);
    assert_eq!(overrides.len(), 1);
    assert_eq!(
        overrides.get(&OverridePath::new(NodePath::root().child(1), "x")),
        Some(&Value::Int(11))
    );

    let mut other = Graph::new();
    let instance = instantiate(&base, &overrides, &NoExternals, &mut other).unwrap();
    assert!(graph.structurally_eq(group, &other, instance.root));

    let stale = OverridePath::new(NodePath::root().child(5), "x");
    overrides.set(stale.clone(), Value::Int(0));
    assert_eq!(overrides.prune_stale(&base), vec![stale]);
    assert_eq!(overrides.len(), 1);
}

// ---------------------------------------------------------------------------
// Failures and strictness
// ---------------------------------------------------------------------------

#[test]
fn dangling_local_reference_fails() {
    let doc = Document::new(0)
        .with_node(NodeRecord::new(0, "Group").with_children([1]))
        .with_node(NodeRecord::new(1, "Leaf").with_property("link", Value::LocalRef(9)));
    let mut graph = Graph::new();
    let err = instantiate(&doc, &OverrideSet::new(), &NoExternals, &mut graph).unwrap_err();
    assert!(matches!(
        err,
        InstantiateError::DanglingReference { id: 9, from: 1, .. }
    ));
    assert!(graph.is_empty());
}

#[test]
fn unknown_version_is_rejected() {
    let mut graph = Graph::new();
    let (group, _, _) = build_scene(&mut graph);
    let mut doc = serialize(&graph, group).unwrap();
    doc.version = 2;

    for format in [Format::Ron, Format::Bincode] {
        let bytes = doc.to_bytes(format).unwrap();
        assert!(matches!(
            Document::from_bytes(&bytes, format),
            Err(InstantiateError::UnsupportedVersion { found: 2, .. })
        ));
    }
    let mut other = Graph::new();
    assert!(matches!(
        instantiate(&doc, &OverrideSet::new(), &NoExternals, &mut other),
        Err(InstantiateError::UnsupportedVersion { found: 2, .. })
    ));
    assert!(other.is_empty());
}

#[test]
fn unresolved_external_strict_and_lenient() {
    let doc = Document::new(0)
        .with_node(
            NodeRecord::new(0, "Leaf")
                .with_property("light", Value::ExternalRef("scene/moon".into()))
                .with_property("x", Value::Int(1)),
        )
        .with_external("scene/moon");

    let mut graph = Graph::new();
    assert!(matches!(
        instantiate(&doc, &OverrideSet::new(), &NoExternals, &mut graph),
        Err(InstantiateError::UnresolvedExternalReference { .. })
    ));
    assert!(graph.is_empty());

    let instance = Instantiator::new()
        .with_options(InstantiateOptions::new().lenient())
        .instantiate(&doc, &OverrideSet::new(), &NoExternals, &mut graph)
        .unwrap();
    assert_eq!(
        graph.property(instance.root, "light"),
        Some(&PropertyValue::null_reference())
    );
    assert!(matches!(
        &instance.warnings[..],
        [Warning::UnresolvedExternalReference { .. }]
    ));
}

#[test]
fn schema_coercions_apply_on_load() {
    let doc = Document::new(0).with_node(
        NodeRecord::new(0, "Body")
            .with_property("mass", Value::Int(3))
            .with_property("kind", Value::String("Dynamic".into())),
    );
    let schemas = SchemaRegistry::new().with(
        "Body",
        TypeSchema::new()
            .with("mass", PropertyKind::Float)
            .with("kind", PropertyKind::Enum("BodyType".into())),
    );
    let mut graph = Graph::new();
    let instance = Instantiator::new()
        .with_schemas(schemas)
        .instantiate(&doc, &OverrideSet::new(), &NoExternals, &mut graph)
        .unwrap();
    assert_eq!(
        graph.property(instance.root, "mass"),
        Some(&PropertyValue::Float(3.0))
    );
    assert_eq!(
        graph.property(instance.root, "kind"),
        Some(&PropertyValue::Enum(EnumValue::new("BodyType", "Dynamic")))
    );
}

// ---------------------------------------------------------------------------
// Nested prefabs
// ---------------------------------------------------------------------------

/// Door prefab: a door with a hinge child the door points at.
fn door_document() -> Document {
    let mut graph = Graph::new();
    let door = graph.spawn_named("Door", "door");
    let hinge = graph.spawn_named("Hinge", "hinge");
    graph.set_parent(hinge, door).unwrap();
    graph.set_property(door, "open", PropertyValue::Bool(false)).unwrap();
    graph
        .set_property(door, "hinge", PropertyValue::reference(hinge))
        .unwrap();
    graph
        .set_property(hinge, "angle", PropertyValue::Float(0.0))
        .unwrap();
    serialize(&graph, door).unwrap()
}

/// House with a wall and an embedded door instance (opened by override).
fn build_house(graph: &mut Graph) -> NodeHandle {
    let house = graph.spawn_named("House", "house");
    let wall = graph.spawn_named("Wall", "wall");
    graph.set_parent(wall, house).unwrap();

    let door_doc = Arc::new(door_document());
    let door_overrides = OverrideSet::new().with(
        OverridePath::new(NodePath::root(), "open"),
        Value::Bool(true),
    );
    let door = Instantiator::new()
        .with_options(InstantiateOptions::new().parent(house))
        .instantiate(&door_doc, &door_overrides, &NoExternals, graph)
        .unwrap();
    let mut prefab = PrefabInstance::new(door_doc, door_overrides);
    prefab.root = Some(door.root);
    graph
        .set_property(house, "door", PropertyValue::Prefab(prefab))
        .unwrap();
    house
}

#[test]
fn nested_prefab_keeps_slot_and_overrides() {
    init_logging();
    let mut graph = Graph::new();
    let house = build_house(&mut graph);
    assert_eq!(graph.children(house).len(), 2);

    let doc = serialize(&graph, house).unwrap();
    // The door subtree is embedded, not flattened.
    assert_eq!(doc.len(), 2);
    match doc.nodes[0].property("door") {
        Some(Value::Prefab(embedded)) => {
            assert_eq!(embedded.slot, Some(1));
            assert_eq!(embedded.document.len(), 2);
            assert_eq!(embedded.overrides.len(), 1);
        }
        other => panic!("expected embedded prefab, found {other:?}"),
    }

    let mut other = Graph::new();
    let instance = instantiate(&doc, &OverrideSet::new(), &NoExternals, &mut other).unwrap();
    assert_eq!(instance.nodes.len(), 4);
    let children = other.children(instance.root).to_vec();
    assert_eq!(other.get(children[0]).unwrap().type_tag(), "Wall");
    assert_eq!(other.get(children[1]).unwrap().type_tag(), "Door");
    assert_eq!(other.property(children[1], "open"), Some(&PropertyValue::Bool(true)));
    let hinge = other.children(children[1])[0];
    assert_eq!(
        other.property(children[1], "hinge"),
        Some(&PropertyValue::reference(hinge))
    );
    assert!(graph.structurally_eq(house, &other, instance.root));
}

#[test]
fn outer_override_reaches_into_nested_prefab() {
    let mut graph = Graph::new();
    let house = build_house(&mut graph);
    let doc = serialize(&graph, house).unwrap();

    let overrides = OverrideSet::new().with(
        OverridePath::new(NodePath::root().named("door").named("hinge"), "angle"),
        Value::Float(90.0),
    );
    let mut other = Graph::new();
    let instance = instantiate(&doc, &overrides, &NoExternals, &mut other).unwrap();
    let door = other.resolve_path(instance.root, &NodePath::root().child(1)).unwrap();
    let hinge = other.children(door)[0];
    assert_eq!(other.property(hinge, "angle"), Some(&PropertyValue::Float(90.0)));
    assert!(instance.warnings.is_empty());
    assert!(overrides.clone().prune_stale(&doc).is_empty());
}

#[test]
fn unpacking_flattens_nested_prefabs() {
    let mut graph = Graph::new();
    let house = build_house(&mut graph);

    let doc = Serializer::new()
        .with_options(SerializeOptions::new().unpack_prefabs(true))
        .serialize(&graph, house)
        .unwrap();
    assert_eq!(doc.len(), 4);
    assert!(doc.nodes[0].property("door").is_none());

    let mut other = Graph::new();
    let instance = instantiate(&doc, &OverrideSet::new(), &NoExternals, &mut other).unwrap();
    let door = other.children(instance.root)[1];
    assert_eq!(other.property(door, "open"), Some(&PropertyValue::Bool(true)));
    assert!(other.property(instance.root, "door").is_none());
}

fn embedded_door(doc: &Document) -> &redlilium_prefab::codec::EmbeddedPrefab {
    match doc.nodes[0].property("door") {
        Some(Value::Prefab(embedded)) => &**embedded,
        other => panic!("expected embedded prefab, found {other:?}"),
    }
}

#[test]
fn live_edits_inside_nested_prefab_survive_round_trip() {
    init_logging();
    let mut graph = Graph::new();
    let house = build_house(&mut graph);
    let door = graph.children(house)[1];
    let hinge = graph.children(door)[0];
    graph
        .set_property(hinge, "angle", PropertyValue::Float(45.0))
        .unwrap();

    let doc = serialize(&graph, house).unwrap();
    let embedded = embedded_door(&doc);
    assert_eq!(embedded.document, door_document());
    assert_eq!(embedded.overrides.len(), 2);
    assert_eq!(
        embedded
            .overrides
            .get(&OverridePath::new(NodePath::root().child(0), "angle")),
        Some(&Value::Float(45.0))
    );

    let mut other = Graph::new();
    let instance = instantiate(&doc, &OverrideSet::new(), &NoExternals, &mut other).unwrap();
    let other_hinge = other
        .resolve_path(instance.root, &NodePath::root().child(1).child(0))
        .unwrap();
    assert_eq!(
        other.property(other_hinge, "angle"),
        Some(&PropertyValue::Float(45.0))
    );
    assert!(graph.structurally_eq(house, &other, instance.root));

    let copy = duplicate(&mut graph, house, InstantiateOptions::default()).unwrap();
    assert!(graph.structurally_eq(house, &graph, copy.root));
}

#[test]
fn references_into_nested_prefab_stay_inside_the_copy() {
    init_logging();
    let mut graph = Graph::new();
    let house = build_house(&mut graph);
    let wall = graph.children(house)[0];
    let door = graph.children(house)[1];
    let hinge = graph.children(door)[0];
    graph
        .set_property(wall, "hinge", PropertyValue::reference(hinge))
        .unwrap();

    let doc = serialize(&graph, house).unwrap();
    assert_eq!(
        doc.nodes[1].property("hinge"),
        Some(&Value::NestedRef(NestedRef {
            path: vec![PrefabHop::new(0, "door")],
            id: 1,
        }))
    );
    assert!(doc.externals.is_empty());

    let mut other = Graph::new();
    let instance = instantiate(&doc, &OverrideSet::new(), &NoExternals, &mut other).unwrap();
    let other_wall = other.children(instance.root)[0];
    let other_hinge = other
        .resolve_path(instance.root, &NodePath::root().child(1).child(0))
        .unwrap();
    assert_eq!(
        other.property(other_wall, "hinge"),
        Some(&PropertyValue::reference(other_hinge))
    );
    assert!(graph.structurally_eq(house, &other, instance.root));

    let copy = duplicate(&mut graph, house, InstantiateOptions::default()).unwrap();
    let copy_wall = graph.children(copy.root)[0];
    let copy_hinge = graph
        .resolve_path(copy.root, &NodePath::root().child(1).child(0))
        .unwrap();
    assert_ne!(copy_hinge, hinge);
    assert_eq!(
        graph.property(copy_wall, "hinge"),
        Some(&PropertyValue::reference(copy_hinge))
    );
}

#[test]
fn prefab_root_moved_under_a_sibling_is_rejected() {
    let mut graph = Graph::new();
    let house = build_house(&mut graph);
    let wall = graph.children(house)[0];
    let door = graph.children(house)[1];
    graph.set_parent(door, wall).unwrap();

    assert!(matches!(
        serialize(&graph, house),
        Err(SerializeError::MisplacedPrefabRoot { .. })
    ));
}

#[test]
fn overrides_revert_and_apply() {
    init_logging();
    let mut graph = Graph::new();
    let house = build_house(&mut graph);
    let door = graph.children(house)[1];
    let open = OverridePath::new(NodePath::root(), "open");

    let reverted = Instantiator::new()
        .revert_override(&mut graph, house, "door", &open, &NoExternals)
        .unwrap();
    assert!(reverted);
    assert_eq!(graph.property(door, "open"), Some(&PropertyValue::Bool(false)));
    let doc = serialize(&graph, house).unwrap();
    assert!(embedded_door(&doc).overrides.is_empty());

    // Promote an override into the embedded document instead.
    let mut prefab = graph
        .property(house, "door")
        .and_then(|v| v.as_prefab())
        .cloned()
        .unwrap();
    prefab.overrides.set(open.clone(), Value::Bool(true));
    assert!(prefab.apply_override(&open));
    assert!(prefab.overrides.is_empty());
    assert_eq!(
        prefab.document.nodes[0].property("open"),
        Some(&Value::Bool(true))
    );
    // The document shared with the live instance is copied, not edited.
    let live = graph.property(house, "door").and_then(|v| v.as_prefab()).unwrap();
    assert_eq!(
        live.document.nodes[0].property("open"),
        Some(&Value::Bool(false))
    );
}

// ---------------------------------------------------------------------------
// Load options
// ---------------------------------------------------------------------------

#[test]
fn type_replacement_and_parent_attach() {
    let doc = Document::new(0)
        .with_node(NodeRecord::new(0, "OldGroup").with_children([1]))
        .with_node(NodeRecord::new(1, "Leaf"));

    let mut graph = Graph::new();
    let level = graph.spawn("Level");
    let existing = graph.spawn("Leaf");
    graph.set_parent(existing, level).unwrap();

    let instance = Instantiator::new()
        .with_options(
            InstantiateOptions::new()
                .replace_type("OldGroup", "Group")
                .parent(level),
        )
        .instantiate(&doc, &OverrideSet::new(), &NoExternals, &mut graph)
        .unwrap();
    assert_eq!(graph.get(instance.root).unwrap().type_tag(), "Group");
    assert_eq!(graph.parent(instance.root), Some(level));
    assert_eq!(graph.children(level), &[existing, instance.root]);
}

#[test]
fn publish_registers_created_nodes() {
    let doc = Document::new(0)
        .with_node(NodeRecord::new(0, "Group").with_children([1, 2]))
        .with_node(NodeRecord::new(1, "Leaf").with_name("first"))
        .with_node(NodeRecord::new(2, "Leaf"));

    let registry = Registry::new();
    let mut graph = Graph::new();
    let instance = Instantiator::new()
        .with_options(InstantiateOptions::new().publish("houses/1"))
        .instantiate(&doc, &OverrideSet::new(), &registry, &mut graph)
        .unwrap();

    assert_eq!(registry.len(), 3);
    assert_eq!(registry.get(&"houses/1".into()), Some(instance.root));
    assert_eq!(registry.get(&"houses/1/first".into()), Some(instance.nodes[1]));
    assert_eq!(registry.get(&"houses/1/#1".into()), Some(instance.nodes[2]));

    // A second document can now point at the published nodes.
    let doc = Document::new(0)
        .with_node(NodeRecord::new(0, "Lamp").with_property(
            "target",
            Value::ExternalRef("houses/1/first".into()),
        ))
        .with_external("houses/1/first");
    let lamp = instantiate(&doc, &OverrideSet::new(), &registry, &mut graph).unwrap();
    assert_eq!(
        graph.property(lamp.root, "target"),
        Some(&PropertyValue::reference(instance.nodes[1]))
    );
}

#[test]
fn publish_falls_back_to_index_for_repeated_names() {
    let doc = Document::new(0)
        .with_node(NodeRecord::new(0, "Row").with_children([1, 2, 3]))
        .with_node(NodeRecord::new(1, "Leaf").with_name("leaf"))
        .with_node(NodeRecord::new(2, "Leaf").with_name("leaf"))
        .with_node(NodeRecord::new(3, "Leaf"));

    let registry = Registry::new();
    let mut graph = Graph::new();
    let instance = Instantiator::new()
        .with_options(InstantiateOptions::new().publish("row"))
        .instantiate(&doc, &OverrideSet::new(), &registry, &mut graph)
        .unwrap();

    assert_eq!(registry.len(), 4);
    assert_eq!(registry.get(&"row/leaf".into()), Some(instance.nodes[1]));
    assert_eq!(registry.get(&"row/#1".into()), Some(instance.nodes[2]));
    assert_eq!(registry.get(&"row/#2".into()), Some(instance.nodes[3]));
}

#[test]
fn duplicate_copies_next_to_original() {
    let mut graph = Graph::new();
    let level = graph.spawn("Level");
    let sun = graph.spawn("Sun");
    let (group, first, _) = build_scene(&mut graph);
    graph.set_parent(group, level).unwrap();
    graph
        .set_property(first, "light", PropertyValue::reference(sun))
        .unwrap();

    let copy = duplicate(&mut graph, group, InstantiateOptions::default()).unwrap();
    assert_ne!(copy.root, group);
    assert_eq!(graph.children(level), &[group, copy.root]);
    assert!(graph.structurally_eq(group, &graph, copy.root));
    assert_eq!(
        graph.property(copy.nodes[1], "light"),
        Some(&PropertyValue::reference(sun))
    );
}

#[test]
fn disjoint_graphs_share_one_registry() {
    let mut world = Graph::new();
    let sun = world.spawn("Sun");
    let registry = Registry::new();
    registry.insert("scene/sun", sun);

    let doc = Document::new(0)
        .with_node(
            NodeRecord::new(0, "Lamp").with_property("light", Value::ExternalRef("scene/sun".into())),
        )
        .with_external("scene/sun");

    std::thread::scope(|scope| {
        for _ in 0..4 {
            let doc = &doc;
            let registry = &registry;
            scope.spawn(move || {
                let mut graph = Graph::new();
                let instance =
                    instantiate(doc, &OverrideSet::new(), registry, &mut graph).unwrap();
                assert_eq!(
                    graph.property(instance.root, "light"),
                    Some(&PropertyValue::reference(sun))
                );
            });
        }
    });
}
