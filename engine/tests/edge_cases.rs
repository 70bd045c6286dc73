//! Edge case tests for lineage-engine
//!
//! These tests cover boundary conditions and unusual inputs.

use lineage_engine::{
    apply, apply_sequential, validate_operation, Change, Entity, Error, Extraction, Graph,
    Operation, RelationKind, RelationshipMeta, ReorderBuffer, TreeSnapshot,
};
use serde_json::json;

const TREE: &str = "9b2f6c1e-3d4a-4c5b-8e7f-0a1b2c3d4e5f";

fn op(change: Change) -> Operation {
    Operation::new(TREE, "alice", change, 1_000)
}

fn must_apply(graph: &Graph, change: Change) -> Graph {
    apply(graph, &op(change)).expect("change should apply")
}

// ============================================================================
// Scalar Field Edge Cases
// ============================================================================

#[test]
fn empty_string_fields() {
    let graph = must_apply(
        &Graph::new(),
        Change::add_node(Entity::new("p1").with_field("firstName", json!(""))),
    );
    assert_eq!(graph.get("p1").unwrap().field("firstName"), Some(&json!("")));
}

#[test]
fn unicode_strings() {
    let names = [
        "日本語テスト",
        "Привет мир",
        "مرحبا بالعالم",
        "🎉🚀💯",
        "Hello\nWorld\tTab",
        "Null\0Test",
    ];

    let mut graph = Graph::new();
    for (i, name) in names.iter().enumerate() {
        let id = format!("p{i}");
        graph = must_apply(
            &graph,
            Change::add_node(Entity::new(id.as_str()).with_field("firstName", json!(name))),
        );
        assert_eq!(graph.get(&id).unwrap().field("firstName"), Some(&json!(name)));
    }

    let snapshot = TreeSnapshot::new(TREE, 6, graph.clone());
    let restored = TreeSnapshot::from_json(&snapshot.to_json().unwrap()).unwrap();
    assert_eq!(restored.graph, graph);
}

#[test]
fn nested_json_values() {
    let mut nested = json!({"leaf": true});
    for depth in 0..50 {
        nested = json!({ format!("level_{depth}"): nested });
    }

    let graph = must_apply(
        &Graph::new(),
        Change::add_node(Entity::new("p1").with_field("notes", nested.clone())),
    );
    let graph = must_apply(
        &graph,
        Change::update_prop("p1", json!({"tags": [1, "two", null, {"three": 3.5}]})),
    );

    let p1 = graph.get("p1").unwrap();
    assert_eq!(p1.field("notes"), Some(&nested));
    assert_eq!(p1.field("tags").unwrap()[3]["three"], 3.5);
}

#[test]
fn rapid_updates_last_writer_wins() {
    let mut ops = vec![op(Change::add_node(Entity::new("p1"))).with_sequence(1)];
    for i in 0..100u64 {
        ops.push(
            op(Change::update_prop("p1", json!({"firstName": format!("v{i}")})))
                .with_sequence(i + 2),
        );
    }

    let outcome = apply_sequential(&Graph::new(), &ops);
    assert_eq!(outcome.applied, 101);
    assert_eq!(outcome.max_sequence, Some(101));
    assert_eq!(
        outcome.graph.get("p1").unwrap().field("firstName"),
        Some(&json!("v99"))
    );
}

#[test]
fn update_with_reserved_keys_only() {
    let graph = must_apply(&Graph::new(), Change::add_node(Entity::new("p1")));
    let after = must_apply(
        &graph,
        Change::update_prop("p1", json!({"id": "p2", "children": ["x"], "relationships": {}})),
    );
    assert_eq!(after, graph);
}

// ============================================================================
// Structural Edge Cases
// ============================================================================

#[test]
fn large_family_stays_consistent() {
    let mut graph = must_apply(&Graph::new(), Change::add_node(Entity::new("root")));
    for i in 0..200 {
        graph = must_apply(
            &graph,
            Change::add_related_node(Entity::new(format!("c{i}")), "root", RelationKind::Child),
        );
    }

    assert_eq!(graph.len(), 201);
    assert_eq!(graph.get("root").unwrap().children.len(), 200);
    assert!(graph.is_consistent());
}

#[test]
fn delete_then_readd() {
    let graph = must_apply(&Graph::new(), Change::add_node(Entity::new("p1")));
    let graph = must_apply(
        &graph,
        Change::add_related_node(Entity::new("p2"), "p1", RelationKind::Spouse),
    );
    let graph = must_apply(&graph, Change::delete_node("p2"));
    let graph = must_apply(&graph, Change::add_node(Entity::new("p2")));

    assert!(graph.get("p2").unwrap().spouses.is_empty());
    assert!(graph.get("p1").unwrap().spouses.is_empty());
}

#[test]
fn add_node_with_three_listed_parents() {
    let mut graph = Graph::new();
    for id in ["a", "b", "c"] {
        graph = must_apply(&graph, Change::add_node(Entity::new(id)));
    }

    let child = Entity::new("kid")
        .with_relation(RelationKind::Parent, "a")
        .with_relation(RelationKind::Parent, "b")
        .with_relation(RelationKind::Parent, "c");
    let graph = must_apply(&graph, Change::add_node(child));

    let parents = &graph.get("kid").unwrap().parents;
    assert_eq!(parents.len(), 2);
    assert!(parents.contains("a") && parents.contains("b"));
    assert!(graph.get("c").unwrap().children.is_empty());
    assert!(graph.is_consistent());
}

#[test]
fn metadata_for_unlinked_relative_is_dropped() {
    let graph = must_apply(&Graph::new(), Change::add_node(Entity::new("p1")));
    let mut entity = Entity::new("p2");
    entity
        .relationships
        .insert("p1".into(), RelationshipMeta::new("married"));

    let graph = must_apply(&graph, Change::add_node(entity));
    assert!(graph.get("p2").unwrap().relationships.is_empty());
}

#[test]
fn relation_between_missing_entities() {
    let result = Graph::new().try_apply(&Change::add_relation("x", "y", RelationKind::Spouse));
    assert_eq!(result, Err(Error::EntityNotFound("x".into())));

    let graph = must_apply(
        &Graph::new(),
        Change::delete_relation("x", "y", RelationKind::Parent),
    );
    assert!(graph.is_empty());
}

// ============================================================================
// Ordering Edge Cases
// ============================================================================

#[test]
fn reorder_large_sequence_numbers() {
    let base = u64::MAX / 2;
    let mut buffer = ReorderBuffer::new();
    buffer.insert(op(Change::delete_node("p1")).with_sequence(base + 2), base);
    buffer.insert(op(Change::delete_node("p1")).with_sequence(base + 1), base);

    match buffer.extract(base) {
        Extraction::Sequential(run) => assert_eq!(run.len(), 2),
        other => panic!("expected run, got {other:?}"),
    }
}

#[test]
fn sequential_with_uncommitted_ops() {
    let ops = vec![
        op(Change::add_node(Entity::new("p1"))),
        op(Change::add_node(Entity::new("p2"))),
    ];
    let outcome = apply_sequential(&Graph::new(), &ops);
    assert_eq!(outcome.applied, 2);
    assert_eq!(outcome.max_sequence, None);
}

// ============================================================================
// ID Edge Cases
// ============================================================================

#[test]
fn ids_with_special_characters() {
    let accepted = [
        "simple",
        "with-dash",
        "with_underscore",
        "550e8400-e29b-41d4-a716-446655440000",
    ];
    let rejected = [
        "",
        "with.dots",
        "with/slash",
        "with:colon",
        "emoji-🎉",
        "space test",
        "newline\ntest",
    ];

    for id in accepted {
        assert!(
            apply(&Graph::new(), &op(Change::add_node(Entity::new(id)))).is_some(),
            "rejected ID: {id:?}"
        );
        assert!(validate_operation(&op(Change::delete_node(id))).is_ok());
    }
    for id in rejected {
        assert!(
            apply(&Graph::new(), &op(Change::add_node(Entity::new(id)))).is_none(),
            "accepted ID: {id:?}"
        );
        assert!(validate_operation(&op(Change::delete_node(id))).is_err());
    }
}

// ============================================================================
// Snapshot Edge Cases
// ============================================================================

#[test]
fn snapshot_empty_tree() {
    let snapshot = TreeSnapshot::empty(TREE);
    let json = snapshot.to_json_pretty().unwrap();
    let restored = TreeSnapshot::from_json(&json).unwrap();

    assert_eq!(restored, snapshot);
    assert!(restored.validate_for(TREE).is_ok());
}

#[test]
fn snapshot_garbage_input() {
    for input in ["", "null", "[]", r#"{"formatVersion": 1}"#] {
        assert!(
            matches!(TreeSnapshot::from_json(input), Err(Error::InvalidSnapshot(_))),
            "accepted {input:?}"
        );
    }
}
