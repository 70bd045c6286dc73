//! Performance benchmarks for lineage-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lineage_engine::{
    apply, apply_sequential, Change, Entity, Graph, Operation, RelationKind, ReorderBuffer,
    TreeSnapshot,
};
use serde_json::json;

const TREE: &str = "9b2f6c1e-3d4a-4c5b-8e7f-0a1b2c3d4e5f";

/// A chain of generations: every person is a child of the previous one and
/// married to a partner.
fn family_ops(size: usize) -> Vec<Operation> {
    let mut ops = Vec::with_capacity(size * 2);
    ops.push(Change::add_node(
        Entity::new("p0").with_field("firstName", json!("Root")),
    ));
    for i in 1..size {
        ops.push(Change::add_related_node(
            Entity::new(format!("p{i}")).with_field("firstName", json!(format!("Person {i}"))),
            format!("p{}", i - 1),
            RelationKind::Child,
        ));
        ops.push(Change::add_related_node(
            Entity::new(format!("s{i}")),
            format!("p{i}"),
            RelationKind::Spouse,
        ));
    }

    ops.into_iter()
        .enumerate()
        .map(|(i, change)| Operation::new(TREE, "alice", change, 1000).with_sequence(i as u64 + 1))
        .collect()
}

fn bench_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply");

    let graph = apply_sequential(&Graph::new(), &family_ops(1000)).graph;

    group.bench_function("update_prop", |b| {
        let op = Operation::new(
            TREE,
            "alice",
            Change::update_prop("p500", json!({"firstName": "Renamed"})),
            1000,
        );
        b.iter(|| apply(black_box(&graph), black_box(&op)))
    });

    group.bench_function("delete_node", |b| {
        let op = Operation::new(TREE, "alice", Change::delete_node("p500"), 1000);
        b.iter(|| apply(black_box(&graph), black_box(&op)))
    });

    for size in [10, 100, 500].iter() {
        let ops = family_ops(*size);
        group.bench_with_input(BenchmarkId::new("sequential", size), &ops, |b, ops| {
            b.iter(|| apply_sequential(black_box(&Graph::new()), black_box(ops)))
        });
    }

    group.finish();
}

fn bench_reorder(c: &mut Criterion) {
    let mut group = c.benchmark_group("reorder");

    for size in [100, 1000].iter() {
        let ops = family_ops(*size);
        group.bench_with_input(BenchmarkId::new("reversed_arrival", size), &ops, |b, ops| {
            b.iter(|| {
                let mut buffer = ReorderBuffer::new();
                for op in ops.iter().skip(1).rev() {
                    buffer.insert(op.clone(), 1);
                }
                buffer.extract(black_box(1))
            })
        });
    }

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");

    for size in [100, 1000].iter() {
        let graph = apply_sequential(&Graph::new(), &family_ops(*size)).graph;
        let snapshot = TreeSnapshot::new(TREE, *size as u64, graph);
        let json = snapshot.to_json().unwrap();

        group.bench_with_input(BenchmarkId::new("to_json", size), &snapshot, |b, s| {
            b.iter(|| s.to_json())
        });
        group.bench_with_input(BenchmarkId::new("from_json", size), &json, |b, json| {
            b.iter(|| TreeSnapshot::from_json(black_box(json)))
        });
    }

    group.finish();
}

fn bench_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialization");

    group.bench_function("operation_to_json", |b| {
        let op = Operation::new(
            TREE,
            "alice",
            Change::update_prop("p1", json!({"firstName": "Ada", "birthYear": 1815})),
            1000,
        )
        .with_sequence(1);

        b.iter(|| serde_json::to_string(black_box(&op)))
    });

    group.bench_function("operation_from_json", |b| {
        let json = r#"{"treeId":"9b2f6c1e-3d4a-4c5b-8e7f-0a1b2c3d4e5f","authorId":"alice","type":"ADD_RELATION","payload":{"idA":"p1","idB":"p2","kind":"spouse"},"sequenceNumber":7,"createdAt":1000}"#;

        b.iter(|| serde_json::from_str::<Operation>(black_box(json)))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_apply,
    bench_reorder,
    bench_snapshot,
    bench_serialization,
);
criterion_main!(benches);
