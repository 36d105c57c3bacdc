//! Criterion benchmarks for statement rendering and batch planning

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sql_gateway::core::query_builder::{
    estimate_row_len, inject_array, plan_chunks, quote_table, CHUNK_SAFETY_MARGIN,
};
use sql_gateway::prelude::*;

fn rows(count: usize, payload: usize) -> Vec<Record> {
    (0..count)
        .map(|i| {
            Record::new()
                .set("id", i as i64)
                .set("body", "x".repeat(payload))
                .set("created_at", Expression::now())
        })
        .collect()
}

// ============================================================================
// Identifier Benchmarks
// ============================================================================

fn bench_identifiers(c: &mut Criterion) {
    let mut group = c.benchmark_group("identifiers");
    group.throughput(Throughput::Elements(1));

    group.bench_function("quote_table", |b| {
        b.iter(|| quote_table(black_box("warehouse.stock_levels")))
    });

    group.bench_function("quote_table_rejected", |b| {
        b.iter(|| quote_table(black_box("stock; DROP TABLE users")))
    });

    group.finish();
}

// ============================================================================
// Array Expansion Benchmarks
// ============================================================================

fn bench_inject_array(c: &mut Criterion) {
    let mut group = c.benchmark_group("inject_array");

    for size in [10usize, 100, 1000] {
        let values: Vec<DatabaseValue> = (0..size as i64).map(DatabaseValue::from).collect();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &values, |b, values| {
            b.iter(|| {
                let mut binds = Binds::new();
                let sql = inject_array(
                    black_box("SELECT * FROM orders WHERE id IN (:ids) AND status = :status"),
                    ":ids",
                    values,
                    &mut binds,
                );
                black_box((sql, binds))
            });
        });
    }

    group.finish();
}

// ============================================================================
// Batch Planning Benchmarks
// ============================================================================

fn bench_batch_planning(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_planning");

    for count in [100usize, 5000] {
        let records = rows(count, 500);
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(
            BenchmarkId::new("estimate_row_len", count),
            &records,
            |b, records| b.iter(|| records.iter().map(estimate_row_len).sum::<usize>()),
        );

        let lengths: Vec<usize> = records.iter().map(estimate_row_len).collect();
        let allowed = 1024.0 * 1024.0 * CHUNK_SAFETY_MARGIN;
        group.bench_with_input(
            BenchmarkId::new("plan_chunks", count),
            &lengths,
            |b, lengths| b.iter(|| plan_chunks(black_box(lengths), allowed, 32766 / 3)),
        );
    }

    group.finish();
}

// ============================================================================
// Statement Rendering Benchmarks
// ============================================================================

#[cfg(feature = "sqlite")]
fn bench_insert_build(c: &mut Criterion) {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(_) => return,
    };
    let config = JsonConfig::new(serde_json::json!({
        "bench": {
            "driver": "sqlite",
            "hostname": ":memory:",
            "username": "bench",
            "password": "bench",
            "schema": "statement_bench",
            "max_query_length": 1,
        }
    }));
    let registry = ConnectionRegistry::new(config);
    let conn = match runtime.block_on(registry.connect("bench")) {
        Ok(conn) => conn,
        Err(_) => return,
    };

    let mut group = c.benchmark_group("insert_build");
    for count in [100usize, 5000] {
        let builder = match conn.insert("events").and_then(|b| b.values(rows(count, 500))) {
            Ok(builder) => builder,
            Err(_) => continue,
        };
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &builder, |b, builder| {
            b.iter(|| builder.build())
        });
    }
    group.finish();
}

#[cfg(not(feature = "sqlite"))]
fn bench_insert_build(_c: &mut Criterion) {}

criterion_group!(
    benches,
    bench_identifiers,
    bench_inject_array,
    bench_batch_planning,
    bench_insert_build,
);

criterion_main!(benches);
