//! Criterion microbenchmarks for record generation and in-memory query plans.
//!
//! Run with: `cargo bench --bench micro`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use docstore_bench::adapters::MemoryStore;
use docstore_bench::loader::fetch_product_ids;
use docstore_bench::model::{ORDERS, PRODUCTS};
use docstore_bench::workloads::{JoinShape, Pipeline, QueryParams, Variant};
use docstore_bench::{DataGen, DurabilityLevel, Order, Product, QueryRunner, StoreConnector};

fn bench_generate(c: &mut Criterion) {
    let mut group = c.benchmark_group("generate");
    let n = 1_000usize;

    group.bench_function(BenchmarkId::new("products", n), |b| {
        let mut gen = DataGen::new(42);
        b.iter(|| gen.generate_products(n));
    });

    group.bench_function(BenchmarkId::new("orders", n), |b| {
        let mut gen = DataGen::new(42);
        let pool: Vec<_> = (0..100)
            .map(|i| docstore_bench::RecordId::new(format!("{:024x}", i)))
            .collect();
        b.iter(|| gen.generate_orders(n, &pool).unwrap());
    });
    group.finish();
}

fn seeded_store(products: usize, orders: usize) -> MemoryStore {
    let store = MemoryStore::default();
    let mut session = store.connect("memory://bench").unwrap();
    let mut gen = DataGen::new(7);
    let level = DurabilityLevel::default();

    let docs = gen.generate_products(products).iter().map(Product::to_document).collect();
    session.insert_many(PRODUCTS, docs, &level).unwrap();
    let pool = fetch_product_ids(session.as_mut()).unwrap();
    let docs = gen
        .generate_orders(orders, &pool)
        .unwrap()
        .iter()
        .map(Order::to_document)
        .collect();
    session.insert_many(ORDERS, docs, &level).unwrap();
    store
}

fn bench_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("simple_join");
    group.sample_size(20);
    let store = seeded_store(2_000, 2_000);
    let params = QueryParams::page(50);

    for variant in [Variant::Naive, Variant::Optimized] {
        let pipeline = Pipeline::Join {
            shape: JoinShape::Simple,
            variant,
        };
        group.bench_function(BenchmarkId::new(variant.to_string(), params.page_size), |b| {
            let mut runner = QueryRunner::new(store.connect("memory://bench").unwrap(), 1);
            b.iter(|| runner.fetch(&pipeline, &params).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_generate, bench_join);
criterion_main!(benches);
