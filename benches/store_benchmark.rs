use criterion::{black_box, criterion_group, criterion_main, Criterion};
use quilldb::core::config::Config;
use quilldb::core::store::DocumentStore;
use quilldb::core::types::Props;
use quilldb::query::types::Query;
use quilldb::schema::registry::{PropertyRegistry, PropertySpec};
use quilldb::storage::store::MemoryStorage;
use rand::Rng;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn registry() -> PropertyRegistry {
    PropertyRegistry::new()
        .with_property(PropertySpec::text("title").slot(1).prefix("T").full_text())
        .with_property(PropertySpec::text("color").slot(2).prefix("C"))
        .with_property(PropertySpec::number("size").slot(3))
}

/// Helper to create test property maps
fn test_props(rng: &mut impl Rng) -> Props {
    let words = ["the", "quick", "brown", "fox", "jumps", "over", "lazy", "dog"];
    let title: String = (0..12)
        .map(|_| words[rng.gen_range(0..words.len())])
        .collect::<Vec<_>>()
        .join(" ");
    Props::from([
        ("title".to_string(), json!(title)),
        ("color".to_string(), json!(format!("color_{}", rng.gen_range(0..10)))),
        ("size".to_string(), json!(rng.gen_range(0..10_000))),
    ])
}

fn bench_store_pending(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let _guard = rt.enter();
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        index_path: dir.path().join("index"),
        ..Config::default()
    };
    let store = DocumentStore::open(config, registry(), Arc::new(MemoryStorage::new())).unwrap();
    let mut rng = rand::thread_rng();

    c.bench_function("store_pending_write", |b| {
        b.iter(|| {
            let props = test_props(&mut rng);
            rt.block_on(async { black_box(store.create(props).await.unwrap()) })
        })
    });

    rt.block_on(async { store.close().await.unwrap() });
}

fn bench_find(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let _guard = rt.enter();
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        index_path: dir.path().join("index"),
        ..Config::default()
    };
    let store = DocumentStore::open(config, registry(), Arc::new(MemoryStorage::new())).unwrap();
    let mut rng = rand::thread_rng();

    rt.block_on(async {
        for _ in 0..1000 {
            store.create(test_props(&mut rng)).await.unwrap();
        }
        store.commit().await.unwrap();
    });

    let query = Query {
        request: HashMap::from([("color".to_string(), json!("color_3"))]),
        limit: 20,
        ..Query::default()
    };
    c.bench_function("find_by_term", |b| {
        b.iter(|| rt.block_on(async { black_box(store.find(&query).await.unwrap()) }))
    });

    let text_query = Query {
        free_text: "quick fox".to_string(),
        limit: 20,
        ..Query::default()
    };
    c.bench_function("find_free_text", |b| {
        b.iter(|| rt.block_on(async { black_box(store.find(&text_query).await.unwrap()) }))
    });

    rt.block_on(async { store.close().await.unwrap() });
}

criterion_group!(benches, bench_store_pending, bench_find);
criterion_main!(benches);
