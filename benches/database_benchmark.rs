use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::Rng;

use jsondb::core::config::Config;
use jsondb::core::types::{Value, MAIN_SHARD};
use jsondb::kind::{IndexDef, IndexProp, Kind, Permission};
use jsondb::query::{Clause, Op, Query};
use jsondb::Database;

const CALLER: &str = "bench";

fn open_db() -> (tempfile::TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let config = Config { storage_path: dir.path().to_path_buf(), ..Config::default() };
    (dir, Database::open(config).unwrap())
}

fn register_item_kind(db: &Database) {
    let mut kind = Kind::new("Item:1", CALLER).with_index(IndexDef::new("byCategory", vec![IndexProp::new("category")]));
    kind.permissions.allow(CALLER, Permission::Create);
    kind.permissions.allow(CALLER, Permission::Read);
    kind.permissions.allow(CALLER, Permission::Update);
    kind.permissions.allow(CALLER, Permission::Delete);
    db.put_kind(CALLER, kind).unwrap();
}

fn test_props(i: u64) -> HashMap<String, Value> {
    let mut rng = rand::thread_rng();
    let mut props = HashMap::new();
    props.insert("title".to_string(), Value::String(format!("Document {i}")));
    props.insert("category".to_string(), Value::String(format!("category_{}", i % 10)));
    props.insert("score".to_string(), Value::Decimal(rng.gen_range(0..100_000_000), 1_000_000));
    props
}

fn bench_single_put(c: &mut Criterion) {
    let (_dir, db) = open_db();
    register_item_kind(&db);

    c.bench_function("single_put", |b| {
        let mut id = 0u64;
        b.iter(|| {
            db.put(CALLER, "Item:1", None, MAIN_SHARD, None, black_box(test_props(id))).unwrap();
            id += 1;
        });
    });
}

fn bench_batch_put(c: &mut Criterion) {
    let (_dir, db) = open_db();
    register_item_kind(&db);

    let mut group = c.benchmark_group("batch_put");
    for batch_size in [10, 50, 100, 500].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(batch_size), batch_size, |b, &batch_size| {
            let mut id = 0u64;
            b.iter(|| {
                let ops = (0..batch_size)
                    .map(|_| {
                        id += 1;
                        jsondb::db::crud::BatchOp::Put { kind: "Item:1".to_string(), id: None, shard_id: MAIN_SHARD, expected_rev: None, props: test_props(id) }
                    })
                    .collect();
                db.batch(CALLER, black_box(ops)).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_find_and_search(c: &mut Criterion) {
    let (_dir, db) = open_db();
    register_item_kind(&db);
    for i in 0..2000 {
        db.put(CALLER, "Item:1", None, MAIN_SHARD, None, test_props(i)).unwrap();
    }

    let mut group = c.benchmark_group("query");

    group.bench_function("find_by_category", |b| {
        b.iter(|| {
            let query = Query::new("Item:1").with_where(Clause::new("category", Op::Eq, Value::String("category_5".to_string()))).with_limit(50);
            let _ = db.find(CALLER, black_box(query)).unwrap();
        });
    });

    group.bench_function("search_ordered_by_score", |b| {
        b.iter(|| {
            let mut query = Query::new("Item:1").with_limit(50);
            query.order_by = Some("score".to_string());
            let _ = db.search(CALLER, black_box(query)).unwrap();
        });
    });

    group.finish();
}

fn bench_concurrent_puts(c: &mut Criterion) {
    let (_dir, db) = open_db();
    register_item_kind(&db);
    let db = Arc::new(db);

    c.bench_function("concurrent_put_4_threads", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let db = db.clone();
                    thread::spawn(move || {
                        for i in 0..25u64 {
                            db.put(CALLER, "Item:1", None, MAIN_SHARD, None, test_props(t * 1000 + i)).unwrap();
                        }
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }
        });
    });
}

criterion_group!(benches, bench_single_put, bench_batch_put, bench_find_and_search, bench_concurrent_puts);
criterion_main!(benches);
