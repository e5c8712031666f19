use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::json;
use sql_dispatch::prelude::*;
use sql_dispatch::template::TemplateRegistry;

const BENCH_SQL: &str = "-- #!sqlite
-- #{ bench
-- #  { init
CREATE TABLE IF NOT EXISTS test (id INTEGER PRIMARY KEY, a INTEGER NOT NULL, b TEXT NOT NULL);
-- #  }
-- #  { insert
-- #    :a int
-- #    :b string
INSERT INTO test (a, b) VALUES (:a, :b);
-- #  }
-- #  { lookup
-- #    :ids list:int
-- #    :limit int 100
SELECT id, a, b FROM test WHERE id IN :ids ORDER BY id LIMIT :limit;
-- #  }
-- #}
";

fn get_benchmark_rows() -> usize {
    std::env::var("BENCH_ROWS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(100)
}

fn random_ids(rng: &mut ChaCha8Rng, count: usize, max: i64) -> Vec<i64> {
    (0..count).map(|_| rng.random_range(1..=max)).collect()
}

fn template_rendering(c: &mut Criterion) {
    let mut registry = TemplateRegistry::new();
    registry
        .load(&TemplateSource::new("bench.sql", BENCH_SQL), Dialect::Sqlite)
        .expect("templates");
    let lookup = registry.get(Dialect::Sqlite, "bench.lookup").expect("lookup");
    let mut rng = ChaCha8Rng::seed_from_u64(42);

    let mut group = c.benchmark_group("render");
    for size in [1usize, 16, 256] {
        let args = Args::new().with_list("ids", random_ids(&mut rng, size, 1_000));
        group.throughput(Throughput::Elements(size as u64));
        group.bench_function(BenchmarkId::new("list", size), |b| {
            b.iter(|| black_box(lookup.render(black_box(&args)).expect("render")));
        });
    }
    group.finish();
}

fn pool_round_trip(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let sql = SqlMap::new().with_source(Dialect::Sqlite, TemplateSource::new("bench.sql", BENCH_SQL));
    let db = create(
        &json!({"type": "sqlite", "worker-limit": 4, "sqlite": {"file": "bench.sqlite"}}),
        &sql,
        ConnectorOptions::new().with_data_dir(dir.path()),
    )
    .expect("connector");
    db.execute_generic("bench.init", &Args::new()).expect("init");
    db.wait_all();

    let rows = get_benchmark_rows();
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    for i in 0..rows {
        let args = Args::new()
            .with("a", rng.random_range(0..1_000i64))
            .with("b", format!("text-{i}"));
        db.execute_insert("bench.insert", &args).expect("insert");
    }
    db.wait_all();
    let max_id = i64::try_from(rows).unwrap_or(i64::MAX);

    let mut group = c.benchmark_group("round_trip");
    for batch in [1usize, 32] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_function(BenchmarkId::new("lookup", batch), |b| {
            b.iter(|| {
                for _ in 0..batch {
                    let args = Args::new().with_list("ids", random_ids(&mut rng, 4, max_id));
                    db.execute_select("bench.lookup", &args).expect("submit");
                }
                black_box(db.wait_all())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, template_rendering, pool_round_trip);
criterion_main!(benches);
