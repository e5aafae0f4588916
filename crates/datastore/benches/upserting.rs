use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;

use tablestore_datastore::{Database, Row};

fn build_test_rows(row_count: usize) -> Vec<Row> {
    let mut ret = vec![];

    for i in 0..row_count {
        let row = json!({
            "key": i as i64,
            "string_col": format!("string{}", i),
            "real_col": i as f64 / 3.0,
            "json_col": {"a": "b", "iteration": i},
        });
        if let serde_json::Value::Object(m) = row {
            ret.push(m);
        }
    }

    ret
}

pub fn benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("upserting");
    for size in [5, 10, 20, 50, 100, 500, 5000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, size| {
            let tdir = tempfile::TempDir::new().expect("Should create");
            let path = camino::Utf8PathBuf::from_path_buf(tdir.path().join("bench.db")).unwrap();
            let mut db = Database::open(&path, Default::default()).unwrap();
            let rows = build_test_rows(*size as usize);
            let unique = vec!["key".to_string()];

            b.iter(|| {
                // Dropped without committing, so every iteration starts from an empty table.
                let mut t = db.table("t").unwrap();
                t.upsert(
                    &unique,
                    rows.iter().cloned().map(Ok::<_, tablestore_datastore::Error>),
                )
                .unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, benchmarks);
criterion_main!(benches);
