use criterion::{criterion_group, criterion_main, Criterion};
use std::fs::File;
use std::io::{Result, Write};
use survey_interchange::geom::{Coordinate, Geometry, LinearRing, Polygon};
use survey_interchange::store::MemoryStore;
use survey_interchange::test_helpers::user;
use survey_interchange::{export_csv, ExportRequest};

struct MockWriter;

impl Write for MockWriter {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        Ok(buf.len())
    }
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

pub fn export_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("street_trees");
    group.sample_size(10);
    let store = MemoryStore::from_reader(File::open("./tests/data/store.json").unwrap()).unwrap();
    let organizer = user("org@example.com", "org@example.com");
    group.bench_function("export_csv", |b| {
        b.iter(|| {
            let request = ExportRequest {
                user: &organizer,
                survey_id: "s1",
                job_id: "j1",
            };
            let mut writer = MockWriter;
            export_csv(&store, &request, &mut writer).unwrap();
        })
    });
    group.finish();
}

pub fn geometry_codec_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("geometry");
    let shell: Vec<Coordinate> = (0..1024)
        .map(|i| Coordinate::new(f64::from(i) * 0.001, f64::from(i % 7) * 0.001))
        .collect();
    let polygon = Geometry::Polygon(Polygon {
        shell: LinearRing(shell),
        holes: vec![],
    });
    group.bench_function("store_round_trip", |b| {
        b.iter(|| {
            let encoded = polygon.to_store_value();
            Geometry::from_store_value(&encoded).unwrap()
        })
    });
    group.finish();
}

criterion_group!(benches, export_bench, geometry_codec_bench);
criterion_main!(benches);
