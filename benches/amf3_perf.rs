//! Encode/decode throughput.
//!
//! Run with: cargo bench --bench amf3_perf

use std::hint::black_box;

use amf3_codec::{
    Array, EncodeOptions, Object, ObjectIdentity, Value, Vector, VectorKind, decode, encode,
    encode_with, from_slice, to_vec,
};
use codspeed_criterion_compat::{BenchmarkId, Criterion, criterion_group, criterion_main};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
struct Row {
    id: u32,
    name: String,
    score: f64,
    tags: Vec<String>,
}

/// A result set of typed rows, the shape remoting services usually return.
fn rows(count: usize) -> Value {
    let rows = (0..count)
        .map(|i| {
            let mut row = Object::typed("app.Row");
            row.sealed.insert("id".into(), Value::Int(i as i32));
            row.sealed.insert("name".into(), Value::Str(format!("row-{}", i % 64)));
            row.sealed.insert("score".into(), Value::Double(i as f64 * 0.5));
            row.sealed.insert("active".into(), Value::Bool(i % 3 == 0));
            Value::Object(row)
        })
        .collect();
    Value::Array(Array::dense(rows))
}

fn samples(count: usize) -> Value {
    let mut vector = Vector::new(VectorKind::Double);
    vector.elements = (0..count).map(|i| Value::Double(i as f64)).collect();
    Value::Vector(vector)
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    for count in [10, 1_000] {
        let value = rows(count);
        group.bench_with_input(BenchmarkId::new("rows", count), &value, |b, value| {
            b.iter(|| encode(black_box(value)).unwrap())
        });
    }

    let value = rows(1_000);
    let options = EncodeOptions {
        identity: ObjectIdentity::Structural,
    };
    group.bench_function("rows_structural_1000", |b| {
        b.iter(|| encode_with(black_box(&value), &options).unwrap())
    });

    let value = samples(10_000);
    group.bench_function("double_vector_10000", |b| {
        b.iter(|| encode(black_box(&value)).unwrap())
    });
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    for count in [10, 1_000] {
        let bytes = encode(&rows(count)).unwrap();
        group.bench_with_input(BenchmarkId::new("rows", count), &bytes, |b, bytes| {
            b.iter(|| decode(black_box(bytes)).unwrap())
        });
    }

    let bytes = encode(&samples(10_000)).unwrap();
    group.bench_function("double_vector_10000", |b| {
        b.iter(|| decode(black_box(&bytes)).unwrap())
    });
    group.finish();
}

fn bench_serde(c: &mut Criterion) {
    let rows: Vec<Row> = (0..1_000)
        .map(|i| Row {
            id: i,
            name: format!("row-{}", i % 64),
            score: f64::from(i) * 0.25,
            tags: vec!["a".into(), "b".into()],
        })
        .collect();
    let bytes = to_vec(&rows).unwrap();

    c.bench_function("serde_to_vec_1000", |b| b.iter(|| to_vec(black_box(&rows)).unwrap()));
    c.bench_function("serde_from_slice_1000", |b| {
        b.iter(|| from_slice::<Vec<Row>>(black_box(&bytes)).unwrap())
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_serde);
criterion_main!(benches);
