// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 shmexec contributors
//
// Admission ring throughput.
//
// Run with:
//   cargo bench --bench admission
//
// Groups:
//   ring_roundtrip — one produce + one consume on the same thread
//   ring_pingpong  — producer and consumer threads over a capacity-4 ring

use std::thread;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use shmexec::{AdmissionRecord, AdmissionRing};

fn bench_record() -> AdmissionRecord {
    AdmissionRecord::new("./tmp/pipe_request_1", "./tmp/pipe_response_1", 1, 1000).unwrap()
}

fn bench_roundtrip(c: &mut Criterion) {
    let name = format!("/shmexec_bench_rt_{}", std::process::id());
    let ring = AdmissionRing::create(&name, 4).unwrap();
    let record = bench_record();

    let mut group = c.benchmark_group("ring_roundtrip");
    group.throughput(Throughput::Elements(1));
    group.bench_function("produce_consume", |b| {
        b.iter(|| {
            ring.produce(&record, None).unwrap();
            let pid = ring.consume(|r| r.pid()).unwrap();
            black_box(pid)
        });
    });
    group.finish();

    ring.teardown().unwrap();
}

fn bench_pingpong(c: &mut Criterion) {
    let name = format!("/shmexec_bench_pp_{}", std::process::id());
    let ring = AdmissionRing::create(&name, 4).unwrap();
    let record = bench_record();

    let mut group = c.benchmark_group("ring_pingpong");
    group.throughput(Throughput::Elements(100));
    group.bench_function("threaded_100", |b| {
        b.iter(|| {
            let consumer_ring = AdmissionRing::attach(&name).unwrap();
            let consumer = thread::spawn(move || {
                for _ in 0..100 {
                    consumer_ring.consume(|r| black_box(r.pid())).unwrap();
                }
            });
            for _ in 0..100 {
                ring.produce(&record, None).unwrap();
            }
            consumer.join().unwrap();
        });
    });
    group.finish();

    ring.teardown().unwrap();
}

criterion_group!(benches, bench_roundtrip, bench_pingpong);
criterion_main!(benches);
