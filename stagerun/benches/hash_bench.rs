//! Benchmarks for content fingerprinting.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use stagerun::hashing::{fingerprint, hash_directory};
use std::fs;

fn file_benchmark(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blob.bin");
    let data: Vec<u8> = (0..4 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    fs::write(&path, data).unwrap();

    c.bench_function("hash_file_4mib", |b| {
        b.iter(|| fingerprint(black_box(&path)).unwrap())
    });
}

fn directory_benchmark(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..200 {
        let sub = dir.path().join(format!("shard-{}", i % 10));
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join(format!("part-{i}.txt")), format!("record {i}\n").repeat(64)).unwrap();
    }

    c.bench_function("hash_directory_200_files", |b| {
        b.iter(|| hash_directory(black_box(dir.path())).unwrap())
    });
}

criterion_group!(benches, file_benchmark, directory_benchmark);
criterion_main!(benches);
