use criterion::{black_box, criterion_group, criterion_main, Criterion};
use persistency_core::checksum::ChecksumType;
use persistency_core::kvs::backend::KvsBackend;
use persistency_core::kvs::file_backend::FileKvsBackend;
use persistency_core::replica::ReplicaManager;
use persistency_core::value::TypedValue;

fn replica_write_read(n: u32, m: u32, payload_size: usize) {
    let dir = tempfile::tempdir().unwrap();
    let rm = ReplicaManager::new(dir.path(), n, m, ChecksumType::Crc32).unwrap();
    let payload = vec![0x5au8; payload_size];
    rm.write("bench.bin", black_box(&payload)).unwrap();
    let _ = black_box(rm.read("bench.bin").unwrap());
}

fn file_kvs_sync(entries: u32) {
    let dir = tempfile::tempdir().unwrap();
    let backend = FileKvsBackend::open(dir.path()).unwrap();
    for i in 0..entries {
        backend.set_value(&format!("key_{}", i), &TypedValue::Int64(i as i64)).unwrap();
    }
    backend.sync_to_storage().unwrap();
}

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("replica manager: write+read 3x2 replicas, 4KiB", |b| {
        b.iter(|| replica_write_read(3, 2, 4096))
    });
    c.bench_function("single-file kvs: four-phase sync of 100 entries", |b| {
        b.iter(|| file_kvs_sync(100))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
