//! Throughput of the SPSC ring buffer: one framed write plus one read,
//! at the record sizes the pipeline actually moves (a 30-byte window key
//! and a few hundred bytes of encoded aggregate).

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use tickwindow_rs::ring::Ring;

fn ring_roundtrip(c: &mut Criterion) {
    let ring = Ring::in_memory(1 << 20).unwrap_or_else(|_| panic!("ring"));
    let key = [0x5Au8; 30];

    for value_len in [64usize, 256, 1024] {
        let value = vec![0x33u8; value_len];
        let name = format!("write_read_{value_len}b");
        c.bench_function(&name, |b| {
            b.iter(|| {
                assert!(ring.write(black_box(&key), black_box(&value)));
                black_box(ring.read())
            });
        });
    }
}

fn ring_batched(c: &mut Criterion) {
    let ring = Ring::in_memory(1 << 20).unwrap_or_else(|_| panic!("ring"));
    let key = [0x5Au8; 30];
    let value = vec![0x33u8; 256];

    // Fill-then-drain in batches of 64, closer to the drain loop's pattern.
    c.bench_function("write_read_batch_64x256b", |b| {
        b.iter(|| {
            for _ in 0..64 {
                assert!(ring.write(black_box(&key), black_box(&value)));
            }
            for _ in 0..64 {
                black_box(ring.read());
            }
        });
    });
}

criterion_group!(benches, ring_roundtrip, ring_batched);
criterion_main!(benches);
