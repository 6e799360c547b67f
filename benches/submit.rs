use criterion::{black_box, criterion_group, criterion_main, Criterion};

use h2d_tx_engine::PayloadType;

#[path = "../tests/common/mod.rs"]
mod common;
use common::engine_with_block_size;

fn bench_fill_and_drain(c: &mut Criterion) {
    let payload = vec![0xABu8; 128];

    c.bench_function("fill_and_drain", |b| {
        b.iter(|| {
            let engine = engine_with_block_size(512);

            loop {
                match engine.submit(black_box(&payload), PayloadType::DATA) {
                    Ok(()) => {}
                    Err(_) => break,
                }
            }

            while let Some(run) = engine.take_next().expect("padding_reserve contract holds") {
                black_box(run.as_bytes());
                engine.mark_sent(run);
            }
        });
    });
}

fn bench_single_payload_submit(c: &mut Criterion) {
    let engine = engine_with_block_size(512);
    let payload = vec![0xCDu8; 64];

    c.bench_function("single_submit_then_drain", |b| {
        b.iter(|| {
            engine.submit(black_box(&payload), PayloadType::DATA).ok();
            if let Some(run) = engine.take_next().expect("padding_reserve contract holds") {
                black_box(run.as_bytes());
                engine.mark_sent(run);
            }
        });
    });
}

criterion_group!(submit, bench_fill_and_drain, bench_single_payload_submit);
criterion_main!(submit);
