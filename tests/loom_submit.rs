//! Model-checked concurrent `submit` under `loom`. Loom state-space
//! explosion means this only runs with `cfg(loom)` set and a small
//! iteration count; the larger, real-thread scenario lives in
//! `concurrent_submit.rs`.

#![cfg(loom)]

use std::num::NonZeroU32;

use h2d_tx_engine::{Builder, Engine, NullBus, PayloadType};
use loom::sync::Arc;
use loom::thread;

#[test]
fn concurrent_submits_never_corrupt_the_ring() {
    loom::model(|| {
        let engine: Arc<Engine<NullBus>> = Arc::new(
            Builder::new()
                .bus_block_size(NonZeroU32::new(16).unwrap())
                .build(NullBus)
                .unwrap(),
        );

        let joins: Vec<_> = (0..2u8)
            .map(|id| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || {
                    let _ = engine.submit(&[id; 8], PayloadType::DATA);
                    let _ = engine.submit(&[id; 8], PayloadType::DATA);
                })
            })
            .collect();

        for j in joins {
            j.join().unwrap();
        }

        let mut delivered = 0u64;
        while let Some(run) = engine.take_next().expect("padding_reserve contract holds") {
            assert_eq!(run.as_bytes().len() % 16, 0);
            engine.mark_sent(run);
            delivered += 1;
        }
        assert!(delivered > 0);
    });
}
