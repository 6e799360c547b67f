use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use h2d_tx_engine::{Engine, NullBus, PayloadType};

mod common;
use common::engine_256;

#[test]
fn two_producers_and_one_consumer_deliver_every_payload() -> anyhow::Result<()> {
    let engine: Arc<Engine<NullBus>> = Arc::new(engine_256());

    const PER_PRODUCER: usize = 100;
    let producers_done = Arc::new(AtomicBool::new(false));

    let producers: Vec<_> = (0..2u8)
        .map(|id| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let payload = vec![id; 32];
                let mut sent = 0usize;
                while sent < PER_PRODUCER {
                    match engine.submit(&payload, PayloadType::DATA) {
                        Ok(()) => sent += 1,
                        Err(h2d_tx_engine::EngineError::NoSpace) => thread::yield_now(),
                        Err(other) => panic!("unexpected error: {other}"),
                    }
                }
            })
        })
        .collect();

    let consumer = {
        let engine = Arc::clone(&engine);
        let producers_done = Arc::clone(&producers_done);
        thread::spawn(move || loop {
            match engine.take_next().expect("padding_reserve contract holds") {
                Some(run) => {
                    assert_eq!(run.as_bytes().len() % 256, 0);
                    engine.mark_sent(run);
                }
                None => {
                    if producers_done.load(Ordering::Acquire) {
                        break;
                    }
                    thread::yield_now();
                }
            }
        })
    };

    for p in producers {
        p.join().unwrap();
    }
    producers_done.store(true, Ordering::Release);
    consumer.join().unwrap();

    // Drain anything still outstanding after the signal flag flipped.
    while let Some(run) = engine.take_next()? {
        engine.mark_sent(run);
    }

    let stats = engine.stats();
    assert_eq!(stats.pl_count_total, (2 * PER_PRODUCER) as u64);
    Ok(())
}
