#![allow(dead_code)]

use std::num::NonZeroU32;

use h2d_tx_engine::{Builder, Engine, NullBus};

/// A freshly built engine with a 256-byte bus block size, the size used
/// by most of spec.md's worked examples.
pub fn engine_256() -> Engine<NullBus> {
    Builder::new()
        .bus_block_size(NonZeroU32::new(256).unwrap())
        .build(NullBus)
        .expect("build succeeds with a valid bus_block_size")
}

/// A freshly built engine with an arbitrary bus block size.
pub fn engine_with_block_size(bus_block_size: u32) -> Engine<NullBus> {
    Builder::new()
        .bus_block_size(NonZeroU32::new(bus_block_size).unwrap())
        .build(NullBus)
        .expect("build succeeds with a valid bus_block_size")
}
