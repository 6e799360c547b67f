//! A transmit batching engine for a host-to-device wireless modem framing
//! protocol.
//!
//! Producers hand payloads to [`Engine::submit`]; a consumer drains
//! finished messages with [`Engine::take_next`] and [`Engine::mark_sent`].
//! Payloads are coalesced into a single contiguous ring buffer beneath one
//! message header per run, so the bus transport sees as few, as large,
//! transfers as the traffic pattern allows.

mod bus;
mod engine;
mod error;
mod message;
mod ring;
mod stats;

pub use bus::{BusDriver, NullBus};
pub use engine::{Builder, Engine, TxRun, DEFAULT_MAX_MESSAGE_SIZE};
pub use error::EngineError;
pub use message::{PayloadType, BUF_SIZE, PLD_MAX};
pub use stats::Stats;
