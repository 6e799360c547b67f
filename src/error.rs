//! Errors returned across the engine's producer- and bus-facing APIs.

use thiserror::Error;

/// Failure modes of the TX engine.
///
/// `NoSpace` is the only error a producer should expect in steady state;
/// `OutOfMemory` is fatal for the device and can only happen at `setup`;
/// `InvariantViolation` indicates a bug in the engine itself.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum EngineError {
    /// The ring has no contiguous space for this payload, even after
    /// recycling an exhausted tail.
    #[error("ring buffer has no space for this payload")]
    NoSpace,

    /// `setup` could not allocate the ring buffer.
    #[error("failed to allocate a {0}-byte ring buffer")]
    OutOfMemory(usize),

    /// An internal invariant was violated. Recovery is not defined; the
    /// caller should treat the engine as unusable.
    #[error("internal invariant violated: {0}")]
    InvariantViolation(&'static str),
}
