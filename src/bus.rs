//! The bus-facing collaborator the engine notifies, but does not own.
//!
//! The engine hands finished work to something outside itself and
//! best-effort notifies it, without knowing or caring how bytes actually
//! move.

/// Implemented by the bus transport. The engine calls [`kick`](BusDriver::kick)
/// after releasing its lock, so an implementation is free to call back
/// into the engine (e.g. to drain it) without deadlocking.
///
/// Implementations must make `kick` idempotent and cheap: it is a
/// best-effort "there may be work" signal, not a guarantee, and the
/// engine calls it unconditionally, even when the `submit` that triggered
/// it failed (a failed `submit` may still free space via a concurrent
/// drain, so the bus side is still worth nudging).
pub trait BusDriver {
    /// Best-effort notification that the ring may have data to send.
    fn kick(&self);
}

/// A [`BusDriver`] that does nothing, for tests and for engines built
/// before a real transport is wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBus;

impl BusDriver for NullBus {
    #[inline]
    fn kick(&self) {}
}

impl<F: Fn()> BusDriver for F {
    #[inline]
    fn kick(&self) {
        self()
    }
}
