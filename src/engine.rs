//! The TX engine: ring allocator + message builder + producer/consumer
//! APIs, all behind a single lock.
//!
//! Grounded on `lib.rs`'s `IoUring` (an owning struct built via a
//! `Builder`, exposing submission- and completion-side APIs over shared
//! ring state) and on `concurrent/squeue.rs`'s discipline of doing the
//! notify-side call only after the lock that guards the ring is released.

use std::num::NonZeroU32;

#[cfg(loom)]
use loom::sync::Mutex;
#[cfg(not(loom))]
use std::sync::Mutex;

use crate::bus::BusDriver;
use crate::error::EngineError;
use crate::message::{
    hdr_real, moved_offset, round_up, PayloadType, BUF_SIZE, HDR_BLOCK, PAYLOAD_ALIGN, PLD_MAX,
};
use crate::ring::{Reservation, Ring};
use crate::stats::Stats;

/// Default cap on a single message's in-FIFO size: half the ring. This
/// keeps one message from starving the other half of the buffer, so the
/// bus can always have one message in flight while the next is built.
/// Exposed as a parameter rather than hard-coded, since a caller with a
/// different bus transaction ceiling may want to override it.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = BUF_SIZE / 2;

struct State {
    ring: Ring,
    /// Physical offset of the currently open message's header, if any.
    open_msg: Option<usize>,
    /// Length of the run currently handed to the bus driver; zero when idle.
    msg_size_in_flight: u32,
    sequence: u32,
    stats: Stats,
}

impl State {
    fn new() -> Result<Self, EngineError> {
        Ok(State {
            ring: Ring::new()?,
            open_msg: None,
            msg_size_in_flight: 0,
            sequence: 0,
            stats: Stats::new(),
        })
    }

    /// True when the open message can accept one more descriptor.
    fn fits(&self) -> bool {
        match self.open_msg {
            Some(phys) => (self.ring.header(phys).num_pls() as usize) < PLD_MAX,
            None => false,
        }
    }

    fn open_num_pls(&self) -> u16 {
        self.open_msg
            .map(|phys| self.ring.header(phys).num_pls())
            .unwrap_or(0)
    }

    fn open_size(&self) -> u32 {
        self.open_msg
            .map(|phys| self.ring.header(phys).run_len())
            .unwrap_or(0)
    }

    /// Reserve a fresh `HDR_BLOCK`, retrying once through a tail
    /// sentinel if the allocator reports `TailFull`. Requests
    /// `bus_block_size` headroom up front so that closing this message
    /// with zero payloads still appended (e.g. immediately bounced by a
    /// `TailFull` on its first payload) can always pad successfully.
    fn open_new_message(&mut self, bus_block_size: u32) -> Result<(), EngineError> {
        for _ in 0..2 {
            match self.ring.reserve(HDR_BLOCK as u32, bus_block_size) {
                Reservation::Allocated(phys) => {
                    let mut hdr = self.ring.header_block_mut(phys);
                    hdr.zero_block();
                    hdr.set_size(HDR_BLOCK as u32, false);
                    self.open_msg = Some(phys);
                    return Ok(());
                }
                Reservation::TailFull => {
                    self.ring.skip_tail();
                    continue;
                }
                Reservation::NoSpace => {
                    self.open_msg = None;
                    return Err(EngineError::NoSpace);
                }
            }
        }
        // Two consecutive TailFulls back to back would mean the ring
        // allocator's own invariant (alignment keeps the tail remainder
        // at least HDR_PREFIX bytes) was violated.
        Err(EngineError::InvariantViolation(
            "open_new_message retried TailFull twice",
        ))
    }

    /// Idempotent over sentinels (defensive; should not normally occur).
    ///
    /// Returns `EngineError::InvariantViolation` if the `padding_reserve`
    /// contract (every payload append reserves `bus_block_size` of
    /// trailing headroom so this padding reservation always succeeds) was
    /// ever violated. In debug builds a `debug_assert!` fires first for an
    /// immediate diagnostic; release builds get the returned error instead
    /// of silently mis-sizing the closed record.
    fn close_open_message(&mut self, bus_block_size: u32) -> Result<(), EngineError> {
        let Some(phys) = self.open_msg else { return Ok(()) };

        if self.ring.header(phys).is_skip() {
            self.open_msg = None;
            return Ok(());
        }

        let num_pls = self.ring.header(phys).num_pls();
        let hdr_real_len = hdr_real(num_pls);
        let offset = moved_offset(num_pls);
        self.ring.relocate_header(phys, hdr_real_len, offset);

        let moved_phys = phys + offset;
        let orig_size = self.ring.header(phys).run_len();
        let moved_size = orig_size - offset as u32;
        let aligned = round_up(moved_size as usize, bus_block_size as usize) as u32;
        let pad = aligned - moved_size;

        if pad > 0 {
            match self.ring.reserve(pad, 0) {
                Reservation::Allocated(pad_phys) => {
                    self.ring.bytes_mut(pad_phys, pad as usize).fill(0xAD);
                }
                other => {
                    // The padding_reserve contract (every payload append
                    // reserves bus_block_size of trailing headroom)
                    // guarantees this never happens.
                    debug_assert!(
                        false,
                        "padding reservation failed unexpectedly: {other:?}"
                    );
                    self.open_msg = None;
                    return Err(EngineError::InvariantViolation(
                        "padding reservation failed while closing a message",
                    ));
                }
            }
        }

        let mut moved = self.ring.header_mut(moved_phys);
        moved.set_size(moved_size + pad, false);
        moved.set_padding(pad as u16);
        drop(moved);

        if offset > 0 {
            let mut orig = self.ring.header_mut(phys);
            orig.set_size(orig_size + pad, false);
        }

        #[cfg(feature = "log")]
        log::debug!(
            "closed message at offset {phys}: num_pls={num_pls} on-wire size={}",
            moved_size + pad
        );

        self.open_msg = None;
        Ok(())
    }
}

/// Builder for an [`Engine`], splitting configuration from construction
/// the way `IoUring::with_params` does.
#[derive(Clone, Debug, Default)]
pub struct Builder {
    bus_block_size: Option<u32>,
    max_message_size: Option<usize>,
}

impl Builder {
    pub fn new() -> Self {
        Builder::default()
    }

    /// The bus transport's required transfer granularity. Every closed,
    /// non-sentinel message's size is a multiple of this.
    pub fn bus_block_size(&mut self, n: NonZeroU32) -> &mut Self {
        self.bus_block_size = Some(n.get());
        self
    }

    /// Override the oversized-message guard (default `BUF_SIZE / 2`).
    pub fn max_message_size(&mut self, n: usize) -> &mut Self {
        self.max_message_size = Some(n);
        self
    }

    pub fn build<B: BusDriver>(&self, bus: B) -> Result<Engine<B>, EngineError> {
        let bus_block_size = self
            .bus_block_size
            .ok_or(EngineError::InvariantViolation("bus_block_size not set"))?;
        Ok(Engine {
            bus,
            bus_block_size,
            max_message_size: self.max_message_size.unwrap_or(DEFAULT_MAX_MESSAGE_SIZE),
            state: Mutex::new(State::new()?),
        })
    }
}

/// A borrowed, deliverable run: a pointer+length pair handed to the bus
/// driver. The engine's lock is not held while this exists; the run
/// simply borrows the engine so the bytes stay valid until
/// [`Engine::mark_sent`] is called with it.
pub struct TxRun<'a> {
    bytes: &'a [u8],
    in_flight_len: u32,
}

impl<'a> TxRun<'a> {
    /// The linear, aligned bytes ready for the bus transport.
    #[inline]
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }
}

/// The TX batching engine: one software FIFO per device.
pub struct Engine<B: BusDriver> {
    bus: B,
    bus_block_size: u32,
    max_message_size: usize,
    state: Mutex<State>,
}

impl<B: BusDriver> Engine<B> {
    /// Start configuring an engine; see [`Builder`].
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// Convenience constructor equivalent to
    /// `Builder::new().bus_block_size(n).build(bus)`.
    pub fn setup(bus_block_size: NonZeroU32, bus: B) -> Result<Self, EngineError> {
        Builder::new().bus_block_size(bus_block_size).build(bus)
    }

    /// Consume the engine, freeing the ring. `Drop` does the same thing,
    /// so this is only useful when a caller wants the deallocation to be
    /// visible at a specific point in the code rather than implicit.
    pub fn release(self) {}

    /// A snapshot of lifetime transmit statistics.
    pub fn stats(&self) -> Stats {
        self.state.lock().unwrap().stats
    }

    /// Size of the run currently on loan to a [`TxRun`], or zero if none
    /// is outstanding.
    pub fn in_flight_len(&self) -> u32 {
        self.state.lock().unwrap().msg_size_in_flight
    }

    /// Submit one payload for transmission. Returns immediately; the
    /// bytes are copied into the ring before this returns, so `buf` may
    /// be reused by the caller afterward.
    pub fn submit(&self, buf: &[u8], payload_type: PayloadType) -> Result<(), EngineError> {
        let result = self.submit_locked(buf, payload_type);
        // The bus is kicked unconditionally, even on failure: kicking
        // may drain the FIFO and free space for a retry.
        self.bus.kick();
        result
    }

    fn submit_locked(&self, buf: &[u8], payload_type: PayloadType) -> Result<(), EngineError> {
        let padded = round_up(buf.len(), PAYLOAD_ALIGN) as u32;
        let singleton = payload_type.is_singleton();
        let mut state = self.state.lock().unwrap();

        loop {
            self.ensure_open_message_for(&mut state, padded, singleton)?;

            match state.ring.reserve(padded, self.bus_block_size) {
                Reservation::Allocated(phys) => {
                    let dst = state.ring.bytes_mut(phys, padded as usize);
                    dst[..buf.len()].copy_from_slice(buf);
                    for b in dst[buf.len()..].iter_mut() {
                        *b = 0xAD;
                    }

                    let open_phys = state.open_msg.expect("message was just ensured open");
                    let num_pls = state.ring.header(open_phys).num_pls();
                    let mut hdr = state.ring.header_block_mut(open_phys);
                    hdr.set_descriptor(num_pls, buf.len() as u16, payload_type);
                    hdr.set_num_pls(num_pls + 1);
                    let new_size = hdr.run_len() + padded;
                    hdr.set_size(new_size, false);

                    if singleton {
                        state.close_open_message(self.bus_block_size)?;
                    }
                    return Ok(());
                }
                Reservation::TailFull => {
                    state.close_open_message(self.bus_block_size)?;
                    state.ring.skip_tail();
                    continue;
                }
                Reservation::NoSpace => {
                    #[cfg(feature = "log")]
                    log::warn!("submit: NoSpace for a {}-byte payload", buf.len());
                    return Err(EngineError::NoSpace);
                }
            }
        }
    }

    /// Ensure an open message exists that `padded` bytes (of the given
    /// singleton-ness) can be appended to, closing and/or opening as
    /// needed.
    fn ensure_open_message_for(
        &self,
        state: &mut State,
        padded: u32,
        singleton: bool,
    ) -> Result<(), EngineError> {
        if state.open_msg.is_none() {
            state.open_new_message(self.bus_block_size)?;
            return Ok(());
        }

        let needs_fresh = !state.fits()
            || (singleton && state.open_num_pls() > 0)
            || (state.open_size() as u64 + padded as u64) > self.max_message_size as u64;

        if needs_fresh {
            state.close_open_message(self.bus_block_size)?;
            state.open_new_message(self.bus_block_size)?;
        }

        Ok(())
    }

    /// Finalize (if needed) and return the next deliverable message, or
    /// `None` if nothing is ready.
    ///
    /// Returns `Err(EngineError::InvariantViolation)` only if closing the
    /// currently open message (because the consumer caught up to it)
    /// detects the `padding_reserve` contract was violated; the engine
    /// should then be treated as unusable, per `EngineError`'s contract.
    pub fn take_next(&self) -> Result<Option<TxRun<'_>>, EngineError> {
        let mut state = self.state.lock().unwrap();

        loop {
            if state.ring.is_empty() {
                state.ring.reset_empty();
                return Ok(None);
            }

            let out_phys = (state.ring.out_cursor() % BUF_SIZE as u64) as usize;
            let header = state.ring.header(out_phys);
            let is_skip = header.is_skip();
            let num_pls = header.num_pls();
            let is_open = state.open_msg == Some(out_phys);
            drop(header);

            if is_skip {
                let run_len = state.ring.header(out_phys).run_len();
                state.ring.advance_out(run_len as u64);
                continue;
            }

            if num_pls == 0 {
                if is_open {
                    return Ok(None);
                }
                let run_len = state.ring.header(out_phys).run_len();
                state.ring.advance_out(run_len as u64);
                continue;
            }

            if is_open {
                state.close_open_message(self.bus_block_size)?;
            }
            // Re-read after a possible close: closing rewrites this
            // header's `size` to include the trailing pad.
            let run_len = state.ring.header(out_phys).run_len();

            let offset = moved_offset(num_pls);
            let moved_phys = out_phys + offset;

            state.msg_size_in_flight = run_len;
            state.stats.record(num_pls as u32, {
                let v = state.ring.header(moved_phys).run_len();
                v
            });

            let sequence = state.sequence;
            state.sequence = state.sequence.wrapping_add(1);
            {
                let mut moved = state.ring.header_mut(moved_phys);
                moved.set_barker(crate::message::H2D_PREVIEW_BARKER);
                moved.set_sequence(sequence);
            }

            #[cfg(feature = "log")]
            log::debug!("take_next: sequence={sequence} num_pls={num_pls}");

            let bus_size = state.ring.header(moved_phys).run_len() as usize;
            let bytes = state.ring.bytes(moved_phys, bus_size);
            let ptr = bytes.as_ptr();
            let len = bytes.len();
            drop(state);

            // SAFETY: the ring's backing storage is a `Box<[u8; BUF_SIZE]>`
            // allocated once in `State::new` and never reallocated or
            // moved for the life of `Engine`, so `ptr` stays valid for
            // `'self` regardless of the mutex being unlocked here. A
            // concurrent `submit` can only extend the reserved region
            // past the current `in` cursor; it never touches bytes
            // already between `out` and `in`, so this run's bytes stay
            // stable until `mark_sent` advances `out` past them.
            let bytes: &[u8] = unsafe { std::slice::from_raw_parts(ptr, len) };
            return Ok(Some(TxRun {
                bytes,
                in_flight_len: run_len,
            }));
        }
    }

    /// Advance the read cursor past the run last returned by
    /// [`Engine::take_next`] and re-enable producers that were blocked
    /// on `NoSpace`. Must be called even when the bus transfer failed;
    /// the message is then simply dropped.
    pub fn mark_sent(&self, run: TxRun<'_>) {
        let in_flight = run.in_flight_len;
        drop(run);
        let mut state = self.state.lock().unwrap();
        state.ring.advance_out(in_flight as u64);
        state.msg_size_in_flight = 0;
        state.ring.normalize();
        drop(state);
        self.bus.kick();
    }
}

impl<B: BusDriver> core::fmt::Debug for Engine<B> {
    /// Walks `out..in` without mutating anything, skipping sentinels, the
    /// way `squeue::SubmissionQueue`'s `Debug` impl walks `head..tail`.
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state.lock().unwrap();
        let mut messages = Vec::new();
        let mut pos = state.ring.out_cursor();
        while pos != state.ring.in_cursor() {
            let phys = (pos % BUF_SIZE as u64) as usize;
            let header = state.ring.header(phys);
            let run_len = header.run_len().max(1);
            if !header.is_skip() {
                messages.push((phys, header.num_pls(), header.run_len()));
            }
            pos += run_len as u64;
        }
        f.debug_struct("Engine")
            .field("bus_block_size", &self.bus_block_size)
            .field("max_message_size", &self.max_message_size)
            .field("ring", &state.ring)
            .field("messages", &messages)
            .finish()
    }
}
