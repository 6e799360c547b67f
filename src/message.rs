//! On-wire message header and payload descriptor layout.
//!
//! Everything in this module operates on raw byte slices rather than
//! overlapping typed references into the ring: the in-ring header is
//! relocated in place when a message closes (see `engine::close_open_message`),
//! so two live views of the same bytes can exist at once and strict-aliasing
//! typed overlays would be unsound.

use bitflags::bitflags;

/// Total size of the ring buffer backing a single engine instance.
pub const BUF_SIZE: usize = 32 * 1024;

/// Maximum number of payload descriptors in one message.
pub const PLD_MAX: usize = 12;

/// Alignment every in-ring run, and every payload within a message, is
/// padded to.
pub const PAYLOAD_ALIGN: usize = 16;

/// Size in bytes of the 16-byte header prefix.
pub const HDR_PREFIX: usize = 16;

/// Size in bytes of one payload descriptor.
pub const DESC_SIZE: usize = 4;

/// Bytes reserved for a freshly opened message: the 16-byte prefix plus
/// `PLD_MAX` descriptor slots, even though most messages use far fewer.
/// Reserving the worst case up front means appending a descriptor never
/// has to shift payload bytes; closing a message shrinks the live header
/// back down to `hdr_real` and relocates it forward within this block.
pub const HDR_BLOCK: usize = HDR_PREFIX + DESC_SIZE * PLD_MAX;

bitflags! {
    /// Flags packed into the high bits of the `size` field.
    pub struct SizeFlags: u32 {
        /// Marks a run as a sentinel (tail-recycling) record that must
        /// never be handed to the bus driver.
        const SKIP = 0x8000_0000;
    }
}

/// Mask isolating the length bits of a `size` field (clears [`SizeFlags::SKIP`]).
pub const SIZE_MASK: u32 = !SizeFlags::SKIP.bits();

/// Constant stamped into a message's `barker` field at take time, so the
/// device can identify the start of framing.
pub const H2D_PREVIEW_BARKER: u32 = 0xFEED_C0DE;

/// A payload type as carried in a descriptor. Type values are opaque to
/// the engine except for the two reset sentinels, which force singleton
/// shipment: a reset payload is always the sole occupant of its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PayloadType(pub u16);

impl PayloadType {
    /// Ordinary data payload; no singleton constraint.
    pub const DATA: PayloadType = PayloadType(0);
    /// Forces a cold-reset control frame to ship alone.
    pub const RESET_COLD: PayloadType = PayloadType(1);
    /// Forces a warm-reset control frame to ship alone.
    pub const RESET_WARM: PayloadType = PayloadType(2);

    /// Whether this type must be the sole payload of its message.
    #[inline]
    pub fn is_singleton(self) -> bool {
        matches!(self, PayloadType::RESET_COLD | PayloadType::RESET_WARM)
    }
}

/// Round `value` up to the next multiple of `align` (`align` must be a
/// power of two).
#[inline]
pub const fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// The number of live header bytes once a message with `num_pls`
/// descriptors is closed: the 16-byte prefix plus its descriptors,
/// rounded up to 16. Always one of `{16, 32, 48, 64}`.
#[inline]
pub fn hdr_real(num_pls: u16) -> usize {
    round_up(HDR_PREFIX + DESC_SIZE * num_pls as usize, PAYLOAD_ALIGN)
}

/// Distance from a closed record's start to its relocated (moved)
/// header. Not a stored wire field: `num_pls` survives relocation
/// untouched (see [`HeaderView`] docs), so both the engine and a later
/// reader can recompute `offset` from it instead of spending wire bytes
/// on a value that's a pure function of `num_pls`.
#[inline]
pub fn moved_offset(num_pls: u16) -> usize {
    HDR_BLOCK - hdr_real(num_pls)
}

#[inline]
fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

#[inline]
fn write_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

#[inline]
fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

#[inline]
fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// A read-only view of a message header at a fixed byte offset within
/// the ring.
///
/// Field layout (little-endian throughout), matching the transmitted
/// layout bit-for-bit:
/// - `0..4`: `size`, high bit is [`SizeFlags::SKIP`].
/// - `4..6`: `num_pls`. Closing a message relocates its live header
///   forward (see `engine::close_open_message`) but never touches these
///   two bytes: either they sit outside the copied range (when the
///   header moves), or the move is a same-offset no-op (when it
///   doesn't). That means `num_pls` is readable at a record's original,
///   pre-move location for as long as the record lives in the ring, and
///   the `offset` to its relocated header is always `HDR_BLOCK -
///   hdr_real(num_pls)` — a pure function of `num_pls` — so `offset`
///   itself is never stored on the wire.
/// - `6..8`: `padding`, zero until the message is closed.
/// - `8..12`: `barker`, zero until stamped by `take_next`.
/// - `12..16`: `sequence`, zero until stamped by `take_next`.
/// - `16..16 + 4*num_pls`: payload descriptors.
pub struct HeaderView<'a> {
    bytes: &'a [u8],
}

impl<'a> HeaderView<'a> {
    /// Interpret `bytes[0..HDR_PREFIX]` (and beyond, for descriptors) as
    /// a header. `bytes` must have at least `HDR_PREFIX` bytes.
    #[inline]
    pub fn new(bytes: &'a [u8]) -> Self {
        debug_assert!(bytes.len() >= HDR_PREFIX);
        HeaderView { bytes }
    }

    #[inline]
    pub fn size_raw(&self) -> u32 {
        read_u32(self.bytes, 0)
    }

    /// `size & !SKIP`: the run's true length, including header,
    /// descriptors, payloads and padding.
    #[inline]
    pub fn run_len(&self) -> u32 {
        self.size_raw() & SIZE_MASK
    }

    #[inline]
    pub fn is_skip(&self) -> bool {
        self.size_raw() & SizeFlags::SKIP.bits() != 0
    }

    #[inline]
    pub fn num_pls(&self) -> u16 {
        read_u16(self.bytes, 4)
    }

    /// `padding`: only meaningful on a moved (transmittable) record.
    #[inline]
    pub fn padding(&self) -> u16 {
        read_u16(self.bytes, 6)
    }

    #[inline]
    pub fn barker(&self) -> u32 {
        read_u32(self.bytes, 8)
    }

    #[inline]
    pub fn sequence(&self) -> u32 {
        read_u32(self.bytes, 12)
    }

    /// Read descriptor `idx` (`idx < num_pls()`).
    #[inline]
    pub fn descriptor(&self, idx: u16) -> (u16, PayloadType) {
        let off = HDR_PREFIX + idx as usize * DESC_SIZE;
        let length = read_u16(self.bytes, off);
        let ty = read_u16(self.bytes, off + 2);
        (length, PayloadType(ty))
    }
}

/// A mutable view of a message header, used while a message is being
/// built or relocated.
pub struct HeaderViewMut<'a> {
    bytes: &'a mut [u8],
}

impl<'a> HeaderViewMut<'a> {
    #[inline]
    pub fn new(bytes: &'a mut [u8]) -> Self {
        debug_assert!(bytes.len() >= HDR_PREFIX);
        HeaderViewMut { bytes }
    }

    #[inline]
    pub fn as_view(&self) -> HeaderView<'_> {
        HeaderView::new(self.bytes)
    }

    #[inline]
    pub fn set_size(&mut self, len: u32, skip: bool) {
        let bits = if skip { len | SizeFlags::SKIP.bits() } else { len };
        write_u32(self.bytes, 0, bits);
    }

    #[inline]
    pub fn size_raw(&self) -> u32 {
        read_u32(self.bytes, 0)
    }

    #[inline]
    pub fn run_len(&self) -> u32 {
        self.size_raw() & SIZE_MASK
    }

    #[inline]
    pub fn set_num_pls(&mut self, n: u16) {
        write_u16(self.bytes, 4, n);
    }

    #[inline]
    pub fn num_pls(&self) -> u16 {
        read_u16(self.bytes, 4)
    }

    #[inline]
    pub fn set_padding(&mut self, padding: u16) {
        write_u16(self.bytes, 6, padding);
    }

    #[inline]
    pub fn set_barker(&mut self, barker: u32) {
        write_u32(self.bytes, 8, barker);
    }

    #[inline]
    pub fn set_sequence(&mut self, sequence: u32) {
        write_u32(self.bytes, 12, sequence);
    }

    /// Append descriptor `idx` (caller is responsible for bumping `num_pls`).
    #[inline]
    pub fn set_descriptor(&mut self, idx: u16, length: u16, ty: PayloadType) {
        let off = HDR_PREFIX + idx as usize * DESC_SIZE;
        write_u16(self.bytes, off, length);
        write_u16(self.bytes, off + 2, ty.0);
    }

    /// Zero the full `HDR_BLOCK` region, used when opening a new message.
    #[inline]
    pub fn zero_block(&mut self) {
        for b in self.bytes[..HDR_BLOCK.min(self.bytes.len())].iter_mut() {
            *b = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_up_aligns_to_power_of_two() {
        assert_eq!(round_up(0, 16), 0);
        assert_eq!(round_up(1, 16), 16);
        assert_eq!(round_up(16, 16), 16);
        assert_eq!(round_up(17, 16), 32);
    }

    #[test]
    fn header_round_trips_fields() {
        let mut block = [0u8; HDR_BLOCK];
        {
            let mut hdr = HeaderViewMut::new(&mut block);
            hdr.set_size(128, false);
            hdr.set_num_pls(2);
            hdr.set_descriptor(0, 16, PayloadType::DATA);
            hdr.set_descriptor(1, 32, PayloadType::RESET_WARM);
        }
        let view = HeaderView::new(&block);
        assert_eq!(view.run_len(), 128);
        assert!(!view.is_skip());
        assert_eq!(view.num_pls(), 2);
        assert_eq!(view.descriptor(0), (16, PayloadType::DATA));
        assert_eq!(view.descriptor(1), (32, PayloadType::RESET_WARM));
    }

    #[test]
    fn skip_flag_is_masked_out_of_run_len() {
        let mut block = [0u8; HDR_PREFIX];
        let mut hdr = HeaderViewMut::new(&mut block);
        hdr.set_size(4096, true);
        let view = hdr.as_view();
        assert!(view.is_skip());
        assert_eq!(view.run_len(), 4096);
        assert_eq!(view.size_raw() & SizeFlags::SKIP.bits(), SizeFlags::SKIP.bits());
    }
}
