//! On-board DRAM layout and ring buffer geometry.
//!
//! The board carries two independent 4 GiB DDR banks. Ring buffers for
//! trace replay (TX) and capture (RX) are carved out of these banks; the
//! host programs each ring as a `(base, range)` pair where
//! `size = range + 1`.
//!
//! ```text
//! Bank  Address          Size    Use
//! ───── ──────────────── ─────── ───────────────────────────────
//!  A    0x0_0000_0000    4 GiB   TX ring buffers (and RX if idle)
//!  B    0x1_0000_0000    4 GiB   RX ring buffers (and TX if idle)
//! ```

/// DDR bank A — base address and addressable range.
pub mod bank_a {
    /// Base address of bank A in the device address space.
    pub const ADDR: u64 = 0x0_0000_0000;
    /// Address range (`size - 1`).
    pub const RANGE: u32 = 0xFFFF_FFFF;
    /// Bank size in bytes.
    pub const SIZE: u64 = RANGE as u64 + 1;
}

/// DDR bank B — base address and addressable range.
pub mod bank_b {
    /// Base address of bank B in the device address space.
    pub const ADDR: u64 = 0x1_0000_0000;
    /// Address range (`size - 1`).
    pub const RANGE: u32 = 0xFFFF_FFFF;
    /// Bank size in bytes.
    pub const SIZE: u64 = RANGE as u64 + 1;
}

/// Ring buffer sizes must be a multiple of this and strictly larger.
/// Matches the burst granularity of the memory controller.
pub const RING_SIZE_ALIGN: u64 = 16384;

/// Maximum size of a single host-to-card ring buffer write (one DMA
/// granule on the TX path).
pub const RING_WR_TRANSFER_SIZE_MAX: u32 = 64 * 1024 * 1024;

/// Minimum size of a single card-to-host ring buffer read (one DMA
/// granule on the RX path). Smaller reads only happen at the end of the
/// ring or during the final drain after capture stop.
pub const RING_RD_TRANSFER_SIZE_MIN: u32 = 64 * 1024 * 1024;

/// Default amount of host memory reserved for capture data per interface.
pub const CAPTURE_HOST_MEM_SIZE_DEFAULT: usize = 4 * 1024 * 1024 * 1024;

/// DMA buffers are 64-byte aligned and transfer lengths are multiples of
/// this.
pub const DMA_ALIGN: u64 = 64;
