//! Hardware access seam.
//!
//! The tester talks to the board through three narrow interfaces: a 32-bit
//! register window and one DMA channel per direction. Everything above
//! this seam (ring engines, coordinator, codecs) is hardware-agnostic and
//! runs unchanged against the real board ([`crate::bar`], [`crate::dma`])
//! or the simulated one ([`crate::sim`]).

use crate::error::Result;
use std::sync::Arc;

/// 32-bit word access into the control-plane register window.
///
/// Reads and writes are word-sized and atomic at the word level; bounds
/// are asserted by implementations. Implementations must be shareable
/// across threads — the capture task reads and writes receiver-scoped
/// registers while the foreground owns the rest of the map.
pub trait RegisterIo: Send + Sync {
    /// Read the register at byte offset `addr`.
    fn read(&self, addr: u32) -> u32;

    /// Write `value` to the register at byte offset `addr`.
    fn write(&self, addr: u32, value: u32);
}

/// Host-to-card DMA channel.
///
/// `data` must be a multiple of 64 bytes; the transfer blocks until the
/// full buffer reached device memory.
pub trait DmaWriter: Send {
    /// Write `data` to device memory at `device_addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying channel fails; DMA errors are
    /// fatal to the measurement.
    fn write(&mut self, device_addr: u64, data: &[u8]) -> Result<()>;
}

/// Card-to-host DMA channel.
pub trait DmaReader: Send {
    /// Fill `buf` from device memory at `device_addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying channel fails; DMA errors are
    /// fatal to the measurement.
    fn read(&mut self, device_addr: u64, buf: &mut [u8]) -> Result<()>;
}

/// Shared handle to the register window.
pub type SharedRegisterIo = Arc<dyn RegisterIo>;
