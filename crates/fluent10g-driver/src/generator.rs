//! Trace replay engine (TX ring buffer).
//!
//! Each generator owns a TX ring buffer in board DRAM and keeps the
//! host-side write pointer. The hardware is structured as:
//!
//! ```text
//!  --------------       ------       ---------       -----
//! | DRAM         |     | BRAM |     | Rate    |     | MAC |
//! | TX Ring Buff | --> | FIFO | --> | Control | --> |     |
//!  --------------       ------       ---------       -----
//! ```
//!
//! Trace data is copied into the ring via the host-to-card DMA channel in
//! granules of at most [`RING_WR_TRANSFER_SIZE_MAX`] bytes. Once started,
//! the replay core reads from the ring into a block RAM FIFO; the rate
//! control module drains that FIFO onto the link with the inter-packet
//! times stored in the trace.
//!
//! Pointer discipline: equal read and write pointers mean the ring is
//! empty. A refill must therefore never advance the write pointer onto the
//! read pointer — including the wrap case where a transfer ending exactly
//! at the ring end would land the write pointer on a read pointer of zero.

use crate::error::{Result, TesterError};
use crate::hw::{DmaWriter, RegisterIo};
use crate::trace::Trace;
use fluent10g_chip::dram::{RING_SIZE_ALIGN, RING_WR_TRANSFER_SIZE_MAX};
use fluent10g_chip::regs::{self, gen_rate_ctrl, gen_replay};
use std::sync::Arc;
use std::time::Instant;

/// Configures and feeds the trace replay core of one network interface.
#[derive(Debug)]
pub struct Generator {
    id: usize,

    /// Trace bound for replay; `None` leaves the generator idle.
    trace: Option<Arc<Trace>>,

    /// Trace bytes transferred to the ring so far (replays included).
    bytes_transferred: u64,

    /// Ring buffer region in device DRAM.
    ring_addr: u64,
    ring_range: u32,

    /// Host-side write pointer (byte offset into the ring).
    ring_wr_ptr: u32,

    /// Largest single DMA granule. Defaults to the hardware constant;
    /// smaller values keep the ring algorithms testable with small rings.
    transfer_max: u32,
}

impl Generator {
    pub(crate) fn new(id: usize) -> Self {
        Self {
            id,
            trace: None,
            bytes_transferred: 0,
            ring_addr: 0,
            ring_range: 0,
            ring_wr_ptr: 0,
            transfer_max: RING_WR_TRANSFER_SIZE_MAX,
        }
    }

    /// Interface ID this generator transmits on.
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Bind a trace for replay.
    pub fn bind_trace(&mut self, trace: Arc<Trace>) {
        self.trace = Some(trace);
    }

    /// Remove the trace binding; the generator becomes idle.
    pub fn clear_trace(&mut self) {
        self.trace = None;
    }

    /// The trace currently bound, if any.
    #[must_use]
    pub fn trace(&self) -> Option<&Arc<Trace>> {
        self.trace.as_ref()
    }

    /// Whether a trace is bound (the generator takes part in replay).
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.trace.is_some()
    }

    /// Trace bytes transferred to the ring so far (replays included).
    #[must_use]
    pub const fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    pub(crate) fn set_ring_region(&mut self, addr: u64, range: u32) {
        self.ring_addr = addr;
        self.ring_range = range;
    }

    /// Validate the ring geometry and push the configuration to the
    /// hardware. Resets the write pointer and the transfer progress.
    pub(crate) fn configure(&mut self, bar: &dyn RegisterIo) -> Result<()> {
        let Some(trace) = &self.trace else {
            // Nothing to do for idle generators.
            return Ok(());
        };

        let ring_size = u64::from(self.ring_range) + 1;
        if ring_size <= RING_SIZE_ALIGN {
            return Err(TesterError::config(format!(
                "generator {}: ring buffer size must be larger than {RING_SIZE_ALIGN} bytes",
                self.id
            )));
        }
        if ring_size % RING_SIZE_ALIGN != 0 {
            return Err(TesterError::config(format!(
                "generator {}: ring buffer size must be a multiple of {RING_SIZE_ALIGN} bytes",
                self.id
            )));
        }
        if u64::from(self.transfer_max) % RING_SIZE_ALIGN != 0 {
            return Err(TesterError::config(format!(
                "generator {}: transfer granule must be a multiple of {RING_SIZE_ALIGN} bytes",
                self.id
            )));
        }
        if ring_size <= u64::from(self.transfer_max) {
            return Err(TesterError::config(format!(
                "generator {}: transfer granule must be smaller than the ring buffer",
                self.id
            )));
        }

        let base = regs::NT_GEN_REPLAY_BASE[self.id];
        bar.write(base + gen_replay::MEM_ADDR_HI, (self.ring_addr >> 32) as u32);
        bar.write(base + gen_replay::MEM_ADDR_LO, (self.ring_addr & 0xFFFF_FFFF) as u32);
        bar.write(base + gen_replay::MEM_RANGE, self.ring_range);

        self.ring_wr_ptr = 0;
        bar.write(base + gen_replay::ADDR_WR, self.ring_wr_ptr);

        tracing::debug!(
            "Generator {}: replay from ring buffer addr {:#018x}, range {:#010x}",
            self.id,
            self.ring_addr,
            self.ring_range
        );

        self.bytes_transferred = 0;

        let trace_size = trace.total_size();
        bar.write(base + gen_replay::TRACE_SIZE_HI, (trace_size >> 32) as u32);
        bar.write(base + gen_replay::TRACE_SIZE_LO, (trace_size & 0xFFFF_FFFF) as u32);

        Ok(())
    }

    /// Attempt one DMA-granule refill of the TX ring. Returns the number
    /// of bytes transferred; zero means the trace is exhausted or the ring
    /// cannot currently accept a transfer.
    pub(crate) fn refill_ring(
        &mut self,
        bar: &dyn RegisterIo,
        h2c: &mut dyn DmaWriter,
    ) -> Result<u64> {
        let Some(trace) = &self.trace else {
            return Ok(0);
        };

        let trace_size = trace.total_size();
        let outstanding = trace_size - self.bytes_transferred;
        if outstanding == 0 {
            // Trace completely written.
            return Ok(0);
        }

        let ring_size = u64::from(self.ring_range) + 1;
        let wr_ptr = self.ring_wr_ptr;
        let size_to_end = ring_size - u64::from(wr_ptr);

        // Granule-bounded transfer, never crossing the end of the ring.
        let transfer_size = outstanding
            .min(u64::from(self.transfer_max))
            .min(size_to_end) as u32;

        let base = regs::NT_GEN_REPLAY_BASE[self.id];
        let rd_ptr = bar.read(base + gen_replay::ADDR_RD);

        let admissible = if rd_ptr == wr_ptr {
            // Ring is empty.
            true
        } else if rd_ptr < wr_ptr {
            // While the ring holds data the pointers must never become
            // equal. Filling up to the ring end wraps the write pointer to
            // zero, so that is only allowed while the read pointer is not
            // itself at zero.
            rd_ptr != 0 || u64::from(wr_ptr) + u64::from(transfer_size) != ring_size
        } else {
            // Keep a strict gap so the write pointer never catches up with
            // the read pointer.
            rd_ptr - wr_ptr > transfer_size
        };
        if !admissible {
            return Ok(0);
        }

        let data = trace.read(trace_size - outstanding, transfer_size)?;

        let started = Instant::now();
        h2c.write(self.ring_addr + u64::from(wr_ptr), &data)?;
        let elapsed = started.elapsed();

        let next = u64::from(wr_ptr) + u64::from(transfer_size);
        assert!(next <= ring_size, "Generator {}: write pointer overshoot", self.id);
        self.ring_wr_ptr = if next == ring_size { 0 } else { wr_ptr + transfer_size };
        bar.write(base + gen_replay::ADDR_WR, self.ring_wr_ptr);

        self.bytes_transferred += u64::from(transfer_size);

        let gbps = 8.0 * f64::from(transfer_size) / elapsed.as_secs_f64() / 1e9;
        tracing::debug!(
            "Generator {}: {} bytes in {:?} ({:.3} Gbps)",
            self.id,
            transfer_size,
            elapsed,
            gbps
        );

        Ok(u64::from(transfer_size))
    }

    /// Trigger the hardware to start reading trace data from the ring.
    /// Packets are only transmitted once rate control is activated.
    pub(crate) fn start(&self, bar: &dyn RegisterIo) {
        if self.trace.is_none() {
            return;
        }
        bar.write(regs::NT_GEN_REPLAY_BASE[self.id] + gen_replay::START, 0x1);
    }

    /// Whether the core is still reading from the ring or draining its
    /// block RAM FIFO. Packets may still sit in the rate control FIFO
    /// after this returns false.
    pub(crate) fn is_active(&self, bar: &dyn RegisterIo) -> bool {
        let status = bar.read(regs::NT_GEN_REPLAY_BASE[self.id] + gen_replay::STATUS);
        status & gen_replay::status::ACTIVE_MASK > 0
    }

    /// Check the rate control error register.
    pub(crate) fn check_error(&self, bar: &dyn RegisterIo) -> Result<()> {
        let status = bar.read(regs::NT_GEN_RATE_CTRL_BASE[self.id] + gen_rate_ctrl::STATUS);
        if status & gen_rate_ctrl::status::TIMING_ERROR > 0 {
            return Err(TesterError::ReplayTiming { iface: self.id });
        }
        Ok(())
    }

    /// Per-core reset. The replay core is reset by the global reset pulse,
    /// so there is nothing to do here.
    pub(crate) fn reset_hardware(&self) {}

    /// Drop the trace binding to release host memory.
    pub(crate) fn free_host_memory(&mut self) {
        self.trace = None;
    }
}
