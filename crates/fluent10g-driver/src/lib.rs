//! Host driver for the fluent10g FPGA network tester.
//!
//! The board offers four independent 10 Gbps interfaces, each with a
//! trace replay engine and a capture engine, plus a global latency
//! timestamp unit. This crate programs the hardware through a
//! memory-mapped register window, streams trace data to the board and
//! capture data back through two XDMA channels, manages the on-board
//! DRAM ring buffers, and decodes the capture byte stream into timed
//! packets with per-packet latency.
//!
//! # Quick start
//!
//! ```no_run
//! use fluent10g_driver::{Tester, Trace};
//! use std::sync::Arc;
//!
//! # fn main() -> fluent10g_driver::Result<()> {
//! let mut tester = Tester::open()?;
//!
//! let trace = Arc::new(Trace::from_file("trace.bin", 1)?);
//! tester.generator_mut(0).bind_trace(trace);
//! tester.receiver_mut(1)?.enable_capture(64, 1 << 30)?;
//!
//! tester.write_config()?;
//! tester.start_capture()?;
//! tester.start_replay()?; // blocks until the trace is on the wire
//! tester.stop_capture()?;
//!
//! let packets = tester.receiver(1)?.capture()?.get_packets()?;
//! println!("captured {} packets", packets.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Testing without hardware
//!
//! The [`sim`] module provides a register-accurate in-memory board; the
//! entire replay/capture cycle runs against it in CI.

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]

pub mod bar;
mod capture;
pub mod dma;
mod error;
pub mod hw;
mod generator;
mod interface;
mod memory;
mod receiver;
pub mod sim;
mod tester;
mod timestamp;
mod trace;

/// Hardware constants (re-exported from fluent10g-chip).
pub use fluent10g_chip as chip;

pub use capture::{arrival_times, latencies, Capture, CapturePacket};
pub use error::{Result, TesterError};
pub use generator::Generator;
pub use interface::Interface;
pub use memory::{assign_regions, MemoryPlan, RingRegion};
pub use receiver::{MacAddr, Receiver};
pub use tester::{Tester, Timing};
pub use timestamp::{Timestamp, TimestampMode};
pub use trace::{Trace, TraceBuilder};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        Capture, CapturePacket, MacAddr, Result, Tester, TesterError, Timing, Trace,
        TraceBuilder, TimestampMode,
    };
}
