//! Error types for network tester operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for network tester operations.
pub type Result<T> = std::result::Result<T, TesterError>;

/// Errors that can occur while driving the network tester.
#[derive(Debug, Error)]
pub enum TesterError {
    /// Device node or sysfs resource not found.
    #[error("Device not found: {path}")]
    DeviceNotFound {
        /// Path that was checked.
        path: PathBuf,
    },

    /// No fluent10g board detected on the PCIe bus.
    #[error("No fluent10g board detected")]
    NoBoardFound,

    /// The identity word read from the hardware does not match the values
    /// this driver was built against.
    #[error("Hardware {field} is {found:#06x}, expected {expected:#06x}")]
    IdentityMismatch {
        /// Which identity half mismatched ("CRC16" or "version").
        field: &'static str,
        /// Value read from the hardware.
        found: u16,
        /// Value expected by the driver.
        expected: u16,
    },

    /// A configuration value is out of bounds or inconsistent.
    #[error("Invalid configuration: {reason}")]
    Config {
        /// Reason the configuration was rejected.
        reason: String,
    },

    /// A host/device DMA transfer failed.
    #[error("DMA transfer failed: {reason}")]
    Dma {
        /// Reason for failure.
        reason: String,
    },

    /// I/O error during device access.
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The rate control could not honour the inter-packet transmission
    /// times specified in the trace.
    #[error("Generator {iface}: replay timing violation")]
    ReplayTiming {
        /// Interface the violating generator is attached to.
        iface: usize,
    },

    /// A capture FIFO overflowed while writing to DRAM; capture data was
    /// lost.
    #[error("Receiver {iface}: {fifo} FIFO full")]
    CaptureOverrun {
        /// Interface the overrunning receiver is attached to.
        iface: usize,
        /// Which FIFO overflowed ("meta" or "data").
        fifo: &'static str,
    },

    /// The capture core did not become inactive after stop and flush.
    #[error("Receiver {iface}: still active after stop")]
    StillActive {
        /// Interface the receiver is attached to.
        iface: usize,
    },

    /// Packet data was requested from a capture running in discard mode.
    #[error("Capture data has been discarded")]
    CaptureDiscarded,

    /// A capture record extends past the recorded write offset.
    #[error("Capture stream truncated at offset {offset}")]
    CaptureTruncated {
        /// Byte offset of the truncated record.
        offset: usize,
    },

    /// An operation was requested in a state that does not allow it.
    #[error("Invalid state: {state}")]
    InvalidState {
        /// Current state description.
        state: String,
    },
}

impl TesterError {
    /// Create a device not found error.
    pub fn device_not_found(path: impl Into<PathBuf>) -> Self {
        Self::DeviceNotFound { path: path.into() }
    }

    /// Create a configuration error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Create a DMA failure error.
    pub fn dma(reason: impl Into<String>) -> Self {
        Self::Dma {
            reason: reason.into(),
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(state: impl Into<String>) -> Self {
        Self::InvalidState {
            state: state.into(),
        }
    }
}
