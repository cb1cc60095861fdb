//! Control-plane register map.
//!
//! All registers are 32-bit words behind BAR0. Each hardware core occupies
//! a 4 KiB block; per-interface cores repeat the block once per network
//! interface. Offsets below are byte offsets within a core's block.
//!
//! ```text
//! 0x00000–0x03fff  trace replay cores (one per interface)
//! 0x04000–0x07fff  rate control cores
//! 0x08000          global control
//! 0x09000–0x0cfff  capture cores
//! 0x0d000–0x10fff  destination MAC filters
//! 0x11000–0x14fff  interface packet counters
//! 0x15000          latency timestamp unit
//! 0x16000          identity
//! 0x17000–0x1afff  data-rate monitors
//! ```

use crate::pcie::N_INTERFACES;

// ── Core base addresses ──────────────────────────────────────────────────────

/// Trace replay core base addresses, one per interface.
pub const NT_GEN_REPLAY_BASE: [u32; N_INTERFACES] =
    [0x0000_0000, 0x0000_1000, 0x0000_2000, 0x0000_3000];

/// Rate control core base addresses, one per interface.
pub const NT_GEN_RATE_CTRL_BASE: [u32; N_INTERFACES] =
    [0x0000_4000, 0x0000_5000, 0x0000_6000, 0x0000_7000];

/// Global control core base address.
pub const NT_CTRL_BASE: u32 = 0x0000_8000;

/// Capture core base addresses, one per interface.
pub const NT_RECV_CAPTURE_BASE: [u32; N_INTERFACES] =
    [0x0000_9000, 0x0000_A000, 0x0000_B000, 0x0000_C000];

/// Destination MAC filter base addresses, one per interface.
pub const NT_RECV_FILTER_MAC_BASE: [u32; N_INTERFACES] =
    [0x0000_D000, 0x0000_E000, 0x0000_F000, 0x0001_0000];

/// Interface packet counter base addresses, one per interface.
pub const IFACE_BASE: [u32; N_INTERFACES] =
    [0x0001_1000, 0x0001_2000, 0x0001_3000, 0x0001_4000];

/// Latency timestamp unit base address.
pub const NT_TIMESTAMP_BASE: u32 = 0x0001_5000;

/// Identity core base address.
pub const NT_IDENT_BASE: u32 = 0x0001_6000;

/// Data-rate monitor base addresses, one per interface.
pub const NT_DATARATE_BASE: [u32; N_INTERFACES] =
    [0x0001_7000, 0x0001_8000, 0x0001_9000, 0x0001_A000];

// ── Trace replay core ────────────────────────────────────────────────────────

/// Register offsets of the trace replay core.
pub mod gen_replay {
    /// Ring buffer base address, low 32 bits.
    pub const MEM_ADDR_LO: u32 = 0x00;
    /// Ring buffer base address, high 32 bits.
    pub const MEM_ADDR_HI: u32 = 0x04;
    /// Ring buffer address range (`size - 1`).
    pub const MEM_RANGE: u32 = 0x08;
    /// Total trace size in bytes (replays included), low 32 bits.
    pub const TRACE_SIZE_LO: u32 = 0x0C;
    /// Total trace size in bytes, high 32 bits.
    pub const TRACE_SIZE_HI: u32 = 0x10;
    /// Host-owned write pointer (byte offset into the ring).
    pub const ADDR_WR: u32 = 0x14;
    /// Device-owned read pointer (byte offset into the ring).
    pub const ADDR_RD: u32 = 0x18;
    /// Write 1 to start reading trace data from the ring.
    pub const START: u32 = 0x1C;
    /// Replay status.
    pub const STATUS: u32 = 0x20;

    /// `STATUS` bit definitions.
    pub mod status {
        /// Core is still reading trace data from DRAM.
        pub const MEM_READ: u32 = 1 << 0;
        /// Core is still draining its block RAM FIFO into the rate control.
        pub const FIFO_DRAIN: u32 = 1 << 1;
        /// Either activity bit.
        pub const ACTIVE_MASK: u32 = MEM_READ | FIFO_DRAIN;
    }
}

// ── Rate control core ────────────────────────────────────────────────────────

/// Register offsets of the rate control core.
pub mod gen_rate_ctrl {
    /// Rate control status.
    pub const STATUS: u32 = 0x00;

    /// `STATUS` bit definitions.
    pub mod status {
        /// The inter-packet transmission time of the trace could not be
        /// honoured (TX ring underrun or trace exceeding line rate).
        pub const TIMING_ERROR: u32 = 1 << 0;
    }
}

// ── Global control core ──────────────────────────────────────────────────────

/// Register offsets of the global control core.
pub mod ctrl {
    /// Rate control activation bitmask, one bit per interface. Writing the
    /// mask starts all selected rate control modules in the same cycle.
    pub const RATE_CTRL_ACTIVE: u32 = 0x00;
    /// Global reset. Pulse 1 then 0; configuration registers are retained.
    pub const RST: u32 = 0x04;
}

// ── Capture core ─────────────────────────────────────────────────────────────

/// Register offsets of the capture core.
pub mod recv_capture {
    /// Write 1 to start capturing, 0 to stop.
    pub const ACTIVE: u32 = 0x00;
    /// Ring buffer base address, low 32 bits.
    pub const MEM_ADDR_LO: u32 = 0x04;
    /// Ring buffer base address, high 32 bits.
    pub const MEM_ADDR_HI: u32 = 0x08;
    /// Ring buffer address range (`size - 1`).
    pub const MEM_RANGE: u32 = 0x0C;
    /// Device-owned write pointer (byte offset into the ring).
    pub const ADDR_WR: u32 = 0x10;
    /// Host-owned read pointer (byte offset into the ring).
    pub const ADDR_RD: u32 = 0x14;
    /// Per-packet capture length cap in bytes (0..=1518).
    pub const MAX_LEN_CAPTURE: u32 = 0x18;
    /// Number of packets captured since activation.
    pub const STATUS_PKT_CNT: u32 = 0x1C;
    /// Non-zero while the core is still flushing to DRAM.
    pub const STATUS_ACTIVE: u32 = 0x20;
    /// Sticky error flags.
    pub const STATUS_ERRS: u32 = 0x24;

    /// `STATUS_ERRS` bit definitions.
    pub mod errs {
        /// Meta data FIFO overflowed; capture data was lost.
        pub const META_FIFO_FULL: u32 = 1 << 0;
        /// Packet data FIFO overflowed; capture data was lost.
        pub const DATA_FIFO_FULL: u32 = 1 << 1;
    }
}

// ── Destination MAC filter ───────────────────────────────────────────────────

/// Register offsets of the destination MAC filter.
///
/// Address and mask are packed little-endian over the 6-byte MAC: the `LO`
/// registers carry the first four address bytes, the `HI` registers the
/// remaining two in their low half. A mask of zero accepts all packets.
pub mod recv_filter_mac {
    /// Destination MAC address bytes 4..6.
    pub const ADDR_DST_HI: u32 = 0x00;
    /// Destination MAC address bytes 0..4.
    pub const ADDR_DST_LO: u32 = 0x04;
    /// Destination MAC mask bits 32..48.
    pub const ADDR_MASK_DST_HI: u32 = 0x08;
    /// Destination MAC mask bits 0..32.
    pub const ADDR_MASK_DST_LO: u32 = 0x0C;
}

// ── Interface packet counters ────────────────────────────────────────────────

/// Register offsets of the interface packet counters.
pub mod iface {
    /// Packets transmitted on this interface.
    pub const N_PKTS_TX: u32 = 0x00;
    /// Packets received on this interface.
    pub const N_PKTS_RX: u32 = 0x04;
}

// ── Data-rate monitor ────────────────────────────────────────────────────────

/// Register offsets of the data-rate monitor.
pub mod datarate {
    /// Sampling interval in SFP clock cycles.
    pub const CTRL_SAMPLE_INTERVAL: u32 = 0x00;
    /// Bytes transmitted in the last sample interval (frame data only).
    pub const STATUS_TX_N_BYTES: u32 = 0x04;
    /// Bytes transmitted including preamble, SFD and inter-frame gap.
    pub const STATUS_TX_N_BYTES_RAW: u32 = 0x08;
    /// Bytes received in the last sample interval (frame data only).
    pub const STATUS_RX_N_BYTES: u32 = 0x0C;
    /// Bytes received including preamble, SFD and inter-frame gap.
    pub const STATUS_RX_N_BYTES_RAW: u32 = 0x10;
}

// ── Latency timestamp unit ───────────────────────────────────────────────────

/// Register offsets of the latency timestamp unit.
pub mod timestamp {
    /// Clock cycles between two latency counter increments.
    pub const CYCLES_PER_TICK: u32 = 0x00;
    /// Insertion/extraction mode (0 disabled, 1 fixed position, 2 header).
    pub const MODE: u32 = 0x04;
    /// Byte position of the timestamp (fixed-position mode only).
    pub const POS: u32 = 0x08;
    /// Timestamp width selector (0 = 16 bit, 1 = 24 bit).
    pub const WIDTH: u32 = 0x0C;
}

// ── Identity ─────────────────────────────────────────────────────────────────

/// Register offsets of the identity core.
pub mod ident {
    /// Identity word: register map CRC16 in the high half, design version
    /// in the low half.
    pub const IDENT: u32 = 0x00;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_blocks_do_not_overlap() {
        let mut bases: Vec<u32> = Vec::new();
        bases.extend(NT_GEN_REPLAY_BASE);
        bases.extend(NT_GEN_RATE_CTRL_BASE);
        bases.push(NT_CTRL_BASE);
        bases.extend(NT_RECV_CAPTURE_BASE);
        bases.extend(NT_RECV_FILTER_MAC_BASE);
        bases.extend(IFACE_BASE);
        bases.push(NT_TIMESTAMP_BASE);
        bases.push(NT_IDENT_BASE);
        bases.extend(NT_DATARATE_BASE);

        bases.sort_unstable();
        for pair in bases.windows(2) {
            assert!(pair[1] - pair[0] >= 0x1000, "blocks overlap: {pair:#x?}");
        }
    }

    #[test]
    fn replay_register_layout() {
        assert_eq!(gen_replay::ADDR_WR, 0x14);
        assert_eq!(gen_replay::ADDR_RD, 0x18);
        assert_eq!(gen_replay::STATUS, 0x20);
    }

    #[test]
    fn capture_register_layout() {
        assert_eq!(recv_capture::ADDR_WR, 0x10);
        assert_eq!(recv_capture::ADDR_RD, 0x14);
        assert_eq!(recv_capture::STATUS_ERRS, 0x24);
    }
}
