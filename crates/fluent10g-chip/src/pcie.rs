//! PCIe identifiers, XDMA device nodes, and global hardware constants.

/// Xilinx vendor ID (the board enumerates with the stock XDMA endpoint IDs).
pub const VENDOR_ID: u16 = 0x10EE;

/// fluent10g device ID.
pub const DEVICE_ID: u16 = 0x7032;

/// PCI function carrying the control BAR.
pub const FUNCTION_ID: u8 = 0x0;

/// BAR exposing the control-plane register window (sysfs `resource0`).
pub const BAR_ID: u32 = 0;

/// XDMA host-to-card character device (trace data towards the board).
pub const XDMA_DEV_H2C: &str = "/dev/xdma0_h2c_0";

/// XDMA card-to-host character device (capture data towards the host).
pub const XDMA_DEV_C2H: &str = "/dev/xdma0_c2h_0";

/// Number of 10 Gbps network interfaces on the board.
pub const N_INTERFACES: usize = 4;

/// SFP+ clock domain frequency in Hz. All hardware cycle counts (packet
/// inter-arrival times, latency ticks, data-rate sample intervals) are in
/// this clock domain.
pub const FREQ_SFP: f64 = 156.25e6;

/// Expected CRC16 of the register map the bitstream was built from.
/// The high half of the identity word must match, or the software and
/// hardware disagree about register addresses.
pub const HW_CRC16: u16 = 0xF15E;

/// Expected hardware design version (low half of the identity word).
pub const HW_VERSION: u16 = 0x000D;

/// Default number of clock cycles between two latency timestamp counter
/// increments.
pub const TIMESTAMP_CYCLES_PER_TICK_DEFAULT: u32 = 1;

/// MAC/PHY pipeline latency of the tester itself, in SFP clock cycles.
///
/// The latency counter value extracted from a captured packet includes the
/// cycles the packet spent inside the tester's own MAC and PHY on both the
/// transmit and receive path. Decoding subtracts this constant so reported
/// latencies cover only the device under test.
pub const LATENCY_CORRECTION_CYCLES: f64 = 18.0;

/// Format a `vendor:device` string for use with `lspci -d`.
#[must_use]
pub fn lspci_filter() -> String {
    format!("{VENDOR_ID:04x}:{DEVICE_ID:04x}")
}
