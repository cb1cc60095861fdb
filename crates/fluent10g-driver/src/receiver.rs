//! Traffic capture engine (RX ring buffer).
//!
//! Each receiver owns an RX ring buffer in board DRAM and keeps the
//! host-side read pointer. The hardware is structured as:
//!
//! ```text
//!  -----       ----------       ------       --------------
//! | MAC | --> | MAC Addr | --> | BRAM | --> | DRAM         |
//! |     |     | Filter   |     | FIFO |     | RX Ring Buff |
//!  -----       ----------       ------       --------------
//! ```
//!
//! The capture core writes meta words and truncated packet data into the
//! ring; the host drains it through the card-to-host DMA channel into a
//! [`Capture`]. Periodic drains move whole granules of at least
//! [`RING_RD_TRANSFER_SIZE_MIN`] bytes; after capture stop a final
//! `read_all` drain empties the ring regardless of the granule floor.

use crate::capture::Capture;
use crate::error::{Result, TesterError};
use crate::hw::{DmaReader, RegisterIo};
use fluent10g_chip::dram::{RING_RD_TRANSFER_SIZE_MIN, RING_SIZE_ALIGN};
use fluent10g_chip::regs::{self, recv_capture, recv_filter_mac};
use fluent10g_chip::stream::MAX_WIRE_LEN;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// A 48-bit MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddr(pub [u8; 6]);

impl FromStr for MacAddr {
    type Err = TesterError;

    fn from_str(s: &str) -> Result<Self> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in &mut bytes {
            let part = parts
                .next()
                .ok_or_else(|| TesterError::config(format!("invalid MAC address '{s}'")))?;
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| TesterError::config(format!("invalid MAC address '{s}'")))?;
        }
        if parts.next().is_some() {
            return Err(TesterError::config(format!("invalid MAC address '{s}'")));
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// Configures and drains the capture core of one network interface.
#[derive(Debug)]
pub struct Receiver {
    id: usize,

    capture_enabled: bool,
    /// Per-packet capture cap in bytes (0 = meta data only).
    max_caplen: u32,
    /// Host memory reserved for capture data; 0 means fetch-and-discard.
    host_mem: usize,

    capture: Option<Capture>,

    /// Ring buffer region in device DRAM.
    ring_addr: u64,
    ring_range: u32,

    /// Host-side read pointer (byte offset into the ring).
    ring_rd_ptr: u32,

    /// Smallest periodic DMA granule. Defaults to the hardware constant;
    /// smaller values keep the ring algorithms testable with small rings.
    transfer_min: u32,

    /// Destination MAC filter (address, 48-bit mask).
    filter_mac: Option<(MacAddr, u64)>,
}

impl Receiver {
    pub(crate) fn new(id: usize) -> Self {
        Self {
            id,
            capture_enabled: false,
            max_caplen: 0,
            host_mem: 0,
            capture: None,
            ring_addr: 0,
            ring_range: 0,
            ring_rd_ptr: 0,
            transfer_min: RING_RD_TRANSFER_SIZE_MIN,
            filter_mac: None,
        }
    }

    /// Interface ID this receiver captures on.
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Enable capturing. `max_caplen` bounds the per-packet number of
    /// bytes stored (0 captures meta data only); `host_mem` is the host
    /// memory reserved for capture data, rounded up to a multiple of 64
    /// bytes. A `host_mem` of zero fetches capture data from the board
    /// and discards it.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_caplen` exceeds 1518 bytes.
    pub fn enable_capture(&mut self, max_caplen: u32, host_mem: usize) -> Result<()> {
        if max_caplen > u32::from(MAX_WIRE_LEN) {
            return Err(TesterError::config(format!(
                "receiver {}: capture length must be in the range of 0 and {MAX_WIRE_LEN} bytes",
                self.id
            )));
        }

        self.capture_enabled = true;
        self.max_caplen = max_caplen;
        self.host_mem = host_mem.div_ceil(64) * 64;
        Ok(())
    }

    /// Disable capturing and drop any capture buffer.
    pub fn disable_capture(&mut self) {
        self.capture_enabled = false;
        self.capture = None;
    }

    /// Whether this receiver is armed for capture.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.capture_enabled
    }

    /// Set the destination MAC address filter. Only packets whose
    /// destination matches `addr` under `mask` are captured; a mask of
    /// zero accepts everything.
    ///
    /// # Errors
    ///
    /// Returns an error if capturing is disabled or the mask exceeds 48
    /// bits.
    pub fn set_mac_filter(&mut self, addr: MacAddr, mask: u64) -> Result<()> {
        if !self.capture_enabled {
            return Err(TesterError::invalid_state(format!(
                "receiver {}: cannot set MAC filter while capturing is disabled",
                self.id
            )));
        }
        if mask > 0xFFFF_FFFF_FFFF {
            return Err(TesterError::config(format!(
                "receiver {}: MAC filter mask exceeds 48 bits",
                self.id
            )));
        }
        self.filter_mac = Some((addr, mask));
        Ok(())
    }

    /// Remove the destination MAC filter.
    ///
    /// # Errors
    ///
    /// Returns an error if capturing is disabled.
    pub fn clear_mac_filter(&mut self) -> Result<()> {
        if !self.capture_enabled {
            return Err(TesterError::invalid_state(format!(
                "receiver {}: cannot clear MAC filter while capturing is disabled",
                self.id
            )));
        }
        self.filter_mac = None;
        Ok(())
    }

    /// The capture attached to this receiver.
    ///
    /// # Errors
    ///
    /// Returns an error if capturing is disabled or the receiver has not
    /// been configured yet.
    pub fn capture(&self) -> Result<&Capture> {
        if !self.capture_enabled {
            return Err(TesterError::invalid_state(format!(
                "receiver {}: capturing is disabled",
                self.id
            )));
        }
        self.capture.as_ref().ok_or_else(|| {
            TesterError::invalid_state(format!("receiver {}: not configured yet", self.id))
        })
    }

    /// Number of packets the capture core counted since activation.
    ///
    /// # Errors
    ///
    /// Returns an error if capturing is disabled.
    pub fn packet_count_captured(&self, bar: &dyn RegisterIo) -> Result<u64> {
        if !self.capture_enabled {
            return Err(TesterError::invalid_state(format!(
                "receiver {}: capturing is disabled",
                self.id
            )));
        }
        Ok(u64::from(bar.read(
            regs::NT_RECV_CAPTURE_BASE[self.id] + recv_capture::STATUS_PKT_CNT,
        )))
    }

    pub(crate) fn set_ring_region(&mut self, addr: u64, range: u32) {
        self.ring_addr = addr;
        self.ring_range = range;
    }

    /// Validate the ring geometry, push the configuration to the hardware
    /// and create the host capture buffer. `tick_period` is the latency
    /// timestamp tick period the capture will decode with.
    pub(crate) fn configure(&mut self, bar: &dyn RegisterIo, tick_period: f64) -> Result<()> {
        if !self.capture_enabled {
            // Nothing to do for idle receivers.
            return Ok(());
        }

        let ring_size = u64::from(self.ring_range) + 1;
        if ring_size <= RING_SIZE_ALIGN {
            return Err(TesterError::config(format!(
                "receiver {}: ring buffer size must be larger than {RING_SIZE_ALIGN} bytes",
                self.id
            )));
        }
        if ring_size % RING_SIZE_ALIGN != 0 {
            return Err(TesterError::config(format!(
                "receiver {}: ring buffer size must be a multiple of {RING_SIZE_ALIGN} bytes",
                self.id
            )));
        }
        if u64::from(self.transfer_min) % RING_SIZE_ALIGN != 0 {
            return Err(TesterError::config(format!(
                "receiver {}: transfer granule must be a multiple of {RING_SIZE_ALIGN} bytes",
                self.id
            )));
        }
        if ring_size <= u64::from(self.transfer_min) {
            return Err(TesterError::config(format!(
                "receiver {}: transfer granule must be smaller than the ring buffer",
                self.id
            )));
        }

        let base = regs::NT_RECV_CAPTURE_BASE[self.id];
        bar.write(base + recv_capture::MEM_ADDR_HI, (self.ring_addr >> 32) as u32);
        bar.write(base + recv_capture::MEM_ADDR_LO, (self.ring_addr & 0xFFFF_FFFF) as u32);
        bar.write(base + recv_capture::MEM_RANGE, self.ring_range);

        self.ring_rd_ptr = 0;
        bar.write(base + recv_capture::ADDR_RD, self.ring_rd_ptr);

        tracing::debug!(
            "Receiver {}: capturing to ring buffer addr {:#018x}, range {:#010x}",
            self.id,
            self.ring_addr,
            self.ring_range
        );

        bar.write(base + recv_capture::MAX_LEN_CAPTURE, self.max_caplen);
        tracing::debug!(
            "Receiver {}: capturing up to {} bytes of packet data",
            self.id,
            self.max_caplen
        );

        self.capture = Some(if self.host_mem == 0 {
            Capture::discarding(self.transfer_min as usize, tick_period, self.max_caplen)
        } else {
            Capture::retained(self.host_mem, tick_period, self.max_caplen)
        });

        // Destination MAC filter; a zeroed mask accepts all packets.
        let filter_base = regs::NT_RECV_FILTER_MAC_BASE[self.id];
        if let Some((addr, mask)) = self.filter_mac {
            let b = addr.0;
            let addr_hi = u32::from(u16::from_le_bytes([b[4], b[5]]));
            let addr_lo = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);

            let mb = mask.to_be_bytes();
            let mask_hi = u32::from(u16::from_le_bytes([mb[6], mb[7]]));
            let mask_lo = u32::from_le_bytes([mb[2], mb[3], mb[4], mb[5]]);

            bar.write(filter_base + recv_filter_mac::ADDR_DST_HI, addr_hi);
            bar.write(filter_base + recv_filter_mac::ADDR_DST_LO, addr_lo);
            bar.write(filter_base + recv_filter_mac::ADDR_MASK_DST_HI, mask_hi);
            bar.write(filter_base + recv_filter_mac::ADDR_MASK_DST_LO, mask_lo);
        } else {
            bar.write(filter_base + recv_filter_mac::ADDR_MASK_DST_HI, 0);
            bar.write(filter_base + recv_filter_mac::ADDR_MASK_DST_LO, 0);
        }

        Ok(())
    }

    /// Attempt one DMA-granule drain of the RX ring into the capture
    /// buffer. Returns the number of bytes transferred; zero means the
    /// ring holds no (or, unless `read_all`, not yet a full granule of)
    /// data.
    ///
    /// With `read_all` the granule floor is ignored and whatever the ring
    /// holds is fetched, one granule-bounded pass at a time.
    pub(crate) fn drain_ring(
        &mut self,
        bar: &dyn RegisterIo,
        c2h: &mut dyn DmaReader,
        read_all: bool,
    ) -> Result<u64> {
        if !self.capture_enabled {
            return Ok(0);
        }

        let ring_size = u64::from(self.ring_range) + 1;
        let rd_ptr = self.ring_rd_ptr;
        let size_to_end = ring_size - u64::from(rd_ptr);

        let base = regs::NT_RECV_CAPTURE_BASE[self.id];
        let wr_ptr = bar.read(base + recv_capture::ADDR_WR);

        // Default target: one granule, never crossing the end of the ring.
        let mut transfer_size = u64::from(self.transfer_min).min(size_to_end) as u32;

        if read_all {
            // Fetch whatever is available, still bounded by one granule so
            // a discarding capture's scratch region always fits a pass.
            if rd_ptr < wr_ptr {
                transfer_size = (wr_ptr - rd_ptr).min(self.transfer_min);
            } else if rd_ptr > wr_ptr {
                transfer_size = size_to_end.min(u64::from(self.transfer_min)) as u32;
            }
        }

        let admissible = if rd_ptr == wr_ptr {
            // Ring is empty.
            false
        } else if rd_ptr < wr_ptr {
            // Only drain once a full target transfer is buffered.
            wr_ptr - rd_ptr >= transfer_size
        } else {
            // Data wraps: read up to the end of the ring.
            true
        };
        if !admissible {
            return Ok(0);
        }

        let capture = self.capture.as_mut().ok_or_else(|| {
            TesterError::invalid_state(format!("receiver {}: not configured yet", self.id))
        })?;
        let slice = capture.write_slice(transfer_size as usize);

        let started = std::time::Instant::now();
        c2h.read(self.ring_addr + u64::from(rd_ptr), slice)?;
        let elapsed = started.elapsed();

        let next = u64::from(rd_ptr) + u64::from(transfer_size);
        assert!(next <= ring_size, "Receiver {}: read pointer overshoot", self.id);
        self.ring_rd_ptr = if next == ring_size { 0 } else { rd_ptr + transfer_size };
        bar.write(base + recv_capture::ADDR_RD, self.ring_rd_ptr);

        let gbps = 8.0 * f64::from(transfer_size) / elapsed.as_secs_f64() / 1e9;
        tracing::debug!(
            "Receiver {}: {} bytes in {:?} ({:.3} Gbps)",
            self.id,
            transfer_size,
            elapsed,
            gbps
        );

        Ok(u64::from(transfer_size))
    }

    /// Assert the capture-active register. Non-blocking.
    pub(crate) fn start(&self, bar: &dyn RegisterIo) {
        if !self.capture_enabled {
            return;
        }
        bar.write(regs::NT_RECV_CAPTURE_BASE[self.id] + recv_capture::ACTIVE, 0x1);
    }

    /// Deassert the capture-active register and wait for the core to
    /// flush its FIFO contents to DRAM.
    pub(crate) fn stop(&self, bar: &dyn RegisterIo, flush: Duration) {
        if !self.capture_enabled {
            return;
        }
        bar.write(regs::NT_RECV_CAPTURE_BASE[self.id] + recv_capture::ACTIVE, 0x0);
        std::thread::sleep(flush);
    }

    /// Check the capture error registers. With `expect_stopped`, also
    /// require the core to have become inactive.
    pub(crate) fn check_error(&self, bar: &dyn RegisterIo, expect_stopped: bool) -> Result<()> {
        check_error_regs(bar, self.id, expect_stopped)
    }

    /// Per-core reset: deassert capture in case it is still active from a
    /// previous erroneous measurement.
    pub(crate) fn reset_hardware(&self, bar: &dyn RegisterIo) {
        bar.write(regs::NT_RECV_CAPTURE_BASE[self.id] + recv_capture::ACTIVE, 0x0);
    }

    /// Drop the capture buffer to release host memory.
    pub(crate) fn free_host_memory(&mut self) {
        self.capture = None;
    }
}

/// Scan the capture status registers of interface `iface`. Standalone so
/// the tester can aggregate errors while the capture task owns the
/// `Receiver` values.
pub(crate) fn check_error_regs(
    bar: &dyn RegisterIo,
    iface: usize,
    expect_stopped: bool,
) -> Result<()> {
    let base = regs::NT_RECV_CAPTURE_BASE[iface];

    let errs = bar.read(base + recv_capture::STATUS_ERRS);
    if errs & recv_capture::errs::META_FIFO_FULL > 0 {
        return Err(TesterError::CaptureOverrun {
            iface,
            fifo: "meta",
        });
    }
    if errs & recv_capture::errs::DATA_FIFO_FULL > 0 {
        return Err(TesterError::CaptureOverrun {
            iface,
            fifo: "data",
        });
    }

    if expect_stopped && bar.read(base + recv_capture::STATUS_ACTIVE) != 0 {
        return Err(TesterError::StillActive { iface });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimBoard, SimPacket};
    use std::sync::Arc;

    const RING_SIZE: u64 = 32768;
    const GRANULE: u32 = 16384;

    fn testbed(max_caplen: u32, host_mem: usize) -> (Arc<SimBoard>, Receiver) {
        let board = SimBoard::new();
        let mut recv = Receiver::new(2);
        recv.transfer_min = GRANULE;
        recv.enable_capture(max_caplen, host_mem).unwrap();
        recv.set_ring_region(0, (RING_SIZE - 1) as u32);
        recv.configure(board.as_ref(), 1.0 / fluent10g_chip::pcie::FREQ_SFP)
            .unwrap();
        (board, recv)
    }

    #[test]
    fn enable_capture_validates_and_rounds() {
        let mut recv = Receiver::new(0);
        assert!(recv.enable_capture(1519, 0).is_err());

        recv.enable_capture(64, 100).unwrap();
        assert_eq!(recv.host_mem, 128);

        recv.enable_capture(0, 0).unwrap();
        assert_eq!(recv.host_mem, 0);
    }

    #[test]
    fn fresh_configure_zeroes_both_pointers() {
        let (board, recv) = testbed(64, 1 << 16);
        let base = regs::NT_RECV_CAPTURE_BASE[2];
        assert_eq!(board.peek_register(base + recv_capture::ADDR_RD), 0);
        assert_eq!(board.peek_register(base + recv_capture::ADDR_WR), 0);
        assert_eq!(recv.ring_rd_ptr, 0);
        assert_eq!(board.peek_register(base + recv_capture::MAX_LEN_CAPTURE), 64);
    }

    #[test]
    fn mac_filter_register_packing() {
        let board = SimBoard::new();
        let mut recv = Receiver::new(0);
        recv.transfer_min = GRANULE;
        recv.enable_capture(64, 1 << 16).unwrap();
        recv.set_ring_region(0, (RING_SIZE - 1) as u32);
        recv.set_mac_filter("00:11:22:33:44:55".parse().unwrap(), 0xFFFF_FFFF_FFFF)
            .unwrap();
        recv.configure(board.as_ref(), 1.0).unwrap();

        let base = regs::NT_RECV_FILTER_MAC_BASE[0];
        assert_eq!(board.peek_register(base + recv_filter_mac::ADDR_DST_HI), 0x5544);
        assert_eq!(board.peek_register(base + recv_filter_mac::ADDR_DST_LO), 0x3322_1100);
        assert_eq!(board.peek_register(base + recv_filter_mac::ADDR_MASK_DST_HI), 0xFFFF);
        assert_eq!(board.peek_register(base + recv_filter_mac::ADDR_MASK_DST_LO), 0xFFFF_FFFF);

        // Clearing the filter zeroes the mask on the next configure.
        recv.clear_mac_filter().unwrap();
        recv.configure(board.as_ref(), 1.0).unwrap();
        assert_eq!(board.peek_register(base + recv_filter_mac::ADDR_MASK_DST_HI), 0);
        assert_eq!(board.peek_register(base + recv_filter_mac::ADDR_MASK_DST_LO), 0);
    }

    #[test]
    fn mac_filter_requires_enabled_capture() {
        let mut recv = Receiver::new(0);
        assert!(recv
            .set_mac_filter("00:11:22:33:44:55".parse().unwrap(), 0)
            .is_err());
    }

    #[test]
    fn mac_addr_parses_and_displays() {
        let addr: MacAddr = "de:ad:be:ef:00:01".parse().unwrap();
        assert_eq!(addr.0, [0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01]);
        assert_eq!(addr.to_string(), "de:ad:be:ef:00:01");
        assert!("de:ad:be:ef:00".parse::<MacAddr>().is_err());
        assert!("de:ad:be:ef:00:01:02".parse::<MacAddr>().is_err());
    }

    #[test]
    fn periodic_drain_waits_for_a_full_granule() {
        let (board, mut recv) = testbed(0, 1 << 16);
        let (_, mut c2h) = board.channels();
        let bar = board.as_ref();

        // Empty ring: nothing to do.
        assert_eq!(recv.drain_ring(bar, &mut c2h, false).unwrap(), 0);

        // 5 meta-only packets (40 bytes) — below the granule floor.
        let pkts: Vec<SimPacket> = (0..5)
            .map(|i| SimPacket {
                inter_arrival_cycles: 100 + i,
                latency_ticks: None,
                data: vec![0xAB; 60],
            })
            .collect();
        board.inject_packets(2, &pkts);
        assert_eq!(recv.drain_ring(bar, &mut c2h, false).unwrap(), 0);

        // read_all fetches exactly what the ring holds.
        assert_eq!(recv.drain_ring(bar, &mut c2h, true).unwrap(), 40);
        assert_eq!(recv.drain_ring(bar, &mut c2h, true).unwrap(), 0);

        // Pointers converge on the device-side write pointer.
        let base = regs::NT_RECV_CAPTURE_BASE[2];
        assert_eq!(
            board.peek_register(base + recv_capture::ADDR_RD),
            board.peek_register(base + recv_capture::ADDR_WR)
        );
    }

    #[test]
    fn drain_follows_wrap_around() {
        let (board, mut recv) = testbed(0, 1 << 16);
        let (_, mut c2h) = board.channels();
        let bar = board.as_ref();
        let base = regs::NT_RECV_CAPTURE_BASE[2];

        // Pretend a long capture left both pointers near the ring end.
        recv.ring_rd_ptr = (RING_SIZE - 8) as u32;
        bar.write(base + recv_capture::ADDR_RD, recv.ring_rd_ptr);
        board.poke_register(base + recv_capture::ADDR_WR, (RING_SIZE - 8) as u32);

        // Two meta-only packets: the second wraps to the ring start.
        board.inject_packets(
            2,
            &[
                SimPacket { inter_arrival_cycles: 1, latency_ticks: None, data: vec![] },
                SimPacket { inter_arrival_cycles: 2, latency_ticks: None, data: vec![] },
            ],
        );

        // First pass reads to the ring end, second the wrapped remainder.
        assert_eq!(recv.drain_ring(bar, &mut c2h, true).unwrap(), 8);
        assert_eq!(recv.ring_rd_ptr, 0);
        assert_eq!(recv.drain_ring(bar, &mut c2h, true).unwrap(), 8);
        assert_eq!(recv.drain_ring(bar, &mut c2h, true).unwrap(), 0);
        assert_eq!(recv.capture().unwrap().size(), 16);
    }

    #[test]
    fn error_register_bits_are_reported() {
        let (board, recv) = testbed(0, 0);
        let bar = board.as_ref();
        assert!(recv.check_error(bar, false).is_ok());

        let base = regs::NT_RECV_CAPTURE_BASE[2];
        board.poke_register(base + recv_capture::STATUS_ERRS, recv_capture::errs::META_FIFO_FULL);
        assert!(matches!(
            recv.check_error(bar, false),
            Err(TesterError::CaptureOverrun { iface: 2, fifo: "meta" })
        ));

        board.poke_register(base + recv_capture::STATUS_ERRS, recv_capture::errs::DATA_FIFO_FULL);
        assert!(matches!(
            recv.check_error(bar, false),
            Err(TesterError::CaptureOverrun { iface: 2, fifo: "data" })
        ));

        board.poke_register(base + recv_capture::STATUS_ERRS, 0);
        board.poke_register(base + recv_capture::STATUS_ACTIVE, 1);
        assert!(recv.check_error(bar, false).is_ok());
        assert!(matches!(
            recv.check_error(bar, true),
            Err(TesterError::StillActive { iface: 2 })
        ));
    }

    #[test]
    fn disabled_receiver_drains_nothing() {
        let board = SimBoard::new();
        let (_, mut c2h) = board.channels();
        let mut recv = Receiver::new(1);
        assert_eq!(recv.drain_ring(board.as_ref(), &mut c2h, true).unwrap(), 0);
        assert!(recv.capture().is_err());
        assert!(recv.packet_count_captured(board.as_ref()).is_err());
    }
}
