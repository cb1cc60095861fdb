//! Simulated board.
//!
//! Implements the [`RegisterIo`]/[`DmaWriter`]/[`DmaReader`] seam over an
//! in-memory register file and a sparse model of the two DRAM banks. This
//! enables:
//!
//! 1. **CI without hardware**: the full replay/capture coordination cycle
//!    runs against the simulation; all tests pass without a board.
//! 2. **Register stream assertions**: every host register access is
//!    logged, so tests can pin down exact configuration sequences.
//! 3. **Synthetic capture feeds**: tests push packets into an RX ring the
//!    way the capture core would, honouring the configured ring region
//!    and per-packet capture cap.
//!
//! The simulation is passive — it never advances pointers on its own.
//! Tests play the part of the hardware by moving `ADDR_RD`/`ADDR_WR`
//! through the helpers below.

use crate::error::Result;
use crate::hw::{DmaReader, DmaWriter, RegisterIo};
use fluent10g_chip::{pcie, regs, stream};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const PAGE: usize = 4096;

/// One packet to feed into a simulated RX ring.
#[derive(Debug, Clone)]
pub struct SimPacket {
    /// Cycles since the previous packet arrived.
    pub inter_arrival_cycles: u32,
    /// Latency counter value, if the timestamp unit found one.
    pub latency_ticks: Option<u32>,
    /// On-wire packet data. The simulated capture core truncates it to the
    /// receiver's configured capture cap, exactly like the hardware.
    pub data: Vec<u8>,
}

/// In-memory board: register file, sparse DRAM, and host access logs.
#[derive(Debug, Default)]
pub struct SimBoard {
    regs: Mutex<HashMap<u32, u32>>,
    dram: Mutex<HashMap<u64, Box<[u8; PAGE]>>>,
    write_log: Mutex<Vec<(u32, u32)>>,
    read_log: Mutex<Vec<u32>>,
}

impl SimBoard {
    /// Create a board with the identity word preset to the values this
    /// driver expects.
    #[must_use]
    pub fn new() -> Arc<Self> {
        let board = Self::default();
        board.poke_register(
            regs::NT_IDENT_BASE + regs::ident::IDENT,
            (u32::from(pcie::HW_CRC16) << 16) | u32::from(pcie::HW_VERSION),
        );
        Arc::new(board)
    }

    /// Overwrite the identity word (for mismatch tests).
    pub fn set_ident(&self, crc16: u16, version: u16) {
        self.poke_register(
            regs::NT_IDENT_BASE + regs::ident::IDENT,
            (u32::from(crc16) << 16) | u32::from(version),
        );
    }

    /// Read a register without going through the host access log.
    #[must_use]
    pub fn peek_register(&self, addr: u32) -> u32 {
        *self.regs.lock().unwrap().get(&addr).unwrap_or(&0)
    }

    /// Write a register without going through the host access log
    /// (the "hardware side" of the register file).
    pub fn poke_register(&self, addr: u32, value: u32) {
        self.regs.lock().unwrap().insert(addr, value);
    }

    /// All host register writes so far, in order.
    #[must_use]
    pub fn write_log(&self) -> Vec<(u32, u32)> {
        self.write_log.lock().unwrap().clone()
    }

    /// All host register reads so far, in order.
    #[must_use]
    pub fn read_log(&self) -> Vec<u32> {
        self.read_log.lock().unwrap().clone()
    }

    /// Clear both host access logs.
    pub fn clear_logs(&self) {
        self.write_log.lock().unwrap().clear();
        self.read_log.lock().unwrap().clear();
    }

    /// Read device DRAM (zero-filled where never written).
    pub fn dram_read(&self, mut addr: u64, buf: &mut [u8]) {
        let dram = self.dram.lock().unwrap();
        let mut done = 0;
        while done < buf.len() {
            let page = addr / PAGE as u64;
            let off = (addr % PAGE as u64) as usize;
            let n = (PAGE - off).min(buf.len() - done);
            match dram.get(&page) {
                Some(p) => buf[done..done + n].copy_from_slice(&p[off..off + n]),
                None => buf[done..done + n].fill(0),
            }
            addr += n as u64;
            done += n;
        }
    }

    /// Write device DRAM, allocating pages on demand.
    pub fn dram_write(&self, mut addr: u64, mut data: &[u8]) {
        let mut dram = self.dram.lock().unwrap();
        while !data.is_empty() {
            let page = addr / PAGE as u64;
            let off = (addr % PAGE as u64) as usize;
            let n = (PAGE - off).min(data.len());
            let p = dram
                .entry(page)
                .or_insert_with(|| Box::new([0u8; PAGE]));
            p[off..off + n].copy_from_slice(&data[..n]);
            addr += n as u64;
            data = &data[n..];
        }
    }

    /// DMA channel handles onto this board.
    #[must_use]
    pub fn channels(self: &Arc<Self>) -> (SimH2c, SimC2h) {
        (SimH2c(Arc::clone(self)), SimC2h(Arc::clone(self)))
    }

    /// Advance a generator's device-side read pointer (the replay core
    /// consuming the TX ring).
    pub fn set_gen_read_ptr(&self, iface: usize, ptr: u32) {
        self.poke_register(
            regs::NT_GEN_REPLAY_BASE[iface] + regs::gen_replay::ADDR_RD,
            ptr,
        );
    }

    /// Push packets into the RX ring of `iface` the way the capture core
    /// would: meta word, payload truncated to the configured capture cap,
    /// 8-byte padding, write pointer and packet counter advanced.
    ///
    /// The receiver must have been configured (ring region and capture cap
    /// written) before calling this.
    pub fn inject_packets(&self, iface: usize, packets: &[SimPacket]) {
        let base = regs::NT_RECV_CAPTURE_BASE[iface];
        let ring_addr = u64::from(self.peek_register(base + regs::recv_capture::MEM_ADDR_LO))
            | (u64::from(self.peek_register(base + regs::recv_capture::MEM_ADDR_HI)) << 32);
        let ring_size = u64::from(self.peek_register(base + regs::recv_capture::MEM_RANGE)) + 1;
        let max_caplen =
            self.peek_register(base + regs::recv_capture::MAX_LEN_CAPTURE) as usize;

        let mut encoded = Vec::new();
        for pkt in packets {
            let meta = stream::CaptureMeta {
                latency_ticks: pkt.latency_ticks.unwrap_or(0),
                has_latency: pkt.latency_ticks.is_some(),
                inter_arrival_cycles: pkt.inter_arrival_cycles,
                wire_len: u16::try_from(pkt.data.len()).expect("packet exceeds wire length field"),
            };
            let caplen = pkt.data.len().min(max_caplen);
            let start = encoded.len();
            encoded.extend_from_slice(&meta.pack().to_le_bytes());
            encoded.extend_from_slice(&pkt.data[..caplen]);
            encoded.resize(start + stream::record_len(caplen), 0);
        }

        let mut wr = u64::from(self.peek_register(base + regs::recv_capture::ADDR_WR));
        assert!(
            encoded.len() as u64 <= ring_size,
            "injected stream larger than RX ring"
        );

        // Write with wrap at the end of the ring.
        let until_end = (ring_size - wr).min(encoded.len() as u64) as usize;
        self.dram_write(ring_addr + wr, &encoded[..until_end]);
        if until_end < encoded.len() {
            self.dram_write(ring_addr, &encoded[until_end..]);
        }
        wr = (wr + encoded.len() as u64) % ring_size;

        self.poke_register(base + regs::recv_capture::ADDR_WR, wr as u32);
        let cnt = self.peek_register(base + regs::recv_capture::STATUS_PKT_CNT);
        self.poke_register(
            base + regs::recv_capture::STATUS_PKT_CNT,
            cnt + u32::try_from(packets.len()).unwrap(),
        );
    }
}

impl RegisterIo for SimBoard {
    fn read(&self, addr: u32) -> u32 {
        self.read_log.lock().unwrap().push(addr);
        self.peek_register(addr)
    }

    fn write(&self, addr: u32, value: u32) {
        self.write_log.lock().unwrap().push((addr, value));
        self.poke_register(addr, value);
    }
}

/// Host-to-card channel of a [`SimBoard`].
#[derive(Debug)]
pub struct SimH2c(Arc<SimBoard>);

impl DmaWriter for SimH2c {
    fn write(&mut self, device_addr: u64, data: &[u8]) -> Result<()> {
        self.0.dram_write(device_addr, data);
        Ok(())
    }
}

/// Card-to-host channel of a [`SimBoard`].
#[derive(Debug)]
pub struct SimC2h(Arc<SimBoard>);

impl DmaReader for SimC2h {
    fn read(&mut self, device_addr: u64, buf: &mut [u8]) -> Result<()> {
        self.0.dram_read(device_addr, buf);
        Ok(())
    }
}
