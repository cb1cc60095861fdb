//! Top-level network tester coordinator.
//!
//! The `Tester` owns the register window, both DMA channels, and one
//! generator, receiver and interface per network port. It verifies the
//! hardware identity on attach, assigns DRAM ring regions, drives the
//! blocking replay cycle and the background capture task, and aggregates
//! hardware error flags.
//!
//! Ownership model: the foreground owns the host-to-card channel for the
//! duration of a replay; `start_capture` moves the receivers and the
//! card-to-host channel into a drain thread and `stop_capture` moves them
//! back after joining it. The register window is shared — the capture
//! task only touches receiver-scoped registers.

use crate::bar::RegisterWindow;
use crate::dma::{XdmaC2h, XdmaH2c};
use crate::error::{Result, TesterError};
use crate::generator::Generator;
use crate::hw::{DmaReader, DmaWriter, RegisterIo, SharedRegisterIo};
use crate::interface::Interface;
use crate::memory;
use crate::receiver::{self, Receiver};
use crate::timestamp::{Timestamp, TimestampMode};
use fluent10g_chip::pcie::{self, N_INTERFACES};
use fluent10g_chip::regs::{self, ctrl, ident};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

/// Settle and flush intervals of the replay/capture cycle. The defaults
/// match the hardware FIFO depths; tests shrink them.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    /// Wait after triggering the replay cores so the transmission FIFOs
    /// can fill before rate control starts.
    pub fifo_fill: Duration,
    /// Wait after the last ring read so the rate control FIFOs drain to
    /// the MAC before rate control stops.
    pub rate_ctrl_drain: Duration,
    /// Wait after deasserting capture so the capture cores flush their
    /// FIFO contents to DRAM.
    pub capture_flush: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            fifo_fill: Duration::from_millis(100),
            rate_ctrl_drain: Duration::from_secs(1),
            capture_flush: Duration::from_secs(1),
        }
    }
}

type CaptureReturn = (Vec<Receiver>, Box<dyn DmaReader>, Result<()>);

struct CaptureTask {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<CaptureReturn>,
}

struct DatarateTask {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// The network tester.
pub struct Tester {
    bar: SharedRegisterIo,
    h2c: Box<dyn DmaWriter>,
    /// Card-to-host channel; `None` while the capture task owns it.
    c2h: Option<Box<dyn DmaReader>>,

    gens: Vec<Generator>,
    /// Receivers; `None` while the capture task owns them.
    recvs: Option<Vec<Receiver>>,
    ifaces: Vec<Interface>,
    timestamp: Timestamp,

    /// Abort `start_replay`/`stop_capture` on data-plane errors. Enabled
    /// by default; when disabled the application polls `check_errors`.
    check_errors: bool,
    timing: Timing,

    capture_task: Option<CaptureTask>,
    datarate_task: Option<DatarateTask>,
}

impl std::fmt::Debug for Tester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tester")
            .field("check_errors", &self.check_errors)
            .field("capturing", &self.capture_task.is_some())
            .finish_non_exhaustive()
    }
}

impl Tester {
    /// Discover the board, open the register window and both DMA
    /// channels, and verify the hardware identity.
    ///
    /// # Errors
    ///
    /// Returns an error if no board is found, a device node cannot be
    /// opened, or the identity word does not match this driver.
    pub fn open() -> Result<Self> {
        let window = RegisterWindow::open_first()?;
        let h2c = XdmaH2c::open(pcie::XDMA_DEV_H2C)?;
        let c2h = XdmaC2h::open(pcie::XDMA_DEV_C2H)?;
        Self::attach(Arc::new(window), Box::new(h2c), Box::new(c2h))
    }

    /// Attach to an already-opened register window and DMA channel pair.
    /// The identity word is verified before any other register access.
    ///
    /// # Errors
    ///
    /// Returns [`TesterError::IdentityMismatch`] if the hardware was built
    /// from a different register map or design version.
    pub fn attach(
        bar: SharedRegisterIo,
        h2c: Box<dyn DmaWriter>,
        c2h: Box<dyn DmaReader>,
    ) -> Result<Self> {
        check_identity(bar.as_ref())?;

        let tester = Self {
            bar,
            h2c,
            c2h: Some(c2h),
            gens: (0..N_INTERFACES).map(Generator::new).collect(),
            recvs: Some((0..N_INTERFACES).map(Receiver::new).collect()),
            ifaces: (0..N_INTERFACES).map(Interface::new).collect(),
            timestamp: Timestamp::new(),
            check_errors: true,
            timing: Timing::default(),
            capture_task: None,
            datarate_task: None,
        };
        tracing::info!("Network tester attached ({N_INTERFACES} interfaces)");
        Ok(tester)
    }

    /// Generator of interface `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a valid interface.
    #[must_use]
    pub fn generator(&self, id: usize) -> &Generator {
        &self.gens[id]
    }

    /// Mutable generator of interface `id` (to bind or clear a trace).
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a valid interface.
    pub fn generator_mut(&mut self, id: usize) -> &mut Generator {
        &mut self.gens[id]
    }

    /// Receiver of interface `id`.
    ///
    /// # Errors
    ///
    /// Returns an error while a capture is running (the capture task owns
    /// the receivers).
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a valid interface.
    pub fn receiver(&self, id: usize) -> Result<&Receiver> {
        assert!(id < N_INTERFACES, "invalid interface id {id}");
        self.recvs
            .as_ref()
            .map(|recvs| &recvs[id])
            .ok_or_else(|| TesterError::invalid_state("capture in progress"))
    }

    /// Mutable receiver of interface `id` (to arm capture or set
    /// filters).
    ///
    /// # Errors
    ///
    /// Returns an error while a capture is running.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a valid interface.
    pub fn receiver_mut(&mut self, id: usize) -> Result<&mut Receiver> {
        assert!(id < N_INTERFACES, "invalid interface id {id}");
        self.recvs
            .as_mut()
            .map(|recvs| &mut recvs[id])
            .ok_or_else(|| TesterError::invalid_state("capture in progress"))
    }

    /// Number of packets transmitted on interface `id`.
    #[must_use]
    pub fn packet_count_tx(&self, id: usize) -> u64 {
        self.ifaces[id].packet_count_tx(self.bar.as_ref())
    }

    /// Number of packets received on interface `id`.
    #[must_use]
    pub fn packet_count_rx(&self, id: usize) -> u64 {
        self.ifaces[id].packet_count_rx(self.bar.as_ref())
    }

    /// Total packets transmitted across all interfaces.
    #[must_use]
    pub fn total_packet_count_tx(&self) -> u64 {
        (0..N_INTERFACES).map(|id| self.packet_count_tx(id)).sum()
    }

    /// Total packets received across all interfaces.
    #[must_use]
    pub fn total_packet_count_rx(&self) -> u64 {
        (0..N_INTERFACES).map(|id| self.packet_count_rx(id)).sum()
    }

    /// Enable or disable aborting on data-plane errors. Enabled by
    /// default; when disabled, use [`Tester::check_errors`] to poll for
    /// errors and handle them gracefully.
    pub fn set_check_errors(&mut self, check: bool) {
        self.check_errors = check;
    }

    /// Replace the settle/flush intervals (shorter values speed up
    /// simulation-backed tests).
    pub fn set_timing(&mut self, timing: Timing) {
        self.timing = timing;
    }

    /// Set the latency timestamp tick period in clock cycles.
    ///
    /// # Errors
    ///
    /// Returns an error if `cycles` is zero.
    pub fn set_timestamp_tick_period(&mut self, cycles: u32) -> Result<()> {
        self.timestamp.set_cycles_per_tick(cycles)
    }

    /// Select the timestamp insertion/extraction mode.
    pub fn set_timestamp_mode(&mut self, mode: TimestampMode) {
        self.timestamp.set_mode(mode);
    }

    /// Set the timestamp byte position (fixed-position mode).
    ///
    /// # Errors
    ///
    /// Returns an error if the mode does not allow a position or it is
    /// out of range.
    pub fn set_timestamp_pos(&mut self, pos: u32) -> Result<()> {
        self.timestamp.set_pos(pos)
    }

    /// Set the timestamp width in bits (16 or 24, fixed-position mode).
    ///
    /// # Errors
    ///
    /// Returns an error if the mode does not allow a width or the value
    /// is unsupported.
    pub fn set_timestamp_width(&mut self, width: u32) -> Result<()> {
        self.timestamp.set_width(width)
    }

    /// The timestamp unit configuration.
    #[must_use]
    pub const fn timestamp(&self) -> &Timestamp {
        &self.timestamp
    }

    /// Drop trace bindings and capture buffers to release host memory
    /// between measurements.
    ///
    /// # Errors
    ///
    /// Returns an error while a capture is running.
    pub fn free_host_memory(&mut self) -> Result<()> {
        for gen in &mut self.gens {
            gen.free_host_memory();
        }
        let recvs = self
            .recvs
            .as_mut()
            .ok_or_else(|| TesterError::invalid_state("capture in progress"))?;
        for recv in recvs {
            recv.free_host_memory();
        }
        Ok(())
    }

    /// Write the tester configuration to the hardware: reset all cores,
    /// assign DRAM ring regions to the configured generators and
    /// receivers, and push each core's configuration. Must be called
    /// before `start_replay`/`start_capture` whenever the configuration
    /// changed.
    ///
    /// # Errors
    ///
    /// Returns an error if a capture is running or any configuration
    /// value is rejected.
    pub fn write_config(&mut self) -> Result<()> {
        if self.capture_task.is_some() {
            return Err(TesterError::invalid_state("capture in progress"));
        }
        let bar = Arc::clone(&self.bar);

        self.reset_hardware();

        let gen_ids: Vec<usize> = self
            .gens
            .iter()
            .filter(|g| g.is_configured())
            .map(Generator::id)
            .collect();
        let recvs = self
            .recvs
            .as_mut()
            .ok_or_else(|| TesterError::invalid_state("receivers unavailable"))?;
        let recv_ids: Vec<usize> = recvs
            .iter()
            .filter(|r| r.is_configured())
            .map(Receiver::id)
            .collect();

        tracing::debug!("Replaying traffic on interfaces: {gen_ids:?}");
        tracing::debug!("Capturing traffic on interfaces: {recv_ids:?}");

        let plan = memory::assign_regions(&gen_ids, &recv_ids)?;
        for (id, region) in &plan.generators {
            self.gens[*id].set_ring_region(region.addr, region.range);
        }
        for (id, region) in &plan.receivers {
            recvs[*id].set_ring_region(region.addr, region.range);
        }

        for gen in &mut self.gens {
            gen.configure(bar.as_ref())?;
        }
        let tick_period = self.timestamp.tick_period();
        for recv in recvs.iter_mut() {
            recv.configure(bar.as_ref(), tick_period)?;
        }
        self.timestamp.configure(bar.as_ref())?;

        Ok(())
    }

    /// Replay the bound traces on all configured generators. Blocks until
    /// every generator drained its TX ring and the rate control FIFOs
    /// emptied onto the link.
    ///
    /// # Errors
    ///
    /// Returns an error on DMA failure, or — with error checking enabled
    /// — on a replay timing violation.
    pub fn start_replay(&mut self) -> Result<()> {
        let bar = Arc::clone(&self.bar);

        tracing::debug!("Replay: filling up TX ring buffers ...");
        loop {
            let transferred = write_ring_buffs(bar.as_ref(), &mut *self.h2c, &mut self.gens)?;
            if transferred == 0 {
                // Rings are full or there is no more data to transfer.
                break;
            }
        }

        tracing::debug!("Replay: TX ring buffers are filled up. Starting now ...");
        for gen in &self.gens {
            gen.start(bar.as_ref());
        }

        // Let the transmission FIFOs fill before the first packet is due.
        std::thread::sleep(self.timing.fifo_fill);
        self.start_rate_ctrl();

        loop {
            write_ring_buffs(bar.as_ref(), &mut *self.h2c, &mut self.gens)?;
            if !self.gens_active() {
                // All generators finished reading their TX rings.
                break;
            }
        }

        // Trace data has left DRAM, but the rate control still spaces the
        // remaining packets in its FIFO onto the link.
        std::thread::sleep(self.timing.rate_ctrl_drain);
        self.stop_rate_ctrl();

        if self.check_errors {
            for gen in &self.gens {
                gen.check_error(bar.as_ref())?;
            }
        }

        tracing::debug!("Replay: done");
        Ok(())
    }

    /// Arm all configured receivers and launch the background drain task.
    /// Non-blocking.
    ///
    /// # Errors
    ///
    /// Returns an error if a capture is already running.
    pub fn start_capture(&mut self) -> Result<()> {
        if self.capture_task.is_some() {
            return Err(TesterError::invalid_state("capture already running"));
        }
        let mut recvs = self
            .recvs
            .take()
            .ok_or_else(|| TesterError::invalid_state("receivers unavailable"))?;
        let mut c2h = self
            .c2h
            .take()
            .ok_or_else(|| TesterError::invalid_state("C2H channel unavailable"))?;
        let bar = Arc::clone(&self.bar);

        for recv in &recvs {
            recv.start(bar.as_ref());
        }

        let (stop_tx, stop_rx) = mpsc::channel();
        let handle = std::thread::spawn(move || {
            let mut result = Ok(());
            'drain: loop {
                if stop_rx.try_recv().is_ok() {
                    break;
                }
                for recv in &mut recvs {
                    if let Err(e) = recv.drain_ring(bar.as_ref(), &mut *c2h, false) {
                        result = Err(e);
                        break 'drain;
                    }
                }
            }
            (recvs, c2h, result)
        });

        self.capture_task = Some(CaptureTask {
            stop: stop_tx,
            handle,
        });
        tracing::debug!("Capture: started");
        Ok(())
    }

    /// Stop the capture task, deassert capture, and drain the remaining
    /// RX ring contents.
    ///
    /// # Errors
    ///
    /// Returns an error if no capture is running, on DMA failure, or —
    /// with error checking enabled — on a capture FIFO overrun or a core
    /// that stays active.
    pub fn stop_capture(&mut self) -> Result<()> {
        let task = self
            .capture_task
            .take()
            .ok_or_else(|| TesterError::invalid_state("capture not running"))?;

        // The task may already have exited on an error, so a failed send
        // only means nobody is listening anymore.
        let _ = task.stop.send(());
        let (mut recvs, mut c2h, task_result) = task
            .handle
            .join()
            .map_err(|_| TesterError::invalid_state("capture task panicked"))?;

        let bar = Arc::clone(&self.bar);
        for recv in &recvs {
            recv.stop(bar.as_ref(), self.timing.capture_flush);
        }

        // Final drain: meta and payload committed to DRAM after the last
        // periodic drain would otherwise be lost.
        let mut drain_result = Ok(());
        'recvs: for recv in &mut recvs {
            loop {
                match recv.drain_ring(bar.as_ref(), &mut *c2h, true) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        drain_result = Err(e);
                        break 'recvs;
                    }
                }
            }
        }

        self.recvs = Some(recvs);
        self.c2h = Some(c2h);

        task_result?;
        drain_result?;

        if self.check_errors {
            self.check_receiver_errors(true)?;
        }

        tracing::debug!("Capture: stopped");
        Ok(())
    }

    /// Aggregate status scan over all generator and receiver error
    /// registers. Never aborts; the caller decides how to handle a
    /// reported error.
    ///
    /// # Errors
    ///
    /// Returns the first error flagged by the hardware.
    pub fn check_errors(&self) -> Result<()> {
        for gen in &self.gens {
            gen.check_error(self.bar.as_ref())?;
        }
        self.check_receiver_errors(false)
    }

    /// Configure the data-rate sampling interval on every interface and
    /// launch a task that periodically logs TX/RX data rates.
    ///
    /// # Errors
    ///
    /// Returns an error if the logger is already running or the interval
    /// is out of range.
    pub fn start_datarate_logger(&mut self, interval: Duration) -> Result<()> {
        if self.datarate_task.is_some() {
            return Err(TesterError::invalid_state("data-rate logger already running"));
        }
        for ifc in &mut self.ifaces {
            ifc.set_datarate_sample_interval(self.bar.as_ref(), interval)?;
        }

        let ifaces = self.ifaces.clone();
        let bar = Arc::clone(&self.bar);
        let (stop_tx, stop_rx) = mpsc::channel();
        let handle = std::thread::spawn(move || loop {
            if stop_rx.try_recv().is_ok() {
                break;
            }
            for ifc in &ifaces {
                let tx = ifc.datarate_tx(bar.as_ref());
                let rx = ifc.datarate_rx(bar.as_ref());
                if let (Ok((tx, tx_raw)), Ok((rx, rx_raw))) = (tx, rx) {
                    tracing::info!(
                        "Datarate IF{}: {:.3}/{:.3} (TX Nom/Raw), {:.3}/{:.3} (RX Nom/Raw)",
                        ifc.id(),
                        tx,
                        tx_raw,
                        rx,
                        rx_raw
                    );
                }
            }
            // Hardware counters update once per sample interval.
            std::thread::sleep(interval);
        });

        self.datarate_task = Some(DatarateTask {
            stop: stop_tx,
            handle,
        });
        Ok(())
    }

    /// Stop the data-rate logger task.
    ///
    /// # Errors
    ///
    /// Returns an error if the logger is not running.
    pub fn stop_datarate_logger(&mut self) -> Result<()> {
        let task = self
            .datarate_task
            .take()
            .ok_or_else(|| TesterError::invalid_state("data-rate logger not running"))?;
        let _ = task.stop.send(());
        task.handle
            .join()
            .map_err(|_| TesterError::invalid_state("data-rate logger panicked"))
    }

    fn check_receiver_errors(&self, expect_stopped: bool) -> Result<()> {
        for iface in 0..N_INTERFACES {
            receiver::check_error_regs(self.bar.as_ref(), iface, expect_stopped)?;
        }
        Ok(())
    }

    /// Activate rate control on exactly the interfaces with a bound
    /// trace, in a single register write for a synchronous start.
    fn start_rate_ctrl(&self) {
        let mut mask = 0u32;
        for gen in &self.gens {
            if gen.is_configured() {
                mask |= 1 << gen.id();
            }
        }
        self.bar
            .write(regs::NT_CTRL_BASE + ctrl::RATE_CTRL_ACTIVE, mask);
    }

    fn stop_rate_ctrl(&self) {
        self.bar.write(regs::NT_CTRL_BASE + ctrl::RATE_CTRL_ACTIVE, 0x0);
    }

    fn gens_active(&self) -> bool {
        self.gens
            .iter()
            .any(|gen| gen.is_configured() && gen.is_active(self.bar.as_ref()))
    }

    /// Reset all cores. Configuration registers are retained.
    fn reset_hardware(&mut self) {
        for gen in &self.gens {
            gen.reset_hardware();
        }
        if let Some(recvs) = &self.recvs {
            for recv in recvs {
                recv.reset_hardware(self.bar.as_ref());
            }
        }

        // Deactivate rate control in case it is still running after an
        // erroneous measurement.
        self.stop_rate_ctrl();

        // Global reset pulse.
        self.bar.write(regs::NT_CTRL_BASE + ctrl::RST, 0x1);
        self.bar.write(regs::NT_CTRL_BASE + ctrl::RST, 0x0);
    }
}

impl Drop for Tester {
    fn drop(&mut self) {
        // Join background tasks so nothing touches the register window
        // after the tester is gone.
        if let Some(task) = self.capture_task.take() {
            let _ = task.stop.send(());
            let _ = task.handle.join();
        }
        if let Some(task) = self.datarate_task.take() {
            let _ = task.stop.send(());
            let _ = task.handle.join();
        }
        tracing::debug!("Closing network tester");
    }
}

fn check_identity(bar: &dyn RegisterIo) -> Result<()> {
    let word = bar.read(regs::NT_IDENT_BASE + ident::IDENT);
    let crc16 = (word >> 16) as u16;
    let version = (word & 0xFFFF) as u16;

    if crc16 != pcie::HW_CRC16 {
        return Err(TesterError::IdentityMismatch {
            field: "CRC16",
            found: crc16,
            expected: pcie::HW_CRC16,
        });
    }
    if version != pcie::HW_VERSION {
        return Err(TesterError::IdentityMismatch {
            field: "version",
            found: version,
            expected: pcie::HW_VERSION,
        });
    }

    tracing::debug!("Network tester hardware version: {version:#06x}");
    Ok(())
}

/// One refill pass over all generators; returns the total bytes moved.
fn write_ring_buffs(
    bar: &dyn RegisterIo,
    h2c: &mut dyn DmaWriter,
    gens: &mut [Generator],
) -> Result<u64> {
    let mut transferred = 0;
    for gen in gens {
        transferred += gen.refill_ring(bar, h2c)?;
    }
    Ok(transferred)
}
