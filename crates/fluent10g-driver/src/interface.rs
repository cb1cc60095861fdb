//! Network interface counters and data-rate monitor.
//!
//! A thin view over the per-interface packet counter and data-rate
//! registers. The data-rate monitor samples transmitted and received byte
//! counts over a configurable interval; conversion to Gbit/s happens on
//! the host.

use crate::error::{Result, TesterError};
use crate::hw::RegisterIo;
use fluent10g_chip::pcie::FREQ_SFP;
use fluent10g_chip::regs::{self, datarate, iface};
use std::time::Duration;

/// One network interface of the tester.
#[derive(Debug, Clone)]
pub struct Interface {
    id: usize,
    /// Data-rate sampling interval in clock cycles, once configured.
    sample_interval_cycles: Option<u32>,
}

impl Interface {
    pub(crate) fn new(id: usize) -> Self {
        Self {
            id,
            sample_interval_cycles: None,
        }
    }

    /// Interface ID.
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Number of packets transmitted on this interface.
    #[must_use]
    pub fn packet_count_tx(&self, bar: &dyn RegisterIo) -> u64 {
        u64::from(bar.read(regs::IFACE_BASE[self.id] + iface::N_PKTS_TX))
    }

    /// Number of packets received on this interface.
    #[must_use]
    pub fn packet_count_rx(&self, bar: &dyn RegisterIo) -> u64 {
        u64::from(bar.read(regs::IFACE_BASE[self.id] + iface::N_PKTS_RX))
    }

    /// Configure the data-rate sampling interval.
    ///
    /// # Errors
    ///
    /// Returns an error if the interval is zero or does not fit the
    /// 32-bit cycle register.
    pub fn set_datarate_sample_interval(
        &mut self,
        bar: &dyn RegisterIo,
        interval: Duration,
    ) -> Result<()> {
        let cycles = (interval.as_secs_f64() * FREQ_SFP).round();
        if cycles < 1.0 || cycles > f64::from(u32::MAX) {
            return Err(TesterError::config(format!(
                "interface {}: data-rate sample interval {interval:?} out of range",
                self.id
            )));
        }
        let cycles = cycles as u32;
        bar.write(
            regs::NT_DATARATE_BASE[self.id] + datarate::CTRL_SAMPLE_INTERVAL,
            cycles,
        );
        self.sample_interval_cycles = Some(cycles);
        Ok(())
    }

    /// TX data rate of the last sample interval as `(nominal, raw)` in
    /// Gbit/s. Raw includes preamble, SFD and inter-frame gap.
    ///
    /// # Errors
    ///
    /// Returns an error if no sampling interval was configured.
    pub fn datarate_tx(&self, bar: &dyn RegisterIo) -> Result<(f64, f64)> {
        let base = regs::NT_DATARATE_BASE[self.id];
        self.to_gbps(
            bar.read(base + datarate::STATUS_TX_N_BYTES),
            bar.read(base + datarate::STATUS_TX_N_BYTES_RAW),
        )
    }

    /// RX data rate of the last sample interval as `(nominal, raw)` in
    /// Gbit/s.
    ///
    /// # Errors
    ///
    /// Returns an error if no sampling interval was configured.
    pub fn datarate_rx(&self, bar: &dyn RegisterIo) -> Result<(f64, f64)> {
        let base = regs::NT_DATARATE_BASE[self.id];
        self.to_gbps(
            bar.read(base + datarate::STATUS_RX_N_BYTES),
            bar.read(base + datarate::STATUS_RX_N_BYTES_RAW),
        )
    }

    fn to_gbps(&self, n_bytes: u32, n_bytes_raw: u32) -> Result<(f64, f64)> {
        let cycles = self.sample_interval_cycles.ok_or_else(|| {
            TesterError::invalid_state(format!(
                "interface {}: data-rate sample interval not configured",
                self.id
            ))
        })?;
        let secs = f64::from(cycles) / FREQ_SFP;
        Ok((
            8.0 * f64::from(n_bytes) / secs / 1e9,
            8.0 * f64::from(n_bytes_raw) / secs / 1e9,
        ))
    }
}
