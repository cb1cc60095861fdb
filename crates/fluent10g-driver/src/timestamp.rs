//! Latency timestamp unit.
//!
//! The hardware maintains a free-running latency counter and inserts its
//! value into transmitted packets, extracting it again on capture. By
//! default the counter increments every clock cycle; a larger tick period
//! extends the measurable latency range at the cost of resolution.
//!
//! The timestamp is placed either at a fixed byte position in the packet
//! or in the IPv4/IPv6 header (checksum and flow label fields), where it
//! travels through devices under test that rewrite payloads.

use crate::error::{Result, TesterError};
use crate::hw::RegisterIo;
use fluent10g_chip::pcie::{FREQ_SFP, TIMESTAMP_CYCLES_PER_TICK_DEFAULT};
use fluent10g_chip::regs::{self, timestamp as ts_regs};
use fluent10g_chip::stream::MAX_WIRE_LEN;

/// Timestamp insertion/extraction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampMode {
    /// No timestamp is inserted.
    #[default]
    Disabled,
    /// Timestamp at a configurable byte position.
    FixedPos,
    /// Timestamp in the IPv4 checksum / IPv6 flow label field.
    Header,
}

impl TimestampMode {
    const fn reg_value(self) -> u32 {
        match self {
            Self::Disabled => 0,
            Self::FixedPos => 1,
            Self::Header => 2,
        }
    }
}

/// The latency timestamp counter core.
#[derive(Debug)]
pub struct Timestamp {
    cycles_per_tick: u32,
    mode: TimestampMode,
    pos: u32,
    /// Timestamp width in bits (16 or 24); only set explicitly.
    width: Option<u32>,
}

impl Timestamp {
    pub(crate) fn new() -> Self {
        Self {
            cycles_per_tick: TIMESTAMP_CYCLES_PER_TICK_DEFAULT,
            mode: TimestampMode::Disabled,
            pos: 0,
            width: None,
        }
    }

    /// Set the number of clock cycles between two counter increments.
    ///
    /// # Errors
    ///
    /// Returns an error if `cycles` is zero.
    pub fn set_cycles_per_tick(&mut self, cycles: u32) -> Result<()> {
        if cycles == 0 {
            return Err(TesterError::config(
                "timestamp tick period must be at least one cycle",
            ));
        }
        self.cycles_per_tick = cycles;
        Ok(())
    }

    /// Seconds between two counter increments.
    #[must_use]
    pub fn tick_period(&self) -> f64 {
        f64::from(self.cycles_per_tick) / FREQ_SFP
    }

    /// Select the insertion/extraction mode.
    pub fn set_mode(&mut self, mode: TimestampMode) {
        self.mode = mode;
    }

    /// Set the byte position of the timestamp. Requires fixed-position
    /// mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the mode is not [`TimestampMode::FixedPos`] or
    /// the position exceeds 1518.
    pub fn set_pos(&mut self, pos: u32) -> Result<()> {
        if self.mode != TimestampMode::FixedPos {
            return Err(TesterError::invalid_state(
                "timestamp position requires fixed-position mode",
            ));
        }
        if pos > u32::from(MAX_WIRE_LEN) {
            return Err(TesterError::config(format!(
                "timestamp position {pos} exceeds {MAX_WIRE_LEN}"
            )));
        }
        self.pos = pos;
        Ok(())
    }

    /// Set the timestamp width in bits. Requires fixed-position mode;
    /// the hardware supports 16 and 24 bit timestamps.
    ///
    /// # Errors
    ///
    /// Returns an error if the mode is not [`TimestampMode::FixedPos`] or
    /// the width is neither 16 nor 24.
    pub fn set_width(&mut self, width: u32) -> Result<()> {
        if self.mode != TimestampMode::FixedPos {
            return Err(TesterError::invalid_state(
                "timestamp width requires fixed-position mode",
            ));
        }
        if width != 16 && width != 24 {
            return Err(TesterError::config(
                "timestamp width must be either 16 or 24 bit",
            ));
        }
        self.width = Some(width);
        Ok(())
    }

    /// Validate the geometry and write the configuration to the hardware.
    pub(crate) fn configure(&self, bar: &dyn RegisterIo) -> Result<()> {
        let base = regs::NT_TIMESTAMP_BASE;

        match self.mode {
            TimestampMode::FixedPos => {
                // The timestamp must not straddle two 8-byte data words.
                let width = self.width.ok_or_else(|| {
                    TesterError::config("timestamp width not configured")
                })?;
                let max_rem = match width {
                    16 => 6,
                    24 => 5,
                    _ => unreachable!("set_width admits only 16 and 24"),
                };
                if self.pos % 8 > max_rem {
                    return Err(TesterError::config(format!(
                        "a {width} bit timestamp at byte position {} crosses an 8-byte word",
                        self.pos
                    )));
                }

                bar.write(base + ts_regs::WIDTH, u32::from(width == 24));
                bar.write(base + ts_regs::POS, self.pos);
            }
            TimestampMode::Header | TimestampMode::Disabled => {
                bar.write(base + ts_regs::POS, 0x0);
                bar.write(base + ts_regs::WIDTH, 0x0);
            }
        }

        bar.write(base + ts_regs::MODE, self.mode.reg_value());
        bar.write(base + ts_regs::CYCLES_PER_TICK, self.cycles_per_tick);

        tracing::debug!(
            "Timestamp: {} clock cycles per tick ({:.2} ns), mode {:?}",
            self.cycles_per_tick,
            self.tick_period() * 1e9,
            self.mode
        );
        if self.mode == TimestampMode::FixedPos {
            tracing::debug!("Timestamp: pos {}, width {:?}", self.pos, self.width);
        }

        Ok(())
    }
}
