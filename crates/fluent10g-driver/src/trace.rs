//! Network traces for replay.
//!
//! A trace is an immutable byte stream in the record format of
//! [`fluent10g_chip::stream`], replayed `n_repeats` times by a generator.
//! Replays are implemented by modulo addressing: the generator asks for
//! byte ranges past the end of the data and [`Trace::read`] wraps them
//! back to the beginning.

use crate::error::{Result, TesterError};
use bytes::Bytes;
use fluent10g_chip::{pcie, stream};
use std::borrow::Cow;
use std::path::Path;
use std::time::Duration;

/// An immutable trace bound to one or more generators for replay.
#[derive(Debug, Clone)]
pub struct Trace {
    data: Bytes,
    n_repeats: u32,

    // Only known for synthetic traces built via `TraceBuilder`; traces
    // loaded from a file are opaque byte streams.
    n_packets: Option<u64>,
    duration: Option<Duration>,
}

impl Trace {
    /// Load a trace from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, its size is not a
    /// multiple of 64 bytes, or `n_repeats` is zero.
    pub fn from_file(path: impl AsRef<Path>, n_repeats: u32) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!("Trace '{}': reading file", path.display());
        let data = std::fs::read(path)?;
        let trace = Self::from_bytes(data, n_repeats)?;
        tracing::debug!(
            "Trace '{}': {} bytes, {} replays",
            path.display(),
            trace.len(),
            n_repeats
        );
        Ok(trace)
    }

    /// Wrap in-memory trace data.
    ///
    /// # Errors
    ///
    /// Returns an error if the length is not a positive multiple of 64
    /// bytes or `n_repeats` is zero.
    pub fn from_bytes(data: impl Into<Bytes>, n_repeats: u32) -> Result<Self> {
        let data = data.into();
        if data.is_empty() || data.len() % stream::TRACE_ALIGN != 0 {
            return Err(TesterError::config(format!(
                "trace size must be a positive multiple of {} bytes, got {}",
                stream::TRACE_ALIGN,
                data.len()
            )));
        }
        if n_repeats == 0 {
            return Err(TesterError::config("trace replay count must be at least 1"));
        }
        Ok(Self {
            data,
            n_repeats,
            n_packets: None,
            duration: None,
        })
    }

    /// Size of one replay of the trace in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Whether the trace holds no data. Construction rejects empty traces,
    /// so this is always false.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Total number of bytes the generator will transfer: the trace size
    /// multiplied by the replay count.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.len() * u64::from(self.n_repeats)
    }

    /// Number of times the trace is replayed.
    #[must_use]
    pub const fn n_repeats(&self) -> u32 {
        self.n_repeats
    }

    /// Trace data of a single replay.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Number of packets across all replays.
    ///
    /// # Errors
    ///
    /// Returns an error for traces loaded from a file; the packet count is
    /// only tracked for synthetic traces.
    pub fn packet_count(&self) -> Result<u64> {
        self.n_packets
            .map(|n| n * u64::from(self.n_repeats))
            .ok_or_else(|| {
                TesterError::invalid_state("packet count unknown for traces loaded from a file")
            })
    }

    /// Replay duration across all replays.
    ///
    /// # Errors
    ///
    /// Returns an error for traces loaded from a file; the duration is
    /// only tracked for synthetic traces.
    pub fn duration(&self) -> Result<Duration> {
        self.duration
            .map(|d| d * self.n_repeats)
            .ok_or_else(|| {
                TesterError::invalid_state("duration unknown for traces loaded from a file")
            })
    }

    /// Write the trace data (single replay) to a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), &self.data)?;
        Ok(())
    }

    /// Read `len` bytes starting at the replay-expanded address `addr`.
    ///
    /// Addresses beyond the trace size wrap back to the beginning; a read
    /// may span any number of replay boundaries. Contiguous reads borrow
    /// the underlying data.
    ///
    /// # Errors
    ///
    /// Returns an error if `addr + len` exceeds the total replayed size.
    pub(crate) fn read(&self, addr: u64, len: u32) -> Result<Cow<'_, [u8]>> {
        let size = self.len();
        let len = len as usize;
        if addr + len as u64 > self.total_size() {
            return Err(TesterError::config(format!(
                "trace read at {addr:#x}+{len:#x} exceeds replayed size {:#x}",
                self.total_size()
            )));
        }

        let off = (addr % size) as usize;
        if off + len <= self.data.len() {
            return Ok(Cow::Borrowed(&self.data[off..off + len]));
        }

        // The read spans one or more wrap-arounds.
        let mut out = Vec::with_capacity(len);
        let mut pos = off;
        while out.len() < len {
            let n = (self.data.len() - pos).min(len - out.len());
            out.extend_from_slice(&self.data[pos..pos + n]);
            pos = (pos + n) % self.data.len();
        }
        Ok(Cow::Owned(out))
    }
}

/// Builds a synthetic trace record by record.
#[derive(Debug, Default)]
pub struct TraceBuilder {
    buf: Vec<u8>,
    n_packets: u64,
    total_cycles: u64,
}

impl TraceBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one packet record.
    ///
    /// `payload` carries the packet data stored in the trace; `wire_len`
    /// is the on-wire length the hardware pads or truncates to.
    ///
    /// # Errors
    ///
    /// Returns an error if `wire_len` exceeds 1518 bytes or the payload is
    /// longer than `wire_len`.
    pub fn push(
        &mut self,
        inter_packet_cycles: u32,
        wire_len: u16,
        payload: &[u8],
    ) -> Result<&mut Self> {
        if wire_len > stream::MAX_WIRE_LEN {
            return Err(TesterError::config(format!(
                "wire length {wire_len} exceeds {}",
                stream::MAX_WIRE_LEN
            )));
        }
        if payload.len() > wire_len as usize {
            return Err(TesterError::config(format!(
                "payload of {} bytes exceeds wire length {wire_len}",
                payload.len()
            )));
        }

        let meta = stream::TraceMeta {
            inter_packet_cycles,
            capture_len: payload.len() as u16,
            wire_len,
        };
        let start = self.buf.len();
        self.buf.extend_from_slice(&meta.pack().to_le_bytes());
        self.buf.extend_from_slice(payload);
        self.buf.resize(start + stream::record_len(payload.len()), 0);

        self.n_packets += 1;
        self.total_cycles += u64::from(inter_packet_cycles);
        Ok(self)
    }

    /// Finish the trace: pad the tail with `0xFF` words to a 64-byte
    /// boundary and attach the replay count.
    ///
    /// # Errors
    ///
    /// Returns an error if no packets were pushed or `n_repeats` is zero.
    pub fn finish(mut self, n_repeats: u32) -> Result<Trace> {
        if self.n_packets == 0 {
            return Err(TesterError::config("trace contains no packets"));
        }
        let rem = self.buf.len() % stream::TRACE_ALIGN;
        if rem != 0 {
            self.buf
                .resize(self.buf.len() + stream::TRACE_ALIGN - rem, 0xFF);
        }

        let duration = Duration::from_secs_f64(self.total_cycles as f64 / pcie::FREQ_SFP);
        let mut trace = Trace::from_bytes(self.buf, n_repeats)?;
        trace.n_packets = Some(self.n_packets);
        trace.duration = Some(duration);
        Ok(trace)
    }
}
