//! Captured network data and the packet codec.
//!
//! The capture core delivers a byte stream of 8-byte meta words followed
//! by truncated packet data (see [`fluent10g_chip::stream`]). A `Capture`
//! accumulates that stream in host memory as the receiver drains its RX
//! ring and lazily decodes it into packets.
//!
//! In discard mode the stream is fetched from the board but overwritten
//! on every drain — useful for load tests where only the hardware packet
//! counters and the fetched volume matter. Discarding captures cannot be
//! decoded; the type makes that a hard error.

use crate::error::{Result, TesterError};
use fluent10g_chip::pcie::{FREQ_SFP, LATENCY_CORRECTION_CYCLES};
use fluent10g_chip::stream::{self, CaptureMeta};
use std::path::Path;

/// One decoded captured packet.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturePacket {
    /// Seconds since the previous packet arrived. The value of the first
    /// packet of a capture is not meaningful.
    pub arrival_time: f64,
    /// Measured latency in seconds, if the packet carried a timestamp.
    pub latency: Option<f64>,
    /// On-wire packet length in bytes.
    pub wire_len: u16,
    /// Captured packet data, truncated to the configured capture cap.
    pub data: Vec<u8>,
}

/// Latencies of all timestamped packets, in capture order.
#[must_use]
pub fn latencies(packets: &[CapturePacket]) -> Vec<f64> {
    packets.iter().filter_map(|p| p.latency).collect()
}

/// Arrival times of all packets, in capture order.
#[must_use]
pub fn arrival_times(packets: &[CapturePacket]) -> Vec<f64> {
    packets.iter().map(|p| p.arrival_time).collect()
}

#[derive(Debug)]
enum Store {
    /// Capture data is kept; `pos_wr` is the stream write offset.
    Retained { data: Vec<u8>, pos_wr: usize },
    /// Capture data is overwritten on every drain; `scratch` holds at
    /// most one DMA granule.
    Discarding { scratch: Vec<u8> },
}

/// Network data captured on a single interface.
#[derive(Debug)]
pub struct Capture {
    store: Store,
    /// Total bytes fetched from the hardware, discarded or not.
    total: u64,
    /// Seconds between two latency timestamp counter increments.
    tick_period: f64,
    /// Per-packet capture cap in bytes.
    max_caplen: u32,
}

impl Capture {
    /// Create a retaining capture with `budget` bytes reserved up front.
    /// The store grows past the budget if a measurement outruns it.
    pub(crate) fn retained(budget: usize, tick_period: f64, max_caplen: u32) -> Self {
        Self {
            store: Store::Retained {
                data: vec![0; budget],
                pos_wr: 0,
            },
            total: 0,
            tick_period,
            max_caplen,
        }
    }

    /// Create a discarding capture whose scratch region holds one DMA
    /// granule.
    pub(crate) fn discarding(granule: usize, tick_period: f64, max_caplen: u32) -> Self {
        Self {
            store: Store::Discarding {
                scratch: vec![0; granule],
            },
            total: 0,
            tick_period,
            max_caplen,
        }
    }

    /// Whether this capture discards data after fetching it.
    #[must_use]
    pub const fn is_discarding(&self) -> bool {
        matches!(self.store, Store::Discarding { .. })
    }

    /// Total bytes fetched from the hardware. In discard mode this still
    /// counts everything that was fetched and thrown away.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.total
    }

    /// Seconds between two latency timestamp counter increments, as
    /// configured when the capture was created.
    #[must_use]
    pub const fn tick_period(&self) -> f64 {
        self.tick_period
    }

    /// A writable slice of `len` bytes for the next ring drain.
    ///
    /// Retained captures advance their write offset on every call;
    /// discarding captures hand out the same scratch region every time.
    pub(crate) fn write_slice(&mut self, len: usize) -> &mut [u8] {
        self.total += len as u64;
        match &mut self.store {
            Store::Retained { data, pos_wr } => {
                if *pos_wr + len > data.len() {
                    data.resize(*pos_wr + len, 0);
                }
                let slice = &mut data[*pos_wr..*pos_wr + len];
                *pos_wr += len;
                slice
            }
            Store::Discarding { scratch } => {
                if len > scratch.len() {
                    scratch.resize(len, 0);
                }
                &mut scratch[..len]
            }
        }
    }

    /// Decode the captured stream into packets.
    ///
    /// Decoding stops at the end-of-stream sentinel or at the stream
    /// write offset, whichever comes first.
    ///
    /// # Errors
    ///
    /// Returns [`TesterError::CaptureDiscarded`] for discard-mode captures
    /// and [`TesterError::CaptureTruncated`] if a record extends past the
    /// write offset.
    pub fn get_packets(&self) -> Result<Vec<CapturePacket>> {
        let Store::Retained { data, pos_wr } = &self.store else {
            return Err(TesterError::CaptureDiscarded);
        };

        let mut packets = Vec::new();
        let mut pos = 0;
        while pos + stream::META_SIZE <= *pos_wr {
            let word = u64::from_le_bytes(data[pos..pos + 8].try_into().unwrap());
            if word == stream::SENTINEL {
                break;
            }

            let meta = CaptureMeta::unpack(word);
            let caplen = (u32::from(meta.wire_len)).min(self.max_caplen) as usize;
            if pos + stream::META_SIZE + caplen > *pos_wr {
                return Err(TesterError::CaptureTruncated { offset: pos });
            }

            let latency = meta.has_latency.then(|| {
                (f64::from(meta.latency_ticks) * self.tick_period
                    - LATENCY_CORRECTION_CYCLES / FREQ_SFP)
                    .max(0.0)
            });

            packets.push(CapturePacket {
                arrival_time: f64::from(meta.inter_arrival_cycles) / FREQ_SFP,
                latency,
                wire_len: meta.wire_len,
                data: data[pos + stream::META_SIZE..pos + stream::META_SIZE + caplen].to_vec(),
            });

            pos += stream::record_len(caplen);
        }

        Ok(packets)
    }

    /// Write the raw captured stream to a file.
    ///
    /// # Errors
    ///
    /// Returns [`TesterError::CaptureDiscarded`] for discard-mode captures
    /// or an I/O error if the file cannot be written.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let Store::Retained { data, pos_wr } = &self.store else {
            return Err(TesterError::CaptureDiscarded);
        };
        std::fs::write(path.as_ref(), &data[..*pos_wr])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encode one record the way the capture core lays it out.
    fn encode(buf: &mut Vec<u8>, meta: CaptureMeta, payload: &[u8], max_caplen: u32) {
        let caplen = payload.len().min(max_caplen as usize);
        let start = buf.len();
        buf.extend_from_slice(&meta.pack().to_le_bytes());
        buf.extend_from_slice(&payload[..caplen]);
        buf.resize(start + stream::record_len(caplen), 0);
    }

    fn capture_from(stream_bytes: &[u8], tick_period: f64, max_caplen: u32) -> Capture {
        let mut capture = Capture::retained(stream_bytes.len(), tick_period, max_caplen);
        capture
            .write_slice(stream_bytes.len())
            .copy_from_slice(stream_bytes);
        capture
    }

    #[test]
    fn codec_round_trip() {
        let tick_period = 1.0 / FREQ_SFP;
        let max_caplen = 64;

        let payloads: [&[u8]; 3] = [&[0x11; 60], &[0x22; 64], &[0x33; 128]];
        let mut buf = Vec::new();
        for (i, payload) in payloads.iter().enumerate() {
            encode(
                &mut buf,
                CaptureMeta {
                    latency_ticks: 1000 + i as u32,
                    has_latency: true,
                    inter_arrival_cycles: 100 * (i as u32 + 1),
                    wire_len: payload.len() as u16,
                },
                payload,
                max_caplen,
            );
        }
        buf.extend_from_slice(&stream::SENTINEL.to_le_bytes());

        let capture = capture_from(&buf, tick_period, max_caplen);
        let packets = capture.get_packets().unwrap();

        assert_eq!(packets.len(), 3);
        for (i, pkt) in packets.iter().enumerate() {
            let payload = payloads[i];
            assert_eq!(pkt.wire_len as usize, payload.len());
            assert_eq!(pkt.data.len(), payload.len().min(64));
            assert_eq!(&pkt.data[..], &payload[..pkt.data.len()]);

            let cycles = 100.0 * (i as f64 + 1.0);
            assert!((pkt.arrival_time - cycles / FREQ_SFP).abs() < 1e-12);

            let expected = (1000.0 + i as f64) * tick_period - LATENCY_CORRECTION_CYCLES / FREQ_SFP;
            assert!((pkt.latency.unwrap() - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn decode_stops_at_write_offset_without_sentinel() {
        let mut buf = Vec::new();
        for _ in 0..5 {
            encode(
                &mut buf,
                CaptureMeta {
                    latency_ticks: 0,
                    has_latency: false,
                    inter_arrival_cycles: 10,
                    wire_len: 0,
                },
                &[],
                0,
            );
        }

        let capture = capture_from(&buf, 1.0 / FREQ_SFP, 0);
        let packets = capture.get_packets().unwrap();
        assert_eq!(packets.len(), 5);
        assert!(packets.iter().all(|p| p.latency.is_none()));
        assert!(packets.iter().all(|p| p.data.is_empty()));
    }

    #[test]
    fn truncated_record_is_an_error() {
        let mut buf = Vec::new();
        encode(
            &mut buf,
            CaptureMeta {
                latency_ticks: 0,
                has_latency: false,
                inter_arrival_cycles: 10,
                wire_len: 128,
            },
            &[0xAB; 128],
            1518,
        );
        // Chop the payload: the meta word promises more than the stream holds.
        let capture = capture_from(&buf[..16], 1.0 / FREQ_SFP, 1518);
        assert!(matches!(
            capture.get_packets(),
            Err(TesterError::CaptureTruncated { offset: 0 })
        ));
    }

    #[test]
    fn discarding_capture_refuses_decode_but_counts_size() {
        let mut capture = Capture::discarding(1024, 1.0 / FREQ_SFP, 0);
        capture.write_slice(512);
        capture.write_slice(512);

        assert_eq!(capture.size(), 1024);
        assert!(matches!(
            capture.get_packets(),
            Err(TesterError::CaptureDiscarded)
        ));
    }

    #[test]
    fn discarding_scratch_is_reused() {
        let mut capture = Capture::discarding(64, 1.0 / FREQ_SFP, 0);
        capture.write_slice(64).fill(0xAA);
        let again = capture.write_slice(64);
        // Same region handed out again, previous contents still visible.
        assert!(again.iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn retained_store_grows_past_budget() {
        let mut capture = Capture::retained(64, 1.0 / FREQ_SFP, 0);
        capture.write_slice(64);
        capture.write_slice(64);
        assert_eq!(capture.size(), 128);
    }

    #[test]
    fn latency_extraction_helpers() {
        let packets = vec![
            CapturePacket {
                arrival_time: 1e-6,
                latency: Some(5e-6),
                wire_len: 64,
                data: Vec::new(),
            },
            CapturePacket {
                arrival_time: 2e-6,
                latency: None,
                wire_len: 64,
                data: Vec::new(),
            },
        ];
        assert_eq!(latencies(&packets), vec![5e-6]);
        assert_eq!(arrival_times(&packets), vec![1e-6, 2e-6]);
    }
}
