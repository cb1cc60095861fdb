//! Capture traffic on interface 1 for a few seconds and print per-packet
//! latencies.
//!
//! Usage: `capture [seconds]`

use anyhow::Result;
use fluent10g_driver::{latencies, Tester, TimestampMode};
use std::time::Duration;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("fluent10g_driver=info")
        .init();

    let seconds: u64 = std::env::args()
        .nth(1)
        .map_or(5, |s| s.parse().expect("seconds"));

    let mut tester = Tester::open()?;

    // 64 bytes of each packet, 1 GiB of host memory for the stream.
    tester.receiver_mut(1)?.enable_capture(64, 1 << 30)?;
    tester.set_timestamp_mode(TimestampMode::FixedPos);
    tester.set_timestamp_width(16)?;
    tester.set_timestamp_pos(64)?;
    tester.write_config()?;

    println!("Capturing on interface 1 for {seconds} s ...");
    tester.start_capture()?;
    std::thread::sleep(Duration::from_secs(seconds));
    tester.stop_capture()?;

    let receiver = tester.receiver(1)?;
    let packets = receiver.capture()?.get_packets()?;
    println!(
        "Captured {} packets ({} bytes of stream)",
        packets.len(),
        receiver.capture()?.size()
    );

    let lat = latencies(&packets);
    if let (Some(min), Some(max)) = (
        lat.iter().copied().reduce(f64::min),
        lat.iter().copied().reduce(f64::max),
    ) {
        let mean = lat.iter().sum::<f64>() / lat.len() as f64;
        println!(
            "Latency over {} samples: min {:.3} us, mean {:.3} us, max {:.3} us",
            lat.len(),
            min * 1e6,
            mean * 1e6,
            max * 1e6
        );
    }

    Ok(())
}
