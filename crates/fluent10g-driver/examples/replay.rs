//! Replay a trace file on interface 0.
//!
//! Usage: `replay <trace-file> [n-repeats]`

use fluent10g_driver::{Result, Tester, Trace};
use std::sync::Arc;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("fluent10g_driver=debug")
        .init();

    let mut args = std::env::args().skip(1);
    let path = args.next().expect("usage: replay <trace-file> [n-repeats]");
    let n_repeats: u32 = args.next().map_or(1, |s| s.parse().expect("n-repeats"));

    let trace = Arc::new(Trace::from_file(&path, n_repeats)?);
    println!(
        "Trace: {} bytes x {} replays = {} bytes on the wire",
        trace.len(),
        trace.n_repeats(),
        trace.total_size()
    );

    let mut tester = Tester::open()?;
    tester.generator_mut(0).bind_trace(trace);
    tester.write_config()?;

    println!("Replaying on interface 0 ...");
    tester.start_replay()?;

    println!(
        "Done. {} bytes transferred, {} packets on the wire",
        tester.generator(0).bytes_transferred(),
        tester.packet_count_tx(0)
    );

    Ok(())
}
