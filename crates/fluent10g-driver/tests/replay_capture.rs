//! End-to-end replay/capture cycles against the simulated board.

use fluent10g_driver::chip::{pcie, regs};
use fluent10g_driver::hw::RegisterIo;
use fluent10g_driver::sim::{SimBoard, SimPacket};
use fluent10g_driver::{Tester, TesterError, Timing, TraceBuilder};
use std::sync::Arc;
use std::time::Duration;

/// Tester attached to a fresh simulated board, with the hardware settle
/// intervals shrunk to keep the tests fast.
fn sim_tester(board: &Arc<SimBoard>) -> Tester {
    let (h2c, c2h) = board.channels();
    let bar: Arc<dyn RegisterIo> = board.clone();
    let mut tester = Tester::attach(bar, Box::new(h2c), Box::new(c2h)).expect("attach");
    tester.set_timing(Timing {
        fifo_fill: Duration::from_millis(1),
        rate_ctrl_drain: Duration::from_millis(1),
        capture_flush: Duration::from_millis(1),
    });
    tester
}

/// A 1024-byte constant-bit-rate trace: 16 records of 64 bytes.
fn cbr_trace(n_repeats: u32) -> fluent10g_driver::Trace {
    let mut builder = TraceBuilder::new();
    for i in 0..16u8 {
        builder.push(100, 56, &[i; 56]).expect("push record");
    }
    builder.finish(n_repeats).expect("finish trace")
}

#[test]
fn cbr_replay_no_capture() {
    let board = SimBoard::new();
    let mut tester = sim_tester(&board);

    tester.generator_mut(0).bind_trace(Arc::new(cbr_trace(3)));
    tester.write_config().unwrap();

    // Single generator, no receivers: all of bank A.
    let base = regs::NT_GEN_REPLAY_BASE[0];
    assert_eq!(board.peek_register(base + regs::gen_replay::MEM_ADDR_LO), 0);
    assert_eq!(board.peek_register(base + regs::gen_replay::MEM_ADDR_HI), 0);
    assert_eq!(board.peek_register(base + regs::gen_replay::MEM_RANGE), 0xFFFF_FFFF);
    assert_eq!(board.peek_register(base + regs::gen_replay::TRACE_SIZE_LO), 3072);

    board.clear_logs();
    tester.start_replay().unwrap();

    assert_eq!(tester.generator(0).bytes_transferred(), 3072);

    // Rate control was activated for interface 0 only, then deactivated.
    let rate_ctrl = regs::NT_CTRL_BASE + regs::ctrl::RATE_CTRL_ACTIVE;
    let rate_writes: Vec<u32> = board
        .write_log()
        .into_iter()
        .filter_map(|(addr, value)| (addr == rate_ctrl).then_some(value))
        .collect();
    assert_eq!(rate_writes, vec![0b0001, 0b0000]);

    // The ring holds three back-to-back copies of the trace.
    let mut ring = vec![0u8; 3072];
    board.dram_read(0, &mut ring);
    let trace = tester.generator(0).trace().unwrap();
    for rep in 0..3 {
        assert_eq!(&ring[rep * 1024..(rep + 1) * 1024], trace.data());
    }
}

#[test]
fn capture_only_discard_mode() {
    let board = SimBoard::new();
    let mut tester = sim_tester(&board);

    tester.receiver_mut(2).unwrap().enable_capture(0, 0).unwrap();
    tester.write_config().unwrap();

    // Single receiver, no generators: all of bank A.
    let base = regs::NT_RECV_CAPTURE_BASE[2];
    assert_eq!(board.peek_register(base + regs::recv_capture::MEM_ADDR_LO), 0);
    assert_eq!(board.peek_register(base + regs::recv_capture::MEM_RANGE), 0xFFFF_FFFF);

    tester.start_capture().unwrap();
    let packets: Vec<SimPacket> = (0..5)
        .map(|i| SimPacket {
            inter_arrival_cycles: 50 * (i + 1),
            latency_ticks: None,
            data: vec![0xCC; 60],
        })
        .collect();
    board.inject_packets(2, &packets);
    tester.stop_capture().unwrap();

    let recv = tester.receiver(2).unwrap();
    assert_eq!(recv.packet_count_captured(board.as_ref()).unwrap(), 5);

    // Discard mode still accounts the fetched volume: 5 meta words.
    let capture = recv.capture().unwrap();
    assert!(capture.is_discarding());
    assert_eq!(capture.size(), 5 * 8);
    assert!(matches!(
        capture.get_packets(),
        Err(TesterError::CaptureDiscarded)
    ));
}

#[test]
fn capture_with_payload() {
    let board = SimBoard::new();
    let mut tester = sim_tester(&board);

    tester
        .receiver_mut(2)
        .unwrap()
        .enable_capture(64, 64 * 1024)
        .unwrap();
    tester.write_config().unwrap();

    tester.start_capture().unwrap();
    let wire_lens = [60usize, 64, 128];
    let packets: Vec<SimPacket> = wire_lens
        .iter()
        .enumerate()
        .map(|(i, &len)| SimPacket {
            inter_arrival_cycles: 100,
            latency_ticks: Some(1000 + i as u32),
            data: (0..len).map(|b| (b + i) as u8).collect(),
        })
        .collect();
    board.inject_packets(2, &packets);
    tester.stop_capture().unwrap();

    let capture = tester.receiver(2).unwrap().capture().unwrap();
    let decoded = capture.get_packets().unwrap();
    assert_eq!(decoded.len(), 3);

    for (i, pkt) in decoded.iter().enumerate() {
        assert_eq!(pkt.wire_len as usize, wire_lens[i]);
        // Payloads are truncated to the 64-byte capture cap.
        assert_eq!(pkt.data.len(), wire_lens[i].min(64));
        assert_eq!(pkt.data[..], packets[i].data[..pkt.data.len()]);

        let expected_latency = (1000.0 + i as f64) / pcie::FREQ_SFP
            - pcie::LATENCY_CORRECTION_CYCLES / pcie::FREQ_SFP;
        assert!((pkt.latency.unwrap() - expected_latency).abs() < 1e-12);
    }

    // The final drain caught up with the device-side write pointer.
    let base = regs::NT_RECV_CAPTURE_BASE[2];
    assert_eq!(
        board.peek_register(base + regs::recv_capture::ADDR_RD),
        board.peek_register(base + regs::recv_capture::ADDR_WR)
    );
}

#[test]
fn stop_drain_loses_no_packets() {
    let board = SimBoard::new();
    let mut tester = sim_tester(&board);

    tester
        .receiver_mut(1)
        .unwrap()
        .enable_capture(0, 1 << 20)
        .unwrap();
    tester.write_config().unwrap();

    tester.start_capture().unwrap();
    const N: usize = 25;
    for i in 0..N {
        board.inject_packets(
            1,
            &[SimPacket {
                inter_arrival_cycles: i as u32 + 1,
                latency_ticks: None,
                data: vec![],
            }],
        );
    }
    tester.stop_capture().unwrap();

    let decoded = tester.receiver(1).unwrap().capture().unwrap().get_packets().unwrap();
    assert_eq!(decoded.len(), N);

    let base = regs::NT_RECV_CAPTURE_BASE[1];
    assert_eq!(
        board.peek_register(base + regs::recv_capture::ADDR_RD),
        board.peek_register(base + regs::recv_capture::ADDR_WR)
    );
}

#[test]
fn identity_mismatch_fails_before_any_other_access() {
    let board = SimBoard::new();
    board.set_ident(0x1234, pcie::HW_VERSION);

    let (h2c, c2h) = board.channels();
    let bar: Arc<dyn RegisterIo> = board.clone();
    let err = Tester::attach(bar, Box::new(h2c), Box::new(c2h)).unwrap_err();
    assert!(matches!(
        err,
        TesterError::IdentityMismatch { field: "CRC16", found: 0x1234, .. }
    ));

    // Only the identity word was touched.
    assert_eq!(board.read_log().len(), 1);
    assert!(board.write_log().is_empty());
}

#[test]
fn version_mismatch_is_detected_too() {
    let board = SimBoard::new();
    board.set_ident(pcie::HW_CRC16, 0x0001);

    let (h2c, c2h) = board.channels();
    let bar: Arc<dyn RegisterIo> = board.clone();
    assert!(matches!(
        Tester::attach(bar, Box::new(h2c), Box::new(c2h)),
        Err(TesterError::IdentityMismatch { field: "version", found: 0x0001, .. })
    ));
}

#[test]
fn write_config_is_idempotent() {
    let board = SimBoard::new();
    let mut tester = sim_tester(&board);

    tester.generator_mut(0).bind_trace(Arc::new(cbr_trace(1)));
    tester.receiver_mut(3).unwrap().enable_capture(128, 1 << 20).unwrap();

    board.clear_logs();
    tester.write_config().unwrap();
    let first = board.write_log();

    board.clear_logs();
    tester.write_config().unwrap();
    let second = board.write_log();

    assert_eq!(first, second);

    // Mixed setup with one of each: generator in bank A, receiver in
    // bank B.
    let gen_base = regs::NT_GEN_REPLAY_BASE[0];
    assert_eq!(board.peek_register(gen_base + regs::gen_replay::MEM_ADDR_HI), 0);
    let recv_base = regs::NT_RECV_CAPTURE_BASE[3];
    assert_eq!(board.peek_register(recv_base + regs::recv_capture::MEM_ADDR_HI), 1);
}

#[test]
fn data_plane_errors_respect_check_errors_flag() {
    let board = SimBoard::new();
    let mut tester = sim_tester(&board);

    tester.generator_mut(1).bind_trace(Arc::new(cbr_trace(1)));
    tester.write_config().unwrap();

    // Hardware flags a replay timing violation during the run.
    board.poke_register(
        regs::NT_GEN_RATE_CTRL_BASE[1] + regs::gen_rate_ctrl::STATUS,
        regs::gen_rate_ctrl::status::TIMING_ERROR,
    );

    // With checking disabled the replay completes and the error is left
    // for a manual scan.
    tester.set_check_errors(false);
    tester.start_replay().unwrap();
    assert!(matches!(
        tester.check_errors(),
        Err(TesterError::ReplayTiming { iface: 1 })
    ));

    // With checking enabled the same run aborts.
    tester.set_check_errors(true);
    tester.write_config().unwrap();
    board.poke_register(
        regs::NT_GEN_RATE_CTRL_BASE[1] + regs::gen_rate_ctrl::STATUS,
        regs::gen_rate_ctrl::status::TIMING_ERROR,
    );
    assert!(matches!(
        tester.start_replay(),
        Err(TesterError::ReplayTiming { iface: 1 })
    ));
}

#[test]
fn capture_overrun_surfaces_on_stop() {
    let board = SimBoard::new();
    let mut tester = sim_tester(&board);

    tester.receiver_mut(0).unwrap().enable_capture(0, 0).unwrap();
    tester.write_config().unwrap();

    tester.start_capture().unwrap();
    board.poke_register(
        regs::NT_RECV_CAPTURE_BASE[0] + regs::recv_capture::STATUS_ERRS,
        regs::recv_capture::errs::DATA_FIFO_FULL,
    );
    assert!(matches!(
        tester.stop_capture(),
        Err(TesterError::CaptureOverrun { iface: 0, fifo: "data" })
    ));

    // The receivers are back with the tester after the failed stop.
    assert!(tester.receiver(0).is_ok());
}

#[test]
fn receivers_are_unavailable_while_capturing() {
    let board = SimBoard::new();
    let mut tester = sim_tester(&board);

    tester.receiver_mut(0).unwrap().enable_capture(0, 0).unwrap();
    tester.write_config().unwrap();

    tester.start_capture().unwrap();
    assert!(tester.receiver(0).is_err());
    assert!(tester.write_config().is_err());
    assert!(matches!(
        tester.start_capture(),
        Err(TesterError::InvalidState { .. })
    ));
    tester.stop_capture().unwrap();
    assert!(tester.receiver(0).is_ok());
}

#[test]
fn datarate_logger_starts_and_stops() {
    let board = SimBoard::new();
    let mut tester = sim_tester(&board);

    tester.start_datarate_logger(Duration::from_millis(5)).unwrap();
    std::thread::sleep(Duration::from_millis(20));
    tester.stop_datarate_logger().unwrap();

    // The sampling interval reached every interface: 5 ms at 156.25 MHz.
    for base in regs::NT_DATARATE_BASE {
        assert_eq!(
            board.peek_register(base + regs::datarate::CTRL_SAMPLE_INTERVAL),
            781_250
        );
    }
    assert!(tester.stop_datarate_logger().is_err());
}
