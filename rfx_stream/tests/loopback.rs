//! End-to-end engine tests over the in-memory loopback pool.
//!
//! The loopback pool plays the device side of the DMA path, so these
//! tests exercise the real streamer threads, rings and framing without
//! hardware.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rfx_core::Direction;
use rfx_core::convert::{f32_to_q15, q15_as_bytes};
use rfx_dma::DmaPool;
use rfx_dma::loopback::LoopbackPool;
use rfx_frontend::sim::{SimFrontend, SimStatus};
use rfx_stream::reporter::ErrorEvent;
use rfx_stream::streamer::RealignPolicy;
use rfx_stream::{Args, Engine, Profile};
use rfx_wire::preamble::{self, METADATA_WORDS, TxFraming};

const TIMEOUT: Duration = Duration::from_secs(2);

struct Harness {
    engine: Engine,
    rx_pool: Arc<LoopbackPool>,
    tx_pool: Arc<LoopbackPool>,
    status: Arc<SimStatus>,
    events: Arc<AtomicUsize>,
    late_events: Arc<AtomicUsize>,
    overflow_events: Arc<AtomicUsize>,
}

fn small_profile(realign: RealignPolicy) -> Profile {
    Profile {
        device_name: "loopback",
        min_data_samples: 16,
        rx_ring_bytes: 64 * 1024,
        tx_ring_bytes: 64 * 1024,
        pool_buffers: 4,
        nof_channels: 1,
        realign,
        tx_framing: TxFraming::Plain,
    }
}

fn open(profile: Profile, n_prb: u32) -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();
    let frontend = SimFrontend::new();
    let status = frontend.sim_status();
    let rx_pool = Arc::new(LoopbackPool::new(Direction::Rx));
    let tx_pool = Arc::new(LoopbackPool::new(Direction::Tx));

    let args = Args {
        n_prb,
        ..Args::default()
    };
    let engine = Engine::open(
        &args,
        profile,
        Box::new(frontend),
        Arc::clone(&rx_pool) as Arc<dyn DmaPool>,
        Arc::clone(&tx_pool) as Arc<dyn DmaPool>,
    )
    .unwrap();

    let events = Arc::new(AtomicUsize::new(0));
    let late_events = Arc::new(AtomicUsize::new(0));
    let overflow_events = Arc::new(AtomicUsize::new(0));
    let (all, late, overflow) = (
        Arc::clone(&events),
        Arc::clone(&late_events),
        Arc::clone(&overflow_events),
    );
    engine.register_error_handler(Box::new(move |event| {
        all.fetch_add(1, Ordering::SeqCst);
        match event {
            ErrorEvent::Late { .. } => {
                late.fetch_add(1, Ordering::SeqCst);
            }
            ErrorEvent::Overflow => {
                overflow.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
    }));

    Harness {
        engine,
        rx_pool,
        tx_pool,
        status,
        events,
        late_events,
        overflow_events,
    }
}

/// Builds a wire packet: preamble + timestamp + q15 payload.
fn rx_packet(timestamp: u64, payload: &[i16]) -> Vec<u8> {
    let mut bytes = vec![0u8; METADATA_WORDS * 4 + payload.len() * 2];
    preamble::write_preamble(&mut bytes, TxFraming::Plain, 0, timestamp);
    bytes[METADATA_WORDS * 4..].copy_from_slice(q15_as_bytes(payload));
    bytes
}

fn ramp(nsamples: usize) -> Vec<f32> {
    (0..2 * nsamples).map(|i| (i % 199) as f32 / 256.0).collect()
}

#[test]
fn test_send_timed_emits_one_framed_packet() {
    let mut h = open(
        Profile {
            min_data_samples: 1920,
            ..small_profile(RealignPolicy::Scan)
        },
        6,
    );
    assert_eq!(h.engine.set_tx_srate(1_920_000).unwrap(), 1_920_000);

    let samples = ramp(1920);
    let sent = h
        .engine
        .send_timed(&samples, 1, 0.0, true, true, true, true)
        .unwrap();
    assert_eq!(sent, 1920);

    let (bytes, tx_size) = h.tx_pool.harvest_tx(TIMEOUT).unwrap();
    assert_eq!(tx_size, (1920 + 8) * 4);
    assert!(preamble::match_preamble(&bytes, 0));
    assert_eq!(preamble::timestamp_at(&bytes, 0), 1_920_000);

    let mut expected = vec![0i16; 2 * 1920];
    f32_to_q15(&samples, &mut expected);
    assert_eq!(&bytes[METADATA_WORDS * 4..], q15_as_bytes(&expected));
}

#[test]
fn test_short_end_of_burst_is_zero_padded() {
    let mut h = open(small_profile(RealignPolicy::Scan), 6);

    let samples = ramp(10);
    h.engine
        .send_timed(&samples, 0, 0.5, true, true, true, true)
        .unwrap();

    let (bytes, tx_size) = h.tx_pool.harvest_tx(TIMEOUT).unwrap();
    // 10 of 16 payload samples used, the tail must be silence.
    assert_eq!(tx_size, (10 + 8) * 4);
    assert!(bytes[(8 + 10) * 4..].iter().all(|&b| b == 0));

    let mut expected = vec![0i16; 2 * 10];
    f32_to_q15(&samples, &mut expected);
    assert_eq!(&bytes[8 * 4..18 * 4], q15_as_bytes(&expected));
}

#[test]
fn test_long_burst_timestamps_advance_per_packet() {
    let mut h = open(small_profile(RealignPolicy::Scan), 6);
    h.engine.set_tx_srate(1_920_000).unwrap();

    // 40 samples over 16-sample packets: 16 + 16 + 8 (padded).
    let t0 = rfx_core::time::ticks_from_time(2, 0.0, 1_920_000);
    h.engine
        .send_timed(&ramp(40), 2, 0.0, true, true, true, true)
        .unwrap();

    let (p1, s1) = h.tx_pool.harvest_tx(TIMEOUT).unwrap();
    let (p2, s2) = h.tx_pool.harvest_tx(TIMEOUT).unwrap();
    let (p3, s3) = h.tx_pool.harvest_tx(TIMEOUT).unwrap();

    assert_eq!((s1, s2), ((16 + 8) * 4, (16 + 8) * 4));
    assert_eq!(s3, (8 + 8) * 4);
    assert_eq!(preamble::timestamp_at(&p1, 0), t0);
    assert_eq!(preamble::timestamp_at(&p2, 0), t0 + 16);
    assert_eq!(preamble::timestamp_at(&p3, 0), t0 + 32);
}

#[test]
fn test_recv_with_time_returns_samples_and_clock() {
    let mut h = open(small_profile(RealignPolicy::Scan), 6);
    h.engine.set_rx_srate(1_920_000).unwrap();
    h.engine.start_rx_stream(true).unwrap();

    let payload: Vec<i16> = (0..32).map(|i| (i * 100) as i16).collect();
    h.rx_pool.inject_rx(&rx_packet(1_920_000, &payload), TIMEOUT).unwrap();

    let mut data = vec![0.0f32; 32];
    let (n, time) = h.engine.recv_with_time(&mut data).unwrap();
    assert_eq!(n, 16);
    assert_eq!(time.secs, 1);
    assert!(time.frac_secs.abs() < 1e-9);
    for (i, &x) in data.iter().enumerate() {
        assert_eq!(x, (i * 100) as f32 / 32768.0);
    }

    h.engine.stop_rx_stream().unwrap();
}

#[test]
fn test_recv_spanning_multiple_packets_keeps_first_timestamp() {
    let mut h = open(small_profile(RealignPolicy::Scan), 6);
    h.engine.set_rx_srate(1_920_000).unwrap();
    h.engine.start_rx_stream(true).unwrap();

    let t0 = 1_920_000u64;
    for k in 0..4u64 {
        let payload: Vec<i16> = (0..32).map(|i| (k as i16) * 64 + i as i16).collect();
        h.rx_pool
            .inject_rx(&rx_packet(t0 + 16 * k, &payload), TIMEOUT)
            .unwrap();
    }

    // One call spanning four 16-sample packets.
    let mut data = vec![0.0f32; 2 * 64];
    let (n, time) = h.engine.recv_with_time(&mut data).unwrap();
    assert_eq!(n, 64);
    assert_eq!(time.secs, 1);
    assert!(time.frac_secs.abs() < 1e-9);
    // Payloads arrive in injection order.
    assert_eq!(data[0], 0.0);
    assert_eq!(data[32], 64.0 / 32768.0);

    h.engine.stop_rx_stream().unwrap();
}

#[test]
fn test_rx_scan_realigns_after_misaligned_packet() {
    let mut h = open(small_profile(RealignPolicy::Scan), 6);
    h.engine.set_rx_srate(1_920_000).unwrap();
    h.engine.start_rx_stream(true).unwrap();

    // A well-aligned packet first.
    let payload: Vec<i16> = (1000..1032).collect();
    h.rx_pool.inject_rx(&rx_packet(100, &payload), TIMEOUT).unwrap();
    let mut data = vec![0.0f32; 32];
    h.engine.recv_with_time(&mut data).unwrap();

    // Now a packet whose preamble slid to word offset 4: four payload
    // samples precede it, the remaining twelve follow the metadata.
    let mut bytes = vec![0u8; (16 + 8) * 4];
    let head: Vec<i16> = (0..8).collect();
    let tail: Vec<i16> = (8..32).collect();
    bytes[..16].copy_from_slice(q15_as_bytes(&head));
    preamble::write_preamble(&mut bytes[16..], TxFraming::Plain, 0, 200);
    bytes[(4 + 8) * 4..].copy_from_slice(q15_as_bytes(&tail));
    h.rx_pool.inject_rx(&bytes, TIMEOUT).unwrap();

    let (n, _) = h.engine.recv_with_time(&mut data).unwrap();
    assert_eq!(n, 16);
    // Head samples first, then the tail: the original payload order.
    let expected: Vec<f32> = (0..32).map(|v| v as f32 / 32768.0).collect();
    assert_eq!(data, expected);

    h.engine.stop_rx_stream().unwrap();
}

#[test]
fn test_misalignment_abort_terminates_stream_and_reports() {
    let mut h = open(small_profile(RealignPolicy::Abort { limit: 3 }), 6);
    h.engine.set_rx_srate(1_920_000).unwrap();
    h.engine.start_rx_stream(true).unwrap();

    // Garbage packets with no preamble anywhere.
    for _ in 0..3 {
        let garbage = vec![0x55u8; (16 + 8) * 4];
        h.rx_pool.inject_rx(&garbage, TIMEOUT).unwrap();
    }

    // The reader bails out; nothing reaches the ring.
    let mut data = vec![0.0f32; 32];
    assert!(h.engine.recv_with_time(&mut data).is_err());
    assert_eq!(h.events.load(Ordering::SeqCst), 1);

    h.engine.stop_rx_stream().unwrap();
}

#[test]
fn test_late_register_debounce() {
    let mut h = open(small_profile(RealignPolicy::Scan), 6);
    h.status.set_late(1);

    // Ten submitted packets with the late register stuck: two reports.
    for _ in 0..10 {
        h.engine
            .send_timed(&ramp(16), 0, 0.0, true, true, true, true)
            .unwrap();
        h.tx_pool.harvest_tx(TIMEOUT).unwrap();
    }

    // Wait for the writer to drain the last packet's status check.
    let deadline = std::time::Instant::now() + TIMEOUT;
    while h.late_events.load(Ordering::SeqCst) < 2 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(h.late_events.load(Ordering::SeqCst), 2);
}

#[test]
fn test_overflow_reported_per_observation() {
    let mut h = open(small_profile(RealignPolicy::Scan), 6);
    h.engine.set_rx_srate(1_920_000).unwrap();
    h.engine.start_rx_stream(true).unwrap();
    h.status.set_overflow(1);

    let payload: Vec<i16> = (0..32).collect();
    for k in 0..3 {
        h.rx_pool
            .inject_rx(&rx_packet(1000 + 16 * k, &payload), TIMEOUT)
            .unwrap();
    }

    let mut data = vec![0.0f32; 2 * 48];
    h.engine.recv_with_time(&mut data).unwrap();
    assert_eq!(h.overflow_events.load(Ordering::SeqCst), 3);

    h.engine.stop_rx_stream().unwrap();
}

#[test]
fn test_set_srate_while_streaming_switches_timebase() {
    let mut h = open(small_profile(RealignPolicy::Scan), 6);
    h.engine.set_rx_srate(1_920_000).unwrap();
    h.engine.start_rx_stream(true).unwrap();

    let payload: Vec<i16> = (0..32).collect();
    h.rx_pool.inject_rx(&rx_packet(1_920_000, &payload), TIMEOUT).unwrap();
    let mut data = vec![0.0f32; 32];
    let (_, time) = h.engine.recv_with_time(&mut data).unwrap();
    assert_eq!(time.secs, 1);

    // Live rate change: stream pauses, ring clears, stream resumes.
    assert_eq!(h.engine.set_rx_srate(3_840_000).unwrap(), 3_840_000);

    h.rx_pool.inject_rx(&rx_packet(3_840_000, &payload), TIMEOUT).unwrap();
    let (_, time) = h.engine.recv_with_time(&mut data).unwrap();
    assert_eq!(time.secs, 1);
    assert!(time.frac_secs.abs() < 1e-9);

    h.engine.stop_rx_stream().unwrap();
}

#[test]
fn test_reconfigure_packet_size_under_active_rx() {
    let mut h = open(small_profile(RealignPolicy::Scan), 6);
    h.engine.set_rx_srate(1_920_000).unwrap();
    h.engine.start_rx_stream(true).unwrap();

    // n_prb 7 doubles the packet to 32 samples; the stream restarts.
    h.engine.configure_timestamping(7).unwrap();

    let payload: Vec<i16> = (0..64).collect();
    h.rx_pool.inject_rx(&rx_packet(500, &payload), TIMEOUT).unwrap();

    let mut data = vec![0.0f32; 64];
    let (n, _) = h.engine.recv_with_time(&mut data).unwrap();
    assert_eq!(n, 32);

    h.engine.stop_rx_stream().unwrap();
}

#[test]
fn test_close_with_both_streams_active() {
    let mut h = open(small_profile(RealignPolicy::Scan), 6);
    h.engine.set_rx_srate(1_920_000).unwrap();
    h.engine.start_rx_stream(true).unwrap();
    h.engine
        .send_timed(&ramp(16), 0, 0.0, true, true, true, false)
        .unwrap();
    h.tx_pool.harvest_tx(TIMEOUT).unwrap();

    h.engine.close();
    assert!(!h.rx_pool.is_allocated());
    assert!(!h.tx_pool.is_allocated());

    // A fresh engine opens cleanly afterwards.
    let h2 = open(small_profile(RealignPolicy::Scan), 6);
    drop(h2);
}

#[test]
fn test_tx_auto_start_and_devname() {
    let mut h = open(small_profile(RealignPolicy::Scan), 6);
    assert_eq!(h.engine.devname(), "loopback");

    // send_timed activates the writer on its own.
    h.engine
        .send_timed(&ramp(16), 0, 0.0, false, true, true, false)
        .unwrap();
    let (_, tx_size) = h.tx_pool.harvest_tx(TIMEOUT).unwrap();
    assert_eq!(tx_size, (16 + 8) * 4);
}

#[test]
fn test_random_payload_survives_the_tx_path() {
    use rand::Rng;

    let mut h = open(small_profile(RealignPolicy::Scan), 6);
    let mut rng = rand::thread_rng();
    let samples: Vec<f32> = (0..2 * 16).map(|_| rng.gen_range(-1.0f32..1.0)).collect();

    h.engine
        .send_timed(&samples, 0, 0.0, true, true, true, true)
        .unwrap();
    let (bytes, _) = h.tx_pool.harvest_tx(TIMEOUT).unwrap();

    let mut expected = vec![0i16; 2 * 16];
    f32_to_q15(&samples, &mut expected);
    assert_eq!(&bytes[8 * 4..], q15_as_bytes(&expected));
}
