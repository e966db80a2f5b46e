//! Per-direction streamer threads.
//!
//! Each direction owns a thread, a ring and a DMA pool. The RX thread
//! drains completed DMA buffers into its ring as header+payload pairs;
//! the TX thread drains its ring into fixed-size DMA packets, framing
//! them with the wire preamble and timestamp.
//!
//! The engine and the thread synchronize through one mutex, one condvar
//! and two flags: the engine flips `active` and signals; the thread
//! observes the flip, acknowledges by clearing `thread_completed` and
//! signals back. Stops run the handshake in reverse and end in a join,
//! so after `deactivate` returns no thread touches the pool or the ring.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};
use rfx_core::{Direction, Ring};
use rfx_dma::{BufferId, DmaError, DmaPool};
use rfx_frontend::{StatusPort, StatusRegister};
use rfx_wire::header::{HEADER_BYTES, PacketHeader};
use rfx_wire::preamble::{self, METADATA_WORDS, TxFraming};

use crate::error::{RadioError, Result};
use crate::reporter::ErrorReporter;

/// How the RX path reacts to a packet whose preamble is not where it
/// should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealignPolicy {
    /// Scan the packet for the preamble and keep streaming from the
    /// found offset.
    Scan,
    /// Drop the packet; after `limit` consecutive misalignments stop
    /// the stream and report an error.
    Abort { limit: u32 },
}

/// Static per-direction configuration, fixed at engine construction.
#[derive(Debug, Clone)]
pub struct StreamerConfig {
    pub direction: Direction,
    pub ring_bytes: usize,
    pub pool_buffers: u32,
    /// Bytes of one IQ sample on this path (RX scales with channel
    /// count; TX is always one pair).
    pub sample_bytes: usize,
    pub realign: RealignPolicy,
    pub tx_framing: TxFraming,
}

/// Parameters the engine may change while the thread is quiesced.
#[derive(Debug, Clone, Copy)]
struct RunParams {
    data_samples: u32,
    metadata_samples: u32,
    use_timestamps: bool,
}

struct StreamState {
    active: bool,
    thread_completed: bool,
    /// Terminal flag; parks never resume after shutdown.
    shutdown: bool,
    /// Set when the thread could not start its pool.
    failed: bool,
    params: RunParams,
}

struct Shared {
    state: Mutex<StreamState>,
    cvar: Condvar,
    ring: Ring,
    pool: Arc<dyn DmaPool>,
    status: Arc<dyn StatusPort>,
    reporter: ErrorReporter,
    config: StreamerConfig,
}

impl Shared {
    fn is_active(&self) -> bool {
        self.state.lock().unwrap().active
    }

    fn finish(&self) {
        let mut st = self.state.lock().unwrap();
        st.thread_completed = true;
        self.cvar.notify_all();
    }

    fn fail_startup(&self) {
        let mut st = self.state.lock().unwrap();
        st.failed = true;
        st.thread_completed = true;
        self.cvar.notify_all();
    }
}

/// One direction of the streaming engine.
pub struct Streamer {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Streamer {
    /// Creates the streamer and spawns its thread parked on the
    /// condition variable.
    pub fn new(
        config: StreamerConfig,
        pool: Arc<dyn DmaPool>,
        status: Arc<dyn StatusPort>,
        reporter: ErrorReporter,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(StreamState {
                active: false,
                thread_completed: false,
                shutdown: false,
                failed: false,
                params: RunParams {
                    data_samples: 0,
                    metadata_samples: 0,
                    use_timestamps: true,
                },
            }),
            cvar: Condvar::new(),
            ring: Ring::new(config.ring_bytes),
            pool,
            status,
            reporter,
            config,
        });
        let thread = Some(Self::spawn(&shared));
        Self { shared, thread }
    }

    fn spawn(shared: &Arc<Shared>) -> JoinHandle<()> {
        let shared = Arc::clone(shared);
        let name = match shared.config.direction {
            Direction::Rx => "rfx-rx",
            Direction::Tx => "rfx-tx",
        };
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || match shared.config.direction {
                Direction::Rx => rx_loop(&shared),
                Direction::Tx => tx_loop(&shared),
            })
            .expect("failed to spawn streamer thread")
    }

    pub fn ring(&self) -> &Ring {
        &self.shared.ring
    }

    pub fn pool(&self) -> &Arc<dyn DmaPool> {
        &self.shared.pool
    }

    pub fn direction(&self) -> Direction {
        self.shared.config.direction
    }

    pub fn is_active(&self) -> bool {
        self.shared.is_active()
    }

    pub fn thread_completed(&self) -> bool {
        self.shared.state.lock().unwrap().thread_completed
    }

    /// Updates the packet sizing for the next activation. Only call
    /// with the thread quiesced.
    pub fn set_run_params(&self, data_samples: u32, metadata_samples: u32, use_timestamps: bool) {
        let mut st = self.shared.state.lock().unwrap();
        st.params = RunParams {
            data_samples,
            metadata_samples,
            use_timestamps,
        };
    }

    /// Activates the stream and waits until the thread has observed the
    /// activation (the `thread_completed` double flip).
    pub fn activate(&mut self) -> Result<()> {
        {
            let mut st = self.shared.state.lock().unwrap();
            if st.shutdown {
                return Err(RadioError::StreamStopped);
            }
            st.active = true;
            if st.thread_completed {
                // The previous run exited; reap it and start fresh.
                drop(st);
                if let Some(handle) = self.thread.take() {
                    let _ = handle.join();
                }
                self.shared.ring.start();
                self.thread = Some(Self::spawn(&self.shared));
            }
        }
        let mut st = self.shared.state.lock().unwrap();
        self.shared.cvar.notify_all();
        while st.thread_completed && !st.failed {
            st = self.shared.cvar.wait(st).unwrap();
        }
        if st.failed {
            st.failed = false;
            st.active = false;
            return Err(RadioError::StreamStopped);
        }
        Ok(())
    }

    /// Deactivates the stream, cancels any outstanding DMA wait, and
    /// joins the thread.
    ///
    /// Callers guarantee the stream was activated (or its thread has
    /// already exited); a parked, never-activated streamer is stopped
    /// with [`shutdown`](Self::shutdown) instead.
    pub fn deactivate(&mut self) {
        {
            let mut st = self.shared.state.lock().unwrap();
            st.active = false;
        }
        // Unblock a thread parked in the pool or on the ring.
        if let Err(e) = self.shared.pool.disable() {
            warn!("pool disable during stop: {e}");
        }
        self.shared.ring.stop();
        {
            let mut st = self.shared.state.lock().unwrap();
            while !st.thread_completed {
                st = self.shared.cvar.wait(st).unwrap();
            }
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    /// Terminal stop: also wakes a thread that never saw an activation.
    pub fn shutdown(&mut self) {
        {
            let mut st = self.shared.state.lock().unwrap();
            st.shutdown = true;
            st.active = false;
            self.shared.cvar.notify_all();
        }
        if let Err(e) = self.shared.pool.disable() {
            warn!("pool disable during shutdown: {e}");
        }
        self.shared.ring.stop();
        {
            let mut st = self.shared.state.lock().unwrap();
            while !st.thread_completed {
                st = self.shared.cvar.wait(st).unwrap();
            }
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Streamer {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.shutdown();
        }
    }
}

/// Best-effort promotion to the realtime FIFO class.
fn promote_to_realtime() {
    // SAFETY: plain scheduler calls on the current thread.
    unsafe {
        let param = libc::sched_param {
            sched_priority: libc::sched_get_priority_max(libc::SCHED_FIFO),
        };
        if libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) != 0 {
            debug!("unable to enter SCHED_FIFO, streaming at default priority");
        }
    }
}

/// Parks until activation. Returns the run parameters, or None on
/// shutdown or pool failure (handshake already completed).
fn park_until_active(shared: &Shared, reset_ring_on_alloc: bool) -> Option<RunParams> {
    let mut st = shared.state.lock().unwrap();
    loop {
        if st.shutdown {
            st.thread_completed = true;
            shared.cvar.notify_all();
            return None;
        }
        if st.active {
            break;
        }
        st = shared.cvar.wait(st).unwrap();
    }
    let params = st.params;

    if !shared.pool.is_allocated() {
        let total_samples = params.data_samples + params.metadata_samples;
        let started = shared
            .pool
            .allocate(shared.config.pool_buffers, total_samples, shared.config.sample_bytes)
            .and_then(|_| shared.pool.enable());
        if let Err(e) = started {
            error!("cannot start {:?} dma pool: {e}", shared.config.direction);
            drop(st);
            shared.fail_startup();
            return None;
        }
        if reset_ring_on_alloc {
            shared.ring.reset();
        }
    } else if let Err(e) = shared.pool.enable() {
        error!("cannot enable {:?} dma pool: {e}", shared.config.direction);
        drop(st);
        shared.fail_startup();
        return None;
    }

    st.thread_completed = false;
    shared.cvar.notify_all();
    Some(params)
}

/// RX reader: drain completed DMA buffers into the ring.
fn rx_loop(shared: &Shared) {
    promote_to_realtime();
    let Some(params) = park_until_active(shared, true) else {
        return;
    };

    let sample_bytes = shared.config.sample_bytes;
    let data_samples = params.data_samples as usize;
    let payload_bytes = data_samples * sample_bytes;
    let meta_bytes = params.metadata_samples as usize * sample_bytes;
    let payload_words = payload_bytes / 4;

    let mut preamble_location = 0usize;
    let mut misaligned = 0u32;
    let mut held: Option<BufferId> = None;

    while shared.is_active() {
        if let Some(prev) = held.take() {
            if let Err(e) = shared.pool.release_rx(prev) {
                if !shared.is_active() {
                    break;
                }
                debug!("rx buffer release failed: {e}");
            }
        }
        let id = match shared.pool.acquire_rx() {
            Ok(id) => id,
            Err(e) => {
                if !shared.is_active() {
                    // Cancelled by a stop or reconfiguration.
                    break;
                }
                error!("error refilling rx buffer: {e}");
                thread::sleep(Duration::from_millis(1));
                continue;
            }
        };
        held = Some(id);

        let Ok(ptr) = shared.pool.data_ptr(id) else {
            continue;
        };
        // SAFETY: we own `id` until release and the engine joins this
        // thread before destroying the pool.
        let buf = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), shared.pool.buffer_bytes()) };

        let mut timestamp = 0u64;
        if params.use_timestamps {
            if preamble::match_preamble(buf, preamble_location) {
                misaligned = 0;
                timestamp = preamble::timestamp_at(buf, preamble_location);
            } else {
                warn!("misaligned packet received from the dma");
                match shared.config.realign {
                    RealignPolicy::Scan => match preamble::scan_preamble(buf, payload_words) {
                        Some(found) => {
                            info!("realigning at word offset {found}");
                            preamble_location = found;
                            timestamp = preamble::timestamp_at(buf, found);
                        }
                        None => continue,
                    },
                    RealignPolicy::Abort { limit } => {
                        misaligned += 1;
                        if misaligned >= limit {
                            error!("{misaligned} consecutive misaligned packets, terminating rx stream");
                            shared.reporter.other();
                            break;
                        }
                        continue;
                    }
                }
            }
        }

        let header = PacketHeader::new(timestamp, params.data_samples, false);
        let _ = shared.ring.write(&header.to_bytes());

        let written = if preamble_location == 0 {
            shared
                .ring
                .write(&buf[meta_bytes..meta_bytes + payload_bytes])
                .unwrap_or(0)
        } else {
            // The preamble sits mid-buffer: the payload head precedes
            // it and the tail follows the metadata block.
            let head_bytes = preamble_location * 4;
            let tail_start = (preamble_location + METADATA_WORDS) * 4;
            let head = shared.ring.write(&buf[..head_bytes]).unwrap_or(0);
            let tail = shared
                .ring
                .write(&buf[tail_start..tail_start + payload_bytes - head_bytes])
                .unwrap_or(0);
            head + tail
        };
        if written < payload_bytes {
            error!("short rx ring write: {written} of {payload_bytes} bytes");
        }

        if shared.status.status(StatusRegister::Overflow) != 0 {
            info!("rx overflow detected");
            shared.reporter.overflow();
        }
    }

    shared.finish();
}

/// TX writer: drain the ring into framed DMA packets.
fn tx_loop(shared: &Shared) {
    promote_to_realtime();
    let Some(params) = park_until_active(shared, false) else {
        return;
    };

    let sample_bytes = shared.config.sample_bytes;
    let data_samples = params.data_samples as usize;
    let meta_samples = params.metadata_samples as usize;

    let mut remaining = 0usize;
    let mut end_of_burst = false;
    let mut timestamp = 0u64;
    let mut have_timestamp = false;
    let mut items_in_buffer = 0usize;

    let mut id = match shared.pool.acquire_tx() {
        Ok(id) => id,
        Err(e) => {
            error!("no free tx buffer at stream start: {e}");
            shared.finish();
            return;
        }
    };

    'outer: while shared.is_active() {
        let mut n = 0usize;
        while n < data_samples {
            let Ok(ptr) = shared.pool.data_ptr(id) else {
                break 'outer;
            };
            // SAFETY: we own `id` until send_tx and the engine joins
            // this thread before destroying the pool.
            let buf =
                unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), shared.pool.buffer_bytes()) };

            if remaining == 0 {
                let mut raw = [0u8; HEADER_BYTES];
                match shared.ring.read(&mut raw) {
                    Ok(0) => {
                        // Ring stopped; back off and let the outer loop
                        // decide whether the stream is over.
                        thread::sleep(Duration::from_millis(1));
                        continue 'outer;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("error reading tx ring: {e}");
                        break 'outer;
                    }
                }
                let header = PacketHeader::from_bytes(&raw);
                if !header.is_valid() {
                    error!("invalid header in tx ring, dropping queued data");
                    shared.ring.reset();
                    continue;
                }
                remaining = header.nof_samples as usize;
                end_of_burst = header.end_of_burst;
                if !have_timestamp {
                    timestamp = header.timestamp;
                    if timestamp != 0 {
                        // The caller's timestamp names the first sample
                        // of the call; samples already queued in this
                        // packet shift its wire position back.
                        timestamp -= items_in_buffer as u64;
                    }
                    have_timestamp = true;
                }
            }

            let read_samples = remaining.min(data_samples - items_in_buffer);
            if read_samples > 0 {
                let offset = (meta_samples + items_in_buffer) * sample_bytes;
                match shared
                    .ring
                    .read(&mut buf[offset..offset + read_samples * sample_bytes])
                {
                    Ok(0) => {
                        thread::sleep(Duration::from_millis(1));
                        continue 'outer;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("error reading tx samples: {e}");
                        break 'outer;
                    }
                }
            }
            if items_in_buffer == 0 && n == 0 && read_samples == 0 {
                // Empty burst; nothing to put on the wire.
                have_timestamp = false;
                continue;
            }

            items_in_buffer += read_samples;
            remaining -= read_samples;
            n += read_samples;

            if items_in_buffer == data_samples || end_of_burst {
                if !have_timestamp && timestamp != 0 {
                    // Continuation packet of a long burst: advance past
                    // the full packet that preceded it.
                    timestamp += data_samples as u64;
                }
                have_timestamp = false;

                if items_in_buffer < data_samples {
                    // Short end-of-burst packet: the device must emit
                    // silence, not stale samples.
                    let used = (meta_samples + items_in_buffer) * sample_bytes;
                    buf[used..].fill(0);
                }

                let dma_bytes = (meta_samples + items_in_buffer) * sample_bytes;
                preamble::write_preamble(
                    buf,
                    shared.config.tx_framing,
                    dma_bytes as u32,
                    if params.use_timestamps { timestamp } else { 0 },
                );

                match shared.pool.send_tx(id, dma_bytes) {
                    Ok(next) => id = next,
                    Err(DmaError::Cancelled) => break 'outer,
                    Err(e) => {
                        error!("tx submit failed: {e}");
                        break 'outer;
                    }
                }
                if end_of_burst {
                    n = data_samples;
                }
                items_in_buffer = 0;

                if shared.status.status(StatusRegister::Late) != 0 {
                    debug!("tx late");
                    shared.reporter.late(false);
                } else {
                    shared.reporter.late_clear();
                }
            }
        }
    }

    shared.finish();
}
