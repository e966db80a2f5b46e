//! The streaming engine.
//!
//! Owns the frontend and both streamers and implements the public
//! operation set: open/close, stream start/stop, rate/frequency/gain
//! control, timed send and receive, and live reconfiguration of the
//! DMA packet size. Sample payloads cross the streamer rings framed by
//! [`PacketHeader`] records; the engine keeps a persistent cursor so
//! one DMA packet can be consumed across several `recv_with_time`
//! calls (and vice versa).

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, info};
use rfx_core::Direction;
use rfx_core::convert::{f32_to_q15, q15_as_bytes, q15_as_bytes_mut, q15_to_f32};
use rfx_core::time::{ticks_from_time, time_from_ticks};
use rfx_dma::DmaPool;
use rfx_frontend::{Frontend, StatusPort, StatusRegister};
use rfx_wire::header::{HEADER_BYTES, PacketHeader};
use rfx_wire::preamble::METADATA_WORDS;

use crate::args::Args;
use crate::config;
use crate::error::{RadioError, Result};
use crate::reporter::{ErrorHandler, ErrorReporter};
use crate::streamer::{Streamer, StreamerConfig};
use crate::variant::Profile;

/// Timeout of one ring read inside `recv_with_time`.
const RECV_RING_TIMEOUT: Duration = Duration::from_millis(1000);

/// Upper bound on ring transactions per `recv_with_time` call.
const RECV_MAX_TRIALS: u32 = 100;

/// Wall-clock position of the first sample returned by a receive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RxTime {
    pub secs: u64,
    pub frac_secs: f64,
}

/// Partially consumed RX packet, carried across receive calls.
#[derive(Debug, Default, Clone, Copy)]
struct RxCursor {
    remaining: u32,
    timestamp: u64,
}

/// A timestamped streaming device.
pub struct Engine {
    profile: Profile,
    frontend: Box<dyn Frontend>,
    status: Arc<dyn StatusPort>,
    reporter: ErrorReporter,
    rx: Streamer,
    tx: Streamer,
    rx_cursor: RxCursor,
    conv_rx: Vec<i16>,
    conv_tx: Vec<i16>,
    sample_rate: u64,
    use_timestamps: bool,
    rx_data_samples: u32,
    tx_data_samples: u32,
}

impl Engine {
    /// Opens the engine over an already-constructed frontend and DMA
    /// pools, then applies the packet sizing selected by `args.n_prb`.
    pub fn open(
        args: &Args,
        profile: Profile,
        frontend: Box<dyn Frontend>,
        rx_pool: Arc<dyn DmaPool>,
        tx_pool: Arc<dyn DmaPool>,
    ) -> Result<Self> {
        let reporter = ErrorReporter::new();
        let status = frontend.status_port();

        let rx = Streamer::new(
            StreamerConfig {
                direction: Direction::Rx,
                ring_bytes: profile.rx_ring_bytes,
                pool_buffers: profile.pool_buffers,
                sample_bytes: 4 * profile.nof_channels as usize,
                realign: profile.realign,
                tx_framing: profile.tx_framing,
            },
            rx_pool,
            Arc::clone(&status),
            reporter.clone(),
        );
        let tx = Streamer::new(
            StreamerConfig {
                direction: Direction::Tx,
                ring_bytes: profile.tx_ring_bytes,
                pool_buffers: profile.pool_buffers,
                sample_bytes: 4,
                realign: profile.realign,
                tx_framing: profile.tx_framing,
            },
            tx_pool,
            Arc::clone(&status),
            reporter.clone(),
        );

        let sample_rate = frontend.current_sample_rate().unwrap_or(0);
        let mut engine = Self {
            profile,
            frontend,
            status,
            reporter,
            rx,
            tx,
            rx_cursor: RxCursor::default(),
            conv_rx: vec![0; config::CONVERT_BUFFER_SAMPLES],
            conv_tx: vec![0; config::CONVERT_BUFFER_SAMPLES],
            sample_rate,
            use_timestamps: true,
            rx_data_samples: 0,
            tx_data_samples: 0,
        };
        engine.configure_timestamping(args.n_prb)?;
        info!(
            "{} device opened (n_prb={}, rate={} Hz)",
            engine.profile.device_name, args.n_prb, engine.sample_rate
        );
        Ok(engine)
    }

    /// Static device name used for plugin dispatch.
    pub fn devname(&self) -> &'static str {
        self.profile.device_name
    }

    pub fn sample_rate(&self) -> u64 {
        self.sample_rate
    }

    /// Installs the callback that surfaces LATE/OVERFLOW/UNDERFLOW.
    pub fn register_error_handler(&self, handler: ErrorHandler) {
        self.reporter.set_handler(handler);
    }

    /// Selects the DMA packet size for `n_prb` and rebuilds whichever
    /// side's pool no longer matches. Active streams on a resized side
    /// are paused and restarted; the two sides reconfigure
    /// independently.
    pub fn configure_timestamping(&mut self, n_prb: u32) -> Result<()> {
        self.use_timestamps = true;
        let data_samples = config::data_buffer_samples(n_prb, self.profile.min_data_samples)
            .ok_or_else(|| RadioError::Config(format!("unsupported n_prb {n_prb}")))?;
        let rx_meta = METADATA_WORDS as u32 / self.profile.nof_channels;
        let tx_meta = METADATA_WORDS as u32;

        let skip_rx = self.rx_data_samples == data_samples;
        let skip_tx = self.tx_data_samples == data_samples;
        if skip_rx {
            debug!("rx packet size already {data_samples} samples");
        }
        if skip_tx {
            debug!("tx packet size already {data_samples} samples");
        }

        let restart_rx = !skip_rx && self.rx.is_active();
        let restart_tx = !skip_tx && self.tx.is_active();

        if restart_rx {
            self.rx.deactivate();
            debug!("changing dma packet size, rx stream paused");
        }
        if !skip_rx {
            self.rx.ring().reset();
            // Invalidate any partially read packet.
            self.rx_cursor = RxCursor::default();
            let _ = self.rx.pool().destroy();
        }
        if restart_tx {
            self.stop_tx_stream()?;
            debug!("changing dma packet size, tx stream paused");
        }

        self.rx_data_samples = data_samples;
        self.tx_data_samples = data_samples;
        self.rx.set_run_params(data_samples, rx_meta, self.use_timestamps);
        self.tx.set_run_params(data_samples, tx_meta, self.use_timestamps);

        if !skip_tx {
            // The TX pool is rebuilt eagerly; the RX pool is created by
            // its thread on the next activation.
            let pool = self.tx.pool();
            if pool.is_allocated() {
                let _ = pool.disable();
                let _ = pool.destroy();
            }
            pool.allocate(self.profile.pool_buffers, data_samples + tx_meta, 4)?;
            pool.enable()?;
        }

        if restart_rx {
            self.start_rx_stream(true)?;
        }
        if restart_tx {
            self.start_tx_stream()?;
        }
        Ok(())
    }

    /// Starts the RX stream, bootstrapping the default rate if none was
    /// configured yet.
    pub fn start_rx_stream(&mut self, _now: bool) -> Result<()> {
        if self.sample_rate == 0 {
            self.set_rx_srate(config::DEFAULT_SAMPLE_RATE)?;
            self.set_tx_srate(config::DEFAULT_SAMPLE_RATE)?;
            info!("default sample rate configured");
        }
        self.rx.activate()?;
        info!("rx stream started");
        Ok(())
    }

    pub fn stop_rx_stream(&mut self) -> Result<()> {
        if self.rx.is_active() || !self.rx.thread_completed() {
            if self.rx.is_active() {
                self.rx.deactivate();
            }
            let _ = self.rx.pool().destroy();
            info!("rx stream stopped");
        }
        Ok(())
    }

    pub fn start_tx_stream(&mut self) -> Result<()> {
        self.tx.activate()
    }

    pub fn stop_tx_stream(&mut self) -> Result<()> {
        if self.tx.is_active() {
            self.tx.deactivate();
        }
        let _ = self.tx.pool().disable();
        let _ = self.tx.pool().destroy();
        Ok(())
    }

    /// Applies a new sample rate to both directions. An active RX
    /// stream is paused around the switch and its ring cleared; the TX
    /// writer keeps draining its own ring undisturbed.
    pub fn set_rx_srate(&mut self, rate_hz: u64) -> Result<u64> {
        if rate_hz == self.sample_rate {
            return Ok(rate_hz);
        }
        let restart = self.rx.is_active();
        if restart {
            self.rx.deactivate();
            self.rx.ring().reset();
            self.rx_cursor = RxCursor::default();
            debug!("changing sample rate, rx stream paused");
        }

        let applied = self.frontend.set_sample_rate(rate_hz);
        if let Ok(rate) = &applied {
            self.sample_rate = *rate;
            // Wait for the baseband clock derived from the new rate.
            while self.status.status(StatusRegister::MmcmLock) == 0 {
                thread::sleep(Duration::from_micros(100));
            }
            debug!("baseband clock locked");
        }

        if restart {
            self.rx.activate()?;
        }
        Ok(applied?)
    }

    /// The TX rate mirrors the RX rate.
    pub fn set_tx_srate(&mut self, rate_hz: u64) -> Result<u64> {
        if rate_hz != self.sample_rate {
            self.set_rx_srate(rate_hz)?;
        }
        Ok(rate_hz)
    }

    pub fn set_rx_freq(&mut self, channel: u32, freq_hz: f64) -> Result<f64> {
        self.frontend.set_rx_freq(channel, freq_hz)?;
        Ok(freq_hz)
    }

    pub fn set_tx_freq(&mut self, channel: u32, freq_hz: f64) -> Result<f64> {
        self.frontend.set_tx_freq(channel, freq_hz)?;
        Ok(freq_hz)
    }

    pub fn set_rx_gain(&mut self, gain_db: f64) -> Result<()> {
        Ok(self.frontend.set_rx_gain(gain_db)?)
    }

    pub fn set_tx_gain(&mut self, gain_db: f64) -> Result<()> {
        Ok(self.frontend.set_tx_gain(gain_db)?)
    }

    pub fn rx_gain(&self) -> f64 {
        self.frontend.rx_gain().unwrap_or(0.0)
    }

    pub fn tx_gain(&self) -> f64 {
        self.frontend.tx_gain().unwrap_or(0.0)
    }

    /// Receives `data.len() / 2` IQ pairs and the wall-clock time of
    /// the first one.
    ///
    /// Packets are pulled from the RX ring header-then-payload; a
    /// packet larger than the request is carried over to the next call
    /// through the engine's cursor.
    pub fn recv_with_time(&mut self, data: &mut [f32]) -> Result<(usize, RxTime)> {
        let nsamples = data.len() / 2;
        let channels = self.profile.nof_channels as usize;
        if 2 * nsamples * channels > self.conv_rx.len() {
            return Err(RadioError::Config(format!(
                "receive of {nsamples} samples exceeds the conversion buffer"
            )));
        }

        let mut total = 0usize;
        let mut trials = 0u32;
        while total < nsamples && trials < RECV_MAX_TRIALS {
            if self.rx_cursor.remaining == 0 {
                let mut raw = [0u8; HEADER_BYTES];
                let n = self.rx.ring().read_timed(&mut raw, RECV_RING_TIMEOUT)?;
                if n == 0 {
                    // Ring inactive; the stream is being reconfigured.
                    thread::sleep(Duration::from_micros(500));
                    return Err(RadioError::StreamStopped);
                }
                let header = PacketHeader::from_bytes(&raw);
                if !header.is_valid() {
                    error!("invalid header in rx ring");
                    self.rx.ring().reset();
                    self.rx_cursor = RxCursor::default();
                    return Err(RadioError::InvalidHeader);
                }
                self.rx_cursor.remaining = header.nof_samples;
                self.rx_cursor.timestamp = header.timestamp;
            }

            let read_samples = (self.rx_cursor.remaining as usize).min(nsamples - total);
            let start = 2 * total * channels;
            let count = 2 * read_samples * channels;
            let dst = &mut self.conv_rx[start..start + count];
            let n = self.rx.ring().read_timed(q15_as_bytes_mut(dst), RECV_RING_TIMEOUT)?;
            if n == 0 {
                return Err(RadioError::StreamStopped);
            }

            self.rx_cursor.remaining -= read_samples as u32;
            if read_samples != nsamples {
                // The final timestamp must name the first sample of the
                // whole call, not of the current packet.
                self.rx_cursor.timestamp -= total as u64;
            }
            total += read_samples;
            trials += 1;
        }

        q15_to_f32(&self.conv_rx[..2 * total], &mut data[..2 * total]);
        let rate = self.effective_rate();
        let (secs, frac_secs) = time_from_ticks(self.rx_cursor.timestamp, rate);
        Ok((total, RxTime { secs, frac_secs }))
    }

    /// Queues `data.len() / 2` IQ pairs for transmission at
    /// `(secs, frac_secs)`, starting the TX stream if needed.
    ///
    /// The header and payload enter the TX ring as one non-interleaved
    /// block; the writer thread packs them into DMA packets.
    #[allow(clippy::too_many_arguments)]
    pub fn send_timed(
        &mut self,
        data: &[f32],
        secs: u64,
        frac_secs: f64,
        _has_time_spec: bool,
        _blocking: bool,
        _is_start_of_burst: bool,
        is_end_of_burst: bool,
    ) -> Result<usize> {
        let nsamples = data.len() / 2;
        if 2 * nsamples > self.conv_tx.len() {
            return Err(RadioError::Config(format!(
                "send of {nsamples} samples exceeds the conversion buffer"
            )));
        }
        if !self.tx.is_active() {
            self.start_tx_stream()?;
        }

        let ticks = ticks_from_time(secs, frac_secs, self.effective_rate());
        let header = PacketHeader::new(ticks, nsamples as u32, is_end_of_burst);

        let conv = &mut self.conv_tx[..2 * nsamples];
        f32_to_q15(&data[..2 * nsamples], conv);

        let ring = self.tx.ring();
        if ring.write_block(&header.to_bytes())? != HEADER_BYTES {
            return Err(RadioError::StreamStopped);
        }
        let payload = q15_as_bytes(conv);
        if ring.write_block(payload)? != payload.len() {
            return Err(RadioError::StreamStopped);
        }
        Ok(nsamples)
    }

    /// Stops both streams and releases every DMA resource. Idempotent;
    /// also run on drop.
    pub fn close(&mut self) {
        self.tx.shutdown();
        self.rx.shutdown();
        let _ = self.tx.pool().destroy();
        let _ = self.rx.pool().destroy();
        info!("{} device closed", self.profile.device_name);
    }

    fn effective_rate(&self) -> u64 {
        if self.sample_rate == 0 {
            config::DEFAULT_SAMPLE_RATE
        } else {
            self.sample_rate
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.close();
    }
}
