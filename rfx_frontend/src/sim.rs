//! In-memory frontend for engine tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::backend::{Frontend, StatusPort, StatusRegister};
use crate::error::Result;

/// Shared fake status registers; tests flip them while streamer threads
/// observe.
#[derive(Debug, Default)]
pub struct SimStatus {
    late: AtomicU32,
    overflow: AtomicU32,
    mmcm_lock: AtomicU32,
}

impl SimStatus {
    pub fn set_late(&self, value: u32) {
        self.late.store(value, Ordering::Release);
    }

    pub fn set_overflow(&self, value: u32) {
        self.overflow.store(value, Ordering::Release);
    }

    pub fn set_mmcm_lock(&self, value: u32) {
        self.mmcm_lock.store(value, Ordering::Release);
    }
}

impl StatusPort for SimStatus {
    fn status(&self, reg: StatusRegister) -> u32 {
        match reg {
            StatusRegister::Late => self.late.load(Ordering::Acquire),
            StatusRegister::Overflow => self.overflow.load(Ordering::Acquire),
            StatusRegister::MmcmLock => self.mmcm_lock.load(Ordering::Acquire),
            StatusRegister::RxChannels => 1,
        }
    }
}

/// [`Frontend`] that accepts every setting and records it.
pub struct SimFrontend {
    status: Arc<SimStatus>,
    sample_rate: u64,
    pub rx_freq_hz: f64,
    pub tx_freq_hz: f64,
    pub rx_gain_db: f64,
    pub tx_gain_db: f64,
}

impl SimFrontend {
    pub fn new() -> Self {
        let status = Arc::new(SimStatus::default());
        // The simulated clock locks instantly.
        status.set_mmcm_lock(1);
        Self {
            status,
            sample_rate: 0,
            rx_freq_hz: 0.0,
            tx_freq_hz: 0.0,
            rx_gain_db: 0.0,
            tx_gain_db: 0.0,
        }
    }

    /// Handle for flipping status registers from a test.
    pub fn sim_status(&self) -> Arc<SimStatus> {
        Arc::clone(&self.status)
    }
}

impl Default for SimFrontend {
    fn default() -> Self {
        Self::new()
    }
}

impl Frontend for SimFrontend {
    fn set_sample_rate(&mut self, rate_hz: u64) -> Result<u64> {
        self.sample_rate = rate_hz;
        Ok(rate_hz)
    }

    fn set_rx_freq(&mut self, _channel: u32, freq_hz: f64) -> Result<f64> {
        self.rx_freq_hz = freq_hz;
        Ok(freq_hz / 1e6)
    }

    fn set_tx_freq(&mut self, _channel: u32, freq_hz: f64) -> Result<f64> {
        self.tx_freq_hz = freq_hz;
        Ok(freq_hz / 1e6)
    }

    fn set_rx_gain(&mut self, gain_db: f64) -> Result<()> {
        self.rx_gain_db = gain_db;
        Ok(())
    }

    fn set_tx_gain(&mut self, gain_db: f64) -> Result<()> {
        self.tx_gain_db = gain_db;
        Ok(())
    }

    fn rx_gain(&self) -> Result<f64> {
        Ok(self.rx_gain_db)
    }

    fn tx_gain(&self) -> Result<f64> {
        Ok(self.tx_gain_db)
    }

    fn current_sample_rate(&self) -> Option<u64> {
        (self.sample_rate > 0).then_some(self.sample_rate)
    }

    fn status_port(&self) -> Arc<dyn StatusPort> {
        Arc::clone(&self.status) as Arc<dyn StatusPort>
    }
}
