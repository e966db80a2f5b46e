//! The frontend capability consumed by the streaming engine.

use std::sync::Arc;

use crate::error::Result;

/// Reference clock selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockSource {
    #[default]
    Internal,
    External,
}

/// Logical status registers the engine observes while streaming.
///
/// Each realization maps these onto its own register window; a register
/// a device does not provide reads as 0 (or as locked, for
/// [`MmcmLock`](StatusRegister::MmcmLock) on devices without a
/// reconfigurable baseband clock).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusRegister {
    /// Non-zero when a TX packet arrived past its deadline.
    Late,
    /// Non-zero when the RX path overran.
    Overflow,
    /// Non-zero once the baseband clock has stabilized.
    MmcmLock,
    /// Number of RX DMA channels provisioned in the FPGA image.
    RxChannels,
}

/// Lock-free read access to device status, shared with streamer threads.
///
/// Reads are volatile against device memory; each register has a single
/// observer by contract, so no locking is layered on top.
pub trait StatusPort: Send + Sync {
    fn status(&self, reg: StatusRegister) -> u32;
}

/// Control surface of an RF frontend.
///
/// Only the engine thread mutates the frontend; streamer threads observe
/// it exclusively through the shared [`StatusPort`].
pub trait Frontend: Send {
    /// Applies `rate_hz` to both directions. Returns the accepted rate.
    fn set_sample_rate(&mut self, rate_hz: u64) -> Result<u64>;

    /// Tunes the RX path of `channel` to `freq_hz`. Returns the applied
    /// mixer (NCO) frequency in MHz.
    fn set_rx_freq(&mut self, channel: u32, freq_hz: f64) -> Result<f64>;

    /// Tunes the TX path to `freq_hz`. Returns the applied mixer (NCO)
    /// frequency in MHz.
    fn set_tx_freq(&mut self, channel: u32, freq_hz: f64) -> Result<f64>;

    fn set_rx_gain(&mut self, gain_db: f64) -> Result<()>;

    fn set_tx_gain(&mut self, gain_db: f64) -> Result<()>;

    fn rx_gain(&self) -> Result<f64>;

    fn tx_gain(&self) -> Result<f64>;

    /// The rate currently programmed, if one has been applied or can be
    /// read back from the device.
    fn current_sample_rate(&self) -> Option<u64>;

    /// Shared status reader handed to streamer threads.
    fn status_port(&self) -> Arc<dyn StatusPort>;
}
