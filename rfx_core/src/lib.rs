//! # RFX Core
//!
//! Core mechanisms and utilities shared by the RFX radio workspace:
//! the blocking byte ring used to hand sample packets between streamer
//! threads and user code, q15 sample conversion, hardware-tick time
//! mapping and memory-mapped register windows.

pub mod convert;
pub mod error;
pub mod regs;
pub mod ring;
pub mod time;

pub use error::{CoreError, Result};
pub use regs::RegisterWindow;
pub use ring::Ring;

/// Direction of a sample stream relative to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Device to host (ADC path).
    Rx,
    /// Host to device (DAC path).
    Tx,
}
