//! # RFX Stream
//!
//! The timestamped streaming engine: moves complex baseband samples
//! between user code and an FPGA/RF-frontend device at hard real-time
//! rates, preserving a monotonic hardware timestamp across every
//! packet.
//!
//! An [`Engine`] owns one RX and one TX [`Streamer`]; each streamer
//! owns a thread, a byte ring and a DMA pool. The public operation set
//! (open, close, stream start/stop, rate/frequency/gain, timed send and
//! receive, error callback) matches the plugin contract exposed by
//! `rfx_plugin`.

pub mod args;
pub mod config;
pub mod engine;
pub mod error;
pub mod reporter;
pub mod streamer;
pub mod variant;

pub use args::Args;
pub use engine::{Engine, RxTime};
pub use error::{RadioError, Result};
pub use reporter::{ErrorEvent, ErrorHandler, ErrorReporter};
pub use streamer::{RealignPolicy, Streamer, StreamerConfig};
pub use variant::Profile;
