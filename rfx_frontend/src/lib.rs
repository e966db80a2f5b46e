//! # RFX Frontend
//!
//! Abstract RF frontend control consumed by the streaming engine:
//! sample-rate, frequency and gain programming plus the status registers
//! the engine watches while streaming (late, overflow, MMCM lock).
//!
//! Realizations:
//!
//! - [`rfdc::RfdcFrontend`] - integrated RF data converter behind a
//!   memory-mapped status window and a narrow [`tiles::TilePort`]
//!   collaborator for converter bring-up
//! - [`iio::IioFrontend`] - industrial-I/O transceiver driven through
//!   sysfs attributes
//! - [`sim::SimFrontend`] - in-memory frontend for tests

pub mod backend;
pub mod error;
pub mod iio;
pub mod rfdc;
pub mod sim;
pub mod tiles;

pub use backend::{ClockSource, Frontend, StatusPort, StatusRegister};
pub use error::{FrontendError, Result};
