//! # RFX DMA
//!
//! Fixed pools of sample-aligned DMA buffers behind one interface,
//! [`DmaPool`]. Three realizations:
//!
//! - [`chardev::CharDevPool`] - the kernel DMA proxy character device
//!   (ioctl + mmap), used on the integrated data-converter path
//! - [`streamfd::StreamFdPool`] - a single refill/push buffer over a
//!   streaming device fd, used on the industrial-I/O transceiver path
//! - [`loopback::LoopbackPool`] - an in-memory realization of the kernel
//!   queue discipline for tests and host-side simulation
//!
//! Pools synchronize internally so that an engine-side `disable()` can
//! cancel a streamer thread parked in a blocking acquire.

pub mod chardev;
pub mod error;
pub mod loopback;
pub mod pool;
pub mod streamfd;

pub use error::{DmaError, Result};
pub use pool::{BufferId, DmaPool};
