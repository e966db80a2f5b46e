//! # RFX Wire
//!
//! Packet framing shared by the host and the FPGA:
//!
//! - [`PacketHeader`] - the in-ring record preceding every payload segment
//! - [`preamble`] - the six-word wire preamble, timestamp placement and
//!   the sync-recovery scan used after a misaligned DMA packet
//!
//! All multi-byte fields are little-endian on the wire.

pub mod header;
pub mod preamble;

pub use header::{HEADER_BYTES, HEADER_MAGIC, PacketHeader};
pub use preamble::{METADATA_WORDS, TxFraming, match_preamble, scan_preamble};
