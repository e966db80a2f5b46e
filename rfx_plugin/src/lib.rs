//! # RFX Plugin
//!
//! C ABI surface for the RFX streaming engine. A host loads this
//! library, calls [`register_plugin`] with a device name (`"iio"` or
//! `"RFdc"`) and receives a function table whose entries wrap the
//! engine operations behind an opaque handle.
//!
//! Exactly one table is handed out per name; every handle produced by
//! its `open` belongs to one engine instance and must be returned
//! through `close`.

pub mod api;
pub mod handle;

pub use api::{DEV_IIO, DEV_RFDC, RfDevice, RfError, RfErrorHandler, RfErrorKind, register_plugin};
pub use handle::RfxHandle;
