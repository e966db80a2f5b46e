//! Opaque engine handle.
//!
//! C code references an engine through `*mut RfxHandle`; the pointee is
//! never dereferenced on the C side. All operations go through the
//! function table in [`crate::api`].

use rfx_stream::Engine;

/// Opaque handle representing one engine instance.
///
/// Zero-sized so C code cannot reach into the Rust structures.
#[repr(C)]
pub struct RfxHandle {
    _private: [u8; 0],
}

/// Moves an engine onto the heap and leaks it as an opaque handle.
pub fn handle_from_engine(engine: Engine) -> *mut RfxHandle {
    Box::into_raw(Box::new(engine)) as *mut RfxHandle
}

/// Recovers the engine behind a handle.
///
/// # Safety
///
/// The caller must ensure:
/// - `handle` came from [`handle_from_engine`] and has not been closed.
/// - No other reference to the same handle exists concurrently.
#[inline]
pub unsafe fn engine_from_handle<'a>(handle: *mut RfxHandle) -> &'a mut Engine {
    unsafe { &mut *(handle as *mut Engine) }
}

/// Reclaims and drops the engine behind a handle.
///
/// # Safety
///
/// Same contract as [`engine_from_handle`]; the handle is dead after
/// this call.
pub unsafe fn drop_handle(handle: *mut RfxHandle) {
    drop(unsafe { Box::from_raw(handle as *mut Engine) });
}
