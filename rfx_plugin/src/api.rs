//! The device function table.
//!
//! Two tables exist, one per backend variant; they share every entry
//! except `name` and `open`. Entries translate C-style returns
//! (negative on error, 0 for a cancelled/empty result) from the
//! engine's `Result` values.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};

use log::error;
use rfx_stream::reporter::ErrorEvent;
use rfx_stream::{Engine, RadioError, variant};

use crate::handle::{RfxHandle, drop_handle, engine_from_handle, handle_from_engine};

/// Error classes surfaced through the C callback.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RfErrorKind {
    Late = 0,
    Underflow = 1,
    Overflow = 2,
    Other = 3,
}

/// Error record passed to the C callback. `opt` is 1 for RX-side late
/// events, 0 otherwise.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RfError {
    pub kind: RfErrorKind,
    pub opt: c_int,
}

impl From<ErrorEvent> for RfError {
    fn from(event: ErrorEvent) -> Self {
        match event {
            ErrorEvent::Late { rx } => Self {
                kind: RfErrorKind::Late,
                opt: rx as c_int,
            },
            ErrorEvent::Underflow => Self {
                kind: RfErrorKind::Underflow,
                opt: 0,
            },
            ErrorEvent::Overflow => Self {
                kind: RfErrorKind::Overflow,
                opt: 0,
            },
            ErrorEvent::Other => Self {
                kind: RfErrorKind::Other,
                opt: 0,
            },
        }
    }
}

/// User callback invoked with an opaque argument on streaming errors.
pub type RfErrorHandler = Option<unsafe extern "C" fn(arg: *mut c_void, error: RfError)>;

/// Plugin function table. The ABI boundary between the host and one
/// backend variant.
#[repr(C)]
pub struct RfDevice {
    pub name: *const c_char,
    pub devname: unsafe extern "C" fn(h: *mut RfxHandle) -> *const c_char,
    pub open: unsafe extern "C" fn(args: *const c_char, h: *mut *mut RfxHandle) -> c_int,
    pub close: unsafe extern "C" fn(h: *mut RfxHandle) -> c_int,
    pub start_rx_stream: unsafe extern "C" fn(h: *mut RfxHandle, now: bool) -> c_int,
    pub stop_rx_stream: unsafe extern "C" fn(h: *mut RfxHandle) -> c_int,
    pub start_tx_stream: unsafe extern "C" fn(h: *mut RfxHandle) -> c_int,
    pub stop_tx_stream: unsafe extern "C" fn(h: *mut RfxHandle) -> c_int,
    pub set_rx_srate: unsafe extern "C" fn(h: *mut RfxHandle, rate_hz: f64) -> f64,
    pub set_tx_srate: unsafe extern "C" fn(h: *mut RfxHandle, rate_hz: f64) -> f64,
    pub set_rx_gain: unsafe extern "C" fn(h: *mut RfxHandle, gain_db: f64) -> c_int,
    pub set_tx_gain: unsafe extern "C" fn(h: *mut RfxHandle, gain_db: f64) -> c_int,
    pub get_rx_gain: unsafe extern "C" fn(h: *mut RfxHandle) -> f64,
    pub get_tx_gain: unsafe extern "C" fn(h: *mut RfxHandle) -> f64,
    pub set_rx_freq: unsafe extern "C" fn(h: *mut RfxHandle, channel: u32, freq_hz: f64) -> f64,
    pub set_tx_freq: unsafe extern "C" fn(h: *mut RfxHandle, channel: u32, freq_hz: f64) -> f64,
    pub register_error_handler:
        unsafe extern "C" fn(h: *mut RfxHandle, handler: RfErrorHandler, arg: *mut c_void),
    pub recv_with_time: unsafe extern "C" fn(
        h: *mut RfxHandle,
        data: *mut f32,
        nsamples: u32,
        blocking: bool,
        secs: *mut i64,
        frac_secs: *mut f64,
    ) -> c_int,
    pub send_timed: unsafe extern "C" fn(
        h: *mut RfxHandle,
        data: *const f32,
        nsamples: c_int,
        secs: i64,
        frac_secs: f64,
        has_time_spec: bool,
        blocking: bool,
        is_start_of_burst: bool,
        is_end_of_burst: bool,
    ) -> c_int,
}

// SAFETY: every field is an immutable function pointer or a pointer to
// a static string literal.
unsafe impl Sync for RfDevice {}

fn ok_or_code(result: Result<(), RadioError>) -> c_int {
    match result {
        Ok(()) => 0,
        Err(e) => {
            error!("{e}");
            -1
        }
    }
}

fn open_with(
    args: *const c_char,
    out: *mut *mut RfxHandle,
    open: fn(&str) -> Result<Engine, RadioError>,
) -> c_int {
    if out.is_null() {
        return -1;
    }
    let args = if args.is_null() {
        ""
    } else {
        // SAFETY: non-null args is a NUL-terminated string per the ABI.
        match unsafe { CStr::from_ptr(args) }.to_str() {
            Ok(s) => s,
            Err(_) => return -1,
        }
    };
    match open(args) {
        Ok(engine) => {
            // SAFETY: out checked non-null above.
            unsafe { *out = handle_from_engine(engine) };
            0
        }
        Err(e) => {
            error!("open failed: {e}");
            -1
        }
    }
}

unsafe extern "C" fn open_iio(args: *const c_char, out: *mut *mut RfxHandle) -> c_int {
    open_with(args, out, variant::open_iio)
}

unsafe extern "C" fn open_rfdc(args: *const c_char, out: *mut *mut RfxHandle) -> c_int {
    open_with(args, out, |args| variant::open_rfdc(args, 1))
}

unsafe extern "C" fn devname(h: *mut RfxHandle) -> *const c_char {
    // SAFETY: handle contract of the table.
    match unsafe { engine_from_handle(h) }.devname() {
        "RFdc" => c"RFdc".as_ptr(),
        _ => c"iio".as_ptr(),
    }
}

unsafe extern "C" fn close(h: *mut RfxHandle) -> c_int {
    if h.is_null() {
        return 0;
    }
    // SAFETY: handle contract of the table; drop runs the engine's
    // clean shutdown.
    unsafe { drop_handle(h) };
    0
}

unsafe extern "C" fn start_rx_stream(h: *mut RfxHandle, now: bool) -> c_int {
    // SAFETY: handle contract of the table.
    ok_or_code(unsafe { engine_from_handle(h) }.start_rx_stream(now))
}

unsafe extern "C" fn stop_rx_stream(h: *mut RfxHandle) -> c_int {
    // SAFETY: handle contract of the table.
    ok_or_code(unsafe { engine_from_handle(h) }.stop_rx_stream())
}

unsafe extern "C" fn start_tx_stream(h: *mut RfxHandle) -> c_int {
    // SAFETY: handle contract of the table.
    ok_or_code(unsafe { engine_from_handle(h) }.start_tx_stream())
}

unsafe extern "C" fn stop_tx_stream(h: *mut RfxHandle) -> c_int {
    // SAFETY: handle contract of the table.
    ok_or_code(unsafe { engine_from_handle(h) }.stop_tx_stream())
}

unsafe extern "C" fn set_rx_srate(h: *mut RfxHandle, rate_hz: f64) -> f64 {
    // SAFETY: handle contract of the table.
    match unsafe { engine_from_handle(h) }.set_rx_srate(rate_hz as u64) {
        Ok(rate) => rate as f64,
        Err(e) => {
            error!("set_rx_srate: {e}");
            0.0
        }
    }
}

unsafe extern "C" fn set_tx_srate(h: *mut RfxHandle, rate_hz: f64) -> f64 {
    // SAFETY: handle contract of the table.
    match unsafe { engine_from_handle(h) }.set_tx_srate(rate_hz as u64) {
        Ok(rate) => rate as f64,
        Err(e) => {
            error!("set_tx_srate: {e}");
            0.0
        }
    }
}

unsafe extern "C" fn set_rx_gain(h: *mut RfxHandle, gain_db: f64) -> c_int {
    // SAFETY: handle contract of the table.
    ok_or_code(unsafe { engine_from_handle(h) }.set_rx_gain(gain_db))
}

unsafe extern "C" fn set_tx_gain(h: *mut RfxHandle, gain_db: f64) -> c_int {
    // SAFETY: handle contract of the table.
    ok_or_code(unsafe { engine_from_handle(h) }.set_tx_gain(gain_db))
}

unsafe extern "C" fn get_rx_gain(h: *mut RfxHandle) -> f64 {
    // SAFETY: handle contract of the table.
    unsafe { engine_from_handle(h) }.rx_gain()
}

unsafe extern "C" fn get_tx_gain(h: *mut RfxHandle) -> f64 {
    // SAFETY: handle contract of the table.
    unsafe { engine_from_handle(h) }.tx_gain()
}

unsafe extern "C" fn set_rx_freq(h: *mut RfxHandle, channel: u32, freq_hz: f64) -> f64 {
    // SAFETY: handle contract of the table.
    match unsafe { engine_from_handle(h) }.set_rx_freq(channel, freq_hz) {
        Ok(freq) => freq,
        Err(e) => {
            error!("set_rx_freq: {e}");
            -1.0
        }
    }
}

unsafe extern "C" fn set_tx_freq(h: *mut RfxHandle, channel: u32, freq_hz: f64) -> f64 {
    // SAFETY: handle contract of the table.
    match unsafe { engine_from_handle(h) }.set_tx_freq(channel, freq_hz) {
        Ok(freq) => freq,
        Err(e) => {
            error!("set_tx_freq: {e}");
            -1.0
        }
    }
}

/// Opaque callback argument smuggled across the thread boundary; the
/// contract that it stays valid belongs to the C caller.
struct CallbackArg(*mut c_void);

// SAFETY: the pointer is only ever handed back to the C callback.
unsafe impl Send for CallbackArg {}

unsafe extern "C" fn register_error_handler(
    h: *mut RfxHandle,
    handler: RfErrorHandler,
    arg: *mut c_void,
) {
    // SAFETY: handle contract of the table.
    let engine = unsafe { engine_from_handle(h) };
    let arg = CallbackArg(arg);
    engine.register_error_handler(Box::new(move |event| {
        let arg = &arg;
        if let Some(callback) = handler {
            // SAFETY: callback and arg validity are the C caller's
            // contract.
            unsafe { callback(arg.0, RfError::from(event)) };
        }
    }));
}

unsafe extern "C" fn recv_with_time(
    h: *mut RfxHandle,
    data: *mut f32,
    nsamples: u32,
    _blocking: bool,
    secs: *mut i64,
    frac_secs: *mut f64,
) -> c_int {
    if data.is_null() {
        return -1;
    }
    // SAFETY: data spans 2 * nsamples floats per the ABI.
    let buf = unsafe { std::slice::from_raw_parts_mut(data, 2 * nsamples as usize) };
    // SAFETY: handle contract of the table.
    match unsafe { engine_from_handle(h) }.recv_with_time(buf) {
        Ok((n, time)) => {
            // SAFETY: non-null out-pointers are writable per the ABI.
            unsafe {
                if !secs.is_null() {
                    *secs = time.secs as i64;
                }
                if !frac_secs.is_null() {
                    *frac_secs = time.frac_secs;
                }
            }
            n as c_int
        }
        Err(RadioError::InvalidHeader) => 0,
        Err(e) => {
            error!("recv_with_time: {e}");
            -1
        }
    }
}

unsafe extern "C" fn send_timed(
    h: *mut RfxHandle,
    data: *const f32,
    nsamples: c_int,
    secs: i64,
    frac_secs: f64,
    has_time_spec: bool,
    blocking: bool,
    is_start_of_burst: bool,
    is_end_of_burst: bool,
) -> c_int {
    if data.is_null() || nsamples < 0 {
        return -1;
    }
    // SAFETY: data spans 2 * nsamples floats per the ABI.
    let buf = unsafe { std::slice::from_raw_parts(data, 2 * nsamples as usize) };
    // SAFETY: handle contract of the table.
    let result = unsafe { engine_from_handle(h) }.send_timed(
        buf,
        secs.max(0) as u64,
        frac_secs,
        has_time_spec,
        blocking,
        is_start_of_burst,
        is_end_of_burst,
    );
    match result {
        Ok(n) => n as c_int,
        Err(e) => {
            error!("send_timed: {e}");
            -1
        }
    }
}

/// The transceiver-backed device table.
pub static DEV_IIO: RfDevice = RfDevice {
    name: c"iio".as_ptr(),
    devname,
    open: open_iio,
    close,
    start_rx_stream,
    stop_rx_stream,
    start_tx_stream,
    stop_tx_stream,
    set_rx_srate,
    set_tx_srate,
    set_rx_gain,
    set_tx_gain,
    get_rx_gain,
    get_tx_gain,
    set_rx_freq,
    set_tx_freq,
    register_error_handler,
    recv_with_time,
    send_timed,
};

/// The data-converter-backed device table. Identical to [`DEV_IIO`]
/// apart from its name and `open`.
pub static DEV_RFDC: RfDevice = RfDevice {
    name: c"RFdc".as_ptr(),
    devname,
    open: open_rfdc,
    close,
    start_rx_stream,
    stop_rx_stream,
    start_tx_stream,
    stop_tx_stream,
    set_rx_srate,
    set_tx_srate,
    set_rx_gain,
    set_tx_gain,
    get_rx_gain,
    get_tx_gain,
    set_rx_freq,
    set_tx_freq,
    register_error_handler,
    recv_with_time,
    send_timed,
};

/// Plugin entry point: returns the function table for `devname`.
///
/// # Safety
///
/// `devname` must be a NUL-terminated string and `api` a writable
/// pointer slot.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn register_plugin(
    devname: *const c_char,
    api: *mut *const RfDevice,
) -> c_int {
    if devname.is_null() || api.is_null() {
        return -1;
    }
    // SAFETY: checked non-null; NUL termination is the caller's
    // contract.
    let name = match unsafe { CStr::from_ptr(devname) }.to_str() {
        Ok(name) => name,
        Err(_) => return -1,
    };
    let device = match name {
        "iio" => &DEV_IIO,
        "RFdc" => &DEV_RFDC,
        _ => return -1,
    };
    // SAFETY: api checked non-null above.
    unsafe { *api = device };
    0
}
