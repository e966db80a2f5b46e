//! Streaming-fd pool for the industrial-I/O transceiver path.
//!
//! The transceiver backend exposes one streaming device per direction;
//! its kernel side owns a chain of DMA blocks while userspace sees a
//! single refill/push buffer. `acquire_rx` refills the whole buffer from
//! the device, `send_tx` pushes it back out. Cancellation mirrors the
//! backend's buffer-cancel: an eventfd is polled next to the device fd
//! so `disable()` can wake a parked refill from another thread.

use std::fs::File;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::ptr::NonNull;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;
use rfx_core::Direction;

use crate::error::{DmaError, Result};
use crate::pool::{BufferId, DmaPool};

/// The single user-visible buffer of a streaming fd.
const SOLE_BUFFER: BufferId = 0;

struct FdState {
    buf: Box<[u8]>,
    allocated: bool,
}

/// [`DmaPool`] over a streaming character device.
pub struct StreamFdPool {
    file: File,
    cancel_fd: RawFd,
    direction: Direction,
    /// Directory holding the backend's `length` / `enable` buffer
    /// controls, when the platform exposes them.
    control_dir: Option<PathBuf>,
    enabled: AtomicBool,
    state: Mutex<FdState>,
}

impl StreamFdPool {
    /// Wraps an already-open streaming device.
    pub fn from_device(file: File, direction: Direction, control_dir: Option<PathBuf>) -> Result<Self> {
        // The device must not block reads directly; readiness comes from
        // poll so the cancel fd can interrupt.
        // SAFETY: fcntl on an owned, valid fd.
        let ret = unsafe {
            libc::fcntl(
                file.as_raw_fd(),
                libc::F_SETFL,
                libc::O_RDWR | libc::O_NONBLOCK,
            )
        };
        if ret < 0 {
            return Err(DmaError::Device(std::io::Error::last_os_error().to_string()));
        }
        // SAFETY: plain eventfd creation; failure checked below.
        let cancel_fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK) };
        if cancel_fd < 0 {
            return Err(DmaError::Device(std::io::Error::last_os_error().to_string()));
        }
        Ok(Self {
            file,
            cancel_fd,
            direction,
            control_dir,
            enabled: AtomicBool::new(false),
            state: Mutex::new(FdState {
                buf: Box::new([]),
                allocated: false,
            }),
        })
    }

    /// Opens the streaming device at `path`.
    pub fn open(path: &std::path::Path, direction: Direction, control_dir: Option<PathBuf>) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| DmaError::Device(format!("{}: {e}", path.display())))?;
        Self::from_device(file, direction, control_dir)
    }

    fn write_control(&self, name: &str, value: &str) -> Result<()> {
        if let Some(dir) = &self.control_dir {
            std::fs::write(dir.join(name), value)
                .map_err(|e| DmaError::Device(format!("buffer control {name}: {e}")))?;
        }
        Ok(())
    }

    fn drain_cancel(&self) {
        let mut token = 0u64;
        // SAFETY: reading 8 bytes into a u64 from a non-blocking eventfd.
        unsafe {
            libc::read(
                self.cancel_fd,
                &mut token as *mut u64 as *mut libc::c_void,
                8,
            );
        }
    }

    /// Polls the device for `events` readiness, honouring cancellation.
    fn wait_ready(&self, events: libc::c_short) -> Result<()> {
        loop {
            if !self.enabled.load(Ordering::Acquire) {
                return Err(DmaError::Cancelled);
            }
            let mut fds = [
                libc::pollfd {
                    fd: self.file.as_raw_fd(),
                    events,
                    revents: 0,
                },
                libc::pollfd {
                    fd: self.cancel_fd,
                    events: libc::POLLIN,
                    revents: 0,
                },
            ];
            // SAFETY: fds is a valid array of two pollfds for the call.
            let ret = unsafe { libc::poll(fds.as_mut_ptr(), 2, 100) };
            if ret < 0 {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                return Err(DmaError::Device(err.to_string()));
            }
            if fds[1].revents != 0 {
                self.drain_cancel();
                return Err(DmaError::Cancelled);
            }
            if fds[0].revents & (events | libc::POLLHUP | libc::POLLERR) != 0 {
                return Ok(());
            }
        }
    }
}

impl DmaPool for StreamFdPool {
    fn allocate(&self, _nof_buffers: u32, buffer_samples: u32, sample_bytes: usize) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.buf = vec![0u8; buffer_samples as usize * sample_bytes].into_boxed_slice();
        state.allocated = true;
        self.write_control("length", &buffer_samples.to_string())?;
        debug!(
            "created {} byte {:?} stream buffer",
            state.buf.len(),
            self.direction
        );
        Ok(())
    }

    fn destroy(&self) -> Result<()> {
        let _ = self.disable();
        let mut state = self.state.lock().unwrap();
        state.buf = Box::new([]);
        state.allocated = false;
        Ok(())
    }

    fn enable(&self) -> Result<()> {
        if !self.state.lock().unwrap().allocated {
            return Err(DmaError::NotAllocated);
        }
        self.drain_cancel();
        self.write_control("enable", "1")?;
        self.enabled.store(true, Ordering::Release);
        Ok(())
    }

    fn disable(&self) -> Result<()> {
        self.enabled.store(false, Ordering::Release);
        let token = 1u64;
        // SAFETY: writing 8 bytes from a u64 to an eventfd.
        unsafe {
            libc::write(
                self.cancel_fd,
                &token as *const u64 as *const libc::c_void,
                8,
            );
        }
        self.write_control("enable", "0")?;
        Ok(())
    }

    fn acquire_rx(&self) -> Result<BufferId> {
        let mut state = self.state.lock().unwrap();
        if !state.allocated {
            return Err(DmaError::NotAllocated);
        }
        let total = state.buf.len();
        let mut filled = 0;
        while filled < total {
            self.wait_ready(libc::POLLIN)?;
            // SAFETY: reading into the owned buffer's remaining tail.
            let n = unsafe {
                libc::read(
                    self.file.as_raw_fd(),
                    state.buf[filled..].as_mut_ptr() as *mut libc::c_void,
                    total - filled,
                )
            };
            if n < 0 {
                let err = std::io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(libc::EAGAIN) | Some(libc::EINTR) => continue,
                    _ => return Err(DmaError::Device(err.to_string())),
                }
            }
            if n == 0 {
                return Err(DmaError::Device("stream device closed".into()));
            }
            filled += n as usize;
        }
        Ok(SOLE_BUFFER)
    }

    fn release_rx(&self, _id: BufferId) -> Result<()> {
        // The kernel side recycles its blocks on refill; nothing to do.
        Ok(())
    }

    fn acquire_tx(&self) -> Result<BufferId> {
        if !self.state.lock().unwrap().allocated {
            return Err(DmaError::NotAllocated);
        }
        Ok(SOLE_BUFFER)
    }

    fn send_tx(&self, _id: BufferId, _bytes: usize) -> Result<BufferId> {
        let state = self.state.lock().unwrap();
        if !state.allocated {
            return Err(DmaError::NotAllocated);
        }
        // A push always covers the full buffer; short bursts were
        // zero-padded by the writer.
        let total = state.buf.len();
        let mut sent = 0;
        while sent < total {
            self.wait_ready(libc::POLLOUT)?;
            // SAFETY: writing from the owned buffer's remaining tail.
            let n = unsafe {
                libc::write(
                    self.file.as_raw_fd(),
                    state.buf[sent..].as_ptr() as *const libc::c_void,
                    total - sent,
                )
            };
            if n < 0 {
                let err = std::io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(libc::EAGAIN) | Some(libc::EINTR) => continue,
                    _ => return Err(DmaError::Device(err.to_string())),
                }
            }
            sent += n as usize;
        }
        Ok(SOLE_BUFFER)
    }

    fn data_ptr(&self, id: BufferId) -> Result<NonNull<u8>> {
        if id != SOLE_BUFFER {
            return Err(DmaError::InvalidBuffer(id));
        }
        let mut state = self.state.lock().unwrap();
        if !state.allocated {
            return Err(DmaError::NotAllocated);
        }
        Ok(NonNull::new(state.buf.as_mut_ptr()).unwrap())
    }

    fn buffer_bytes(&self) -> usize {
        self.state.lock().unwrap().buf.len()
    }

    fn is_allocated(&self) -> bool {
        self.state.lock().unwrap().allocated
    }
}

impl Drop for StreamFdPool {
    fn drop(&mut self) {
        // SAFETY: cancel_fd came from eventfd in the constructor.
        unsafe {
            libc::close(self.cancel_fd);
        }
    }
}
