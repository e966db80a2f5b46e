//! Bounded blocking byte ring.
//!
//! Hands framed sample packets from a streamer thread to user code (RX)
//! or from user code to a streamer thread (TX). One producer and one
//! consumer; both sides block on internal condition variables when the
//! ring is full or empty, and both are woken with a zero-length result
//! when the ring is stopped. Stopping is how the engine cancels a peer
//! that is parked mid-transfer, so a zero return is not an error.

#[cfg(not(loom))]
use std::time::{Duration, Instant};

#[cfg(not(loom))]
use std::sync::{Condvar, Mutex};

#[cfg(loom)]
use loom::sync::{Condvar, Mutex};

use crate::error::{CoreError, Result};

struct State {
    buf: Box<[u8]>,
    /// Next write index.
    head: usize,
    /// Bytes currently stored.
    count: usize,
    running: bool,
}

impl State {
    fn push(&mut self, data: &[u8]) -> usize {
        let cap = self.buf.len();
        let n = (cap - self.count).min(data.len());
        let first = n.min(cap - self.head);
        self.buf[self.head..self.head + first].copy_from_slice(&data[..first]);
        self.buf[..n - first].copy_from_slice(&data[first..n]);
        self.head = (self.head + n) % cap;
        self.count += n;
        n
    }

    /// Caller guarantees `count >= out.len()`.
    fn pop(&mut self, out: &mut [u8]) {
        let cap = self.buf.len();
        let n = out.len();
        let tail = (self.head + cap - self.count) % cap;
        let first = n.min(cap - tail);
        out[..first].copy_from_slice(&self.buf[tail..tail + first]);
        out[first..].copy_from_slice(&self.buf[..n - first]);
        self.count -= n;
    }
}

/// A fixed-capacity byte FIFO with blocking reads and writes.
///
/// # Examples
///
/// ```
/// use rfx_core::Ring;
///
/// let ring = Ring::new(16);
/// ring.write(&[1, 2, 3]).unwrap();
///
/// let mut out = [0u8; 3];
/// assert_eq!(ring.read(&mut out).unwrap(), 3);
/// assert_eq!(out, [1, 2, 3]);
/// ```
pub struct Ring {
    state: Mutex<State>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl Ring {
    /// Creates a ring holding up to `capacity` bytes, armed for use.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        Self {
            state: Mutex::new(State {
                buf: vec![0u8; capacity].into_boxed_slice(),
                head: 0,
                count: 0,
                running: true,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Appends all of `data`, blocking while the ring is full.
    ///
    /// Returns the number of bytes written. A short count (including 0)
    /// means the ring was stopped mid-write; anything already appended
    /// stays readable.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        let mut st = self.state.lock().unwrap();
        let mut written = 0;
        while written < data.len() {
            if !st.running {
                return Ok(written);
            }
            if st.count == st.buf.len() {
                st = self.not_full.wait(st).unwrap();
                continue;
            }
            written += st.push(&data[written..]);
            self.not_empty.notify_one();
        }
        Ok(written)
    }

    /// The no-drop write used by send paths.
    ///
    /// Identical semantics to [`write`](Self::write); kept as a distinct
    /// entry point so call sites state which contract they rely on.
    pub fn write_block(&self, data: &[u8]) -> Result<usize> {
        self.write(data)
    }

    /// Reads exactly `out.len()` bytes, blocking until they are available.
    ///
    /// Returns `Ok(0)` if the ring is stopped before enough bytes arrive.
    pub fn read(&self, out: &mut [u8]) -> Result<usize> {
        let mut st = self.state.lock().unwrap();
        if out.len() > st.buf.len() {
            return Err(CoreError::RequestTooLarge {
                requested: out.len(),
                capacity: st.buf.len(),
            });
        }
        loop {
            if !st.running {
                return Ok(0);
            }
            if st.count >= out.len() {
                break;
            }
            st = self.not_empty.wait(st).unwrap();
        }
        st.pop(out);
        self.not_full.notify_one();
        Ok(out.len())
    }

    /// Like [`read`](Self::read), but gives up after `timeout`.
    #[cfg(not(loom))]
    pub fn read_timed(&self, out: &mut [u8], timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        let mut st = self.state.lock().unwrap();
        if out.len() > st.buf.len() {
            return Err(CoreError::RequestTooLarge {
                requested: out.len(),
                capacity: st.buf.len(),
            });
        }
        loop {
            if !st.running {
                return Ok(0);
            }
            if st.count >= out.len() {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(CoreError::TimedOut);
            }
            let (guard, _) = self.not_empty.wait_timeout(st, deadline - now).unwrap();
            st = guard;
        }
        st.pop(out);
        self.not_full.notify_one();
        Ok(out.len())
    }

    /// Discards all stored bytes. Waiters are not woken; use
    /// [`stop`](Self::stop) first when a peer may be parked.
    pub fn reset(&self) {
        let mut st = self.state.lock().unwrap();
        st.head = 0;
        st.count = 0;
    }

    /// Stops the ring, waking any blocked reader or writer with a
    /// zero-length result.
    pub fn stop(&self) {
        let mut st = self.state.lock().unwrap();
        st.running = false;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Re-arms the ring after [`stop`](Self::stop).
    pub fn start(&self) {
        let mut st = self.state.lock().unwrap();
        st.running = true;
    }

    /// Bytes currently buffered. Stale by the time it is used.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().unwrap().buf.len()
    }
}


#[cfg(loom)]
mod loom_tests {
    use loom::sync::Arc;
    use loom::thread;

    use super::*;

    #[test]
    fn loom_producer_consumer() {
        loom::model(|| {
            let ring = Arc::new(Ring::new(4));
            let producer = Arc::clone(&ring);

            let handle = thread::spawn(move || {
                producer.write(&[1, 2, 3, 4, 5, 6]).unwrap();
            });

            let mut out = [0u8; 3];
            assert_eq!(ring.read(&mut out).unwrap(), 3);
            assert_eq!(out, [1, 2, 3]);
            assert_eq!(ring.read(&mut out).unwrap(), 3);
            assert_eq!(out, [4, 5, 6]);
            handle.join().unwrap();
        });
    }

    #[test]
    fn loom_stop_unblocks_reader() {
        loom::model(|| {
            let ring = Arc::new(Ring::new(4));
            let stopper = Arc::clone(&ring);

            let handle = thread::spawn(move || {
                stopper.stop();
            });

            let mut out = [0u8; 2];
            assert_eq!(ring.read(&mut out).unwrap(), 0);
            handle.join().unwrap();
        });
    }
}
