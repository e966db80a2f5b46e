//! Kernel DMA proxy character-device pool.
//!
//! The integrated data-converter path exposes one character device per
//! direction (`/dev/srs_rx_dma`, `/dev/srs_tx_dma`). The driver owns the
//! descriptor queues; this side allocates the buffer pool, maps each
//! buffer at `mmap(id << PAGE_SHIFT)` and exchanges buffer ids through
//! ioctls. The RX path additionally drives the timestamp-enabler /
//! packetizer register bank that tells the FPGA where packet boundaries
//! fall.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use nix::errno::Errno;
use rfx_core::{Direction, RegisterWindow};

use crate::error::{DmaError, Result};
use crate::pool::{BufferId, DmaPool};

/// mmap offsets encode the buffer id in units of one page.
pub const PAGE_SHIFT: u32 = 12;

const DMA_IOC_MAGIC: u8 = b'V';

/// Pool allocation request, shared with the kernel driver.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct AllocRequest {
    num_of_buffers: u32,
    buffer_size: u32,
}

/// Buffer handle exchanged with the kernel driver.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct BufPointer {
    id: u32,
    tx_size: u32,
}

nix::ioctl_write_ptr!(dma_alloc_buffers, DMA_IOC_MAGIC, 0, AllocRequest);
nix::ioctl_none!(dma_destroy_buffers, DMA_IOC_MAGIC, 1);
nix::ioctl_read!(dma_get_rx_buffer, DMA_IOC_MAGIC, 2, BufPointer);
nix::ioctl_write_ptr!(dma_put_rx_buffer, DMA_IOC_MAGIC, 3, BufPointer);
nix::ioctl_read!(dma_get_tx_buffer, DMA_IOC_MAGIC, 4, BufPointer);
nix::ioctl_readwrite!(dma_send_tx_buffer, DMA_IOC_MAGIC, 5, BufPointer);
nix::ioctl_none!(dma_enable_queue, DMA_IOC_MAGIC, 6);
nix::ioctl_none!(dma_disable_queue, DMA_IOC_MAGIC, 7);

fn ioctl_err(op: &str, errno: Errno) -> DmaError {
    // The driver wakes blocked waiters with EFAULT when the queue is
    // disabled under them.
    if errno == Errno::EFAULT {
        DmaError::Cancelled
    } else {
        DmaError::Device(format!("{op}: {errno}"))
    }
}

/// Register bank of the RX timestamp-enabler / packetizer block.
///
/// Word 0 holds the packet boundary in samples, word 1 arms the
/// packetizer, word 2 pulses the RX FIFO reset. The reset may only be
/// written once word 1 reads back 0 after a disarm.
#[derive(Debug)]
pub struct Packetizer {
    regs: RegisterWindow,
}

impl Packetizer {
    pub const BASE_ADDR: u64 = 0xA005_0000;
    pub const WINDOW_LEN: usize = 0x1000;

    const REG_PACKET_SAMPLES: usize = 0;
    const REG_ARM: usize = 1;
    const REG_FIFO_RESET: usize = 2;

    pub fn new(regs: RegisterWindow) -> Self {
        Self { regs }
    }

    /// Maps the packetizer window from `path` (normally `/dev/mem`).
    pub fn open(path: &Path) -> Result<Self> {
        let regs = RegisterWindow::open(path, Self::BASE_ADDR, Self::WINDOW_LEN)
            .map_err(|e| DmaError::Device(e.to_string()))?;
        Ok(Self { regs })
    }

    /// Programs the packet boundary and enables timestamp insertion.
    pub fn arm(&self, packet_samples: u32) {
        self.regs.write(Self::REG_PACKET_SAMPLES, packet_samples);
        self.regs.write(Self::REG_ARM, 1);
    }

    pub fn disarm(&self) {
        self.regs.write(Self::REG_ARM, 0);
    }

    /// Waits for the packetizing logic to stop, then pulses the RX FIFO
    /// reset.
    pub fn quiesce_and_reset(&self) {
        while self.regs.read(Self::REG_ARM) != 0 {
            thread::sleep(Duration::from_micros(100));
        }
        self.regs.write(Self::REG_FIFO_RESET, 1);
    }
}

#[derive(Debug)]
struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is plain DMA-coherent memory; ownership of each
// buffer is handed around by id through the pool discipline.
unsafe impl Send for Mapping {}

#[derive(Debug)]
struct PoolState {
    maps: Vec<Mapping>,
    buffer_bytes: usize,
    buffer_samples: u32,
    allocated: bool,
    enabled: bool,
}

/// [`DmaPool`] over the kernel DMA proxy character device.
#[derive(Debug)]
pub struct CharDevPool {
    file: File,
    direction: Direction,
    packetizer: Option<Packetizer>,
    state: Mutex<PoolState>,
}

impl CharDevPool {
    /// Opens the DMA device at `path`. RX pools must bring the
    /// packetizer bank; TX pools must not.
    pub fn open(path: &Path, direction: Direction, packetizer: Option<Packetizer>) -> Result<Self> {
        debug_assert_eq!(packetizer.is_some(), direction == Direction::Rx);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| DmaError::Device(format!("{}: {e}", path.display())))?;
        Ok(Self {
            file,
            direction,
            packetizer,
            state: Mutex::new(PoolState {
                maps: Vec::new(),
                buffer_bytes: 0,
                buffer_samples: 0,
                allocated: false,
                enabled: false,
            }),
        })
    }

    fn destroy_locked(&self, state: &mut PoolState) -> Result<()> {
        if !state.allocated {
            return Ok(());
        }
        for map in state.maps.drain(..) {
            // SAFETY: each mapping came from a successful mmap of len bytes.
            unsafe {
                libc::munmap(map.ptr.as_ptr() as *mut libc::c_void, map.len);
            }
        }
        // SAFETY: fd belongs to the DMA device opened by this pool.
        if let Err(e) = unsafe { dma_destroy_buffers(self.file.as_raw_fd()) } {
            warn!("destroy buffers ioctl failed: {e}");
        }
        state.buffer_bytes = 0;
        state.buffer_samples = 0;
        state.allocated = false;
        state.enabled = false;
        Ok(())
    }
}

impl DmaPool for CharDevPool {
    fn allocate(&self, nof_buffers: u32, buffer_samples: u32, sample_bytes: usize) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        self.destroy_locked(&mut state)?;

        let buffer_bytes = buffer_samples as usize * sample_bytes;
        let request = AllocRequest {
            num_of_buffers: nof_buffers,
            buffer_size: buffer_bytes as u32,
        };
        // SAFETY: request outlives the call; fd is the DMA device.
        unsafe { dma_alloc_buffers(self.file.as_raw_fd(), &request) }
            .map_err(|e| ioctl_err("alloc buffers", e))?;

        for id in 0..nof_buffers {
            // SAFETY: offset selects buffer `id` per the driver's mmap
            // contract; MAP_FAILED is checked below.
            let base = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    buffer_bytes,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    self.file.as_raw_fd(),
                    ((id as u64) << PAGE_SHIFT) as libc::off_t,
                )
            };
            if base == libc::MAP_FAILED {
                let err = std::io::Error::last_os_error();
                for map in state.maps.drain(..) {
                    // SAFETY: successfully mapped above.
                    unsafe {
                        libc::munmap(map.ptr.as_ptr() as *mut libc::c_void, map.len);
                    }
                }
                // SAFETY: fd is the DMA device.
                let _ = unsafe { dma_destroy_buffers(self.file.as_raw_fd()) };
                return Err(DmaError::Device(format!("mmap buffer {id}: {err}")));
            }
            state.maps.push(Mapping {
                ptr: NonNull::new(base as *mut u8).unwrap(),
                len: buffer_bytes,
            });
        }
        state.buffer_bytes = buffer_bytes;
        state.buffer_samples = buffer_samples;
        state.allocated = true;
        debug!(
            "allocated {nof_buffers} x {buffer_bytes} byte {:?} dma buffers",
            self.direction
        );
        Ok(())
    }

    fn destroy(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        self.destroy_locked(&mut state)
    }

    fn enable(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.allocated {
            return Err(DmaError::NotAllocated);
        }
        // SAFETY: fd is the DMA device.
        unsafe { dma_enable_queue(self.file.as_raw_fd()) }
            .map_err(|e| ioctl_err("enable queue", e))?;
        if let Some(packetizer) = &self.packetizer {
            packetizer.arm(state.buffer_samples);
        }
        state.enabled = true;
        Ok(())
    }

    fn disable(&self) -> Result<()> {
        {
            let state = self.state.lock().unwrap();
            if !state.enabled {
                return Ok(());
            }
        }
        if let Some(packetizer) = &self.packetizer {
            packetizer.disarm();
        }
        // SAFETY: fd is the DMA device.
        unsafe { dma_disable_queue(self.file.as_raw_fd()) }
            .map_err(|e| ioctl_err("disable queue", e))?;
        if let Some(packetizer) = &self.packetizer {
            debug!("resetting RX FIFO");
            packetizer.quiesce_and_reset();
        }
        self.state.lock().unwrap().enabled = false;
        Ok(())
    }

    fn acquire_rx(&self) -> Result<BufferId> {
        let mut arg = BufPointer::default();
        // SAFETY: arg outlives the call; fd is the DMA device. Blocks in
        // the driver until a completed buffer exists or the queue is
        // disabled.
        unsafe { dma_get_rx_buffer(self.file.as_raw_fd(), &mut arg) }
            .map_err(|e| ioctl_err("get rx buffer", e))?;
        Ok(arg.id)
    }

    fn release_rx(&self, id: BufferId) -> Result<()> {
        let arg = BufPointer { id, tx_size: 0 };
        // SAFETY: arg outlives the call; fd is the DMA device.
        unsafe { dma_put_rx_buffer(self.file.as_raw_fd(), &arg) }
            .map_err(|e| ioctl_err("put rx buffer", e))?;
        Ok(())
    }

    fn acquire_tx(&self) -> Result<BufferId> {
        let mut arg = BufPointer::default();
        // SAFETY: arg outlives the call; fd is the DMA device.
        unsafe { dma_get_tx_buffer(self.file.as_raw_fd(), &mut arg) }
            .map_err(|e| ioctl_err("get tx buffer", e))?;
        Ok(arg.id)
    }

    fn send_tx(&self, id: BufferId, bytes: usize) -> Result<BufferId> {
        let mut arg = BufPointer {
            id,
            tx_size: bytes as u32,
        };
        // SAFETY: arg outlives the call; fd is the DMA device. The
        // driver submits the buffer and rewrites arg with the next free
        // buffer's id.
        unsafe { dma_send_tx_buffer(self.file.as_raw_fd(), &mut arg) }
            .map_err(|e| ioctl_err("send tx buffer", e))?;
        Ok(arg.id)
    }

    fn data_ptr(&self, id: BufferId) -> Result<NonNull<u8>> {
        let state = self.state.lock().unwrap();
        state
            .maps
            .get(id as usize)
            .map(|m| m.ptr)
            .ok_or(DmaError::InvalidBuffer(id))
    }

    fn buffer_bytes(&self) -> usize {
        self.state.lock().unwrap().buffer_bytes
    }

    fn is_allocated(&self) -> bool {
        self.state.lock().unwrap().allocated
    }
}

impl Drop for CharDevPool {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap();
        let _ = self.destroy_locked(&mut state);
    }
}
