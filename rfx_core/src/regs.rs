//! Memory-mapped register windows.
//!
//! The FPGA exposes status and control registers as 32-bit words behind
//! `/dev/mem`. Reads and writes are volatile and lock-free; each word has
//! a single writer by contract, so no further synchronization is layered
//! on top. Tests map a plain file instead of physical memory.

use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr;

use crate::error::{CoreError, Result};

/// A window of `u32` registers mapped from a device offset.
#[derive(Debug)]
pub struct RegisterWindow {
    base: *mut u32,
    words: usize,
    map_len: usize,
}

// SAFETY: the mapping is shared device memory; access goes through
// volatile reads/writes and every word has one writer by contract.
unsafe impl Send for RegisterWindow {}
unsafe impl Sync for RegisterWindow {}

impl RegisterWindow {
    /// Maps `len_bytes` of `path` starting at `offset`.
    ///
    /// `offset` must be page-aligned; for real hardware `path` is
    /// `/dev/mem` and `offset` the physical base address.
    pub fn open(path: &Path, offset: u64, len_bytes: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(path)
            .map_err(|e| CoreError::MapFailed(format!("{}: {e}", path.display())))?;

        // SAFETY: len and fd are valid; a MAP_FAILED result is checked below.
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len_bytes,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                offset as libc::off_t,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(CoreError::MapFailed(
                std::io::Error::last_os_error().to_string(),
            ));
        }
        // The fd can close here; the mapping keeps the file referenced.
        Ok(Self {
            base: base as *mut u32,
            words: len_bytes / 4,
            map_len: len_bytes,
        })
    }

    /// Number of mapped 32-bit words.
    pub fn words(&self) -> usize {
        self.words
    }

    /// Volatile read of register `word`.
    pub fn read(&self, word: usize) -> u32 {
        assert!(word < self.words, "register {word} outside mapped window");
        // SAFETY: bounds asserted above; base is a live mapping.
        unsafe { ptr::read_volatile(self.base.add(word)) }
    }

    /// Volatile write of register `word`.
    pub fn write(&self, word: usize, value: u32) {
        assert!(word < self.words, "register {word} outside mapped window");
        // SAFETY: bounds asserted above; base is a live mapping.
        unsafe { ptr::write_volatile(self.base.add(word), value) }
    }
}

impl Drop for RegisterWindow {
    fn drop(&mut self) {
        // SAFETY: base/map_len came from a successful mmap.
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.map_len);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn backing_file(len: usize) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&vec![0u8; len]).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn test_write_read_back() {
        let f = backing_file(0x1000);
        let regs = RegisterWindow::open(f.path(), 0, 0x1000).unwrap();

        regs.write(4, 128);
        regs.write(263, 1);
        assert_eq!(regs.read(4), 128);
        assert_eq!(regs.read(263), 1);
        assert_eq!(regs.read(0), 0);
        assert_eq!(regs.words(), 0x400);
    }

    #[test]
    fn test_shared_mapping_persists_to_file() {
        let f = backing_file(0x1000);
        {
            let regs = RegisterWindow::open(f.path(), 0, 0x1000).unwrap();
            regs.write(2, 0xDEAD_BEEF);
        }
        let regs = RegisterWindow::open(f.path(), 0, 0x1000).unwrap();
        assert_eq!(regs.read(2), 0xDEAD_BEEF);
    }

    #[test]
    fn test_missing_path_is_an_error() {
        let err = RegisterWindow::open(Path::new("/nonexistent/regs"), 0, 0x1000).unwrap_err();
        assert!(matches!(err, CoreError::MapFailed(_)));
    }

    #[test]
    #[should_panic(expected = "outside mapped window")]
    fn test_out_of_range_read_panics() {
        let f = backing_file(0x100);
        let regs = RegisterWindow::open(f.path(), 0, 0x100).unwrap();
        regs.read(0x40);
    }
}
