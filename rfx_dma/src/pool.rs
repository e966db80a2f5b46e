//! The DMA buffer pool capability.

use std::ptr::NonNull;

use crate::error::Result;

/// Identifier of one buffer inside a pool. Stable from allocation until
/// the pool is destroyed.
pub type BufferId = u32;

/// A fixed pool of DMA-visible sample buffers.
///
/// All methods take `&self`: pools synchronize internally so the engine
/// can `disable()` from one thread while a streamer thread is parked in
/// a blocking acquire. Cancellation surfaces as
/// [`DmaError::Cancelled`](crate::DmaError::Cancelled) and is the normal
/// stop path, not a fault.
///
/// Buffer ownership follows the acquire/release discipline: an id
/// returned by `acquire_rx`/`acquire_tx` belongs to the caller until it
/// is released or sent, and only the owner may touch that buffer's
/// memory through [`data_ptr`](Self::data_ptr).
pub trait DmaPool: Send + Sync {
    /// Obtains `nof_buffers` DMA-coherent buffers of
    /// `buffer_samples * sample_bytes` bytes each and maps them into the
    /// caller's address space.
    fn allocate(&self, nof_buffers: u32, buffer_samples: u32, sample_bytes: usize) -> Result<()>;

    /// Releases every buffer and disables the queue. Idempotent.
    fn destroy(&self) -> Result<()>;

    /// Starts the queue. For RX this submits every buffer to the device
    /// and arms the hardware packetizer; for TX it marks the pool active.
    fn enable(&self) -> Result<()>;

    /// Cancels in-flight transactions and quiesces the device. Any
    /// blocked acquire observes cancellation.
    fn disable(&self) -> Result<()>;

    /// Blocks until a completed RX buffer is available and transfers its
    /// ownership to the caller.
    fn acquire_rx(&self) -> Result<BufferId>;

    /// Returns an RX buffer to the device for refill.
    fn release_rx(&self, id: BufferId) -> Result<()>;

    /// Blocks until a free TX buffer is available.
    fn acquire_tx(&self) -> Result<BufferId>;

    /// Submits a filled TX buffer (`bytes` of it) and returns the next
    /// free buffer's id.
    fn send_tx(&self, id: BufferId, bytes: usize) -> Result<BufferId>;

    /// Direct pointer to the DMA-visible memory of buffer `id`.
    ///
    /// The pointer stays valid until [`destroy`](Self::destroy). Callers
    /// must only dereference it while they own `id`.
    fn data_ptr(&self, id: BufferId) -> Result<NonNull<u8>>;

    /// Size of each buffer in bytes; 0 while unallocated.
    fn buffer_bytes(&self) -> usize;

    fn is_allocated(&self) -> bool;
}
