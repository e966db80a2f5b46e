//! Error types for DMA buffer pools.

pub type Result<T> = std::result::Result<T, DmaError>;

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum DmaError {
    /// The pool was disabled while a transfer was outstanding. Expected
    /// during stop and reconfiguration; not a fault.
    #[error("transfer cancelled: pool disabled")]
    Cancelled,

    #[error("buffer pool is not allocated")]
    NotAllocated,

    #[error("invalid dma buffer id {0}")]
    InvalidBuffer(u32),

    #[error("dma device error: {0}")]
    Device(String),
}
