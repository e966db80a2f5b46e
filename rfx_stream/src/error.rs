//! Error types for the streaming engine.

use rfx_core::CoreError;
use rfx_dma::DmaError;
use rfx_frontend::FrontendError;

pub type Result<T> = std::result::Result<T, RadioError>;

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum RadioError {
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The stream (or its ring) is stopped, typically because a
    /// reconfiguration is in flight. Retry after the stream restarts.
    #[error("stream is stopped")]
    StreamStopped,

    /// A ring yielded a record without the header magic; the ring was
    /// reset and the partial packet dropped.
    #[error("invalid packet header in ring")]
    InvalidHeader,

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Dma(#[from] DmaError),

    #[error(transparent)]
    Frontend(#[from] FrontendError),
}
