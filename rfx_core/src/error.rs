//! Error types for the rfx_core crate.

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum CoreError {
    #[error("request of {requested} bytes exceeds ring capacity {capacity}")]
    RequestTooLarge { requested: usize, capacity: usize },

    #[error("timed out waiting for ring data")]
    TimedOut,

    #[error("cannot map register window: {0}")]
    MapFailed(String),
}
