//! Error types for frontend control.

pub type Result<T> = std::result::Result<T, FrontendError>;

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum FrontendError {
    #[error("sample rate {0} Hz is not supported")]
    UnsupportedRate(u64),

    #[error("requested {requested} rx channels but the device provisions {provisioned}")]
    ChannelMismatch { requested: u32, provisioned: u32 },

    #[error("no enabled channel for the requested operation")]
    NoEnabledChannel,

    #[error("backend error: {0}")]
    Backend(String),
}
