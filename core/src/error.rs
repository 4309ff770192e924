use thiserror::Error;

#[derive(Debug, Error)]
pub enum SofiError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no default {0} device")]
    NoDevice(&'static str),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("worker thread error: {0}")]
    Worker(String),

    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("packet checksum mismatch")]
    ChecksumMismatch,
}

pub type Result<T> = std::result::Result<T, SofiError>;
