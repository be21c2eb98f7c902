use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("channel unavailable: {0}")]
    ChannelUnavailable(String),
    #[error("channel access timeout: {0}")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, HwError>;
