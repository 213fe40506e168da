use thiserror::Error;

use crate::channel::ChannelError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported media kind: {0}")]
    UnsupportedKind(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Caller bug, such as binding both a producer and a consumer to one transceiver
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

impl Error {
    /// `UnsupportedKind` is reported as an invalid argument by callers that only
    /// distinguish the coarse taxonomy
    #[must_use]
    pub const fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_) | Self::UnsupportedKind(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
