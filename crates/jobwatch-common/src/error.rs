use thiserror::Error;

/// Failure of a pull-fetch against the status or entity query.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    ExpectedAbsence,
    Transport,
    Unexpected,
}

impl SourceError {
    pub fn kind(&self) -> SourceErrorKind {
        match self {
            Self::NotFound(_) => SourceErrorKind::ExpectedAbsence,
            Self::Transport(_) => SourceErrorKind::Transport,
            Self::Unexpected(_) => SourceErrorKind::Unexpected,
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("failed to open channel {channel}: {reason}")]
    ChannelOpen { channel: String, reason: String },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
