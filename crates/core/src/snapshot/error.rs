use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type SnapshotResult<T> = std::result::Result<T, SnapshotError>;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to open {path:?}: {source}")]
    ChannelOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("participant '{participant}' failed: {message}")]
    Hook {
        participant: String,
        message: String,
    },

    #[error("state encoding failed: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("participant name '{0}' is already registered")]
    DuplicateName(String),

    #[error("invalid participant name '{0}'")]
    InvalidName(String),

    #[error("snapshot coordinator no longer exists")]
    CoordinatorGone,

    #[error("participant '{0}' was dropped while still registered")]
    ParticipantDropped(String),
}

impl SnapshotError {
    pub fn hook(participant: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Hook {
            participant: participant.into(),
            message: message.into(),
        }
    }
}
