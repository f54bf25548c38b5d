//! Error types for yochat.
//!
//! Every failure the ask pipeline can hit maps to one variant here. Config,
//! attachment, backend and timeout errors end the invocation; clipboard errors
//! are reported inline and never abort a finished answer.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("could not determine config directory")]
    ConfigDir,

    #[error("failed to read config file {}: {source}", .path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write config file {}: {source}", .path.display())]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", .path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize config: {0}")]
    ConfigSerialize(#[source] serde_json::Error),

    #[error("API key not set. Run `chat set <api-key>` (get one at https://aistudio.google.com)")]
    MissingApiKey,

    #[error("failed to read file {}: {source}", .path.display())]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Backend(String),

    #[error("request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("clipboard unavailable: {0}")]
    Clipboard(String),

    #[error("failed to write output: {0}")]
    Output(#[source] std::io::Error),
}

impl Error {
    /// Build a backend error from anything displayable.
    pub fn backend(message: impl std::fmt::Display) -> Self {
        Error::Backend(message.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Backend(format!("request to generation API timed out: {}", err))
        } else {
            Error::Backend(format!("failed to reach generation API: {}", err))
        }
    }
}
