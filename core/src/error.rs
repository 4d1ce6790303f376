use thiserror::Error;

use crate::client::ClientError;

#[derive(Error, Debug)]
pub enum DeskError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cannot read {path}: {source}")]
    Io {
        path:   String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed input for {field}: {reason}")]
    MalformedInput { field: &'static str, reason: String },

    #[error("No data for {subject}")]
    DataUnavailable { subject: String },

    #[error("Generative call failed: {0}")]
    Generative(#[from] ClientError),

    #[error("A generative request is already in flight, retry shortly")]
    Busy,

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DeskError {
    pub fn malformed(field: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedInput { field, reason: reason.into() }
    }
}

pub type DeskResult<T> = Result<T, DeskError>;
