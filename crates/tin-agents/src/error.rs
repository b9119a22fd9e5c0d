//! Ingestion-layer errors.

use tin_core::TinError;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Core(#[from] TinError),

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("invalid event payload: {0}")]
    InvalidPayload(String),

    #[error("transcript error: {0}")]
    Transcript(String),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;
