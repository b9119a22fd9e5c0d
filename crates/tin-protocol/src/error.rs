//! Protocol-layer errors and wire error codes.

use serde::{Deserialize, Serialize};
use tin_core::TinError;

/// Error codes carried in `error` frames.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrCode {
    NotFound,
    InvalidRequest,
    NotFastForward,
    Internal,
    ProtocolVersion,
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Core(#[from] TinError),

    /// An `error` frame received from the peer.
    #[error("remote error ({code:?}): {message}")]
    Remote { code: ErrCode, message: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unsupported protocol version {0}")]
    Version(u32),

    #[error("unexpected {got} frame (expected {expected})")]
    Unexpected { expected: &'static str, got: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection closed")]
    Closed,

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// The wire code this error maps to when sent to a peer.
    pub fn wire_code(&self) -> ErrCode {
        match self {
            ProtocolError::Core(TinError::NotFound { .. })
            | ProtocolError::Core(TinError::NotARepository(_)) => ErrCode::NotFound,
            ProtocolError::Core(TinError::NotFastForward { .. }) => ErrCode::NotFastForward,
            ProtocolError::InvalidRequest(_) | ProtocolError::Unexpected { .. } => {
                ErrCode::InvalidRequest
            }
            ProtocolError::Version(_) => ErrCode::ProtocolVersion,
            ProtocolError::Remote { code, .. } => *code,
            _ => ErrCode::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn err_codes_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&ErrCode::NotFastForward).unwrap(),
            "\"not_fast_forward\""
        );
        assert_eq!(
            serde_json::from_str::<ErrCode>("\"protocol_version\"").unwrap(),
            ErrCode::ProtocolVersion
        );
    }

    #[test]
    fn wire_code_mapping() {
        let err = ProtocolError::Core(TinError::not_found("commit", "abc"));
        assert_eq!(err.wire_code(), ErrCode::NotFound);
        let err = ProtocolError::Core(TinError::NotFastForward {
            branch: "main".into(),
        });
        assert_eq!(err.wire_code(), ErrCode::NotFastForward);
        let err = ProtocolError::Version(9);
        assert_eq!(err.wire_code(), ErrCode::ProtocolVersion);
    }
}
