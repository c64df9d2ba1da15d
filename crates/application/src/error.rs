use thiserror::Error;

use crate::transport::TransportError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConnectionError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("gave up reconnecting after {attempts} failed attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: TransportError,
    },
    #[error("failed to decode `{event}` payload: {message}")]
    Decode { event: String, message: String },
    #[error("failed to encode `{event}` payload: {message}")]
    Encode { event: String, message: String },
}

impl ConnectionError {
    pub fn decode(event: impl Into<String>, err: serde_json::Error) -> Self {
        ConnectionError::Decode {
            event: event.into(),
            message: err.to_string(),
        }
    }

    pub fn encode(event: impl Into<String>, err: serde_json::Error) -> Self {
        ConnectionError::Encode {
            event: event.into(),
            message: err.to_string(),
        }
    }

    /// 是否是会话级的终止错误（需要用户显式重连）
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionError::RetriesExhausted { .. })
    }
}
