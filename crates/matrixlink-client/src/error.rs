//! Client error types

use matrixlink_core::ErrorCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("not connected")]
    NotConnected,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("timeout")]
    Timeout,

    /// The connection carrying the request went away before a reply arrived
    #[error("request cancelled by reconnect")]
    Cancelled,

    #[error("path not found: {0}")]
    PathNotFound(String),

    /// The device answered with an error reply
    #[error("rejected by device ({code}): {message}")]
    Rejected { code: u16, message: String },

    #[error("unexpected reply: expected {0}")]
    UnexpectedReply(&'static str),

    #[error("protocol error: {0}")]
    Protocol(#[from] matrixlink_core::Error),

    #[error("transport error: {0}")]
    Transport(#[from] matrixlink_transport::TransportError),

    #[error("client error: {0}")]
    Other(String),
}

impl ClientError {
    pub fn is_path_not_found(&self) -> bool {
        matches!(self, ClientError::PathNotFound(_))
    }

    /// Errors that mean the link itself is unusable
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectionFailed(_)
                | ClientError::NotConnected
                | ClientError::SendFailed(_)
                | ClientError::Cancelled
                | ClientError::Transport(_)
        )
    }

    pub(crate) fn from_reply(path: &str, code: u16, message: String) -> Self {
        match ErrorCode::from_u16(code) {
            Some(ErrorCode::PathNotFound) => ClientError::PathNotFound(path.to_string()),
            _ => ClientError::Rejected { code, message },
        }
    }
}
