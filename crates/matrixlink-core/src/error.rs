//! Error types for matrixlink core

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid magic byte in an envelope
    #[error("invalid magic byte: expected 0x4d, got 0x{0:02x}")]
    InvalidMagic(u8),

    /// Buffer shorter than the envelope header
    #[error("buffer too small: need {needed} bytes, have {have}")]
    BufferTooSmall { needed: usize, have: usize },

    /// MessagePack encoding error
    #[error("encode error: {0}")]
    EncodeError(String),

    /// MessagePack decoding error
    #[error("decode error: {0}")]
    DecodeError(String),

    /// Invalid path format
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Element contents did not have the expected kind
    #[error("unexpected element at {path}: expected {expected}")]
    UnexpectedElement { path: String, expected: &'static str },

    /// Generic protocol error
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::EncodeError(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::DecodeError(e.to_string())
    }
}

/// Error codes carried in error replies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // 100-199: Protocol errors
    InvalidMessage = 100,
    UnsupportedVersion = 101,

    // 200-299: Path errors
    InvalidPath = 200,
    PathNotFound = 201,
    NotAMatrix = 202,

    // 300-399: Command errors
    InvalidTarget = 300,
    InvalidSource = 301,
    CrosspointLocked = 302,

    // 500-599: Device errors
    InternalError = 500,
    Busy = 501,
}

impl ErrorCode {
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            100 => Some(ErrorCode::InvalidMessage),
            101 => Some(ErrorCode::UnsupportedVersion),
            200 => Some(ErrorCode::InvalidPath),
            201 => Some(ErrorCode::PathNotFound),
            202 => Some(ErrorCode::NotAMatrix),
            300 => Some(ErrorCode::InvalidTarget),
            301 => Some(ErrorCode::InvalidSource),
            302 => Some(ErrorCode::CrosspointLocked),
            500 => Some(ErrorCode::InternalError),
            501 => Some(ErrorCode::Busy),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_roundtrip_known_codes() {
        for code in [100u16, 101, 200, 201, 202, 300, 301, 302, 500, 501] {
            let parsed = ErrorCode::from_u16(code).expect("known code");
            assert_eq!(parsed as u16, code);
        }
    }

    #[test]
    fn test_error_code_unknown() {
        assert!(ErrorCode::from_u16(0).is_none());
        assert!(ErrorCode::from_u16(999).is_none());
    }
}
