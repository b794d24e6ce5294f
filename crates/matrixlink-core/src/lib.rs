//! matrixlink core
//!
//! Shared types for talking to a tree-structured routing device.
//!
//! This crate provides:
//! - Dotted numeric tree paths ([`TreePath`])
//! - The element model ([`Element`], [`Contents`], [`MatrixContents`])
//! - Request/reply/notify envelopes ([`Message`])
//! - Envelope encoding ([`codec`])

pub mod codec;
pub mod error;
pub mod path;
pub mod protocol;
pub mod types;

pub use codec::{decode, encode};
pub use error::{Error, ErrorCode, Result};
pub use path::TreePath;
pub use protocol::{Message, ReplyBody};
pub use types::*;

/// Envelope format version
pub const PROTOCOL_VERSION: u8 = 1;

/// Magic byte leading every encoded envelope
pub const MAGIC_BYTE: u8 = 0x4D; // 'M'

/// Default device control port
pub const DEFAULT_PORT: u16 = 9000;
