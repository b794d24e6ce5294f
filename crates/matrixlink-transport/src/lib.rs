//! matrixlink transport layer
//!
//! This crate provides byte-level transports for the device protocol:
//! - TCP with length-prefixed framing (the device link)
//! - In-memory channel pairs (tests, simulators)

pub mod error;
pub mod memory;
pub mod traits;

#[cfg(feature = "tcp")]
pub mod tcp;

pub use error::{Result, TransportError};
pub use memory::{channel_pair, MemoryReceiver, MemorySender};
pub use traits::{TransportEvent, TransportReceiver, TransportSender, TransportServer};

#[cfg(feature = "tcp")]
pub use tcp::{TcpConfig, TcpReceiver, TcpSender, TcpServer, TcpTransport};
