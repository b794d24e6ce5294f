//! matrixlink client
//!
//! Talks to a tree-structured routing device: request/reply correlation,
//! push subscriptions and a session that keeps the connection alive.
//!
//! # Example
//!
//! ```ignore
//! use matrixlink_client::{ElementTree, SessionBuilder};
//! use matrixlink_core::TreePath;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let session = SessionBuilder::new("10.0.0.5:9000").start();
//!
//!     let video = TreePath::parse("1.2.0.3")?;
//!     session.matrix_connect(&video, 0, &[5]).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod client;
pub mod error;
pub mod registry;
pub mod session;
pub mod tree;

pub use builder::SessionBuilder;
pub use client::{TreeClient, DEFAULT_REQUEST_TIMEOUT};
pub use error::{ClientError, Result};
pub use registry::SubscriptionRegistry;
pub use session::{
    Backoff, ConnectionSession, Connector, EpochCounter, EpochToken, SessionConfig,
    SessionContext, SessionHandler, SessionState, TcpConnector, TransportPair,
};
pub use tree::{ElementTree, UpdateCallback};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::builder::SessionBuilder;
    pub use crate::error::{ClientError, Result};
    pub use crate::session::{ConnectionSession, SessionState};
    pub use crate::tree::{ElementTree, UpdateCallback};
    pub use matrixlink_core::{Element, TreePath};
}
