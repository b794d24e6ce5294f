//! The path-addressable tree seen by consumers
//!
//! Everything above the client (mirrors, routing) talks to the device through
//! [`ElementTree`] so it can run against the live client, the reconnecting
//! session or an in-memory tree in tests.

use async_trait::async_trait;
use matrixlink_core::{Element, TreePath};
use std::sync::Arc;

use crate::error::Result;

/// Push notification callback
pub type UpdateCallback = Arc<dyn Fn(&Element) + Send + Sync>;

#[async_trait]
pub trait ElementTree: Send + Sync {
    /// Resolve one element, failing with `PathNotFound` if the device has none
    async fn resolve(&self, path: &TreePath) -> Result<Element>;

    /// Fetch the direct children of an element
    async fn list_children(&self, path: &TreePath) -> Result<Vec<Element>>;

    /// Register `callback` for pushes on `path`. The current state of the
    /// element is delivered through the callback right after the acknowledgement.
    async fn subscribe(&self, path: &TreePath, callback: UpdateCallback) -> Result<()>;

    /// Connect `sources` to `target` on the matrix at `path`
    async fn matrix_connect(&self, path: &TreePath, target: u32, sources: &[u32]) -> Result<()>;
}
