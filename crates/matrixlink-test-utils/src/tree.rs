//! [`ElementTree`] backed by a [`DeviceModel`]
//!
//! Lets mirror and routing tests run without any transport. Subscriptions go
//! into a real [`SubscriptionRegistry`]; tests inject pushes and read back the
//! connect commands that were issued.

use async_trait::async_trait;
use matrixlink_client::{ClientError, ElementTree, Result, SubscriptionRegistry, UpdateCallback};
use matrixlink_core::{Element, ErrorCode, ReplyBody, TreePath};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::model::{ConnectCommand, DeviceModel};

pub struct InMemoryTree {
    model: Mutex<DeviceModel>,
    registry: SubscriptionRegistry,
    commands: Mutex<Vec<ConnectCommand>>,
    /// Push the confirmed route back after a successful connect
    auto_confirm: AtomicBool,
    reject_commands: AtomicBool,
    /// While true, reads wait before answering
    held: watch::Sender<bool>,
    resolves: AtomicU32,
    /// Paths whose subscribe times out
    unsubscribable: Mutex<HashSet<TreePath>>,
}

impl InMemoryTree {
    pub fn new(model: DeviceModel) -> Arc<Self> {
        let (held, _) = watch::channel(false);
        Arc::new(Self {
            model: Mutex::new(model),
            registry: SubscriptionRegistry::new(),
            commands: Mutex::new(Vec::new()),
            auto_confirm: AtomicBool::new(true),
            reject_commands: AtomicBool::new(false),
            held,
            resolves: AtomicU32::new(0),
            unsubscribable: Mutex::new(HashSet::new()),
        })
    }

    pub fn model(&self) -> MutexGuard<'_, DeviceModel> {
        self.model.lock()
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Connect commands received so far
    pub fn commands(&self) -> Vec<ConnectCommand> {
        self.commands.lock().clone()
    }

    pub fn set_auto_confirm(&self, enabled: bool) {
        self.auto_confirm.store(enabled, Ordering::SeqCst);
    }

    pub fn set_reject_commands(&self, enabled: bool) {
        self.reject_commands.store(enabled, Ordering::SeqCst);
    }

    /// Make `resolve` and `list_children` wait until [`release`](Self::release)
    pub fn hold(&self) {
        self.held.send_replace(true);
    }

    pub fn release(&self) {
        self.held.send_replace(false);
    }

    /// Make subscriptions on `path` fail with a timeout
    pub fn fail_subscribe(&self, path: TreePath) {
        self.unsubscribable.lock().insert(path);
    }

    /// Number of `resolve` calls answered
    pub fn resolve_count(&self) -> u32 {
        self.resolves.load(Ordering::SeqCst)
    }

    /// Deliver a push as the device would
    pub fn push(&self, element: &Element) -> bool {
        self.registry.dispatch(&element.path, element)
    }

    /// Change a route on the device and push it
    pub fn set_route(&self, matrix: &TreePath, target: u32, source: u32) -> bool {
        let delta = self.model.lock().set_route(matrix, target, vec![source]);
        match delta {
            Some(delta) => self.push(&delta),
            None => false,
        }
    }

    /// Change a label on the device and push it
    pub fn set_label(&self, leaf: &TreePath, label: &str) -> bool {
        let element = self.model.lock().set_label(leaf, label);
        match element {
            Some(element) => self.push(&element),
            None => false,
        }
    }

    async fn wait_released(&self) {
        let mut rx = self.held.subscribe();
        let _ = rx.wait_for(|held| !*held).await;
    }
}

fn not_found(path: &TreePath) -> ClientError {
    ClientError::PathNotFound(path.to_string())
}

#[async_trait]
impl ElementTree for InMemoryTree {
    async fn resolve(&self, path: &TreePath) -> Result<Element> {
        self.wait_released().await;
        self.resolves.fetch_add(1, Ordering::SeqCst);
        let element = self.model.lock().get(path).cloned();
        element.ok_or_else(|| not_found(path))
    }

    async fn list_children(&self, path: &TreePath) -> Result<Vec<Element>> {
        self.wait_released().await;
        let children = self.model.lock().children(path);
        children.ok_or_else(|| not_found(path))
    }

    async fn subscribe(&self, path: &TreePath, callback: UpdateCallback) -> Result<()> {
        if self.unsubscribable.lock().contains(path) {
            return Err(ClientError::Timeout);
        }
        let current = self.model.lock().get(path).cloned();
        let Some(current) = current else {
            return Err(not_found(path));
        };
        self.registry.register(path.clone(), callback);
        self.registry.dispatch(path, &current);
        Ok(())
    }

    async fn matrix_connect(&self, path: &TreePath, target: u32, sources: &[u32]) -> Result<()> {
        let command = ConnectCommand {
            path: path.clone(),
            target,
            sources: sources.to_vec(),
        };
        self.commands.lock().push(command.clone());

        if self.reject_commands.load(Ordering::SeqCst) {
            return Err(ClientError::Rejected {
                code: ErrorCode::CrosspointLocked as u16,
                message: "crosspoint locked".to_string(),
            });
        }

        let result = self.model.lock().connect(&command);
        match result {
            Ok(delta) => {
                if self.auto_confirm.load(Ordering::SeqCst) {
                    self.push(&delta);
                }
                Ok(())
            }
            Err(ReplyBody::Error { code, message }) => Err(ClientError::Rejected { code, message }),
            Err(_) => Err(ClientError::UnexpectedReply("ack")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_delivers_current_state() {
        let tree = InMemoryTree::new(DeviceModel::standard(2, 2));
        let seen = Arc::new(AtomicU32::new(0));
        let counter = seen.clone();
        let callback: UpdateCallback = Arc::new(move |_: &Element| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let video = DeviceModel::matrix_path(0);
        tree.subscribe(&video, callback).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        tree.matrix_connect(&video, 0, &[1]).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(tree.commands().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_matrix_is_path_not_found() {
        let mut model = DeviceModel::standard(1, 1);
        model.remove_matrix(4);
        let tree = InMemoryTree::new(model);
        let err = tree.resolve(&DeviceModel::matrix_path(4)).await.unwrap_err();
        assert!(err.is_path_not_found());
    }
}
