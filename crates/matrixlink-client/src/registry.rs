//! Subscription registry
//!
//! One handler per subscribed path. Registration is keyed by path, not by the
//! identity of whatever registered it, so a mirror rebuild can re-register the
//! same paths and simply replace the old handlers.

use dashmap::DashMap;
use matrixlink_core::{Element, TreePath};
use tracing::debug;

use crate::tree::UpdateCallback;

/// Maps subscribed paths to their push handlers
pub struct SubscriptionRegistry {
    handlers: DashMap<TreePath, UpdateCallback>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// Register a handler. Returns true when an existing handler was replaced.
    pub fn register(&self, path: TreePath, handler: UpdateCallback) -> bool {
        self.handlers.insert(path, handler).is_some()
    }

    /// Remove the handler for a path
    pub fn remove(&self, path: &TreePath) -> bool {
        self.handlers.remove(path).is_some()
    }

    /// Deliver a push to the handler registered for `path`.
    ///
    /// Unknown paths are dropped; the device may still push for elements we
    /// stopped caring about. Returns whether a handler ran.
    pub fn dispatch(&self, path: &TreePath, element: &Element) -> bool {
        // Clone the handler out so no map lock is held while it runs
        let handler = self.handlers.get(path).map(|h| h.value().clone());
        match handler {
            Some(handler) => {
                handler(element);
                true
            }
            None => {
                debug!("Dropping update for unsubscribed path {}", path);
                false
            }
        }
    }

    /// Drop every handler, returning how many there were
    pub fn clear(&self) -> usize {
        let count = self.handlers.len();
        self.handlers.clear();
        count
    }

    pub fn contains(&self, path: &TreePath) -> bool {
        self.handlers.contains_key(path)
    }

    /// Subscribed paths, sorted
    pub fn paths(&self) -> Vec<TreePath> {
        let mut paths: Vec<TreePath> = self.handlers.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn counting_handler(counter: &Arc<AtomicU32>, step: u32) -> UpdateCallback {
        let counter = counter.clone();
        Arc::new(move |_element: &Element| {
            counter.fetch_add(step, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_register_replaces_handler() {
        let registry = SubscriptionRegistry::new();
        let counter = Arc::new(AtomicU32::new(0));
        let path = TreePath::parse("1.2.0.3").unwrap();
        let element = Element::node(path.clone(), "video");

        assert!(!registry.register(path.clone(), counting_handler(&counter, 1)));
        assert!(registry.register(path.clone(), counting_handler(&counter, 10)));
        assert_eq!(registry.len(), 1);

        assert!(registry.dispatch(&path, &element));
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_dispatch_unknown_path_is_silent() {
        let registry = SubscriptionRegistry::new();
        let path = TreePath::parse("1.2.4.3").unwrap();
        let element = Element::node(path.clone(), "gpio");
        assert!(!registry.dispatch(&path, &element));
    }

    #[test]
    fn test_clear() {
        let registry = SubscriptionRegistry::new();
        let counter = Arc::new(AtomicU32::new(0));
        registry.register(TreePath::parse("1.2.0.3").unwrap(), counting_handler(&counter, 1));
        registry.register(TreePath::parse("1.2.1.3").unwrap(), counting_handler(&counter, 1));

        assert_eq!(registry.clear(), 2);
        assert!(registry.is_empty());
        assert!(registry.paths().is_empty());
    }
}
