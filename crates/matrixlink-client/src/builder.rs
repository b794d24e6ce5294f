//! Session builder pattern

use matrixlink_core::TreePath;
use std::sync::Arc;
use std::time::Duration;

use crate::session::{ConnectionSession, Connector, SessionConfig, SessionHandler, TcpConnector};

/// Builder for a [`ConnectionSession`]
pub struct SessionBuilder {
    config: SessionConfig,
    connector: Option<Arc<dyn Connector>>,
    handlers: Vec<Arc<dyn SessionHandler>>,
}

impl SessionBuilder {
    /// Create a new builder for a device address (`host:port`)
    pub fn new(addr: &str) -> Self {
        Self {
            config: SessionConfig::new(addr),
            connector: None,
            handlers: Vec::new(),
        }
    }

    /// Set how long a request waits for its reply
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the liveness probe interval
    pub fn probe_interval(mut self, interval: Duration) -> Self {
        self.config.probe_interval = interval;
        self
    }

    /// Set the path the liveness probe resolves
    pub fn probe_path(mut self, path: TreePath) -> Self {
        self.config.probe_path = path;
        self
    }

    /// Set the first reconnect delay
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.config.reconnect_interval = interval;
        self
    }

    /// Set the reconnect delay cap
    pub fn reconnect_max_interval(mut self, interval: Duration) -> Self {
        self.config.reconnect_max_interval = interval;
        self
    }

    /// Use a custom connector instead of plain TCP
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Add a lifecycle handler
    pub fn handler(mut self, handler: Arc<dyn SessionHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Build without starting
    pub fn build(self) -> Arc<ConnectionSession> {
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(TcpConnector::default()));
        let session = ConnectionSession::new(self.config, connector);
        for handler in self.handlers {
            session.add_handler(handler);
        }
        session
    }

    /// Build and start the connect loop
    pub fn start(self) -> Arc<ConnectionSession> {
        let session = self.build();
        session.start();
        session
    }
}

impl From<SessionConfig> for SessionBuilder {
    fn from(config: SessionConfig) -> Self {
        Self {
            config,
            connector: None,
            handlers: Vec::new(),
        }
    }
}
