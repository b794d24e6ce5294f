//! The assembled panel
//!
//! [`Panel`] owns the session, the mirrors and the orchestrator for one
//! device. Every new connection triggers a full resubscribe of the mirrors.

use async_trait::async_trait;
use matrixlink_client::{
    ConnectionSession, Connector, ElementTree, SessionContext, SessionHandler, SessionState,
    TcpConnector,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::actions::PanelAction;
use crate::config::PanelConfig;
use crate::error::Result;
use crate::event::{EventBus, PanelEvent};
use crate::mirror::MatrixMirrorSet;
use crate::routing::{RoutingOptions, RoutingOrchestrator};
use crate::surface::Surface;

/// Connection lifecycle hooks for the mirrors
struct PanelHandler {
    mirrors: Arc<MatrixMirrorSet>,
    events: EventBus,
}

#[async_trait]
impl SessionHandler for PanelHandler {
    async fn on_connected(&self, ctx: SessionContext) {
        self.mirrors
            .resubscribe(ctx.client.as_ref(), &ctx.epoch)
            .await;
    }

    fn on_disconnected(&self, epoch: u64) {
        debug!("Mirrors detached from epoch {}", epoch);
    }

    fn on_state(&self, state: SessionState) {
        self.events.emit(PanelEvent::SessionState(state));
    }
}

pub struct Panel {
    config: PanelConfig,
    session: Arc<ConnectionSession>,
    mirrors: Arc<MatrixMirrorSet>,
    routing: Arc<RoutingOrchestrator>,
    surface: Surface,
    events: EventBus,
}

impl Panel {
    /// Panel talking TCP to `config.address()`. Call [`start`](Self::start)
    /// to connect.
    pub fn new(config: PanelConfig) -> Result<Arc<Self>> {
        Self::with_connector(config, Arc::new(TcpConnector::default()))
    }

    pub fn with_connector(config: PanelConfig, connector: Arc<dyn Connector>) -> Result<Arc<Self>> {
        let session = ConnectionSession::new(config.session_config()?, connector);
        let events = EventBus::new();
        let mirrors = Arc::new(MatrixMirrorSet::new(&config, events.clone()));

        session.add_handler(Arc::new(PanelHandler {
            mirrors: Arc::clone(&mirrors),
            events: events.clone(),
        }));

        let tree: Arc<dyn ElementTree> = session.clone();
        let routing = Arc::new(RoutingOrchestrator::new(
            Arc::clone(&mirrors),
            tree,
            session.epochs(),
            RoutingOptions::from(&config),
            events.clone(),
        ));

        Ok(Arc::new(Self {
            surface: Surface::new(Arc::clone(&routing)),
            config,
            session,
            mirrors,
            routing,
            events,
        }))
    }

    pub fn start(&self) {
        info!("Panel connecting to {}", self.config.address());
        self.session.start();
    }

    pub async fn shutdown(&self) {
        self.session.shutdown().await;
    }

    /// Run one action. Failures are logged here as well as returned.
    pub async fn dispatch(&self, action: PanelAction) -> Result<()> {
        debug!("Dispatching {}", action);
        let result = match action {
            PanelAction::Take => self.routing.take().await,
            PanelAction::Clear => {
                self.routing.clear();
                Ok(())
            }
            PanelAction::Undo => self.routing.undo().await,
            PanelAction::SelectSource {
                matrix,
                pick,
                direct_take,
            } => self.routing.select_source(matrix, pick, direct_take).await,
            PanelAction::SelectTarget { matrix, pick } => self.routing.select_target(matrix, pick),
            PanelAction::SelectMatrix(matrix) => {
                self.routing.select_matrix(matrix);
                Ok(())
            }
        };

        if let Err(e) = &result {
            if e.is_ignorable() {
                debug!("{} ignored: {}", action, e);
            } else {
                warn!("{} failed: {}", action, e);
            }
        }
        result
    }

    /// Parse and run an adapter action
    pub async fn dispatch_adapter(&self, action_id: &str, options: &Value) -> Result<()> {
        let action = PanelAction::from_adapter(action_id, options).map_err(|e| {
            warn!("Bad action '{}': {}", action_id, e);
            e
        })?;
        self.dispatch(action).await
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PanelEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &PanelConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<ConnectionSession> {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn mirrors(&self) -> &Arc<MatrixMirrorSet> {
        &self.mirrors
    }

    pub fn routing(&self) -> &Arc<RoutingOrchestrator> {
        &self.routing
    }

    /// Configuration with the offline counts replaced by what the device reported
    pub fn discovered_config(&self) -> PanelConfig {
        let (input_counts, output_counts) = self.mirrors.discovered_counts();
        PanelConfig {
            input_counts,
            output_counts,
            ..self.config.clone()
        }
    }
}
