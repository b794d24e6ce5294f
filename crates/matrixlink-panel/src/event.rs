//! Observer events
//!
//! Adapters re-read feedbacks and variables when these arrive. Sending never
//! fails; events without listeners are dropped.

use matrixlink_client::SessionState;
use tokio::sync::broadcast;

use crate::matrix::MatrixKind;
use crate::routing::Selection;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum PanelEvent {
    SessionState(SessionState),
    /// Outputs whose route changed; empty after a table rebuild
    RoutesChanged { matrix: MatrixKind, targets: Vec<u32> },
    LabelsChanged { matrix: MatrixKind },
    /// Emitted after every routing action, whatever its outcome
    SelectionChanged(Selection),
    TakeCompleted {
        matrix: MatrixKind,
        target: u32,
        source: u32,
        ok: bool,
    },
}

/// Broadcast fan-out of [`PanelEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PanelEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn emit(&self, event: PanelEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PanelEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
