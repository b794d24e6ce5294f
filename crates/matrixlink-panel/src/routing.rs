//! Routing orchestration
//!
//! Owns the single [`Selection`] cursor and turns panel actions into matrix
//! connect commands. Routes are never written locally: a take only issues the
//! command, and the mirror follows whatever the device pushes back.

use matrixlink_client::{ElementTree, EpochCounter};
use parking_lot::Mutex;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::PanelConfig;
use crate::error::{PanelError, Result};
use crate::event::{EventBus, PanelEvent};
use crate::matrix::MatrixKind;
use crate::mirror::MatrixMirrorSet;

/// The panel cursor. `None` is the "unset" sentinel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Selection {
    pub matrix: Option<MatrixKind>,
    pub source: Option<u32>,
    pub target: Option<u32>,
}

impl Selection {
    /// All three fields set
    pub fn is_complete(&self) -> bool {
        self.matrix.is_some() && self.source.is_some() && self.target.is_some()
    }

    pub fn is_empty(&self) -> bool {
        *self == Selection::default()
    }

    /// Numeric form with -1 for unset fields
    pub fn raw(&self) -> (i64, i64, i64) {
        (
            self.matrix.map_or(-1, |m| m.index() as i64),
            self.source.map_or(-1, i64::from),
            self.target.map_or(-1, i64::from),
        )
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (_, source, target) = self.raw();
        match self.matrix {
            Some(matrix) => write!(f, "{} source={} target={}", matrix, source, target),
            None => write!(f, "none source={} target={}", source, target),
        }
    }
}

/// What to select
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pick {
    Id(u32),
    Next,
    Previous,
}

impl FromStr for Pick {
    type Err = PanelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "next" => Ok(Pick::Next),
            "previous" | "prev" => Ok(Pick::Previous),
            other => other
                .parse()
                .map(Pick::Id)
                .map_err(|_| PanelError::InvalidAction(format!("'{}' is not an id or next/previous", s))),
        }
    }
}

/// Next entry of `order` after (or before) `current`. An unset or unknown
/// cursor lands on the first entry. Returns `None` at either end.
fn step(order: &[u32], current: Option<u32>, pick: Pick) -> Option<u32> {
    let first = *order.first()?;
    let Some(pos) = current.and_then(|c| order.iter().position(|&id| id == c)) else {
        return Some(first);
    };
    let next = match pick {
        Pick::Next => pos + 1,
        Pick::Previous => pos.checked_sub(1)?,
        Pick::Id(id) => return Some(id),
    };
    order.get(next).copied()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoutingOptions {
    /// Take as soon as a source id is picked
    pub auto_take: bool,
    /// Clear the selection after every take
    pub reset_after_take: bool,
}

impl From<&PanelConfig> for RoutingOptions {
    fn from(config: &PanelConfig) -> Self {
        Self {
            auto_take: config.auto_take,
            reset_after_take: config.reset_after_take,
        }
    }
}

pub struct RoutingOrchestrator {
    mirrors: Arc<MatrixMirrorSet>,
    tree: Arc<dyn ElementTree>,
    epochs: EpochCounter,
    options: RoutingOptions,
    selection: Mutex<Selection>,
    /// Serializes connect commands per matrix
    in_flight: Vec<tokio::sync::Mutex<()>>,
    events: EventBus,
}

impl RoutingOrchestrator {
    pub fn new(
        mirrors: Arc<MatrixMirrorSet>,
        tree: Arc<dyn ElementTree>,
        epochs: EpochCounter,
        options: RoutingOptions,
        events: EventBus,
    ) -> Self {
        Self {
            mirrors,
            tree,
            epochs,
            options,
            selection: Mutex::new(Selection::default()),
            in_flight: MatrixKind::ALL.iter().map(|_| tokio::sync::Mutex::new(())).collect(),
            events,
        }
    }

    pub fn selection(&self) -> Selection {
        *self.selection.lock()
    }

    pub fn options(&self) -> RoutingOptions {
        self.options
    }

    pub fn mirrors(&self) -> &Arc<MatrixMirrorSet> {
        &self.mirrors
    }

    /// Select a matrix, priming target and source from its first output
    pub fn select_matrix(&self, matrix: MatrixKind) {
        let (target, source) = self.mirrors.with_matrix(matrix, |mirror| {
            let target = mirror.output_order().first().copied();
            (target, target.and_then(|t| mirror.output(t)).and_then(|o| o.route))
        });
        *self.selection.lock() = Selection {
            matrix: Some(matrix),
            source,
            target,
        };
        self.refresh();
    }

    /// Select an output. An explicit id needs `matrix`; next/previous walk the
    /// selected matrix, falling back to `matrix` when none is selected.
    pub fn select_target(&self, matrix: Option<MatrixKind>, pick: Pick) -> Result<()> {
        let result = self.apply_target(matrix, pick);
        self.refresh();
        result
    }

    fn apply_target(&self, matrix: Option<MatrixKind>, pick: Pick) -> Result<()> {
        let mut selection = self.selection.lock();
        let kind = match pick {
            Pick::Id(_) => matrix,
            Pick::Next | Pick::Previous => selection.matrix.or(matrix),
        }
        .ok_or_else(|| PanelError::InvalidSelection("no matrix selected".into()))?;
        let mirror = self.mirrors.get(kind);

        let target = match pick {
            Pick::Id(id) if mirror.is_active_output(id) => id,
            Pick::Id(id) => {
                return Err(PanelError::InvalidSelection(format!(
                    "{} has no output {}",
                    kind, id
                )))
            }
            Pick::Next | Pick::Previous => {
                let current = if selection.matrix == Some(kind) {
                    selection.target
                } else {
                    None
                };
                match step(mirror.output_order(), current, pick) {
                    Some(target) => target,
                    None if mirror.output_order().is_empty() => {
                        return Err(PanelError::InvalidSelection(format!("{} has no outputs", kind)))
                    }
                    None => {
                        debug!("{}: already at the end of the outputs", kind);
                        return Ok(());
                    }
                }
            }
        };

        *selection = Selection {
            matrix: Some(kind),
            source: mirror.output(target).and_then(|o| o.route),
            target: Some(target),
        };
        Ok(())
    }

    /// Select an input on the selected matrix. An explicit id must name the
    /// selected matrix and takes right away when auto-take is on or
    /// `direct_take` is set.
    pub async fn select_source(
        &self,
        matrix: Option<MatrixKind>,
        pick: Pick,
        direct_take: bool,
    ) -> Result<()> {
        if let Err(e) = self.apply_source(matrix, pick) {
            self.refresh();
            return Err(e);
        }
        if matches!(pick, Pick::Id(_)) && (self.options.auto_take || direct_take) {
            return self.take().await;
        }
        self.refresh();
        Ok(())
    }

    fn apply_source(&self, matrix: Option<MatrixKind>, pick: Pick) -> Result<()> {
        let mut selection = self.selection.lock();
        let kind = match (pick, selection.matrix) {
            (Pick::Id(_), Some(selected)) if matrix == Some(selected) => selected,
            (Pick::Id(_), _) => {
                return Err(PanelError::InvalidSelection(
                    "source is not on the selected matrix".into(),
                ))
            }
            (_, Some(selected)) => selected,
            (_, None) => return Err(PanelError::InvalidSelection("no matrix selected".into())),
        };
        let mirror = self.mirrors.get(kind);

        let source = match pick {
            Pick::Id(id) if mirror.is_active_input(id) => id,
            Pick::Id(id) => {
                return Err(PanelError::InvalidSelection(format!("{} has no input {}", kind, id)))
            }
            Pick::Next | Pick::Previous => match step(mirror.input_order(), selection.source, pick) {
                Some(source) => source,
                None if mirror.input_order().is_empty() => {
                    return Err(PanelError::InvalidSelection(format!("{} has no inputs", kind)))
                }
                None => {
                    debug!("{}: already at the end of the inputs", kind);
                    return Ok(());
                }
            },
        };
        selection.source = Some(source);
        Ok(())
    }

    /// Connect the selected source to the selected target
    pub async fn take(&self) -> Result<()> {
        let result = self.take_selection().await;
        self.refresh();
        result
    }

    /// Reset the selection
    pub fn clear(&self) {
        *self.selection.lock() = Selection::default();
        self.refresh();
    }

    /// Re-route the selected output to its previous input
    pub async fn undo(&self) -> Result<()> {
        let result = self.undo_selection().await;
        self.refresh();
        result
    }

    async fn undo_selection(&self) -> Result<()> {
        let selection = self.selection();
        let (Some(kind), Some(target)) = (selection.matrix, selection.target) else {
            return Err(PanelError::InvalidSelection("undo needs a matrix and target".into()));
        };
        let candidate = {
            let mirror = self.mirrors.get(kind);
            if !mirror.is_active_output(target) {
                return Err(PanelError::InvalidSelection(format!(
                    "{} has no output {}",
                    kind, target
                )));
            }
            mirror
                .output(target)
                .and_then(|o| o.undo_candidate())
                .map(|source| (source, mirror.is_active_input(source)))
        };
        match candidate {
            Some((_, true)) => {}
            Some((source, false)) => {
                return Err(PanelError::InvalidSelection(format!(
                    "{} input {} is no longer available",
                    kind, source
                )))
            }
            None => {
                return Err(PanelError::InvalidSelection(format!(
                    "{} output {} has no undo history",
                    kind, target
                )))
            }
        }
        self.ensure_ready(kind)?;

        let previous = self.mirrors.pop_undo(kind, target).ok_or_else(|| {
            PanelError::InvalidSelection(format!("{} output {} has no undo history", kind, target))
        })?;
        debug!("Undo {} output {} back to input {}", kind, target, previous);
        self.selection.lock().source = Some(previous);
        self.take_selection().await
    }

    async fn take_selection(&self) -> Result<()> {
        let selection = self.selection();
        let (Some(kind), Some(source), Some(target)) =
            (selection.matrix, selection.source, selection.target)
        else {
            return Err(PanelError::InvalidSelection(format!("incomplete selection ({})", selection)));
        };
        {
            let mirror = self.mirrors.get(kind);
            if !mirror.is_active_output(target) || !mirror.is_active_input(source) {
                return Err(PanelError::InvalidSelection(format!(
                    "{} has no crosspoint {} -> {}",
                    kind, source, target
                )));
            }
        }
        self.ensure_ready(kind)?;

        let outcome = self.connect(kind, target, source).await;
        if self.options.reset_after_take {
            *self.selection.lock() = Selection::default();
        }
        outcome
    }

    async fn connect(&self, kind: MatrixKind, target: u32, source: u32) -> Result<()> {
        let _guard = self.in_flight[kind.index()].lock().await;
        info!("Take {}: input {} -> output {}", kind, source, target);

        let result = self
            .tree
            .matrix_connect(&kind.base_path(), target, &[source])
            .await;
        self.events.emit(PanelEvent::TakeCompleted {
            matrix: kind,
            target,
            source,
            ok: result.is_ok(),
        });
        result.map_err(|e| {
            warn!("Take on {} output {} failed: {}", kind, target, e);
            PanelError::CommandFailure(e.to_string())
        })
    }

    fn ensure_ready(&self, kind: MatrixKind) -> Result<()> {
        if self.mirrors.is_ready(kind, &self.epochs.token()) {
            Ok(())
        } else {
            Err(PanelError::NotReady(kind))
        }
    }

    fn refresh(&self) {
        self.events.emit(PanelEvent::SelectionChanged(self.selection()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::Side;
    use matrixlink_test_utils::{DeviceModel, InMemoryTree};

    #[tokio::test]
    async fn test_undo_to_inactive_input_keeps_history() {
        let video = MatrixKind::Video;
        let mirrors = Arc::new(MatrixMirrorSet::new(&PanelConfig::default(), EventBus::new()));
        let tree = InMemoryTree::new(DeviceModel::standard(2, 6));
        let epochs = EpochCounter::new();
        mirrors.resubscribe(tree.as_ref(), &epochs.advance()).await;
        tree.set_route(&video.base_path(), 0, 3);
        tree.set_route(&video.base_path(), 0, 5);
        mirrors.get_mut(video).retain_active(Side::Input, &[0, 1, 2, 4, 5]);

        let routing = RoutingOrchestrator::new(
            mirrors.clone(),
            tree.clone(),
            epochs,
            RoutingOptions::default(),
            EventBus::new(),
        );
        routing.select_target(Some(video), Pick::Id(0)).unwrap();

        let err = routing.undo().await.unwrap_err();
        assert!(matches!(err, PanelError::InvalidSelection(_)));
        assert!(tree.commands().is_empty());
        let output = mirrors.get(video).output(0).cloned().unwrap();
        assert_eq!(output.history, [3, 5]);
    }

    #[test]
    fn test_step_without_wraparound() {
        let order = [0, 2, 5];
        assert_eq!(step(&order, None, Pick::Next), Some(0));
        assert_eq!(step(&order, None, Pick::Previous), Some(0));
        assert_eq!(step(&order, Some(0), Pick::Next), Some(2));
        assert_eq!(step(&order, Some(2), Pick::Previous), Some(0));
        assert_eq!(step(&order, Some(5), Pick::Next), None);
        assert_eq!(step(&order, Some(0), Pick::Previous), None);
        // unknown cursor restarts at the top
        assert_eq!(step(&order, Some(3), Pick::Next), Some(0));
        assert_eq!(step(&[], None, Pick::Next), None);
    }

    #[test]
    fn test_selection_sentinels() {
        let mut selection = Selection::default();
        assert!(selection.is_empty());
        assert!(!selection.is_complete());
        assert_eq!(selection.raw(), (-1, -1, -1));

        selection.matrix = Some(MatrixKind::Audio);
        selection.target = Some(4);
        assert_eq!(selection.raw(), (1, -1, 4));
        assert!(!selection.is_complete());

        selection.source = Some(0);
        assert!(selection.is_complete());
    }

    #[test]
    fn test_parse_pick() {
        assert_eq!("next".parse::<Pick>().unwrap(), Pick::Next);
        assert_eq!("Previous".parse::<Pick>().unwrap(), Pick::Previous);
        assert_eq!(" 12 ".parse::<Pick>().unwrap(), Pick::Id(12));
        assert!("-1".parse::<Pick>().is_err());
    }
}
