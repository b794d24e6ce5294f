//! Mirror set: one [`Matrix`] per logical matrix, kept in step with the device
//!
//! After every (re)connect [`MatrixMirrorSet::resubscribe`] walks each matrix:
//! resolve, rebuild tables, subscribe to connection pushes, then resolve and
//! subscribe the label leaves. A matrix the device does not have keeps its
//! offline tables. Work and pushes belonging to an older connection epoch are
//! dropped.

use matrixlink_client::{ElementTree, EpochToken, UpdateCallback};
use matrixlink_core::{Element, TreePath};
use parking_lot::{RwLock, RwLockReadGuard};
#[cfg(test)]
use parking_lot::RwLockWriteGuard;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{format_counts, PanelConfig};
use crate::event::{EventBus, PanelEvent};
use crate::matrix::{Matrix, MatrixKind, Side};

/// Resubscribe abandoned because a newer connection exists
#[derive(Debug)]
struct Stale;

fn check(epoch: &EpochToken) -> Result<(), Stale> {
    if epoch.is_current() {
        Ok(())
    } else {
        Err(Stale)
    }
}

pub struct MatrixMirrorSet {
    matrices: Vec<RwLock<Matrix>>,
    /// Epoch in which each matrix last completed a resubscribe (0 = never,
    /// no connection ever has epoch 0)
    ready: Vec<AtomicU64>,
    /// Discovered (inputs, outputs) per matrix, seeded from the offline counts
    counts: RwLock<Vec<(u32, u32)>>,
    events: EventBus,
}

impl MatrixMirrorSet {
    /// Build all five mirrors from the offline counts
    pub fn new(config: &PanelConfig, events: EventBus) -> Self {
        let counts = config.offline_counts();
        let matrices = MatrixKind::ALL
            .iter()
            .zip(&counts)
            .map(|(&kind, &(inputs, outputs))| {
                let mut matrix = Matrix::new(kind, config.history_limit);
                matrix.populate_offline(inputs, outputs);
                RwLock::new(matrix)
            })
            .collect();

        Self {
            matrices,
            ready: MatrixKind::ALL.iter().map(|_| AtomicU64::new(0)).collect(),
            counts: RwLock::new(counts),
            events,
        }
    }

    /// Read access to one mirror
    pub fn get(&self, kind: MatrixKind) -> RwLockReadGuard<'_, Matrix> {
        self.matrices[kind.index()].read()
    }

    #[cfg(test)]
    pub(crate) fn get_mut(&self, kind: MatrixKind) -> RwLockWriteGuard<'_, Matrix> {
        self.matrices[kind.index()].write()
    }

    /// Run `f` against one mirror under its read lock
    pub fn with_matrix<R>(&self, kind: MatrixKind, f: impl FnOnce(&Matrix) -> R) -> R {
        f(&self.matrices[kind.index()].read())
    }

    /// Whether `kind` finished a resubscribe on the connection `epoch` names,
    /// and that connection is still the live one
    pub fn is_ready(&self, kind: MatrixKind, epoch: &EpochToken) -> bool {
        epoch.value() != 0
            && epoch.is_current()
            && self.ready[kind.index()].load(Ordering::SeqCst) == epoch.value()
    }

    /// Pop the undo pair off an output's history
    pub fn pop_undo(&self, kind: MatrixKind, output: u32) -> Option<u32> {
        self.matrices[kind.index()].write().pop_undo(output)
    }

    /// Counts as comma-separated (inputs, outputs) strings for storing back
    /// into the configuration
    pub fn discovered_counts(&self) -> (String, String) {
        let counts = self.counts.read();
        (
            format_counts(counts.iter().map(|c| c.0)),
            format_counts(counts.iter().map(|c| c.1)),
        )
    }

    /// Re-read and re-subscribe every matrix for a new connection
    pub async fn resubscribe(self: &Arc<Self>, tree: &dyn ElementTree, epoch: &EpochToken) {
        info!("Resubscribing matrices (epoch {})", epoch.value());
        for kind in MatrixKind::ALL {
            if self.resubscribe_matrix(tree, kind, epoch).await.is_err() {
                debug!("Resubscribe for epoch {} abandoned", epoch.value());
                return;
            }
        }
        info!("Resubscribe complete (epoch {})", epoch.value());
    }

    async fn resubscribe_matrix(
        self: &Arc<Self>,
        tree: &dyn ElementTree,
        kind: MatrixKind,
        epoch: &EpochToken,
    ) -> Result<(), Stale> {
        let base = kind.base_path();
        let resolved = tree.resolve(&base).await;
        check(epoch)?;

        let element = match resolved {
            Ok(element) => element,
            Err(e) if e.is_path_not_found() => {
                warn!("{}: no {} matrix on this device, keeping offline values", base, kind);
                return Ok(());
            }
            Err(e) => {
                warn!("{}: resolving {} matrix failed: {}", base, kind, e);
                return Ok(());
            }
        };
        let Some(contents) = element.as_matrix() else {
            warn!("{}: expected a matrix, keeping offline values", base);
            return Ok(());
        };

        let source_ids = contents.source_ids();
        let target_ids = contents.target_ids();
        debug!(
            "{}: {} inputs, {} outputs",
            kind,
            source_ids.len(),
            target_ids.len()
        );
        self.counts.write()[kind.index()] = (source_ids.len() as u32, target_ids.len() as u32);

        {
            let mut matrix = self.matrices[kind.index()].write();
            matrix.rebuild(source_ids, target_ids);
            matrix.apply_connections(contents);
        }
        self.events.emit(PanelEvent::RoutesChanged {
            matrix: kind,
            targets: Vec::new(),
        });
        self.events.emit(PanelEvent::LabelsChanged { matrix: kind });

        let subscribed = tree.subscribe(&base, self.connection_handler(kind, epoch)).await;
        check(epoch)?;
        if let Err(e) = subscribed {
            warn!(
                "{}: subscribing to connections failed, {} stays unready: {}",
                base, kind, e
            );
            return Ok(());
        }

        match contents.labels.first() {
            Some(labels) => self.resubscribe_labels(tree, kind, &labels.base_path, epoch).await?,
            None => debug!("{}: no label sub-tree", base),
        }

        self.ready[kind.index()].store(epoch.value(), Ordering::SeqCst);
        debug!("{} ready (epoch {})", kind, epoch.value());
        Ok(())
    }

    async fn resubscribe_labels(
        self: &Arc<Self>,
        tree: &dyn ElementTree,
        kind: MatrixKind,
        labels: &TreePath,
        epoch: &EpochToken,
    ) -> Result<(), Stale> {
        let groups = tree.list_children(labels).await;
        check(epoch)?;
        let groups = match groups {
            Ok(groups) => groups,
            Err(e) => {
                warn!("{}: no labels for {} matrix: {}", labels, kind, e);
                return Ok(());
            }
        };

        for group in groups {
            let side = match group.identifier() {
                Some("targets") => Side::Output,
                Some("sources") => Side::Input,
                other => {
                    debug!("{}: skipping label group {:?}", group.path, other);
                    continue;
                }
            };

            let leaves = tree.list_children(&group.path).await;
            check(epoch)?;
            let leaves = match leaves {
                Ok(leaves) => leaves,
                Err(e) => {
                    warn!("{}: reading labels failed: {}", group.path, e);
                    continue;
                }
            };

            let present: Vec<u32> = leaves.iter().filter_map(Element::number).collect();
            {
                let mut matrix = self.matrices[kind.index()].write();
                for leaf in &leaves {
                    apply_label(&mut matrix, side, leaf);
                }
                matrix.retain_active(side, &present);
            }
            self.events.emit(PanelEvent::LabelsChanged { matrix: kind });

            for leaf in &leaves {
                let Some(id) = leaf.number() else {
                    continue;
                };
                let subscribed = tree
                    .subscribe(&leaf.path, self.label_handler(kind, side, id, epoch))
                    .await;
                check(epoch)?;
                if let Err(e) = subscribed {
                    debug!("{}: label subscription failed: {}", leaf.path, e);
                }
            }
        }
        Ok(())
    }

    fn connection_handler(self: &Arc<Self>, kind: MatrixKind, epoch: &EpochToken) -> UpdateCallback {
        let mirrors = Arc::clone(self);
        let epoch = epoch.clone();
        Arc::new(move |element: &Element| {
            if !epoch.is_current() {
                debug!("Dropping stale connection push for {}", kind);
                return;
            }
            let Some(contents) = element.as_matrix() else {
                return;
            };
            let targets = mirrors.matrices[kind.index()]
                .write()
                .apply_connections(contents);
            if !targets.is_empty() {
                mirrors.events.emit(PanelEvent::RoutesChanged {
                    matrix: kind,
                    targets,
                });
            }
        })
    }

    fn label_handler(
        self: &Arc<Self>,
        kind: MatrixKind,
        side: Side,
        id: u32,
        epoch: &EpochToken,
    ) -> UpdateCallback {
        let mirrors = Arc::clone(self);
        let epoch = epoch.clone();
        Arc::new(move |element: &Element| {
            if !epoch.is_current() {
                return;
            }
            let changed = {
                let mut matrix = mirrors.matrices[kind.index()].write();
                element.number() == Some(id) && apply_label(&mut matrix, side, element)
            };
            if changed {
                mirrors.events.emit(PanelEvent::LabelsChanged { matrix: kind });
            }
        })
    }
}

/// Copy a label leaf into the matrix
fn apply_label(matrix: &mut Matrix, side: Side, leaf: &Element) -> bool {
    let (Some(id), Some(param)) = (leaf.number(), leaf.as_parameter()) else {
        return false;
    };
    let Some(label) = param.value.as_str() else {
        return false;
    };
    matrix.set_label(side, id, label, param.identifier.as_deref())
}
