//! In-memory device tree
//!
//! Layout built by [`DeviceModel::standard`], per matrix index `k`:
//!
//! ```text
//! 1                 node   "router"
//! 1.2               node   "matrices"
//! 1.2.k             node   matrix name
//! 1.2.k.3           matrix (labels -> 1.2.k.4)
//! 1.2.k.4           node   "labels"
//! 1.2.k.4.1         node   "targets"
//! 1.2.k.4.1.<id>    parameter, output label
//! 1.2.k.4.2         node   "sources"
//! 1.2.k.4.2.<id>    parameter, input label
//! ```

use matrixlink_core::{
    Connection, Contents, Element, ErrorCode, LabelRef, MatrixContents, Message, ReplyBody,
    TreePath, Value,
};
use std::collections::BTreeMap;

/// Matrix names in index order
pub const MATRIX_NAMES: [&str; 5] = ["video", "audio", "data", "multichannelaudio", "gpio"];

/// Which side of a matrix a label belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelSide {
    Targets,
    Sources,
}

impl LabelSide {
    fn number(self) -> u32 {
        match self {
            LabelSide::Targets => 1,
            LabelSide::Sources => 2,
        }
    }
}

/// A recorded matrix connect request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectCommand {
    pub path: TreePath,
    pub target: u32,
    pub sources: Vec<u32>,
}

/// Result of answering one request
#[derive(Debug, Clone)]
pub struct Handled {
    pub reply: Message,
    /// State pushed to the requester right after the reply (subscriptions)
    pub initial: Option<Element>,
    /// Change pushed to every subscriber of the element (connects)
    pub broadcast: Option<Element>,
}

/// Device tree state
#[derive(Debug, Clone)]
pub struct DeviceModel {
    elements: BTreeMap<TreePath, Element>,
}

impl DeviceModel {
    /// Root node only
    pub fn empty() -> Self {
        let mut elements = BTreeMap::new();
        let router = path(&[1]);
        let matrices = path(&[1, 2]);
        elements.insert(router.clone(), Element::node(router, "router"));
        elements.insert(matrices.clone(), Element::node(matrices, "matrices"));
        Self { elements }
    }

    /// All five matrices with labels and every output unrouted
    pub fn standard(outputs: u32, inputs: u32) -> Self {
        let mut model = Self::empty();
        for index in 0..MATRIX_NAMES.len() as u32 {
            model.add_matrix(index, outputs, inputs);
        }
        model
    }

    /// Path of the matrix element for an index
    pub fn matrix_path(index: u32) -> TreePath {
        path(&[1, 2, index, 3])
    }

    /// Path of the label sub-tree root for an index
    pub fn labels_path(index: u32) -> TreePath {
        path(&[1, 2, index, 4])
    }

    /// Path of one label leaf
    pub fn label_path(index: u32, side: LabelSide, id: u32) -> TreePath {
        path(&[1, 2, index, 4, side.number(), id])
    }

    /// Add a matrix with a label sub-tree
    pub fn add_matrix(&mut self, index: u32, outputs: u32, inputs: u32) -> TreePath {
        let matrix_path = self.add_bare_matrix(index, outputs, inputs);
        let labels = Self::labels_path(index);

        if let Some(Contents::Matrix(m)) = self
            .elements
            .get_mut(&matrix_path)
            .map(|e| &mut e.contents)
        {
            m.labels = vec![LabelRef {
                base_path: labels.clone(),
                description: "Primary".to_string(),
            }];
        }

        self.insert(Element::node(labels.clone(), "labels"));
        for (side, name, count, prefix) in [
            (LabelSide::Targets, "targets", outputs, "DST"),
            (LabelSide::Sources, "sources", inputs, "SRC"),
        ] {
            let side_path = labels.child(side.number());
            self.insert(Element::node(side_path, name));
            for id in 0..count {
                let leaf = Self::label_path(index, side, id);
                let identifier = format!("{}-{}", &name[..1], id);
                self.insert(Element::parameter(leaf, identifier, format!("{} {}", prefix, id + 1)));
            }
        }
        matrix_path
    }

    /// Add a matrix with no label sub-tree
    pub fn add_bare_matrix(&mut self, index: u32, outputs: u32, inputs: u32) -> TreePath {
        let name = MATRIX_NAMES
            .get(index as usize)
            .copied()
            .unwrap_or("matrix");
        self.insert(Element::node(path(&[1, 2, index]), name));

        let matrix_path = Self::matrix_path(index);
        let mut contents = MatrixContents::new(name, outputs, inputs);
        contents.connections = (0..outputs).map(|t| (t, Connection::new(t, vec![]))).collect();
        self.insert(Element::matrix(matrix_path.clone(), contents));
        matrix_path
    }

    /// Remove an element and everything beneath it
    pub fn remove_subtree(&mut self, root: &TreePath) -> usize {
        let doomed: Vec<TreePath> = self
            .elements
            .keys()
            .filter(|p| p.starts_with(root))
            .cloned()
            .collect();
        for p in &doomed {
            self.elements.remove(p);
        }
        doomed.len()
    }

    /// Remove matrix `index` entirely
    pub fn remove_matrix(&mut self, index: u32) {
        self.remove_subtree(&path(&[1, 2, index]));
    }

    pub fn insert(&mut self, element: Element) {
        self.elements.insert(element.path.clone(), element);
    }

    pub fn get(&self, path: &TreePath) -> Option<&Element> {
        self.elements.get(path)
    }

    /// Direct children, or `None` when the parent does not exist
    pub fn children(&self, parent: &TreePath) -> Option<Vec<Element>> {
        if !parent.is_root() && !self.elements.contains_key(parent) {
            return None;
        }
        Some(
            self.elements
                .values()
                .filter(|e| e.path.is_child_of(parent))
                .cloned()
                .collect(),
        )
    }

    /// Current primary source of a target
    pub fn route(&self, matrix: &TreePath, target: u32) -> Option<u32> {
        self.get(matrix)?
            .as_matrix()?
            .connections
            .get(&target)?
            .primary_source()
    }

    /// Change a crosspoint, returning the delta a device would push
    pub fn set_route(&mut self, matrix: &TreePath, target: u32, sources: Vec<u32>) -> Option<Element> {
        let element = self.elements.get_mut(matrix)?;
        let Contents::Matrix(contents) = &mut element.contents else {
            return None;
        };
        let connection = Connection::new(target, sources);
        contents.connections.insert(target, connection.clone());

        let mut delta = MatrixContents {
            identifier: contents.identifier.clone(),
            target_count: contents.target_count,
            source_count: contents.source_count,
            ..Default::default()
        };
        delta.connections.insert(target, connection);
        Some(Element::matrix(matrix.clone(), delta))
    }

    /// Change a label leaf, returning the element to push
    pub fn set_label(&mut self, leaf: &TreePath, label: &str) -> Option<Element> {
        let element = self.elements.get_mut(leaf)?;
        let Contents::Parameter(param) = &mut element.contents else {
            return None;
        };
        param.value = Value::String(label.to_string());
        Some(element.clone())
    }

    /// Validate and apply a connect command
    pub fn connect(&mut self, command: &ConnectCommand) -> Result<Element, ReplyBody> {
        let Some(matrix) = self.get(&command.path).and_then(Element::as_matrix) else {
            return Err(ReplyBody::error(
                ErrorCode::NotAMatrix,
                format!("{} is not a matrix", command.path),
            ));
        };
        if !matrix.target_ids().contains(&command.target) {
            return Err(ReplyBody::error(
                ErrorCode::InvalidTarget,
                format!("no target {}", command.target),
            ));
        }
        let sources = matrix.source_ids();
        if let Some(bad) = command.sources.iter().find(|s| !sources.contains(s)) {
            return Err(ReplyBody::error(ErrorCode::InvalidSource, format!("no source {}", bad)));
        }

        self.set_route(&command.path, command.target, command.sources.clone())
            .ok_or_else(|| ReplyBody::error(ErrorCode::InternalError, "connect failed"))
    }

    /// Answer one request the way the device does
    pub fn handle(&mut self, request: Message) -> Option<Handled> {
        let id = request.request_id()?;
        let reply = |body| Message::Reply { id, body };
        let not_found = |p: &TreePath| ReplyBody::error(ErrorCode::PathNotFound, format!("{} not found", p));

        let handled = match request {
            Message::GetElement { path, .. } => Handled {
                reply: reply(match self.get(&path) {
                    Some(e) => ReplyBody::Element(e.clone()),
                    None => not_found(&path),
                }),
                initial: None,
                broadcast: None,
            },
            Message::GetDirectory { path, .. } => {
                let parent = if path.is_root() {
                    Some(Element::node(TreePath::root(), "root"))
                } else {
                    self.get(&path).cloned()
                };
                let body = match (parent, self.children(&path)) {
                    (Some(parent), Some(children)) => ReplyBody::Directory { parent, children },
                    _ => not_found(&path),
                };
                Handled {
                    reply: reply(body),
                    initial: None,
                    broadcast: None,
                }
            }
            Message::Subscribe { path, .. } => match self.get(&path) {
                Some(e) => Handled {
                    reply: reply(ReplyBody::Ack),
                    initial: Some(e.clone()),
                    broadcast: None,
                },
                None => Handled {
                    reply: reply(not_found(&path)),
                    initial: None,
                    broadcast: None,
                },
            },
            Message::Unsubscribe { .. } => Handled {
                reply: reply(ReplyBody::Ack),
                initial: None,
                broadcast: None,
            },
            Message::MatrixConnect {
                path,
                target,
                sources,
                ..
            } => {
                let command = ConnectCommand {
                    path,
                    target,
                    sources,
                };
                match self.connect(&command) {
                    Ok(delta) => Handled {
                        reply: reply(ReplyBody::Ack),
                        initial: None,
                        broadcast: Some(delta),
                    },
                    Err(body) => Handled {
                        reply: reply(body),
                        initial: None,
                        broadcast: None,
                    },
                }
            }
            Message::Reply { .. } | Message::Notify { .. } => return None,
        };
        Some(handled)
    }
}

impl Default for DeviceModel {
    fn default() -> Self {
        Self::empty()
    }
}

fn path(segments: &[u32]) -> TreePath {
    TreePath::from_segments(segments.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_layout() {
        let model = DeviceModel::standard(2, 4);
        let video = DeviceModel::matrix_path(0);
        let matrix = model.get(&video).unwrap().as_matrix().unwrap();
        assert_eq!(matrix.target_count, 2);
        assert_eq!(matrix.source_count, 4);
        assert_eq!(matrix.labels[0].base_path, DeviceModel::labels_path(0));

        let targets = model.children(&DeviceModel::labels_path(0).child(1)).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[1].as_parameter().unwrap().value.as_str(), Some("DST 2"));
    }

    #[test]
    fn test_connect_validates_and_returns_delta() {
        let mut model = DeviceModel::standard(2, 4);
        let video = DeviceModel::matrix_path(0);

        let bad = model.connect(&ConnectCommand {
            path: video.clone(),
            target: 7,
            sources: vec![1],
        });
        assert!(bad.is_err());

        let delta = model
            .connect(&ConnectCommand {
                path: video.clone(),
                target: 1,
                sources: vec![3],
            })
            .unwrap();
        assert_eq!(delta.as_matrix().unwrap().connections.len(), 1);
        assert_eq!(model.route(&video, 1), Some(3));
    }

    #[test]
    fn test_removed_matrix_is_not_found() {
        let mut model = DeviceModel::standard(1, 1);
        model.remove_matrix(4);
        let handled = model
            .handle(Message::GetElement {
                id: 1,
                path: DeviceModel::matrix_path(4),
            })
            .unwrap();
        match handled.reply {
            Message::Reply {
                body: ReplyBody::Error { code, .. },
                ..
            } => assert_eq!(code, ErrorCode::PathNotFound as u16),
            other => panic!("unexpected {:?}", other),
        }
    }
}
