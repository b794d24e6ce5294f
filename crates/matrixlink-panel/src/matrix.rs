//! Local shadow of one switching matrix
//!
//! Routes and history only change through [`Matrix::apply_connections`], which
//! is fed by device pushes. Nothing here guesses a route locally.

use matrixlink_core::{MatrixContents, TreePath};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use crate::error::PanelError;

/// Default bound on per-output route history
pub const DEFAULT_HISTORY_LIMIT: usize = 16;

/// The five logical matrices of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatrixKind {
    Video,
    Audio,
    Data,
    MultiChannelAudio,
    Gpio,
}

impl MatrixKind {
    pub const ALL: [MatrixKind; 5] = [
        MatrixKind::Video,
        MatrixKind::Audio,
        MatrixKind::Data,
        MatrixKind::MultiChannelAudio,
        MatrixKind::Gpio,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Display label
    pub fn label(self) -> &'static str {
        match self {
            MatrixKind::Video => "Video",
            MatrixKind::Audio => "Audio",
            MatrixKind::Data => "Data",
            MatrixKind::MultiChannelAudio => "Multi Channel Audio",
            MatrixKind::Gpio => "GPIO",
        }
    }

    /// Name used in variable ids and text commands
    pub fn name(self) -> &'static str {
        match self {
            MatrixKind::Video => "video",
            MatrixKind::Audio => "audio",
            MatrixKind::Data => "data",
            MatrixKind::MultiChannelAudio => "multichannelaudio",
            MatrixKind::Gpio => "gpio",
        }
    }

    /// Path of the matrix element on the device (`1.2.<index>.3`)
    pub fn base_path(self) -> TreePath {
        TreePath::from_segments(vec![1, 2, self.index() as u32, 3])
    }
}

impl fmt::Display for MatrixKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MatrixKind {
    type Err = PanelError;

    /// Accepts the index, the name or the label, case-insensitively
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(index) = s.parse::<usize>() {
            return Self::from_index(index)
                .ok_or_else(|| PanelError::InvalidAction(format!("no matrix {}", index)));
        }
        Self::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(s) || k.label().eq_ignore_ascii_case(s))
            .ok_or_else(|| PanelError::InvalidAction(format!("unknown matrix '{}'", s)))
    }
}

/// Which side of a matrix an endpoint sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Input,
    Output,
}

/// An input slot
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub id: u32,
    pub label: String,
    pub name: String,
    pub active: bool,
}

impl Endpoint {
    fn input(id: u32) -> Self {
        let label = format!("Input {}", u64::from(id) + 1);
        Self {
            id,
            name: label.clone(),
            label,
            active: true,
        }
    }
}

/// An output slot with its route
#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub id: u32,
    pub label: String,
    pub name: String,
    pub active: bool,
    /// Input currently connected, as last pushed by the device
    pub route: Option<u32>,
    /// Route values, most recent last
    pub history: VecDeque<u32>,
}

impl Output {
    fn new(id: u32) -> Self {
        let label = format!("Output {}", u64::from(id) + 1);
        Self {
            id,
            name: label.clone(),
            label,
            active: true,
            route: None,
            history: VecDeque::new(),
        }
    }

    /// The route an undo would restore
    pub fn undo_candidate(&self) -> Option<u32> {
        let len = self.history.len();
        if len >= 2 {
            self.history.get(len - 2).copied()
        } else {
            None
        }
    }
}

/// Shadow of one matrix
#[derive(Debug, Clone)]
pub struct Matrix {
    kind: MatrixKind,
    inputs: BTreeMap<u32, Endpoint>,
    outputs: BTreeMap<u32, Output>,
    input_order: Vec<u32>,
    output_order: Vec<u32>,
    history_limit: usize,
}

impl Matrix {
    pub fn new(kind: MatrixKind, history_limit: usize) -> Self {
        Self {
            kind,
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            input_order: Vec::new(),
            output_order: Vec::new(),
            history_limit: history_limit.max(2),
        }
    }

    pub fn kind(&self) -> MatrixKind {
        self.kind
    }

    pub fn base_path(&self) -> TreePath {
        self.kind.base_path()
    }

    /// Fill from configured counts, ids `0..count`
    pub fn populate_offline(&mut self, inputs: u32, outputs: u32) {
        self.rebuild((0..inputs).collect(), (0..outputs).collect());
    }

    /// Replace both endpoint tables. Routes start unrouted, history empty.
    pub fn rebuild(&mut self, source_ids: Vec<u32>, target_ids: Vec<u32>) {
        self.inputs = source_ids.into_iter().map(|id| (id, Endpoint::input(id))).collect();
        self.outputs = target_ids.into_iter().map(|id| (id, Output::new(id))).collect();
        self.rebuild_orders();
    }

    pub fn input(&self, id: u32) -> Option<&Endpoint> {
        self.inputs.get(&id)
    }

    pub fn output(&self, id: u32) -> Option<&Output> {
        self.outputs.get(&id)
    }

    pub fn inputs(&self) -> impl Iterator<Item = &Endpoint> {
        self.inputs.values()
    }

    pub fn outputs(&self) -> impl Iterator<Item = &Output> {
        self.outputs.values()
    }

    /// Active input ids, ascending
    pub fn input_order(&self) -> &[u32] {
        &self.input_order
    }

    /// Active output ids, ascending
    pub fn output_order(&self) -> &[u32] {
        &self.output_order
    }

    pub fn is_active_input(&self, id: u32) -> bool {
        self.inputs.get(&id).is_some_and(|e| e.active)
    }

    pub fn is_active_output(&self, id: u32) -> bool {
        self.outputs.get(&id).is_some_and(|o| o.active)
    }

    /// Table sizes as (inputs, outputs)
    pub fn counts(&self) -> (usize, usize) {
        (self.inputs.len(), self.outputs.len())
    }

    /// Input currently routed to an output
    pub fn routed_input(&self, output: u32) -> Option<&Endpoint> {
        self.output(output)
            .and_then(|o| o.route)
            .and_then(|id| self.input(id))
    }

    /// Apply pushed connections, returning the outputs whose route changed.
    ///
    /// Only a differing first source counts as a change. Connections for
    /// outputs we do not know are ignored.
    pub fn apply_connections(&mut self, contents: &MatrixContents) -> Vec<u32> {
        let mut changed = Vec::new();
        for (target, connection) in &contents.connections {
            let Some(output) = self.outputs.get_mut(target) else {
                continue;
            };
            let source = connection.primary_source();
            if output.route == source {
                continue;
            }
            output.route = source;
            if let Some(source) = source {
                output.history.push_back(source);
                while output.history.len() > self.history_limit {
                    output.history.pop_front();
                }
            }
            changed.push(*target);
        }
        changed
    }

    /// Set label and name of a slot. Returns true when something changed.
    pub fn set_label(&mut self, side: Side, id: u32, label: &str, name: Option<&str>) -> bool {
        let (slot_label, slot_name) = match side {
            Side::Input => match self.inputs.get_mut(&id) {
                Some(e) => (&mut e.label, &mut e.name),
                None => return false,
            },
            Side::Output => match self.outputs.get_mut(&id) {
                Some(o) => (&mut o.label, &mut o.name),
                None => return false,
            },
        };

        let mut changed = false;
        if slot_label.as_str() != label {
            *slot_label = label.to_string();
            changed = true;
        }
        if let Some(name) = name {
            if slot_name.as_str() != name {
                *slot_name = name.to_string();
                changed = true;
            }
        }
        changed
    }

    /// Mark every slot on `side` without an id in `present` inactive
    pub fn retain_active(&mut self, side: Side, present: &[u32]) {
        match side {
            Side::Input => {
                for (id, endpoint) in self.inputs.iter_mut() {
                    endpoint.active = present.contains(id);
                }
            }
            Side::Output => {
                for (id, output) in self.outputs.iter_mut() {
                    output.active = present.contains(id);
                }
            }
        }
        self.rebuild_orders();
    }

    /// Pop the current and previous route of an output for undo.
    /// Returns the previous route; does nothing with fewer than two entries.
    pub fn pop_undo(&mut self, output: u32) -> Option<u32> {
        let output = self.outputs.get_mut(&output)?;
        if output.history.len() < 2 {
            return None;
        }
        output.history.pop_back();
        output.history.pop_back()
    }

    fn rebuild_orders(&mut self) {
        // BTreeMap iteration is already ascending
        self.input_order = self
            .inputs
            .values()
            .filter(|e| e.active)
            .map(|e| e.id)
            .collect();
        self.output_order = self
            .outputs
            .values()
            .filter(|o| o.active)
            .map(|o| o.id)
            .collect();
    }
}
