//! Read-only control surface: feedbacks, variables and dropdown choices
//!
//! Everything here is a pure read of the selection and the mirrors, cheap
//! enough to re-run on every [`PanelEvent`](crate::PanelEvent).

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::actions::{option_endpoint, option_matrix, upgrade_legacy};
use crate::error::{PanelError, Result};
use crate::matrix::{MatrixKind, Output};
use crate::routing::{RoutingOrchestrator, Selection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedbackId {
    Take,
    Clear,
    Undo,
    SelectedSource,
    SelectedTarget,
    TakeTallySource,
    RoutingTally,
    SelectedMatrix,
}

impl FeedbackId {
    pub const ALL: [FeedbackId; 8] = [
        FeedbackId::Take,
        FeedbackId::Clear,
        FeedbackId::Undo,
        FeedbackId::SelectedSource,
        FeedbackId::SelectedTarget,
        FeedbackId::TakeTallySource,
        FeedbackId::RoutingTally,
        FeedbackId::SelectedMatrix,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FeedbackId::Take => "take",
            FeedbackId::Clear => "clear",
            FeedbackId::Undo => "undo",
            FeedbackId::SelectedSource => "selected_source",
            FeedbackId::SelectedTarget => "selected_target",
            FeedbackId::TakeTallySource => "take_tally_source",
            FeedbackId::RoutingTally => "routing_tally",
            FeedbackId::SelectedMatrix => "selected_matrix",
        }
    }
}

impl fmt::Display for FeedbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedbackId {
    type Err = PanelError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| PanelError::InvalidAction(format!("unknown feedback '{}'", s)))
    }
}

/// A boolean feedback with its parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    TakePossible,
    ClearPossible,
    UndoPossible,
    SourceSelected { matrix: MatrixKind, source: u32 },
    TargetSelected { matrix: MatrixKind, target: u32 },
    SourceRoutedToSelectedTarget { matrix: MatrixKind, source: u32 },
    CrosspointIsSet { matrix: MatrixKind, source: u32, target: u32 },
    MatrixSelected(MatrixKind),
}

impl Feedback {
    /// Parse an adapter feedback id and options, upgrading legacy forms
    pub fn from_adapter(feedback_id: &str, options: &Value) -> Result<Self> {
        let (feedback_id, options) = upgrade_legacy(feedback_id, options);
        let feedback = match feedback_id.parse::<FeedbackId>()? {
            FeedbackId::Take => Feedback::TakePossible,
            FeedbackId::Clear => Feedback::ClearPossible,
            FeedbackId::Undo => Feedback::UndoPossible,
            FeedbackId::SelectedSource => {
                let matrix = option_matrix(&options)?;
                Feedback::SourceSelected {
                    matrix,
                    source: option_endpoint(&options, "source", matrix)?,
                }
            }
            FeedbackId::SelectedTarget => {
                let matrix = option_matrix(&options)?;
                Feedback::TargetSelected {
                    matrix,
                    target: option_endpoint(&options, "target", matrix)?,
                }
            }
            FeedbackId::TakeTallySource => {
                let matrix = option_matrix(&options)?;
                Feedback::SourceRoutedToSelectedTarget {
                    matrix,
                    source: option_endpoint(&options, "source", matrix)?,
                }
            }
            FeedbackId::RoutingTally => {
                let matrix = option_matrix(&options)?;
                Feedback::CrosspointIsSet {
                    matrix,
                    source: option_endpoint(&options, "source", matrix)?,
                    target: option_endpoint(&options, "target", matrix)?,
                }
            }
            FeedbackId::SelectedMatrix => Feedback::MatrixSelected(option_matrix(&options)?),
        };
        Ok(feedback)
    }
}

/// Variable id with its description
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariableDefinition {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ChoiceId {
    Number(u32),
    Text(&'static str),
}

/// One dropdown entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Choice {
    pub id: ChoiceId,
    pub label: String,
}

impl Choice {
    fn number(id: u32, label: impl Into<String>) -> Self {
        Self {
            id: ChoiceId::Number(id),
            label: label.into(),
        }
    }
}

/// Dropdown contents, indexed by [`MatrixKind::index`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Choices {
    pub inputs: Vec<Vec<Choice>>,
    pub outputs: Vec<Vec<Choice>>,
    pub matrices: Vec<Choice>,
    pub next_previous: Vec<Choice>,
}

const UNKNOWN_LABEL: &str = "?";

#[derive(Clone)]
pub struct Surface {
    routing: Arc<RoutingOrchestrator>,
}

impl Surface {
    pub fn new(routing: Arc<RoutingOrchestrator>) -> Self {
        Self { routing }
    }

    fn selection(&self) -> Selection {
        self.routing.selection()
    }

    /// Output under the selection cursor
    pub fn selected_output(&self) -> Option<Output> {
        let selection = self.selection();
        let (matrix, target) = (selection.matrix?, selection.target?);
        self.routing
            .mirrors()
            .with_matrix(matrix, |m| m.output(target).cloned())
    }

    fn route(&self, matrix: MatrixKind, target: u32) -> Option<u32> {
        self.routing
            .mirrors()
            .with_matrix(matrix, |m| m.output(target).and_then(|o| o.route))
    }

    /// Complete selection whose source is not already routed to the target
    pub fn take_possible(&self) -> bool {
        let selection = self.selection();
        let (Some(matrix), Some(source), Some(target)) =
            (selection.matrix, selection.source, selection.target)
        else {
            return false;
        };
        self.route(matrix, target) != Some(source)
    }

    pub fn clear_possible(&self) -> bool {
        !self.selection().is_empty()
    }

    pub fn undo_possible(&self) -> bool {
        self.selected_output()
            .is_some_and(|o| o.undo_candidate().is_some())
    }

    pub fn source_selected(&self, matrix: MatrixKind, source: u32) -> bool {
        let selection = self.selection();
        selection.matrix == Some(matrix) && selection.source == Some(source)
    }

    pub fn target_selected(&self, matrix: MatrixKind, target: u32) -> bool {
        let selection = self.selection();
        selection.matrix == Some(matrix) && selection.target == Some(target)
    }

    /// `source` is what the device currently routes to the selected target
    pub fn source_routed_to_selected_target(&self, matrix: MatrixKind, source: u32) -> bool {
        let selection = self.selection();
        match (selection.matrix, selection.target) {
            (Some(selected), Some(target)) if selected == matrix => {
                self.route(matrix, target) == Some(source)
            }
            _ => false,
        }
    }

    pub fn crosspoint_is_set(&self, matrix: MatrixKind, source: u32, target: u32) -> bool {
        self.route(matrix, target) == Some(source)
    }

    pub fn matrix_selected(&self, matrix: MatrixKind) -> bool {
        self.selection().matrix == Some(matrix)
    }

    pub fn feedback(&self, feedback: &Feedback) -> bool {
        match *feedback {
            Feedback::TakePossible => self.take_possible(),
            Feedback::ClearPossible => self.clear_possible(),
            Feedback::UndoPossible => self.undo_possible(),
            Feedback::SourceSelected { matrix, source } => self.source_selected(matrix, source),
            Feedback::TargetSelected { matrix, target } => self.target_selected(matrix, target),
            Feedback::SourceRoutedToSelectedTarget { matrix, source } => {
                self.source_routed_to_selected_target(matrix, source)
            }
            Feedback::CrosspointIsSet {
                matrix,
                source,
                target,
            } => self.crosspoint_is_set(matrix, source, target),
            Feedback::MatrixSelected(matrix) => self.matrix_selected(matrix),
        }
    }

    /// Evaluate an adapter feedback. Options that select nothing read as false.
    pub fn feedback_for(&self, feedback_id: &str, options: &Value) -> Result<bool> {
        match Feedback::from_adapter(feedback_id, options) {
            Ok(feedback) => Ok(self.feedback(&feedback)),
            Err(e) if e.is_ignorable() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// All variable ids for the active endpoints
    pub fn variable_definitions(&self) -> Vec<VariableDefinition> {
        let mut definitions = Vec::new();
        for kind in MatrixKind::ALL {
            self.routing.mirrors().with_matrix(kind, |m| {
                for &id in m.input_order() {
                    let n = u64::from(id) + 1;
                    definitions.push(VariableDefinition {
                        id: format!("input_{}_{}", kind.name(), n),
                        name: format!("Label of input {} {}", kind.label(), n),
                    });
                }
                for &id in m.output_order() {
                    let n = u64::from(id) + 1;
                    definitions.push(VariableDefinition {
                        id: format!("output_{}_{}", kind.name(), n),
                        name: format!("Label of output {} {}", kind.label(), n),
                    });
                    definitions.push(VariableDefinition {
                        id: format!("output_{}_{}_input", kind.name(), n),
                        name: format!("Label of input routed to {} output {}", kind.label(), n),
                    });
                }
            });
        }
        for (id, name) in [
            ("selected_target", "Label of selected destination"),
            ("selected_target_source", "Label of input routed to selection"),
            ("selected_target_undo_source", "Label of undo source"),
        ] {
            definitions.push(VariableDefinition {
                id: id.to_string(),
                name: name.to_string(),
            });
        }
        definitions
    }

    /// Current value of every variable
    pub fn variables(&self) -> BTreeMap<String, String> {
        let mut values = BTreeMap::new();
        for kind in MatrixKind::ALL {
            self.routing.mirrors().with_matrix(kind, |m| {
                for input in m.inputs().filter(|i| i.active) {
                    values.insert(
                        format!("input_{}_{}", kind.name(), u64::from(input.id) + 1),
                        input.label.clone(),
                    );
                }
                for output in m.outputs().filter(|o| o.active) {
                    let n = u64::from(output.id) + 1;
                    values.insert(format!("output_{}_{}", kind.name(), n), output.label.clone());
                    let routed = m
                        .routed_input(output.id)
                        .map_or(UNKNOWN_LABEL, |i| i.label.as_str());
                    values.insert(format!("output_{}_{}_input", kind.name(), n), routed.to_string());
                }
            });
        }
        values.extend(self.selection_variables());
        values
    }

    /// One variable by id
    pub fn variable(&self, id: &str) -> Option<String> {
        if id.starts_with("selected_target") {
            return self
                .selection_variables()
                .into_iter()
                .find(|(k, _)| k == id)
                .map(|(_, v)| v);
        }
        self.variables().remove(id)
    }

    /// `selected_target`, `selected_target_source` and `selected_target_undo_source`
    pub fn selection_variables(&self) -> [(String, String); 3] {
        let selection = self.selection();
        let (target, source, undo) = match (selection.matrix, selection.target) {
            (Some(matrix), Some(target)) => self.routing.mirrors().with_matrix(matrix, |m| {
                let output = m.output(target);
                let label = |id: Option<u32>| id.and_then(|id| m.input(id)).map(|i| i.label.clone());
                (
                    output.map(|o| o.label.clone()),
                    label(output.and_then(|o| o.route)),
                    label(output.and_then(Output::undo_candidate)),
                )
            }),
            _ => (None, None, None),
        };
        [
            (
                "selected_target".to_string(),
                target.unwrap_or_else(|| UNKNOWN_LABEL.to_string()),
            ),
            (
                "selected_target_source".to_string(),
                source.unwrap_or_else(|| UNKNOWN_LABEL.to_string()),
            ),
            ("selected_target_undo_source".to_string(), undo.unwrap_or_default()),
        ]
    }

    /// Dropdown choices for actions and feedbacks
    pub fn choices(&self) -> Choices {
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        for kind in MatrixKind::ALL {
            self.routing.mirrors().with_matrix(kind, |m| {
                inputs.push(
                    m.inputs()
                        .filter(|i| i.active)
                        .map(|i| Choice::number(i.id, i.label.clone()))
                        .collect(),
                );
                outputs.push(
                    m.outputs()
                        .filter(|o| o.active)
                        .map(|o| Choice::number(o.id, o.label.clone()))
                        .collect(),
                );
            });
        }

        Choices {
            inputs,
            outputs,
            matrices: MatrixKind::ALL
                .into_iter()
                .map(|k| Choice::number(k.index() as u32, k.label()))
                .collect(),
            next_previous: vec![
                Choice {
                    id: ChoiceId::Text("next"),
                    label: "NEXT".to_string(),
                },
                Choice {
                    id: ChoiceId::Text("previous"),
                    label: "PREVIOUS".to_string(),
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_feedback_ids_round_trip() {
        for id in FeedbackId::ALL {
            assert_eq!(id.as_str().parse::<FeedbackId>().unwrap(), id);
        }
        assert!("blink".parse::<FeedbackId>().is_err());
    }

    #[test]
    fn test_parse_feedbacks() {
        assert_eq!(
            Feedback::from_adapter("routing_tally", &json!({ "matrix": 2, "source_2": 1, "target_2": "3" }))
                .unwrap(),
            Feedback::CrosspointIsSet {
                matrix: MatrixKind::Data,
                source: 1,
                target: 3,
            }
        );
        assert_eq!(
            Feedback::from_adapter("take_tally_source_audio", &json!({ "source": 4 })).unwrap(),
            Feedback::SourceRoutedToSelectedTarget {
                matrix: MatrixKind::Audio,
                source: 4,
            }
        );
        assert_eq!(
            Feedback::from_adapter("selected_matrix", &json!({ "matrix": "gpio" })).unwrap(),
            Feedback::MatrixSelected(MatrixKind::Gpio)
        );
    }

    #[test]
    fn test_choice_serialization() {
        let choice = Choice::number(3, "SRC 4");
        assert_eq!(
            serde_json::to_value(&choice).unwrap(),
            json!({ "id": 3, "label": "SRC 4" })
        );
        let next = Choice {
            id: ChoiceId::Text("next"),
            label: "NEXT".into(),
        };
        assert_eq!(serde_json::to_value(&next).unwrap()["id"], json!("next"));
    }
}
