//! Panel actions
//!
//! Actions arrive either from an adapter, as an action id plus a JSON options
//! object, or as a text command line. Both parse into [`PanelAction`].
//!
//! Adapter options use per-matrix keys: `source_<index>` / `target_<index>`
//! hold the id for the matrix picked in `matrix`. Next/previous actions set
//! `next_previous_action` and carry the direction in `next_previous`.

use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::{PanelError, Result};
use crate::matrix::MatrixKind;
use crate::routing::Pick;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionId {
    Take,
    Clear,
    Undo,
    SelectSource,
    SelectTarget,
    SelectMatrix,
}

impl ActionId {
    pub const ALL: [ActionId; 6] = [
        ActionId::Take,
        ActionId::Clear,
        ActionId::Undo,
        ActionId::SelectSource,
        ActionId::SelectTarget,
        ActionId::SelectMatrix,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionId::Take => "take",
            ActionId::Clear => "clear",
            ActionId::Undo => "undo",
            ActionId::SelectSource => "select_source",
            ActionId::SelectTarget => "select_target",
            ActionId::SelectMatrix => "select_matrix",
        }
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionId {
    type Err = PanelError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| PanelError::InvalidAction(format!("unknown action '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelAction {
    Take,
    Clear,
    Undo,
    SelectSource {
        /// `None` for next/previous, which walk the selected matrix
        matrix: Option<MatrixKind>,
        pick: Pick,
        direct_take: bool,
    },
    SelectTarget {
        matrix: Option<MatrixKind>,
        pick: Pick,
    },
    SelectMatrix(MatrixKind),
}

impl PanelAction {
    pub fn id(&self) -> ActionId {
        match self {
            PanelAction::Take => ActionId::Take,
            PanelAction::Clear => ActionId::Clear,
            PanelAction::Undo => ActionId::Undo,
            PanelAction::SelectSource { .. } => ActionId::SelectSource,
            PanelAction::SelectTarget { .. } => ActionId::SelectTarget,
            PanelAction::SelectMatrix(_) => ActionId::SelectMatrix,
        }
    }

    /// Parse an adapter action. Legacy ids and options are upgraded first.
    pub fn from_adapter(action_id: &str, options: &Value) -> Result<Self> {
        let (action_id, options) = upgrade_legacy(action_id, options);
        match action_id.parse::<ActionId>()? {
            ActionId::Take => Ok(PanelAction::Take),
            ActionId::Clear => Ok(PanelAction::Clear),
            ActionId::Undo => Ok(PanelAction::Undo),
            ActionId::SelectMatrix => Ok(PanelAction::SelectMatrix(option_matrix(&options)?)),
            ActionId::SelectSource => {
                if option_bool(&options, "next_previous_action") {
                    return Ok(PanelAction::SelectSource {
                        matrix: None,
                        pick: option_direction(&options)?,
                        direct_take: false,
                    });
                }
                let matrix = option_matrix(&options)?;
                Ok(PanelAction::SelectSource {
                    matrix: Some(matrix),
                    pick: Pick::Id(option_endpoint(&options, "source", matrix)?),
                    direct_take: option_bool(&options, "do_take"),
                })
            }
            ActionId::SelectTarget => {
                if option_bool(&options, "next_previous_action") {
                    return Ok(PanelAction::SelectTarget {
                        matrix: None,
                        pick: option_direction(&options)?,
                    });
                }
                let matrix = option_matrix(&options)?;
                Ok(PanelAction::SelectTarget {
                    matrix: Some(matrix),
                    pick: Pick::Id(option_endpoint(&options, "target", matrix)?),
                })
            }
        }
    }
}

impl fmt::Display for PanelAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PanelAction::SelectSource {
                matrix,
                pick,
                direct_take,
            } => {
                write!(f, "select_source {:?} {:?}", matrix, pick)?;
                if *direct_take {
                    f.write_str(" take")?;
                }
                Ok(())
            }
            PanelAction::SelectTarget { matrix, pick } => {
                write!(f, "select_target {:?} {:?}", matrix, pick)
            }
            PanelAction::SelectMatrix(matrix) => write!(f, "select_matrix {}", matrix),
            other => f.write_str(other.id().as_str()),
        }
    }
}

/// Ids that carried the matrix name before `matrix` became an option
const LEGACY_PREFIXES: [(&str, &[&str]); 6] = [
    ("select_target", &["target"]),
    ("select_source", &["source"]),
    ("selected_target", &["target"]),
    ("selected_source", &["source"]),
    ("take_tally_source", &["source"]),
    ("routing_tally", &["source", "target"]),
];

/// Rewrite legacy action and feedback ids and options to the current form.
///
/// `select_target_video { target: 2 }` becomes
/// `select_target { matrix: 0, target_0: 2 }`; a `target`/`source` of
/// `"next"`/`"previous"` moves into `next_previous`. Current ids pass through.
pub fn upgrade_legacy(id: &str, options: &Value) -> (String, Value) {
    let mut opts: Map<String, Value> = options.as_object().cloned().unwrap_or_default();

    if id.starts_with("select_") {
        let direction = ["target", "source"].into_iter().find(|key| {
            matches!(opts.get(*key).and_then(Value::as_str), Some("next" | "previous"))
        });
        match direction {
            Some(key) => {
                let value = opts.remove(key).unwrap_or(Value::Null);
                opts.insert("next_previous_action".into(), Value::Bool(true));
                opts.insert("next_previous".into(), value);
            }
            None => {
                opts.entry("next_previous_action")
                    .or_insert(Value::Bool(false));
            }
        }
    }

    for (prefix, keys) in LEGACY_PREFIXES {
        let Some(suffix) = id.strip_prefix(prefix).and_then(|s| s.strip_prefix('_')) else {
            continue;
        };
        let Some(matrix) = MatrixKind::ALL.into_iter().find(|m| m.name() == suffix) else {
            continue;
        };
        opts.insert("matrix".into(), Value::from(matrix.index()));
        for key in keys {
            if let Some(value) = opts.remove(*key) {
                opts.insert(format!("{}_{}", key, matrix.index()), value);
            }
        }
        return (prefix.to_string(), Value::Object(opts));
    }

    (id.to_string(), Value::Object(opts))
}

/// Truthy option: JSON bool, non-zero number or "true"
pub(crate) fn option_bool(options: &Value, key: &str) -> bool {
    match options.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Non-negative integer option, given as a number or a numeric string.
/// `-1` and missing values are `None`.
pub(crate) fn option_u32(options: &Value, key: &str) -> Result<Option<u32>> {
    let value = match options.get(key) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        Some(_) => None,
    };
    match value {
        Some(-1) => Ok(None),
        Some(v) => u32::try_from(v)
            .map(Some)
            .map_err(|_| PanelError::InvalidAction(format!("option '{}' out of range: {}", key, v))),
        None => Err(PanelError::InvalidAction(format!("option '{}' is not a number", key))),
    }
}

pub(crate) fn option_matrix(options: &Value) -> Result<MatrixKind> {
    match options.get("matrix") {
        Some(Value::String(s)) => s.parse(),
        _ => {
            let index = option_u32(options, "matrix")?
                .ok_or_else(|| PanelError::InvalidAction("missing option 'matrix'".into()))?;
            MatrixKind::from_index(index as usize)
                .ok_or_else(|| PanelError::InvalidAction(format!("no matrix {}", index)))
        }
    }
}

/// The `<side>_<index>` option for `matrix`
pub(crate) fn option_endpoint(options: &Value, side: &str, matrix: MatrixKind) -> Result<u32> {
    let key = format!("{}_{}", side, matrix.index());
    option_u32(options, &key)?
        .ok_or_else(|| PanelError::InvalidSelection(format!("no {} picked on {}", side, matrix)))
}

fn option_direction(options: &Value) -> Result<Pick> {
    match options.get("next_previous").and_then(Value::as_str) {
        Some("next") => Ok(Pick::Next),
        Some("previous") => Ok(Pick::Previous),
        other => Err(PanelError::InvalidAction(format!(
            "next_previous must be 'next' or 'previous', got {:?}",
            other
        ))),
    }
}

/// A text command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelCommand {
    Action(PanelAction),
    /// Print selection and feedbacks
    Status,
}

impl FromStr for PanelCommand {
    type Err = PanelError;

    /// `take`, `clear`, `undo`, `status`, `matrix <m>`,
    /// `target [<m>] <id|next|previous>`, `source [<m>] <id|next|previous> [take]`
    fn from_str(line: &str) -> Result<Self> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&command, args)) = words.split_first() else {
            return Err(PanelError::InvalidAction("empty command".into()));
        };

        let action = match (command.to_ascii_lowercase().as_str(), args) {
            ("status", []) => return Ok(PanelCommand::Status),
            ("take", []) => PanelAction::Take,
            ("clear", []) => PanelAction::Clear,
            ("undo", []) => PanelAction::Undo,
            ("matrix", [matrix]) => PanelAction::SelectMatrix(matrix.parse()?),
            ("target", args) => {
                let (matrix, pick) = parse_endpoint_args(args)?;
                PanelAction::SelectTarget { matrix, pick }
            }
            ("source", args) => {
                let (args, direct_take) = match args.split_last() {
                    Some((last, rest)) if last.eq_ignore_ascii_case("take") => (rest, true),
                    _ => (args, false),
                };
                let (matrix, pick) = parse_endpoint_args(args)?;
                PanelAction::SelectSource {
                    matrix,
                    pick,
                    direct_take,
                }
            }
            _ => {
                return Err(PanelError::InvalidAction(format!(
                    "unrecognised command '{}'",
                    line.trim()
                )))
            }
        };
        Ok(PanelCommand::Action(action))
    }
}

fn parse_endpoint_args(args: &[&str]) -> Result<(Option<MatrixKind>, Pick)> {
    match args {
        [pick] => match pick.parse()? {
            Pick::Id(_) => Err(PanelError::InvalidAction(format!(
                "'{}' needs a matrix",
                pick
            ))),
            pick => Ok((None, pick)),
        },
        [matrix, pick] => Ok((Some(matrix.parse()?), pick.parse()?)),
        _ => Err(PanelError::InvalidAction(
            "expected [<matrix>] <id|next|previous>".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_adapter_actions() {
        assert_eq!(
            PanelAction::from_adapter("take", &json!({})).unwrap(),
            PanelAction::Take
        );
        assert_eq!(
            PanelAction::from_adapter("select_matrix", &json!({ "matrix": 4 })).unwrap(),
            PanelAction::SelectMatrix(MatrixKind::Gpio)
        );
        assert_eq!(
            PanelAction::from_adapter(
                "select_source",
                &json!({ "next_previous_action": false, "matrix": 1, "source_1": "7", "do_take": true })
            )
            .unwrap(),
            PanelAction::SelectSource {
                matrix: Some(MatrixKind::Audio),
                pick: Pick::Id(7),
                direct_take: true,
            }
        );
        assert_eq!(
            PanelAction::from_adapter(
                "select_target",
                &json!({ "next_previous_action": true, "next_previous": "previous" })
            )
            .unwrap(),
            PanelAction::SelectTarget {
                matrix: None,
                pick: Pick::Previous,
            }
        );
    }

    #[test]
    fn test_unset_target_is_invalid_selection() {
        let err = PanelAction::from_adapter("select_target", &json!({ "matrix": 0, "target_0": -1 }))
            .unwrap_err();
        assert!(err.is_ignorable());

        let err = PanelAction::from_adapter("select_target", &json!({ "matrix": 9 })).unwrap_err();
        assert!(matches!(err, PanelError::InvalidAction(_)));
        assert!(PanelAction::from_adapter("launch", &json!({})).is_err());
    }

    #[test]
    fn test_upgrade_legacy_ids() {
        let (id, options) = upgrade_legacy("select_target_audio", &json!({ "target": 3 }));
        assert_eq!(id, "select_target");
        assert_eq!(
            options,
            json!({ "matrix": 1, "target_1": 3, "next_previous_action": false })
        );

        let (id, options) = upgrade_legacy("select_source_video", &json!({ "source": "next" }));
        assert_eq!(id, "select_source");
        assert_eq!(options["next_previous_action"], json!(true));
        assert_eq!(options["next_previous"], json!("next"));
        assert!(options.get("source_0").is_none());

        let (id, options) =
            upgrade_legacy("routing_tally_gpio", &json!({ "source": 1, "target": 2 }));
        assert_eq!(id, "routing_tally");
        assert_eq!(options, json!({ "matrix": 4, "source_4": 1, "target_4": 2 }));
    }

    #[test]
    fn test_upgrade_leaves_current_ids_alone() {
        let options = json!({ "next_previous_action": true, "next_previous": "next" });
        let (id, upgraded) = upgrade_legacy("select_target", &options);
        assert_eq!(id, "select_target");
        assert_eq!(upgraded, options);

        let (id, _) = upgrade_legacy("select_target_lighting", &json!({}));
        assert_eq!(id, "select_target_lighting");
    }

    #[test]
    fn test_legacy_action_parses() {
        let action =
            PanelAction::from_adapter("select_source_multichannelaudio", &json!({ "source": 2 }))
                .unwrap();
        assert_eq!(
            action,
            PanelAction::SelectSource {
                matrix: Some(MatrixKind::MultiChannelAudio),
                pick: Pick::Id(2),
                direct_take: false,
            }
        );
    }

    #[test]
    fn test_text_commands() {
        let parse = |s: &str| s.parse::<PanelCommand>().unwrap();
        assert_eq!(parse("status"), PanelCommand::Status);
        assert_eq!(parse(" take "), PanelCommand::Action(PanelAction::Take));
        assert_eq!(
            parse("matrix audio"),
            PanelCommand::Action(PanelAction::SelectMatrix(MatrixKind::Audio))
        );
        assert_eq!(
            parse("target video 0"),
            PanelCommand::Action(PanelAction::SelectTarget {
                matrix: Some(MatrixKind::Video),
                pick: Pick::Id(0),
            })
        );
        assert_eq!(
            parse("target next"),
            PanelCommand::Action(PanelAction::SelectTarget {
                matrix: None,
                pick: Pick::Next,
            })
        );
        assert_eq!(
            parse("source 0 5 take"),
            PanelCommand::Action(PanelAction::SelectSource {
                matrix: Some(MatrixKind::Video),
                pick: Pick::Id(5),
                direct_take: true,
            })
        );

        assert!("source 5".parse::<PanelCommand>().is_err());
        assert!("take now".parse::<PanelCommand>().is_err());
        assert!("".parse::<PanelCommand>().is_err());
    }
}
