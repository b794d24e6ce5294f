//! Option schemas for actions and feedbacks
//!
//! Which option fields an adapter should show is plain data: a list of
//! fields plus [`OptionRule`]s saying a field is visible only while another
//! option satisfies a predicate. A field with several rules needs all of them.

use serde::Serialize;
use serde_json::Value;

use crate::actions::{option_bool, ActionId};
use crate::matrix::MatrixKind;
use crate::surface::{Choice, Choices, FeedbackId};

/// Where a dropdown gets its entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "source", content = "matrix", rename_all = "snake_case")]
pub enum ChoiceSource {
    Matrices,
    Inputs(MatrixKind),
    Outputs(MatrixKind),
    NextPrevious,
}

impl ChoiceSource {
    pub fn resolve<'a>(&self, choices: &'a Choices) -> &'a [Choice] {
        match *self {
            ChoiceSource::Matrices => &choices.matrices,
            ChoiceSource::Inputs(m) => choices
                .inputs
                .get(m.index())
                .map(Vec::as_slice)
                .unwrap_or(&[]),
            ChoiceSource::Outputs(m) => choices
                .outputs
                .get(m.index())
                .map(Vec::as_slice)
                .unwrap_or(&[]),
            ChoiceSource::NextPrevious => &choices.next_previous,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Checkbox,
    Dropdown { choices: ChoiceSource },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionField {
    pub id: String,
    pub label: String,
    #[serde(flatten)]
    pub kind: FieldKind,
    pub default: Value,
}

impl OptionField {
    fn checkbox(id: &str, label: &str) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            kind: FieldKind::Checkbox,
            default: Value::Bool(false),
        }
    }

    fn dropdown(id: impl Into<String>, label: impl Into<String>, choices: ChoiceSource) -> Self {
        let default = match choices {
            ChoiceSource::NextPrevious => Value::from("next"),
            _ => Value::from(0),
        };
        Self {
            id: id.into(),
            label: label.into(),
            kind: FieldKind::Dropdown { choices },
            default,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum Predicate {
    /// Equal after numeric coercion, so `"1"` matches `1`
    Equals(Value),
    IsTrue,
    /// Also holds when the option is missing
    IsFalse,
}

impl Predicate {
    pub fn holds(&self, options: &Value, key: &str) -> bool {
        match self {
            Predicate::IsTrue => option_bool(options, key),
            Predicate::IsFalse => !option_bool(options, key),
            Predicate::Equals(expected) => options
                .get(key)
                .is_some_and(|actual| loose_eq(actual, expected)),
        }
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    fn number(v: &Value) -> Option<f64> {
        match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
    match (number(a), number(b)) {
        (Some(a), Some(b)) => a == b,
        _ => a == b,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionRule {
    pub field: String,
    pub depends_on: String,
    pub predicate: Predicate,
}

impl OptionRule {
    fn new(field: impl Into<String>, depends_on: &str, predicate: Predicate) -> Self {
        Self {
            field: field.into(),
            depends_on: depends_on.to_string(),
            predicate,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OptionSchema {
    pub fields: Vec<OptionField>,
    pub rules: Vec<OptionRule>,
}

impl OptionSchema {
    pub fn field(&self, id: &str) -> Option<&OptionField> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// Whether `field` should be shown for the current option values
    pub fn is_visible(&self, field: &str, options: &Value) -> bool {
        self.rules
            .iter()
            .filter(|rule| rule.field == field)
            .all(|rule| rule.predicate.holds(options, &rule.depends_on))
    }

    pub fn visible_fields(&self, options: &Value) -> Vec<&OptionField> {
        self.fields
            .iter()
            .filter(|f| self.is_visible(&f.id, options))
            .collect()
    }

    /// One `<side>_<index>` dropdown per matrix, each visible only while
    /// `matrix` picks it
    fn add_per_matrix(&mut self, side: &str) {
        for kind in MatrixKind::ALL {
            let (label, choices) = match side {
                "source" => (format!("{} Source", kind.label()), ChoiceSource::Inputs(kind)),
                _ => (format!("{} Target", kind.label()), ChoiceSource::Outputs(kind)),
            };
            let id = format!("{}_{}", side, kind.index());
            self.fields.push(OptionField::dropdown(id.clone(), label, choices));
            self.rules.push(OptionRule::new(
                id,
                "matrix",
                Predicate::Equals(Value::from(kind.index())),
            ));
        }
    }

    fn add_matrix(&mut self) {
        self.fields
            .push(OptionField::dropdown("matrix", "Matrix", ChoiceSource::Matrices));
    }

    /// Hide every field but the direction toggle while next/previous is on
    fn add_next_previous(&mut self) {
        let direction = "next_previous";
        let toggle = "next_previous_action";
        for field in &self.fields {
            self.rules
                .push(OptionRule::new(field.id.clone(), toggle, Predicate::IsFalse));
        }
        self.fields
            .insert(0, OptionField::checkbox(toggle, "Next/previous"));
        self.fields.insert(
            1,
            OptionField::dropdown(direction, "Direction", ChoiceSource::NextPrevious),
        );
        self.rules
            .push(OptionRule::new(direction, toggle, Predicate::IsTrue));
    }
}

pub fn action_schema(id: ActionId) -> OptionSchema {
    let mut schema = OptionSchema::default();
    match id {
        ActionId::Take | ActionId::Clear | ActionId::Undo => {}
        ActionId::SelectMatrix => schema.add_matrix(),
        ActionId::SelectSource => {
            schema.fields.push(OptionField::checkbox("do_take", "Take"));
            schema.add_matrix();
            schema.add_per_matrix("source");
            schema.add_next_previous();
        }
        ActionId::SelectTarget => {
            schema.add_matrix();
            schema.add_per_matrix("target");
            schema.add_next_previous();
        }
    }
    schema
}

pub fn feedback_schema(id: FeedbackId) -> OptionSchema {
    let mut schema = OptionSchema::default();
    match id {
        FeedbackId::Take | FeedbackId::Clear | FeedbackId::Undo => {}
        FeedbackId::SelectedMatrix => schema.add_matrix(),
        FeedbackId::SelectedSource | FeedbackId::TakeTallySource => {
            schema.add_matrix();
            schema.add_per_matrix("source");
        }
        FeedbackId::SelectedTarget => {
            schema.add_matrix();
            schema.add_per_matrix("target");
        }
        FeedbackId::RoutingTally => {
            schema.add_matrix();
            schema.add_per_matrix("source");
            schema.add_per_matrix("target");
        }
    }
    schema
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn visible(schema: &OptionSchema, options: Value) -> Vec<String> {
        schema
            .visible_fields(&options)
            .into_iter()
            .map(|f| f.id.clone())
            .collect()
    }

    #[test]
    fn test_select_source_visibility() {
        let schema = action_schema(ActionId::SelectSource);

        assert_eq!(
            visible(&schema, json!({ "next_previous_action": false, "matrix": 1 })),
            vec!["next_previous_action", "do_take", "matrix", "source_1"]
        );
        assert_eq!(
            visible(&schema, json!({ "next_previous_action": true, "matrix": 1 })),
            vec!["next_previous_action", "next_previous"]
        );
        // string matrix values from adapters still match
        assert!(schema.is_visible("source_3", &json!({ "matrix": "3" })));
    }

    #[test]
    fn test_routing_tally_shows_both_sides() {
        let schema = feedback_schema(FeedbackId::RoutingTally);
        assert_eq!(
            visible(&schema, json!({ "matrix": 4 })),
            vec!["matrix", "source_4", "target_4"]
        );
        assert!(feedback_schema(FeedbackId::Take).fields.is_empty());
    }

    #[test]
    fn test_field_defaults_and_serialization() {
        let schema = action_schema(ActionId::SelectTarget);
        assert_eq!(schema.field("next_previous").unwrap().default, json!("next"));
        assert_eq!(schema.field("target_2").unwrap().label, "Data Target");

        let field = serde_json::to_value(schema.field("target_0").unwrap()).unwrap();
        assert_eq!(field["type"], json!("dropdown"));
        assert_eq!(field["choices"], json!({ "source": "outputs", "matrix": "video" }));

        let rule = serde_json::to_value(&schema.rules[0]).unwrap();
        assert_eq!(rule["depends_on"], json!("matrix"));
    }
}
