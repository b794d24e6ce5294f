//! matrixlink panel
//!
//! Control-panel core for a multi-matrix router: local mirrors of every
//! matrix, a single selection cursor with take/undo, and the read-only
//! feedbacks and variables an adapter shows to the operator.
//!
//! # Example
//!
//! ```ignore
//! use matrixlink_panel::{Panel, PanelAction, PanelConfig, Pick, MatrixKind};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let panel = Panel::new(PanelConfig::load("panel.toml".as_ref())?)?;
//!     panel.start();
//!
//!     panel
//!         .dispatch(PanelAction::SelectTarget {
//!             matrix: Some(MatrixKind::Video),
//!             pick: Pick::Id(0),
//!         })
//!         .await?;
//!     println!("take possible: {}", panel.surface().take_possible());
//!
//!     Ok(())
//! }
//! ```

pub mod actions;
pub mod config;
pub mod error;
pub mod event;
pub mod matrix;
pub mod mirror;
pub mod panel;
pub mod routing;
pub mod schema;
pub mod surface;

pub use actions::{upgrade_legacy, ActionId, PanelAction, PanelCommand};
pub use config::{PanelConfig, SessionSettings};
pub use error::{PanelError, Result};
pub use event::{EventBus, PanelEvent};
pub use matrix::{Endpoint, Matrix, MatrixKind, Output, Side};
pub use mirror::MatrixMirrorSet;
pub use panel::Panel;
pub use routing::{Pick, RoutingOptions, RoutingOrchestrator, Selection};
pub use schema::{action_schema, feedback_schema, OptionRule, OptionSchema, Predicate};
pub use surface::{Choice, Choices, Feedback, FeedbackId, Surface, VariableDefinition};
