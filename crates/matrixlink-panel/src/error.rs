//! Panel error types

use thiserror::Error;

use crate::matrix::MatrixKind;

pub type Result<T> = std::result::Result<T, PanelError>;

#[derive(Error, Debug)]
pub enum PanelError {
    /// Incomplete or out-of-range selection; ignored with a debug log
    #[error("invalid selection: {0}")]
    InvalidSelection(String),

    /// The matrix has not finished resubscribing on the current connection
    #[error("matrix {0} not ready")]
    NotReady(MatrixKind),

    /// The device rejected a connect or it timed out
    #[error("command failed: {0}")]
    CommandFailure(String),

    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("client error: {0}")]
    Client(#[from] matrixlink_client::ClientError),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PanelError {
    /// Errors that only mean "nothing to do"
    pub fn is_ignorable(&self) -> bool {
        matches!(self, PanelError::InvalidSelection(_) | PanelError::NotReady(_))
    }
}
