//! Core error types

use thiserror::Error;

use crate::cluster::Phase;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Invalid spec field '{field}': {message}")]
    InvalidSpec { field: String, message: String },

    #[error("Invalid resource key '{key}': expected <namespace>/<name>")]
    InvalidKey { key: String },

    #[error("Phase cannot move from {from} to {to} within one provisioning attempt")]
    PhaseRegression { from: Phase, to: Phase },

    #[error("Failed to parse config: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Shorthand for a spec validation failure
    pub fn invalid_spec(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSpec {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a configuration failure
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
