//! CLI error types with exit code handling
//!
//! Every startup failure is fatal: the process prints the diagnostic and
//! exits with the code of its variant.

use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// Controller configuration is invalid
    #[error("Configuration error: {message}")]
    #[diagnostic(code(kcluster::cli::config))]
    Config {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Kubeconfig missing, unreadable or incomplete
    #[error("Kubeconfig error: {message}")]
    #[diagnostic(
        code(kcluster::cli::kubeconfig),
        help("Pass --kubeconfig <path>, set KUBECONFIG, or run inside a cluster")
    )]
    KubeConfig { message: String },

    /// API server could not be reached
    #[error("Cannot reach the API server: {message}")]
    #[diagnostic(code(kcluster::cli::connection))]
    Connection {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(kcluster::cli::io))]
    Io { message: String },

    /// Internal error (runtime, unexpected failure)
    #[error("Internal error: {message}")]
    #[diagnostic(code(kcluster::cli::internal))]
    Internal { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config { .. } => exit_codes::CONFIG_ERROR,
            CliError::KubeConfig { .. } => exit_codes::KUBE_CONFIG_ERROR,
            CliError::Connection { .. } => exit_codes::CONNECTION_ERROR,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Internal { .. } => exit_codes::ERROR,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: None,
        }
    }

    /// Create a configuration error with help text
    pub fn config_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    pub fn kube_config(message: impl Into<String>) -> Self {
        Self::KubeConfig {
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>, server: &str) -> Self {
        Self::Connection {
            message: message.into(),
            help: Some(format!("Check that {} is reachable and the credentials are valid", server)),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

impl From<kcluster_core::CoreError> for CliError {
    fn from(err: kcluster_core::CoreError) -> Self {
        match err {
            kcluster_core::CoreError::Io(e) => e.into(),
            other => CliError::config(other.to_string()),
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
