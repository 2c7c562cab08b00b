//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// Configuration error - invalid config file or flag values
pub const CONFIG_ERROR: i32 = 2;

/// IO error - file not found, permission denied, etc.
pub const IO_ERROR: i32 = 5;

/// Kubeconfig could not be loaded or yields no usable client
pub const KUBE_CONFIG_ERROR: i32 = 6;

/// API server unreachable or rejected the initial request
pub const CONNECTION_ERROR: i32 = 7;
