//! Controller configuration
//!
//! Built once at startup (defaults, then an optional YAML file, then CLI
//! overrides) and handed to constructors as an immutable value.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use humantime_serde::re::humantime::format_duration;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Top-level controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    /// Number of concurrent reconcile workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// How long the readiness wait may block (0 disables the wait)
    #[serde(default = "default_wait_for_ready", with = "humantime_serde")]
    pub wait_for_ready: Duration,

    /// Cadence of node readiness polls
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Upper bound on a single pipeline run
    #[serde(default = "default_reconcile_timeout", with = "humantime_serde")]
    pub reconcile_timeout: Duration,

    /// Period for re-enqueueing every cached resource (0 disables resync)
    #[serde(default = "default_resync_period", with = "humantime_serde")]
    pub resync_period: Duration,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub status_output: StatusOutput,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            wait_for_ready: default_wait_for_ready(),
            poll_interval: default_poll_interval(),
            reconcile_timeout: default_reconcile_timeout(),
            resync_period: default_resync_period(),
            rate_limit: RateLimitConfig::default(),
            status_output: StatusOutput::default(),
        }
    }
}

fn default_workers() -> usize {
    2
}

fn default_wait_for_ready() -> Duration {
    Duration::from_secs(60)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_reconcile_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_resync_period() -> Duration {
    Duration::from_secs(30)
}

impl ControllerConfig {
    /// Load configuration from a YAML file, filling gaps with defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the controller cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(CoreError::invalid_config("workers must be at least 1"));
        }
        if self.poll_interval.is_zero() {
            return Err(CoreError::invalid_config("pollInterval must be greater than 0"));
        }
        if self.reconcile_timeout.is_zero() {
            return Err(CoreError::invalid_config(
                "reconcileTimeout must be greater than 0",
            ));
        }
        // the readiness wait runs inside the reconcile timeout and must
        // always be able to end on its own
        let wait_budget = self.wait_for_ready + self.poll_interval;
        if !self.wait_for_ready.is_zero() && self.reconcile_timeout <= wait_budget {
            return Err(CoreError::invalid_config(format!(
                "reconcileTimeout ({}) must be longer than waitForReady plus pollInterval ({})",
                format_duration(self.reconcile_timeout),
                format_duration(wait_budget),
            )));
        }
        self.rate_limit.validate()
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_wait_for_ready(mut self, wait: Duration) -> Self {
        self.wait_for_ready = wait;
        self
    }

    pub fn with_reconcile_timeout(mut self, timeout: Duration) -> Self {
        self.reconcile_timeout = timeout;
        self
    }

    pub fn with_status_output(mut self, output: StatusOutput) -> Self {
        self.status_output = output;
        self
    }
}

/// Per-key exponential backoff for failed reconciles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    /// Delay of the first retry; doubles on each further failure
    #[serde(default = "default_base_delay", with = "humantime_serde")]
    pub base_delay: Duration,

    /// Cap on a single retry delay
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,

    /// Retries allowed before the resource is marked Failed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_base_delay() -> Duration {
    Duration::from_millis(5)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(1000)
}

fn default_max_retries() -> u32 {
    15
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_delay < self.base_delay {
            return Err(CoreError::invalid_config(
                "rateLimit.maxDelay must not be smaller than rateLimit.baseDelay",
            ));
        }
        Ok(())
    }

    /// Delay for the retry following `failures` previous failures
    pub fn delay_for(&self, failures: u32) -> Duration {
        let factor = 2u32.checked_pow(failures).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Where StatusReporter progress lines go
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusOutput {
    /// Structured log events
    #[default]
    Log,
    /// Styled lines on stderr
    Terminal,
    /// One JSON object per event on stdout
    Json,
}

impl FromStr for StatusOutput {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "log" => Ok(Self::Log),
            "terminal" => Ok(Self::Terminal),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "unknown status output '{}' (expected log, terminal or json)",
                other
            )),
        }
    }
}

impl fmt::Display for StatusOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Log => "log",
            Self::Terminal => "terminal",
            Self::Json => "json",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.workers, 2);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.status_output, StatusOutput::Log);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serialized_defaults() {
        let yaml = serde_yaml::to_string(&ControllerConfig::default()).unwrap();
        insta::assert_snapshot!(yaml, @r"
        workers: 2
        waitForReady: 1m
        pollInterval: 1s
        reconcileTimeout: 10m
        resyncPeriod: 30s
        rateLimit:
          baseDelay: 5ms
          maxDelay: 16m 40s
          maxRetries: 15
        statusOutput: log
        ");
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: ControllerConfig = serde_yaml::from_str(
            r#"
workers: 4
waitForReady: 5s
rateLimit:
  maxRetries: 3
statusOutput: json
"#,
        )
        .unwrap();

        assert_eq!(config.workers, 4);
        assert_eq!(config.wait_for_ready, Duration::from_secs(5));
        assert_eq!(config.rate_limit.max_retries, 3);
        assert_eq!(config.rate_limit.base_delay, Duration::from_millis(5));
        assert_eq!(config.status_output, StatusOutput::Json);
        assert_eq!(config.resync_period, Duration::from_secs(30));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "workers: 3\npollInterval: 250ms").unwrap();

        let config = ControllerConfig::load_from(file.path()).unwrap();
        assert_eq!(config.workers, 3);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_load_from_file_validates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "workers: 0").unwrap();

        let err = ControllerConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig { .. }));
    }

    #[test]
    fn test_load_from_missing_file() {
        let err = ControllerConfig::load_from(Path::new("/nonexistent/kcluster.yaml"));
        assert!(matches!(err, Err(CoreError::Io(_))));
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let config = ControllerConfig {
            rate_limit: RateLimitConfig {
                base_delay: Duration::from_secs(10),
                max_delay: Duration::from_secs(1),
                max_retries: 1,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_wait_longer_than_reconcile_timeout() {
        let config = ControllerConfig {
            wait_for_ready: Duration::from_secs(20),
            reconcile_timeout: Duration::from_secs(10),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid configuration: reconcileTimeout (10s) must be longer than waitForReady plus pollInterval (21s)"
        );

        // the final poll must fit too
        let config = ControllerConfig {
            wait_for_ready: Duration::from_secs(9),
            reconcile_timeout: Duration::from_secs(10),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ControllerConfig {
            wait_for_ready: Duration::from_secs(5),
            reconcile_timeout: Duration::from_secs(7),
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        let config = ControllerConfig {
            wait_for_ready: Duration::ZERO,
            reconcile_timeout: Duration::from_millis(1),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let limits = RateLimitConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            max_retries: 10,
        };
        assert_eq!(limits.delay_for(0), Duration::from_millis(100));
        assert_eq!(limits.delay_for(1), Duration::from_millis(200));
        assert_eq!(limits.delay_for(3), Duration::from_millis(800));
        assert_eq!(limits.delay_for(4), Duration::from_secs(1));
        assert_eq!(limits.delay_for(64), Duration::from_secs(1));
    }

    #[test]
    fn test_status_output_parse() {
        assert_eq!("JSON".parse::<StatusOutput>(), Ok(StatusOutput::Json));
        assert_eq!("terminal".parse::<StatusOutput>(), Ok(StatusOutput::Terminal));
        assert!("syslog".parse::<StatusOutput>().is_err());
    }
}
