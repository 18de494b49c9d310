//! Monitor configuration
//!
//! This module contains all configuration options for the offline
//! download monitor, including the policy switches for behaviours whose
//! intent is a deployment decision.

use crate::error::{MonitorError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Setting key holding the poll interval in seconds
    pub interval_setting_key: String,

    /// Poll interval used when the setting is missing or below one second
    pub default_interval_secs: u64,

    /// Grace period before temp storage of a cancelled task is removed
    pub cancel_grace_ms: u64,

    /// Capacity of each monitor's wake inbox
    pub inbox_capacity: usize,

    /// What reconciliation does when saving the record fails
    #[serde(default)]
    pub persist_failure_policy: PersistFailurePolicy,

    /// Whether a redirect moves the dispatcher subscription to the new GID
    #[serde(default)]
    pub redirect_policy: RedirectPolicy,

    /// Maximum transfer jobs running at once
    pub transfer_workers: usize,

    /// Database path for the SQLite task store
    pub database_path: Option<PathBuf>,

    /// Engine JSON-RPC configuration
    pub rpc: RpcConfig,

    /// Engine notification configuration
    #[serde(default)]
    pub notify: NotifyConfig,
}

/// Engine JSON-RPC configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// JSON-RPC endpoint (e.g. "http://127.0.0.1:6800/jsonrpc")
    pub endpoint: String,

    /// RPC secret, sent as `token:<secret>`
    pub secret: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

/// Engine WebSocket notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// WebSocket endpoint (e.g. "ws://127.0.0.1:6800/jsonrpc")
    pub endpoint: String,

    /// Delay before reconnecting after the socket drops
    pub reconnect_delay_ms: u64,
}

/// Handling of persistence failures during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PersistFailurePolicy {
    /// Log the failure and treat the pass as successful (validation is skipped)
    #[default]
    Swallow,
    /// Stop monitoring with the failure recorded on the task
    Propagate,
}

impl std::fmt::Display for PersistFailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Swallow => write!(f, "swallow"),
            Self::Propagate => write!(f, "propagate"),
        }
    }
}

impl std::str::FromStr for PersistFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "swallow" | "ignore" => Ok(Self::Swallow),
            "propagate" | "fail" => Ok(Self::Propagate),
            _ => Err(format!("Invalid persist failure policy: {}", s)),
        }
    }
}

/// Dispatcher handling when the engine redirects a task to a new GID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RedirectPolicy {
    /// Keep the original subscription key; pushes to the new GID are not
    /// delivered and the monitor relies on interval polling
    #[default]
    KeepSubscription,
    /// Move the subscription to the new GID
    Resubscribe,
}

impl std::fmt::Display for RedirectPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeepSubscription => write!(f, "keep"),
            Self::Resubscribe => write!(f, "resubscribe"),
        }
    }
}

impl std::str::FromStr for RedirectPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "keep" | "keepsubscription" => Ok(Self::KeepSubscription),
            "resubscribe" | "rekey" => Ok(Self::Resubscribe),
            _ => Err(format!("Invalid redirect policy: {}", s)),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_setting_key: "aria2_interval".to_string(),
            default_interval_secs: 10,
            cancel_grace_ms: 60_000,
            inbox_capacity: 1,
            persist_failure_policy: PersistFailurePolicy::default(),
            redirect_policy: RedirectPolicy::default(),
            transfer_workers: 4,
            database_path: None,
            rpc: RpcConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:6800/jsonrpc".to_string(),
            secret: None,
            timeout_secs: 10,
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:6800/jsonrpc".to_string(),
            reconnect_delay_ms: 5_000,
        }
    }
}

impl MonitorConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fallback poll interval
    pub fn default_interval(mut self, secs: u64) -> Self {
        self.default_interval_secs = secs;
        self
    }

    /// Set the post-cancel cleanup grace period
    pub fn cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace_ms = grace.as_millis() as u64;
        self
    }

    /// Set the persistence failure policy
    pub fn persist_failure_policy(mut self, policy: PersistFailurePolicy) -> Self {
        self.persist_failure_policy = policy;
        self
    }

    /// Set the redirect policy
    pub fn redirect_policy(mut self, policy: RedirectPolicy) -> Self {
        self.redirect_policy = policy;
        self
    }

    /// Set the number of concurrent transfer jobs
    pub fn transfer_workers(mut self, workers: usize) -> Self {
        self.transfer_workers = workers;
        self
    }

    /// Set the engine RPC endpoint
    pub fn rpc_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.rpc.endpoint = endpoint.into();
        self
    }

    /// Set the engine RPC secret
    pub fn rpc_secret(mut self, secret: impl Into<String>) -> Self {
        self.rpc.secret = Some(secret.into());
        self
    }

    /// Set the database path for persistence
    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Post-cancel cleanup grace period
    pub fn cancel_grace_period(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.interval_setting_key.is_empty() {
            return Err(MonitorError::invalid_input(
                "interval_setting_key",
                "Must not be empty",
            ));
        }

        if self.default_interval_secs == 0 {
            return Err(MonitorError::invalid_input(
                "default_interval_secs",
                "Must be at least 1",
            ));
        }

        if self.inbox_capacity == 0 {
            return Err(MonitorError::invalid_input(
                "inbox_capacity",
                "Must be at least 1",
            ));
        }

        if self.transfer_workers == 0 {
            return Err(MonitorError::invalid_input(
                "transfer_workers",
                "Must be at least 1",
            ));
        }

        if self.rpc.endpoint.is_empty() {
            return Err(MonitorError::invalid_input("rpc.endpoint", "Must not be empty"));
        }

        if self.rpc.timeout_secs == 0 {
            return Err(MonitorError::invalid_input(
                "rpc.timeout_secs",
                "Must be at least 1",
            ));
        }

        Ok(())
    }

    /// Get the database path, using default if not set
    pub fn get_database_path(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("gosh-offline")
                .join("offline.db")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MonitorConfig::default();
        assert_eq!(config.interval_setting_key, "aria2_interval");
        assert_eq!(config.default_interval_secs, 10);
        assert_eq!(config.cancel_grace_period(), Duration::from_secs(60));
        assert_eq!(config.persist_failure_policy, PersistFailurePolicy::Swallow);
        assert_eq!(config.redirect_policy, RedirectPolicy::KeepSubscription);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = MonitorConfig::new()
            .default_interval(3)
            .cancel_grace(Duration::from_millis(250))
            .redirect_policy(RedirectPolicy::Resubscribe)
            .rpc_secret("hunter2");

        assert_eq!(config.default_interval_secs, 3);
        assert_eq!(config.cancel_grace_ms, 250);
        assert_eq!(config.redirect_policy, RedirectPolicy::Resubscribe);
        assert_eq!(config.rpc.secret.as_deref(), Some("hunter2"));
    }

    #[test]
    fn test_invalid_config() {
        assert!(MonitorConfig::new().default_interval(0).validate().is_err());
        assert!(MonitorConfig::new().transfer_workers(0).validate().is_err());
        assert!(MonitorConfig::new().rpc_endpoint("").validate().is_err());

        let config = MonitorConfig {
            inbox_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!(
            "Propagate".parse::<PersistFailurePolicy>().unwrap(),
            PersistFailurePolicy::Propagate
        );
        assert_eq!(
            "rekey".parse::<RedirectPolicy>().unwrap(),
            RedirectPolicy::Resubscribe
        );
        assert!("sometimes".parse::<RedirectPolicy>().is_err());
    }

    #[test]
    fn test_config_from_json_uses_policy_defaults() {
        let json = r#"{
            "interval_setting_key": "aria2_interval",
            "default_interval_secs": 5,
            "cancel_grace_ms": 1000,
            "inbox_capacity": 1,
            "transfer_workers": 2,
            "database_path": null,
            "rpc": {"endpoint": "http://localhost:6800/jsonrpc", "secret": null, "timeout_secs": 5}
        }"#;
        let config: MonitorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.persist_failure_policy, PersistFailurePolicy::Swallow);
        assert_eq!(config.redirect_policy, RedirectPolicy::KeepSubscription);
        assert_eq!(config.notify.reconnect_delay_ms, 5_000);
    }
}
