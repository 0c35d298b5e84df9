//! Application configuration.
//!
//! One JSON document holds the vCenter connection, the task polling knobs
//! and the provisioning request itself:
//!
//! ```json
//! {
//!   "connection": { "host": "vcenter.lab.local", "username": "svc-prov@vsphere.local" },
//!   "polling": { "taskTimeoutSecs": 900 },
//!   "request": { "template": "ubuntu-tmpl", "vmName": "sim-01", "memoryMb": 8192 }
//! }
//! ```
//!
//! Credentials are never defaulted. The password is normally supplied
//! through `VMPROV_PASSWORD` rather than the file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use vmprov_vsphere::types::{PollConfig, ProvisioningSpec, MAX_POLL_INTERVAL_MS, MAX_TASK_TIMEOUT_SECS};

pub const PASSWORD_ENV: &str = "VMPROV_PASSWORD";
pub const HOST_ENV: &str = "VMPROV_HOST";
pub const USERNAME_ENV: &str = "VMPROV_USERNAME";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config from {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Connection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Connection parameters handed to the control-plane client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VsphereConfig {
    /// vCenter hostname / IP (e.g. "vcenter.lab.local")
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// e.g. "administrator@vsphere.local"
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
}

fn default_port() -> u16 { 443 }

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Application config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub connection: VsphereConfig,
    #[serde(default)]
    pub polling: PollConfig,
    pub request: ProvisioningSpec,
}

impl AppConfig {
    /// Read `path`, apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse `path` as-is, without overrides or validation.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override connection fields from `lookup` (normally the process
    /// environment). Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(host) = get(HOST_ENV) {
            self.connection.host = host;
        }
        if let Some(username) = get(USERNAME_ENV) {
            self.connection.username = username;
        }
        if let Some(password) = get(PASSWORD_ENV) {
            self.connection.password = password;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let conn = &self.connection;
        if conn.host.trim().is_empty() {
            return Err(ConfigError::Invalid("connection.host is required".into()));
        }
        if conn.username.trim().is_empty() {
            return Err(ConfigError::Invalid("connection.username is required".into()));
        }
        if conn.password.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "connection.password is required (set it in the file or via {PASSWORD_ENV})"
            )));
        }
        if conn.port == 0 {
            return Err(ConfigError::Invalid("connection.port must not be 0".into()));
        }

        let poll = &self.polling;
        if poll.initial_interval_ms == 0 || poll.backoff_factor == 0 {
            return Err(ConfigError::Invalid(
                "polling.initialIntervalMs and polling.backoffFactor must be positive".into(),
            ));
        }
        if poll.initial_interval_ms > poll.max_interval_ms {
            return Err(ConfigError::Invalid(
                "polling.initialIntervalMs must not exceed polling.maxIntervalMs".into(),
            ));
        }
        if poll.max_interval_ms > MAX_POLL_INTERVAL_MS {
            return Err(ConfigError::Invalid(format!(
                "polling.maxIntervalMs must not exceed {MAX_POLL_INTERVAL_MS}"
            )));
        }
        if poll.task_timeout_secs == 0 || poll.task_timeout_secs > MAX_TASK_TIMEOUT_SECS {
            return Err(ConfigError::Invalid(format!(
                "polling.taskTimeoutSecs must be between 1 and {MAX_TASK_TIMEOUT_SECS}"
            )));
        }

        if self.request.template.trim().is_empty() || self.request.vm_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "request.template and request.vmName are required".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "connection": { "host": "vcenter.lab.local", "username": "svc-prov@vsphere.local" },
        "polling": { "taskTimeoutSecs": 900 },
        "request": {
            "template": "ubuntu-tmpl",
            "vmName": "sim-01",
            "folder": "Simulators",
            "memoryMb": 8192,
            "disk": { "sizeGb": 200, "provisioning": "thin" },
            "nic": { "network": "Print-Simulators", "macAddress": "de:ed:04:04:04:04" }
        }
    }"#;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn parses_file_with_defaults() {
        let file = write_config(SAMPLE);
        let cfg = AppConfig::from_file(file.path()).unwrap();

        assert_eq!(cfg.connection.port, 443);
        assert!(cfg.connection.password.is_empty());
        assert_eq!(cfg.polling.task_timeout_secs, 900);
        assert_eq!(cfg.polling.initial_interval_ms, 500);
        assert_eq!(cfg.request.memory_mb, Some(8192));
        let nic = cfg.request.nic.as_ref().unwrap();
        assert_eq!(nic.adapter, vmprov_vsphere::types::NicAdapterType::E1000);
    }

    #[test]
    fn connection_carries_only_what_is_used() {
        let file = write_config(r#"{
            "connection": { "host": "vc", "username": "me", "insecure": true, "timeoutSecs": 5 },
            "request": { "template": "t", "vmName": "v" }
        }"#);
        let cfg = AppConfig::from_file(file.path()).unwrap();
        let json = serde_json::to_value(&cfg.connection).unwrap();
        assert_eq!(json, serde_json::json!({ "host": "vc", "port": 443, "username": "me" }));
    }

    #[test]
    fn password_comes_from_environment() {
        let file = write_config(SAMPLE);
        let mut cfg = AppConfig::from_file(file.path()).unwrap();
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(msg)) if msg.contains(PASSWORD_ENV)));

        cfg.apply_overrides(env(&[(PASSWORD_ENV, "s3cret"), (HOST_ENV, "  ")]));
        assert_eq!(cfg.connection.password, "s3cret");
        // Blank overrides leave the file value alone.
        assert_eq!(cfg.connection.host, "vcenter.lab.local");
        cfg.validate().unwrap();
    }

    #[test]
    fn password_is_never_serialized() {
        let file = write_config(SAMPLE);
        let mut cfg = AppConfig::from_file(file.path()).unwrap();
        cfg.apply_overrides(env(&[(PASSWORD_ENV, "s3cret")]));
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(!json.contains("s3cret"));
    }

    #[test]
    fn rejects_missing_connection_fields() {
        let file = write_config(r#"{
            "connection": {},
            "request": { "template": "t", "vmName": "v" }
        }"#);
        let mut cfg = AppConfig::from_file(file.path()).unwrap();
        cfg.apply_overrides(env(&[(PASSWORD_ENV, "pw")]));
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(msg)) if msg.contains("host")));

        cfg.apply_overrides(env(&[(HOST_ENV, "vc"), (USERNAME_ENV, "me")]));
        cfg.validate().unwrap();
    }

    #[test]
    fn rejects_bad_polling() {
        let file = write_config(SAMPLE);
        let mut cfg = AppConfig::from_file(file.path()).unwrap();
        cfg.apply_overrides(env(&[(PASSWORD_ENV, "pw")]));

        cfg.polling.max_interval_ms = 100;
        assert!(cfg.validate().is_err());
        cfg.polling.max_interval_ms = 5_000;
        cfg.polling.task_timeout_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_unbounded_polling() {
        let file = write_config(SAMPLE);
        let mut cfg = AppConfig::from_file(file.path()).unwrap();
        cfg.apply_overrides(env(&[(PASSWORD_ENV, "pw")]));

        cfg.polling.task_timeout_secs = u64::MAX;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(msg)) if msg.contains("taskTimeoutSecs")));
        cfg.polling.task_timeout_secs = MAX_TASK_TIMEOUT_SECS;
        cfg.validate().unwrap();

        cfg.polling.max_interval_ms = u64::MAX;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(msg)) if msg.contains("maxIntervalMs")));
    }

    #[test]
    fn read_and_parse_errors_carry_path() {
        let err = AppConfig::from_file("/nonexistent/vmprov.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("/nonexistent/vmprov.json"));

        let file = write_config("{ not json");
        let err = AppConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
