// Worker settings: defaults, an optional JSON settings file, and validation.
// Command-line flags and environment variables are layered on top by the
// binary before the settings are validated.

use crate::constants::{path, timing};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Everything the worker needs to talk to its controller and lay out builds.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkerSettings {
    /// Base URL of the controller API.
    pub api_url: String,

    /// Bearer token sent with every controller request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Worker name, used as the prefix of step log lines.
    pub name: String,

    /// Root under which per-build sandboxes are created.
    pub base_dir: PathBuf,

    /// Directory holding plugin binaries, one file per plugin name.
    pub plugins_dir: PathBuf,

    /// Accept invalid TLS certificates from the controller.
    pub tls_no_verify: bool,

    pub log_flush_interval_ms: u64,

    pub execution_timeout_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        let base_dir = std::env::temp_dir().join(path::DEFAULT_BASE_DIRECTORY);
        Self {
            api_url: "http://localhost:8081".to_string(),
            token: None,
            name: String::new(),
            plugins_dir: base_dir.join(path::PLUGINS_DIRECTORY),
            base_dir,
            tls_no_verify: false,
            log_flush_interval_ms: timing::LOG_FLUSH_INTERVAL.as_millis() as u64,
            execution_timeout_secs: timing::EXECUTION_TIMEOUT.as_secs(),
        }
    }
}

impl std::fmt::Debug for WorkerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSettings")
            .field("api_url", &self.api_url)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("name", &self.name)
            .field("base_dir", &self.base_dir)
            .field("plugins_dir", &self.plugins_dir)
            .field("tls_no_verify", &self.tls_no_verify)
            .field("log_flush_interval_ms", &self.log_flush_interval_ms)
            .field("execution_timeout_secs", &self.execution_timeout_secs)
            .finish()
    }
}

impl WorkerSettings {
    pub fn log_flush_interval(&self) -> Duration {
        Duration::from_millis(self.log_flush_interval_ms)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }

    /// Parsed controller base URL.
    pub fn api_base(&self) -> Result<url::Url> {
        url::Url::parse(&self.api_url)
            .with_context(|| format!("Invalid controller URL '{}'", self.api_url))
    }

    /// Reject settings the worker cannot run with.
    pub fn validate(&self) -> Result<()> {
        let api = self.api_base()?;
        anyhow::ensure!(
            matches!(api.scheme(), "http" | "https"),
            "Controller URL must use http or https, got '{}'",
            api.scheme()
        );
        anyhow::ensure!(!self.name.trim().is_empty(), "Worker name must not be empty");
        anyhow::ensure!(
            self.base_dir.is_absolute(),
            "Base directory must be absolute: {}",
            self.base_dir.display()
        );
        anyhow::ensure!(self.log_flush_interval_ms > 0, "Log flush interval must be positive");
        anyhow::ensure!(self.execution_timeout_secs > 0, "Execution timeout must be positive");
        Ok(())
    }
}

/// Loads and saves [`WorkerSettings`] as pretty JSON.
pub struct ConfigurationStore {
    config_file_path: PathBuf,
}

impl ConfigurationStore {
    pub fn new(config_file_path: impl Into<PathBuf>) -> Self {
        Self {
            config_file_path: config_file_path.into(),
        }
    }

    pub fn config_file_path(&self) -> &Path {
        &self.config_file_path
    }

    pub fn is_configured(&self) -> bool {
        self.config_file_path.exists()
    }

    /// Load settings from disk. Missing keys take their defaults.
    pub fn get_settings(&self) -> Result<WorkerSettings> {
        let content = fs::read_to_string(&self.config_file_path).with_context(|| {
            format!(
                "Failed to read settings file {}",
                self.config_file_path.display()
            )
        })?;
        serde_json::from_str(&content).with_context(|| {
            format!(
                "Failed to parse settings file {}",
                self.config_file_path.display()
            )
        })
    }

    /// Defaults when no settings file exists, the file's content otherwise.
    pub fn get_settings_or_default(&self) -> Result<WorkerSettings> {
        if self.is_configured() {
            self.get_settings()
        } else {
            Ok(WorkerSettings::default())
        }
    }

    pub fn save_settings(&self, settings: &WorkerSettings) -> Result<()> {
        if let Some(parent) = self.config_file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(settings)?;
        fs::write(&self.config_file_path, content).with_context(|| {
            format!(
                "Failed to write settings file {}",
                self.config_file_path.display()
            )
        })
    }
}
