use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Metrics exporter and log output of the server binary
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MonitoringConfig {
    /// Serve `/metrics` for Prometheus scraping
    #[serde(default)]
    pub prometheus_enabled: bool,

    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,

    /// Directory for daily rolling log files. Logs go to stdout when unset.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// File name prefix of the rolling log files
    #[serde(default = "default_log_file_prefix")]
    pub log_file_prefix: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            prometheus_enabled: false,
            prometheus_port: default_prometheus_port(),
            log_dir: None,
            log_file_prefix: default_log_file_prefix(),
        }
    }
}

impl MonitoringConfig {
    /// # Errors
    /// `Error::InvalidConfig` when the exporter is enabled on port 0 or a
    /// privileged port, or when file logging points at something that is
    /// not a directory.
    pub fn validate(&self) -> Result<()> {
        if self.prometheus_enabled && self.prometheus_port < 1024 {
            return Err(Error::InvalidConfig(format!(
                "prometheus_port {} must be in 1024..=65535 when the exporter is enabled",
                self.prometheus_port
            )));
        }

        if let Some(dir) = &self.log_dir {
            if dir.exists() && !dir.is_dir() {
                return Err(Error::InvalidConfig(format!("log_dir {} is not a directory", dir.display())));
            }
            if self.log_file_prefix.trim().is_empty() {
                return Err(Error::InvalidConfig("log_file_prefix cannot be empty".into()));
            }
        }

        Ok(())
    }
}

fn default_prometheus_port() -> u16 {
    9100
}

fn default_log_file_prefix() -> String {
    "confr.log".to_string()
}
