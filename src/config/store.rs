use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sled,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,

    /// Database directory, only used by the sled backend
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Sled tree holding the configuration values
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            db_path: default_db_path(),
            namespace: default_namespace(),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(Error::InvalidConfig("store namespace cannot be empty".into()));
        }
        if self.backend == StoreBackend::Sled && self.db_path.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("db_path is required by the sled backend".into()));
        }
        Ok(())
    }
}

fn default_backend() -> StoreBackend {
    StoreBackend::Memory
}
fn default_db_path() -> PathBuf {
    PathBuf::from("./db/confr")
}
fn default_namespace() -> String {
    "confr".to_string()
}
