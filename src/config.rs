use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

fn default_http_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("students.sqlite3")
}

fn default_store_timeout_ms() -> u64 {
    5_000
}

fn default_dataset_timeout_ms() -> u64 {
    10_000
}

/// Service settings read from `LEAVE_*` environment variables
/// (`LEAVE_HTTP_ADDR`, `LEAVE_DATABASE_PATH`, ...). A `.env` file is
/// honoured when present.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// JSON calendar dataset; generated from the built-in table when unset.
    #[serde(default)]
    pub dataset_path: Option<PathBuf>,
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    #[serde(default = "default_dataset_timeout_ms")]
    pub dataset_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            database_path: default_database_path(),
            dataset_path: None,
            store_timeout_ms: default_store_timeout_ms(),
            dataset_timeout_ms: default_dataset_timeout_ms(),
        }
    }
}

impl ServiceConfig {
    pub const ENV_PREFIX: &'static str = "LEAVE_";

    pub fn from_env() -> Result<Self, envy::Error> {
        dotenv::dotenv().ok();
        envy::prefixed(Self::ENV_PREFIX).from_env::<ServiceConfig>()
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed(Self::ENV_PREFIX).from_iter(vars)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn dataset_timeout(&self) -> Duration {
        Duration::from_millis(self.dataset_timeout_ms)
    }
}
