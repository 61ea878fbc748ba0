//! Service configuration loaded via OrthoConfig.
//!
//! Values come from `WEBHOOKS_*` environment variables, configuration files,
//! or command-line flags. Everything but the three endpoints has a default.

use std::path::PathBuf;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::outbound::persistence::PoolConfig;

/// Raised when a setting without a default is absent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("missing required setting {name} (set WEBHOOKS_{env})")]
pub struct MissingSetting {
    name: &'static str,
    env: String,
}

impl MissingSetting {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            env: name.to_ascii_uppercase(),
        }
    }
}

/// Configuration for the webhook batching service.
#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "WEBHOOKS")]
pub struct WebhooksSettings {
    /// PostgreSQL connection URL.
    pub database_url: Option<String>,
    /// Storage API host, e.g. `connection.keboola.com`.
    pub storage_api_host: Option<String>,
    /// Host used to build public webhook URLs.
    pub public_host: Option<String>,
    /// Seconds between flush checks.
    #[ortho_config(default = 15)]
    pub check_interval_secs: u64,
    /// Maximum database connections.
    #[ortho_config(default = 10)]
    pub db_max_connections: u32,
    /// Startup connection attempts before giving up.
    #[ortho_config(default = 10)]
    pub db_connect_attempts: u32,
    /// Seconds between startup connection attempts.
    #[ortho_config(default = 2)]
    pub db_connect_delay_secs: u64,
    /// Seconds allowed for one artifact upload.
    #[ortho_config(default = 30)]
    pub upload_timeout_secs: u64,
    /// Request timeout for Storage API calls, in seconds.
    #[ortho_config(default = 60)]
    pub storage_api_timeout_secs: u64,
    /// Directory for staging artifacts.
    pub staging_dir: Option<PathBuf>,
}

impl WebhooksSettings {
    /// Database URL.
    ///
    /// # Errors
    ///
    /// Returns [`MissingSetting`] when unset.
    pub fn database_url(&self) -> Result<&str, MissingSetting> {
        required(self.database_url.as_deref(), "database_url")
    }

    /// Storage API host.
    ///
    /// # Errors
    ///
    /// Returns [`MissingSetting`] when unset.
    pub fn storage_api_host(&self) -> Result<&str, MissingSetting> {
        required(self.storage_api_host.as_deref(), "storage_api_host")
    }

    /// Public host for webhook URLs.
    ///
    /// # Errors
    ///
    /// Returns [`MissingSetting`] when unset.
    pub fn public_host(&self) -> Result<&str, MissingSetting> {
        required(self.public_host.as_deref(), "public_host")
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn storage_api_timeout(&self) -> Duration {
        Duration::from_secs(self.storage_api_timeout_secs)
    }

    /// Staging directory, falling back to the system temporary directory.
    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Pool configuration for the database URL and connection settings.
    ///
    /// # Errors
    ///
    /// Returns [`MissingSetting`] when the database URL is unset.
    pub fn pool_config(&self) -> Result<PoolConfig, MissingSetting> {
        let config = PoolConfig::new(self.database_url()?)
            .with_max_size(self.db_max_connections)
            .with_connect_retries(
                self.db_connect_attempts,
                Duration::from_secs(self.db_connect_delay_secs),
            );
        Ok(config)
    }
}

fn required<'a>(value: Option<&'a str>, name: &'static str) -> Result<&'a str, MissingSetting> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| MissingSetting::new(name))
}
