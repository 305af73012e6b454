mod defaults;
mod io;
mod types;
mod validation;

pub use defaults::*;
pub use io::*;
pub use types::*;
pub use validation::*;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Top-level rotator configuration.
///
/// Passed explicitly into client constructors; nothing reads it from
/// process-wide state after loading.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub identity_provider: IdentityProviderConfig,
    #[serde(default)]
    pub secret_store: SecretStoreConfig,
    #[serde(default)]
    pub rotation: RotationConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file, environment, and defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = path.map(PathBuf::from).or_else(find_config_file);

        let mut config = match config_path {
            Some(ref p) if p.exists() => {
                info!("Loading config from {}", p.display());
                load_config_file(p)?
            }
            Some(ref p) => anyhow::bail!("Config file '{}' does not exist", p.display()),
            None => {
                info!("No config file found, using defaults");
                Config::default()
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());

        Ok(config)
    }

    /// Write default configuration to a file.
    pub fn write_default(path: &str) -> Result<()> {
        let value = serde_json::to_value(Config::default())?;
        write_config_file(Path::new(path), &value)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("OKTA_API_TOKEN") {
            self.identity_provider.api_token = Some(token);
        }
        if let Some(url) = lookup("OKTA_BASE_URL") {
            self.identity_provider.base_url = url;
        }
        if let Some(group) = lookup("OKTA_GROUP_ID") {
            self.identity_provider.group_id = group;
        }

        if let Some(host) = lookup("OP_CONNECT_HOST") {
            self.secret_store.base_url = host;
        }
        if let Some(token) = lookup("OP_CONNECT_TOKEN") {
            self.secret_store.token = Some(token);
        }
        if let Some(vault) = lookup("OP_VAULT_ID") {
            self.secret_store.vault_id = vault;
        }

        if let Some(concurrency) = lookup("ROTATOR_CONCURRENCY") {
            if let Ok(concurrency) = concurrency.parse() {
                self.rotation.concurrency = concurrency;
            }
        }
        if let Some(deadline) = lookup("ROTATOR_DEADLINE_SECS") {
            if let Ok(deadline) = deadline.parse() {
                self.rotation.deadline_secs = Some(deadline);
            }
        }
    }

    /// Copy with tokens masked, for `config show`.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.identity_provider.api_token.is_some() {
            copy.identity_provider.api_token = Some("***".to_string());
        }
        if copy.secret_store.token.is_some() {
            copy.secret_store.token = Some("***".to_string());
        }
        copy
    }
}

/// Find the configuration file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    for ext in ["json", "yaml", "yml", "toml"] {
        let path = PathBuf::from(format!("{CONFIG_FILE_STEM}.{ext}"));
        if path.exists() {
            return Some(path);
        }
    }

    if let Some(home) = dirs::home_dir() {
        let home_config = home
            .join(format!(".{CONFIG_FILE_STEM}"))
            .join("config.json");
        if home_config.exists() {
            return Some(home_config);
        }
    }

    None
}

/// Load configuration from a file path.
fn load_config_file(path: &Path) -> Result<Config> {
    let value = read_config_file(path)?;
    serde_json::from_value(value)
        .with_context(|| format!("Config file '{}' has an invalid shape", path.display()))
}
