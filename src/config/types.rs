use super::defaults::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Identity Provider Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityProviderConfig {
    /// e.g. `https://example.okta.com`
    #[serde(default)]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    /// Scheme placed before the token in the `Authorization` header.
    #[serde(default = "default_auth_scheme")]
    pub auth_scheme: String,
    #[serde(default)]
    pub group_id: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for IdentityProviderConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_token: None,
            auth_scheme: default_auth_scheme(),
            group_id: String::new(),
            page_size: default_page_size(),
        }
    }
}

// ============================================================================
// Secret Store Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretStoreConfig {
    /// Connect server URL.
    #[serde(default)]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub vault_id: String,
    #[serde(default)]
    pub password_recipe: PasswordRecipe,
    /// Treat duplicate item titles as an error instead of using the first match.
    #[serde(default)]
    pub strict_titles: bool,
}

impl Default for SecretStoreConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: None,
            vault_id: String::new(),
            password_recipe: PasswordRecipe::default(),
            strict_titles: false,
        }
    }
}

/// Store-side password generation policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordRecipe {
    #[serde(default = "default_password_length")]
    pub length: u32,
    #[serde(default = "default_character_sets")]
    pub character_sets: Vec<String>,
}

impl Default for PasswordRecipe {
    fn default() -> Self {
        Self {
            length: default_password_length(),
            character_sets: default_character_sets(),
        }
    }
}

// ============================================================================
// Rotation Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_poll_max_attempts")]
    pub poll_max_attempts: u32,
    #[serde(default = "default_poll_backoff_factor")]
    pub poll_backoff_factor: f64,
    #[serde(default = "default_poll_max_interval_ms")]
    pub poll_max_interval_ms: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    /// Whole-run deadline; unset means no deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_secs: Option<u64>,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            poll_max_attempts: default_poll_max_attempts(),
            poll_backoff_factor: default_poll_backoff_factor(),
            poll_max_interval_ms: default_poll_max_interval_ms(),
            concurrency: default_concurrency(),
            pacing_ms: default_pacing_ms(),
            deadline_secs: None,
        }
    }
}

impl RotationConfig {
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

// ============================================================================
// HTTP Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_http_timeout_ms(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,
    #[serde(default = "default_retry_min_delay")]
    pub min_delay_ms: u64,
    #[serde(default = "default_retry_max_delay")]
    pub max_delay_ms: u64,
    #[serde(default = "default_retry_jitter")]
    pub jitter: Option<f64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            min_delay_ms: default_retry_min_delay(),
            max_delay_ms: default_retry_max_delay(),
            jitter: default_retry_jitter(),
        }
    }
}

// ============================================================================
// Logging Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

// ============================================================================
// Default value helper functions
// ============================================================================

fn default_auth_scheme() -> String {
    DEFAULT_AUTH_SCHEME.to_string()
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_password_length() -> u32 {
    DEFAULT_PASSWORD_LENGTH
}

fn default_character_sets() -> Vec<String> {
    KNOWN_CHARACTER_SETS.iter().map(|s| s.to_string()).collect()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_poll_max_attempts() -> u32 {
    DEFAULT_POLL_MAX_ATTEMPTS
}

fn default_poll_backoff_factor() -> f64 {
    DEFAULT_POLL_BACKOFF_FACTOR
}

fn default_poll_max_interval_ms() -> u64 {
    DEFAULT_POLL_MAX_INTERVAL_MS
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_pacing_ms() -> u64 {
    DEFAULT_PACING_MS
}

fn default_http_timeout_ms() -> u64 {
    DEFAULT_HTTP_TIMEOUT_MS
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_retry_min_delay() -> u64 {
    DEFAULT_RETRY_MIN_DELAY_MS
}

fn default_retry_max_delay() -> u64 {
    DEFAULT_RETRY_MAX_DELAY_MS
}

fn default_retry_jitter() -> Option<f64> {
    Some(DEFAULT_RETRY_JITTER)
}

fn default_log_level() -> String {
    "info".to_string()
}
