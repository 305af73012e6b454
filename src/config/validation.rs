use super::defaults::{KNOWN_CHARACTER_SETS, MAX_PASSWORD_LENGTH};
use super::Config;
use anyhow::Result;
use tracing::warn;

/// Validation errors for configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

fn push(errors: &mut Vec<ConfigValidationError>, path: &str, message: &str) {
    errors.push(ConfigValidationError {
        path: path.to_string(),
        message: message.to_string(),
    });
}

/// Validate a configuration object, collecting every problem.
pub fn validate_config(config: &Config) -> Vec<ConfigValidationError> {
    let mut errors = Vec::new();

    let idp = &config.identity_provider;
    if url::Url::parse(&idp.base_url).is_err() {
        push(&mut errors, "identityProvider.baseUrl", "Must be an absolute URL");
    }
    if idp.api_token.as_deref().map_or(true, str::is_empty) {
        push(&mut errors, "identityProvider.apiToken", "API token is required");
    }
    if idp.group_id.trim().is_empty() {
        push(&mut errors, "identityProvider.groupId", "Group ID is required");
    }
    if idp.page_size == 0 {
        push(&mut errors, "identityProvider.pageSize", "Page size must be greater than 0");
    }

    let store = &config.secret_store;
    if url::Url::parse(&store.base_url).is_err() {
        push(&mut errors, "secretStore.baseUrl", "Must be an absolute URL");
    }
    if store.token.as_deref().map_or(true, str::is_empty) {
        push(&mut errors, "secretStore.token", "Connect token is required");
    }
    if store.vault_id.trim().is_empty() {
        push(&mut errors, "secretStore.vaultId", "Vault ID is required");
    }

    let recipe = &store.password_recipe;
    if recipe.length == 0 || recipe.length > MAX_PASSWORD_LENGTH {
        push(
            &mut errors,
            "secretStore.passwordRecipe.length",
            &format!("Length must be between 1 and {MAX_PASSWORD_LENGTH}"),
        );
    }
    if recipe.character_sets.is_empty() {
        push(
            &mut errors,
            "secretStore.passwordRecipe.characterSets",
            "At least one character set is required",
        );
    }
    for set in &recipe.character_sets {
        if !KNOWN_CHARACTER_SETS.contains(&set.as_str()) {
            push(
                &mut errors,
                "secretStore.passwordRecipe.characterSets",
                &format!("Unknown character set '{set}'"),
            );
        }
    }

    let rotation = &config.rotation;
    if rotation.concurrency == 0 {
        push(&mut errors, "rotation.concurrency", "Concurrency must be at least 1");
    }
    if rotation.poll_max_attempts == 0 {
        push(&mut errors, "rotation.pollMaxAttempts", "Must poll at least once");
    }
    if !(rotation.poll_backoff_factor >= 1.0) {
        push(&mut errors, "rotation.pollBackoffFactor", "Backoff factor must be >= 1.0");
    }
    if rotation.poll_max_interval_ms < rotation.poll_interval_ms {
        warn!("rotation.pollMaxIntervalMs is below pollIntervalMs; the interval will not grow");
    }
    if rotation.deadline_secs == Some(0) {
        push(&mut errors, "rotation.deadlineSecs", "Deadline must be greater than 0");
    }

    if config.http.timeout_ms == 0 {
        push(&mut errors, "http.timeoutMs", "Timeout must be greater than 0");
    }

    errors
}

/// Validate configuration and return Result.
pub fn validate_config_object(config: &Config) -> Result<()> {
    let errors = validate_config(config);
    if errors.is_empty() {
        Ok(())
    } else {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        anyhow::bail!("Configuration validation failed:\n{}", messages.join("\n"));
    }
}
