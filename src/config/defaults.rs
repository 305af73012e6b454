//! Default configuration constants used across the system.

/// Default config file stem.
pub const CONFIG_FILE_STEM: &str = "credential-rotator";

/// Default Okta authorization scheme.
pub const DEFAULT_AUTH_SCHEME: &str = "SSWS";

/// Default page size for group member listing.
pub const DEFAULT_PAGE_SIZE: u32 = 200;

/// Default generated password length.
pub const DEFAULT_PASSWORD_LENGTH: u32 = 14;

/// Maximum generated password length accepted by the secret store.
pub const MAX_PASSWORD_LENGTH: u32 = 64;

/// Character classes understood by the secret store's generator.
pub const KNOWN_CHARACTER_SETS: &[&str] = &["LETTERS", "DIGITS", "SYMBOLS"];

/// Default convergence poll interval.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Default convergence poll attempts.
pub const DEFAULT_POLL_MAX_ATTEMPTS: u32 = 20;

/// Default convergence backoff factor.
pub const DEFAULT_POLL_BACKOFF_FACTOR: f64 = 1.5;

/// Default cap on the convergence poll interval.
pub const DEFAULT_POLL_MAX_INTERVAL_MS: u64 = 5_000;

/// Default number of identities reconciled at once.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default delay between starting consecutive identities.
pub const DEFAULT_PACING_MS: u64 = 250;

/// Default HTTP request timeout.
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 30_000;

/// Default retry attempts for transient failures.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default initial retry delay.
pub const DEFAULT_RETRY_MIN_DELAY_MS: u64 = 500;

/// Default retry delay cap.
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 10_000;

/// Default retry jitter ratio.
pub const DEFAULT_RETRY_JITTER: f64 = 0.1;
