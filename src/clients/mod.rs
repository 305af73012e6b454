//! Typed clients for the identity provider and the secret store.
//!
//! The engine only sees the [`IdentityProvider`] and [`SecretStore`] traits;
//! the Okta and 1Password Connect adapters live in the submodules.

mod http;
pub mod okta;
pub mod onepassword;
pub mod retry;

pub use okta::OktaClient;
pub use onepassword::ConnectClient;
pub use retry::RetryPolicy;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ============================================================================
// Domain Types
// ============================================================================

/// A member of the rotation group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
        }
    }
}

/// A secret-store item located by title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRef {
    pub item_id: String,
    pub title: String,
}

/// A password value. Never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password(***)")
    }
}

// ============================================================================
// Client Traits
// ============================================================================

/// Identity-provider operations the engine consumes.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// All members of the group. Partial listings are never returned.
    async fn list_group_members(&self, group_id: &str) -> Result<Vec<Identity>>;

    /// Set the identity's password. Setting the same value twice is safe.
    async fn set_password(&self, identity_id: &str, password: &Password) -> Result<()>;

    fn name(&self) -> &str;
}

/// Secret-store operations the engine consumes.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Check the token can reach the vault. Performs no mutation.
    async fn verify_access(&self) -> Result<()>;

    /// Scan the vault for an item whose title equals `title` exactly.
    async fn find_record(&self, title: &str) -> Result<Option<RecordRef>>;

    /// Create an item with a store-generated password.
    ///
    /// Returns the new item's id when the response carries one.
    async fn create_record(&self, title: &str, username: &str) -> Result<Option<String>>;

    /// Ask the store to regenerate the password in place. The new value is
    /// not returned and may become visible only later.
    async fn rotate_password(&self, item_id: &str) -> Result<()>;

    /// Current password value; `RotationError::FieldMissing` when absent.
    async fn read_password(&self, item_id: &str) -> Result<Password>;

    fn name(&self) -> &str;
}
