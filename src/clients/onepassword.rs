//! 1Password Connect-style secret store client.
//!
//! Items are scoped to one vault. Passwords are generated store-side from a
//! [`PasswordRecipe`]; the client never sees a password until it reads one
//! back.

use super::http::{build_client, check_response, join_url, read_json};
use super::{Password, RecordRef, RetryPolicy, SecretStore};
use crate::config::{HttpConfig, PasswordRecipe, SecretStoreConfig};
use crate::error::{Result, RotationError};
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

const SERVICE: &str = "onepassword";

pub struct ConnectClient {
    base_url: String,
    vault_id: String,
    bearer: String,
    recipe: PasswordRecipe,
    strict_titles: bool,
    client: Client,
    retry: RetryPolicy,
}

impl ConnectClient {
    pub fn new(config: &SecretStoreConfig, http: &HttpConfig) -> Result<Self> {
        let token = config
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RotationError::Config("secret store token is not set".into()))?;

        Ok(Self {
            base_url: config.base_url.clone(),
            vault_id: config.vault_id.clone(),
            bearer: format!("Bearer {token}"),
            recipe: config.password_recipe.clone(),
            strict_titles: config.strict_titles,
            client: build_client(Duration::from_millis(http.timeout_ms))?,
            retry: RetryPolicy::from(&http.retry),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn vault_url(&self) -> String {
        join_url(&self.base_url, &format!("v1/vaults/{}", self.vault_id))
    }

    fn items_url(&self) -> String {
        format!("{}/items", self.vault_url())
    }

    fn item_url(&self, item_id: &str) -> String {
        format!("{}/items/{}", self.vault_url(), item_id)
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let resp = self
            .client
            .get(url)
            .header(AUTHORIZATION, &self.bearer)
            .send()
            .await?;
        check_response(SERVICE, resp).await
    }

    async fn list_items(&self) -> Result<Vec<ItemSummary>> {
        let resp = self.get(&self.items_url()).await?;
        read_json(SERVICE, resp).await
    }

    async fn get_item(&self, item_id: &str) -> Result<ItemDetail> {
        let resp = self.get(&self.item_url(item_id)).await.map_err(|e| match e {
            RotationError::NotFound(_) => RotationError::NotFound(format!("item {item_id}")),
            other => other,
        })?;
        read_json(SERVICE, resp).await
    }

    async fn patch_password(&self, item_id: &str, body: &serde_json::Value) -> Result<()> {
        let resp = self
            .client
            .patch(self.item_url(item_id))
            .header(AUTHORIZATION, &self.bearer)
            .json(body)
            .send()
            .await?;
        check_response(SERVICE, resp).await?;
        Ok(())
    }
}

// ============================================================================
// Connect API Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ItemSummary {
    id: String,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct ItemDetail {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    fields: Vec<ItemField>,
}

#[derive(Debug, Deserialize)]
struct ItemField {
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    purpose: Option<String>,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecipeBody<'a> {
    length: u32,
    character_sets: &'a [String],
}

impl ItemDetail {
    /// The password field: `purpose == PASSWORD`, else `label == "password"`.
    fn password(&self) -> Option<&str> {
        let by_purpose = self
            .fields
            .iter()
            .find(|f| f.purpose.as_deref() == Some("PASSWORD"));
        let field = by_purpose.or_else(|| {
            self.fields
                .iter()
                .find(|f| f.label.as_deref() == Some("password"))
        })?;
        field.value.as_deref().filter(|v| !v.is_empty())
    }
}

fn generated_password_field(recipe: &PasswordRecipe) -> serde_json::Value {
    json!({
        "purpose": "PASSWORD",
        "generate": true,
        "recipe": RecipeBody {
            length: recipe.length,
            character_sets: &recipe.character_sets,
        },
    })
}

fn create_body(vault_id: &str, title: &str, username: &str, recipe: &PasswordRecipe) -> serde_json::Value {
    json!({
        "vault": { "id": vault_id },
        "title": title,
        "category": "LOGIN",
        "fields": [
            { "purpose": "USERNAME", "value": username },
            generated_password_field(recipe),
        ],
    })
}

fn rotate_body(recipe: &PasswordRecipe) -> serde_json::Value {
    json!([{
        "op": "replace",
        "path": "/fields/password",
        "value": generated_password_field(recipe),
    }])
}

// ============================================================================
// SecretStore Implementation
// ============================================================================

#[async_trait]
impl SecretStore for ConnectClient {
    async fn verify_access(&self) -> Result<()> {
        let url = self.vault_url();
        self.retry
            .run("onepassword verify vault", || self.get(&url))
            .await?;
        debug!("Vault {} is reachable", self.vault_id);
        Ok(())
    }

    async fn find_record(&self, title: &str) -> Result<Option<RecordRef>> {
        let items = self
            .retry
            .run("onepassword list items", || self.list_items())
            .await?;

        let matches: Vec<&ItemSummary> = items.iter().filter(|i| i.title == title).collect();
        if matches.len() > 1 {
            if self.strict_titles {
                return Err(RotationError::AmbiguousRecord {
                    title: title.to_string(),
                    count: matches.len(),
                });
            }
            warn!(
                "{} items share the title '{}'; using the first ({})",
                matches.len(),
                title,
                matches[0].id
            );
        }

        Ok(matches.first().map(|item| RecordRef {
            item_id: item.id.clone(),
            title: item.title.clone(),
        }))
    }

    async fn create_record(&self, title: &str, username: &str) -> Result<Option<String>> {
        let body = create_body(&self.vault_id, title, username, &self.recipe);

        // Not retried: a lost response to a successful create would yield a
        // second item with the same title.
        let resp = self
            .client
            .post(self.items_url())
            .header(AUTHORIZATION, &self.bearer)
            .json(&body)
            .send()
            .await?;
        let resp = check_response(SERVICE, resp).await?;

        let item_id = match read_json::<ItemDetail>(SERVICE, resp).await {
            Ok(item) => item.id,
            Err(e) => {
                warn!("Created item '{}' but could not parse the response: {}", title, e);
                None
            }
        };
        info!("Created secret-store item titled '{}'", title);
        Ok(item_id)
    }

    async fn rotate_password(&self, item_id: &str) -> Result<()> {
        let body = rotate_body(&self.recipe);
        self.retry
            .run("onepassword rotate password", || self.patch_password(item_id, &body))
            .await?;
        debug!("Requested password regeneration for item {}", item_id);
        Ok(())
    }

    async fn read_password(&self, item_id: &str) -> Result<Password> {
        let item = self
            .retry
            .run("onepassword read item", || self.get_item(item_id))
            .await?;
        item.password()
            .map(Password::new)
            .ok_or_else(|| RotationError::FieldMissing(item_id.to_string()))
    }

    fn name(&self) -> &str {
        SERVICE
    }
}
