//! Okta-style identity provider client.

use super::http::{build_client, check_response, join_url, read_json};
use super::{Identity, IdentityProvider, Password, RetryPolicy};
use crate::config::{HttpConfig, IdentityProviderConfig};
use crate::error::{Result, RotationError};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, LINK};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const SERVICE: &str = "okta";

pub struct OktaClient {
    base_url: String,
    auth_header: String,
    page_size: u32,
    client: Client,
    retry: RetryPolicy,
}

impl OktaClient {
    pub fn new(config: &IdentityProviderConfig, http: &HttpConfig) -> Result<Self> {
        let token = config
            .api_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RotationError::Config("identity provider API token is not set".into()))?;

        Ok(Self {
            base_url: config.base_url.clone(),
            auth_header: format!("{} {}", config.auth_scheme, token),
            page_size: config.page_size.max(1),
            client: build_client(Duration::from_millis(http.timeout_ms))?,
            retry: RetryPolicy::from(&http.retry),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn fetch_page(&self, url: &str) -> Result<(Vec<OktaUser>, Option<String>)> {
        let resp = self
            .client
            .get(url)
            .header(AUTHORIZATION, &self.auth_header)
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        let resp = check_response(SERVICE, resp).await?;

        let next = resp
            .headers()
            .get_all(LINK)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(next_link);
        let users: Vec<OktaUser> = read_json(SERVICE, resp).await?;
        Ok((users, next))
    }

    async fn post_password(&self, url: &str, body: &PasswordResetRequest<'_>) -> Result<()> {
        let resp = self
            .client
            .post(url)
            .header(AUTHORIZATION, &self.auth_header)
            .header(ACCEPT, "application/json")
            .json(body)
            .send()
            .await?;
        check_response(SERVICE, resp).await?;
        Ok(())
    }
}

// ============================================================================
// Okta API Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct OktaUser {
    id: String,
    #[serde(default)]
    profile: OktaProfile,
}

#[derive(Debug, Default, Deserialize)]
struct OktaProfile {
    email: Option<String>,
    login: Option<String>,
}

#[derive(Debug, Serialize)]
struct PasswordResetRequest<'a> {
    credentials: PasswordCredentials<'a>,
}

#[derive(Debug, Serialize)]
struct PasswordCredentials<'a> {
    password: PasswordValue<'a>,
}

#[derive(Debug, Serialize)]
struct PasswordValue<'a> {
    value: &'a str,
}

impl OktaUser {
    fn into_identity(self) -> Result<Identity> {
        let email = self
            .profile
            .email
            .or(self.profile.login)
            .ok_or_else(|| RotationError::Decode {
                service: SERVICE,
                message: format!("user {} has neither email nor login", self.id),
            })?;
        Ok(Identity { id: self.id, email })
    }
}

/// Extract the `rel="next"` target from one `Link` header value.
fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|p| {
            let p = p.trim();
            p == "rel=\"next\"" || p == "rel=next"
        });
        if !is_next {
            return None;
        }
        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(str::to_string)
    })
}

/// The API token is only ever sent to the configured origin.
fn same_origin(base: &str, candidate: &str) -> bool {
    match (Url::parse(base), Url::parse(candidate)) {
        (Ok(base), Ok(candidate)) => base.origin() == candidate.origin(),
        _ => false,
    }
}

// ============================================================================
// IdentityProvider Implementation
// ============================================================================

#[async_trait]
impl IdentityProvider for OktaClient {
    async fn list_group_members(&self, group_id: &str) -> Result<Vec<Identity>> {
        let mut url = format!(
            "{}?limit={}",
            join_url(&self.base_url, &format!("api/v1/groups/{group_id}/users")),
            self.page_size
        );
        let mut identities = Vec::new();
        let mut pages = 0u32;

        loop {
            let (users, next) = self
                .retry
                .run("okta list group members", || self.fetch_page(&url))
                .await?;
            pages += 1;
            for user in users {
                identities.push(user.into_identity()?);
            }
            match next {
                Some(next_url) if next_url != url => {
                    if !same_origin(&self.base_url, &next_url) {
                        return Err(RotationError::Decode {
                            service: SERVICE,
                            message: format!("next-page link {next_url} leaves {}", self.base_url),
                        });
                    }
                    url = next_url;
                }
                _ => break,
            }
        }

        info!(
            "Listed {} member(s) of group {} across {} page(s)",
            identities.len(),
            group_id,
            pages
        );
        Ok(identities)
    }

    async fn set_password(&self, identity_id: &str, password: &Password) -> Result<()> {
        let url = join_url(&self.base_url, &format!("api/v1/users/{identity_id}"));
        let body = PasswordResetRequest {
            credentials: PasswordCredentials {
                password: PasswordValue {
                    value: password.expose(),
                },
            },
        };

        self.retry
            .run("okta set password", || self.post_password(&url, &body))
            .await?;
        debug!("Password set at identity provider for {}", identity_id);
        Ok(())
    }

    fn name(&self) -> &str {
        SERVICE
    }
}
