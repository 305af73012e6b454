use crate::error::{Result, RotationError};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response};
use std::time::Duration;

/// Build the shared HTTP client for one API. `reqwest::Client` pools
/// connections and is cheap to clone across tasks.
pub(crate) fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("credential-rotator/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| RotationError::Config(format!("HTTP client: {e}")))
}

/// Pass 2xx responses through; map anything else onto the error taxonomy.
pub(crate) async fn check_response(service: &'static str, resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let retry_after = resp
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = resp.text().await.unwrap_or_default();

    Err(RotationError::from_status(service, status.as_u16(), &body, retry_after))
}

/// Deserialize a JSON body, tagging failures with the service name.
pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    service: &'static str,
    resp: Response,
) -> Result<T> {
    let bytes = resp.bytes().await.map_err(RotationError::from)?;
    serde_json::from_slice(&bytes).map_err(|e| RotationError::Decode {
        service,
        message: e.to_string(),
    })
}

/// Join a base URL and a path without doubling slashes.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
