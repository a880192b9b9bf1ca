use anyhow::{anyhow, Result};
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, Method,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error};

use shared_config::PlatformConfig;

/// Thin REST client over the clinic's platform (a PostgREST-style API in
/// production). Every store in this repo that isn't purely Redis-backed —
/// the job store, the payment intent repository, the outbox, the
/// transcript store, the opt-out registry — goes through this client
/// rather than hand-rolling its own HTTP plumbing.
pub struct PlatformClient {
    client: Client,
    base_url: String,
    service_key: String,
}

impl PlatformClient {
    pub fn new(config: &PlatformConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.clone(),
            service_key: config.service_key.clone(),
        }
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("apikey", HeaderValue::from_str(&self.service_key).unwrap_or_else(|_| HeaderValue::from_static("")));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.service_key))
                .unwrap_or_else(|_| HeaderValue::from_static("")),
        );
        headers
    }

    /// Generic request with a strict body — the empty-body case is handled
    /// by `request_lenient` below, for endpoints that may return `204` or
    /// an empty array.
    pub async fn request<T>(&self, method: Method, path: &str, body: Option<Value>) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("platform request {} {}", method, url);

        let mut req = self.client.request(method, &url).headers(self.headers());
        if let Some(body) = body {
            req = req.json(&body);
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            error!("platform error ({}): {}", status, error_text);
            return Err(match status.as_u16() {
                401 | 403 => anyhow!("authentication error: {}", error_text),
                404 => anyhow!("resource not found: {}", error_text),
                409 => anyhow!("conflict: {}", error_text),
                _ => anyhow!("platform error ({}): {}", status, error_text),
            });
        }

        Ok(response.json::<T>().await?)
    }

    /// As `request`, but tolerant of an empty response body — returns
    /// `T::default()` rather than failing to parse. Used by stores whose
    /// underlying table may legitimately return nothing (e.g. a
    /// conditional-insert that reports success with no representation).
    pub async fn request_lenient<T>(&self, method: Method, path: &str, body: Option<Value>) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("platform request (lenient) {} {}", method, url);

        let mut req = self.client.request(method, &url).headers(self.headers());
        if let Some(body) = body {
            req = req.json(&body);
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            error!("platform error ({}): {}", status, error_text);
            return Err(match status.as_u16() {
                401 | 403 => anyhow!("authentication error: {}", error_text),
                404 => anyhow!("resource not found: {}", error_text),
                409 => anyhow!("conflict: {}", error_text),
                _ => anyhow!("platform error ({}): {}", status, error_text),
            });
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(T::default());
        }

        serde_json::from_slice::<T>(&bytes).map_err(|e| {
            error!("failed to parse platform response: {}", e);
            anyhow!("failed to parse platform response: {}", e)
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}
