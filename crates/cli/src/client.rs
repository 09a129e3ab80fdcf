//! HTTP client wrapper for the registry server.

use std::time::Duration;

use anyhow::{bail, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

use common::protocol::ErrorBody;

const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Thin client that attaches identity headers and decodes the server's
/// error bodies into readable failures.
pub struct RegistryClient {
    client: reqwest::Client,
    base_url: String,
    principal: Option<String>,
    api_key: Option<String>,
}

impl RegistryClient {
    pub fn new(
        base_url: String,
        principal: Option<String>,
        api_key: Option<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            principal,
            api_key,
        })
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let request = self.client.get(format!("{}{}", self.base_url, path));
        self.send(request).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body);
        self.send(self.with_identity(request)?).await
    }

    /// POST with no request body (e.g. cancel).
    pub async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let request = self.client.post(format!("{}{}", self.base_url, path));
        self.send(self.with_identity(request)?).await
    }

    fn with_identity(
        &self,
        mut request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder> {
        let Some(principal) = &self.principal else {
            bail!("this command needs an identity; pass --principal or set REGISTRY_PRINCIPAL");
        };
        request = request.header("x-principal", principal);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }
        Ok(request)
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        match response.json::<ErrorBody>().await {
            Ok(body) => bail!("{} ({}, HTTP {})", body.message, body.error, status.as_u16()),
            Err(_) => bail!("request failed with HTTP {}", status.as_u16()),
        }
    }
}
