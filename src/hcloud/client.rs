//! Hetzner Cloud API client implementation.
//!
//! This module provides the HTTP client for the Hetzner Cloud REST API. Each
//! call makes a single attempt and maps the HTTP status onto the engine's
//! error taxonomy.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode, header};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, trace};

use crate::config::{ResourceIntent, ResourceKind};
use crate::error::{ApiError, HcloudError, Result};

use super::api::CloudApi;
use super::types::{
    CreateFirewallRequest, CreateNetworkRequest, ErrorEnvelope, FirewallEnvelope,
    NetworkEnvelope, RemoteObject, SetRulesRequest, UpdateRequest, WireRule,
};

/// Hetzner Cloud API base URL.
pub const HCLOUD_API_URL: &str = "https://api.hetzner.cloud/v1";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Hetzner Cloud API client.
#[derive(Debug, Clone)]
pub struct HcloudClient {
    /// HTTP client.
    client: Client,
    /// Base URL without trailing slash.
    base_url: String,
    /// API token.
    token: String,
}

impl HcloudClient {
    /// Creates a new client against the public API.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(token: &str) -> Result<Self> {
        Self::with_endpoint(token, HCLOUD_API_URL)
    }

    /// Creates a client against a custom endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_endpoint(token: &str, endpoint: &str) -> Result<Self> {
        Self::with_timeout(token, endpoint, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a client with a custom endpoint and timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(token: &str, endpoint: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| HcloudError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: endpoint.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Returns the base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{path}", self.base_url);
        trace!("{method} {url}");
        self.client
            .request(method, url)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
    }

    /// Sends a request and returns the raw body of a successful answer.
    async fn send(
        &self,
        request: RequestBuilder,
        kind: ResourceKind,
        id: Option<u64>,
    ) -> Result<String> {
        let response = request.send().await.map_err(|e| {
            HcloudError::Api(ApiError::transient(None, format!("Request failed: {e}")))
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            HcloudError::Api(ApiError::transient(
                Some(status.as_u16()),
                format!("Failed to read response body: {e}"),
            ))
        })?;

        if status.is_success() {
            return Ok(body);
        }

        Err(HcloudError::Api(classify_failure(status, &body, kind, id)))
    }

    async fn send_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        kind: ResourceKind,
        id: Option<u64>,
    ) -> Result<T> {
        let mut request = self.request(method, path);
        if let Some(body) = body {
            request = request.json(body);
        }

        let text = self.send(request, kind, id).await?;
        serde_json::from_str(&text).map_err(|e| {
            HcloudError::Api(ApiError::InvalidResponse {
                message: format!("Failed to parse response: {e}"),
            })
        })
    }

    fn object_path(kind: ResourceKind, id: u64) -> String {
        format!("{}/{id}", kind.api_path())
    }

    async fn put_metadata(&self, id: u64, intent: &ResourceIntent) -> Result<RemoteObject> {
        let kind = intent.kind();
        let body = UpdateRequest {
            name: intent.name().to_string(),
            labels: intent.labels().clone(),
        };
        let path = Self::object_path(kind, id);

        match kind {
            ResourceKind::Firewall => {
                let envelope: FirewallEnvelope = self
                    .send_json(Method::PUT, &path, Some(&body), kind, Some(id))
                    .await?;
                Ok(RemoteObject::Firewall(envelope.firewall))
            }
            ResourceKind::Network => {
                let envelope: NetworkEnvelope = self
                    .send_json(Method::PUT, &path, Some(&body), kind, Some(id))
                    .await?;
                Ok(RemoteObject::Network(envelope.network))
            }
        }
    }
}

/// Maps a non-success answer onto the error taxonomy.
fn classify_failure(
    status: StatusCode,
    body: &str,
    kind: ResourceKind,
    id: Option<u64>,
) -> ApiError {
    let code = status.as_u16();

    if status == StatusCode::NOT_FOUND
        && let Some(id) = id
    {
        return ApiError::NotFound {
            kind: kind.to_string(),
            id,
        };
    }

    let (error_code, message) = serde_json::from_str::<ErrorEnvelope>(body).map_or_else(
        |_| (String::from("unknown"), body.to_string()),
        |envelope| (envelope.error.code, envelope.error.message),
    );

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return ApiError::transient(Some(code), format!("{error_code}: {message}"));
    }

    ApiError::rejected(code, error_code, message)
}

#[async_trait]
impl CloudApi for HcloudClient {
    async fn create(&self, intent: &ResourceIntent) -> Result<RemoteObject> {
        let kind = intent.kind();
        debug!("Creating {} '{}'", kind, intent.name());

        match intent {
            ResourceIntent::Firewall(fw) => {
                let body = CreateFirewallRequest::from(fw);
                let envelope: FirewallEnvelope = self
                    .send_json(Method::POST, kind.api_path(), Some(&body), kind, None)
                    .await?;
                Ok(RemoteObject::Firewall(envelope.firewall))
            }
            ResourceIntent::Network(net) => {
                let body = CreateNetworkRequest::from(net);
                let envelope: NetworkEnvelope = self
                    .send_json(Method::POST, kind.api_path(), Some(&body), kind, None)
                    .await?;
                Ok(RemoteObject::Network(envelope.network))
            }
        }
    }

    async fn read(&self, kind: ResourceKind, id: u64) -> Result<RemoteObject> {
        debug!("Reading {kind} {id}");
        let path = Self::object_path(kind, id);

        match kind {
            ResourceKind::Firewall => {
                let envelope: FirewallEnvelope = self
                    .send_json::<(), _>(Method::GET, &path, None, kind, Some(id))
                    .await?;
                Ok(RemoteObject::Firewall(envelope.firewall))
            }
            ResourceKind::Network => {
                let envelope: NetworkEnvelope = self
                    .send_json::<(), _>(Method::GET, &path, None, kind, Some(id))
                    .await?;
                Ok(RemoteObject::Network(envelope.network))
            }
        }
    }

    async fn update(&self, id: u64, intent: &ResourceIntent) -> Result<RemoteObject> {
        let kind = intent.kind();
        debug!("Updating {kind} {id}");

        let object = self.put_metadata(id, intent).await?;

        let ResourceIntent::Firewall(fw) = intent else {
            return Ok(object);
        };

        let body = SetRulesRequest {
            rules: fw.rules.iter().map(WireRule::from).collect(),
        };
        let path = format!("{}/actions/set_rules", Self::object_path(kind, id));
        let request = self.request(Method::POST, &path).json(&body);
        self.send(request, kind, Some(id)).await?;

        // set_rules answers with actions only; read the firewall back
        self.read(kind, id).await
    }

    async fn delete(&self, kind: ResourceKind, id: u64) -> Result<()> {
        debug!("Deleting {kind} {id}");
        let request = self.request(Method::DELETE, &Self::object_path(kind, id));
        self.send(request, kind, Some(id)).await?;
        Ok(())
    }
}
