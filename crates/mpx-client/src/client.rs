//! Remote client trait and the HTTP implementation
//!
//! The backend is an opaque submit/poll service. Every request returns a
//! request id immediately; results are fetched later through `status/{id}`.

use crate::config::MpxConfig;
use crate::request::{AssetSlot, AssetSpec, GenerationRequest, RequestId, StatusResult};
use mpx_core::{MpxError, Result};
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.genai.masterpiecex.com/v2";

/// Operations the generation backend exposes.
///
/// Shared read-only across worker threads.
pub trait RemoteClient: Send + Sync {
    /// Submit a request and return its id without waiting
    fn submit(&self, request: &GenerationRequest) -> Result<RequestId>;

    /// Fetch the current status of a request
    fn get_status(&self, request_id: &RequestId) -> Result<StatusResult>;

    /// Reserve an upload slot for an asset
    fn create_asset(&self, spec: &AssetSpec) -> Result<AssetSlot>;

    /// Upload bytes to a slot's signed URL
    fn upload_asset(&self, slot: &AssetSlot, content_type: &str, bytes: &[u8]) -> Result<()>;

    /// Fetch the bytes behind a URL
    fn download(&self, url: &str) -> Result<Vec<u8>>;

    /// Check that the configured credentials are accepted
    fn connection_test(&self) -> Result<()>;
}

/// Blocking HTTP client for the generation backend
pub struct HttpClient {
    api_url: String,
    bearer_token: String,
    agent: ureq::Agent,
}

impl HttpClient {
    pub fn new(api_url: &str, bearer_token: &str, timeout: Duration) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            bearer_token: bearer_token.to_string(),
            agent: build_agent(timeout),
        }
    }

    /// Create a client from resolved configuration
    pub fn from_config(config: &MpxConfig) -> Result<Self> {
        let token = config.require_token()?;
        Ok(Self::new(&config.api_url, token, config.request_timeout))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_url, path)
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.bearer_token)
    }

    fn post_json(&self, path: &str, payload: &Value) -> Result<Value> {
        let url = self.url(path);
        let mut response = self
            .agent
            .post(&url)
            .header("Authorization", &self.auth_header())
            .header("Content-Type", "application/json")
            .send_json(payload)
            .map_err(|e| map_http_error(path, e))?;

        response
            .body_mut()
            .read_json()
            .map_err(|e| MpxError::Transport(format!("Failed to read {} response: {}", path, e)))
    }

    fn get_json(&self, path: &str) -> Result<Value> {
        let url = self.url(path);
        let mut response = self
            .agent
            .get(&url)
            .header("Authorization", &self.auth_header())
            .call()
            .map_err(|e| map_http_error(path, e))?;

        response
            .body_mut()
            .read_json()
            .map_err(|e| MpxError::Transport(format!("Failed to read {} response: {}", path, e)))
    }
}

impl RemoteClient for HttpClient {
    fn submit(&self, request: &GenerationRequest) -> Result<RequestId> {
        let response = self.post_json(request.endpoint(), &request.payload())?;
        request_id_of(&response).ok_or_else(|| {
            MpxError::Transport(format!(
                "No request id in {} response: {}",
                request.endpoint(),
                response
            ))
        })
    }

    fn get_status(&self, request_id: &RequestId) -> Result<StatusResult> {
        let response = self.get_json(&format!("status/{}", request_id))?;
        serde_json::from_value(response)
            .map_err(|e| MpxError::Transport(format!("Unexpected status response: {}", e)))
    }

    fn create_asset(&self, spec: &AssetSpec) -> Result<AssetSlot> {
        let payload = serde_json::to_value(spec)?;
        let response = self.post_json("assets/create", &payload)?;
        serde_json::from_value(response)
            .map_err(|e| MpxError::Transport(format!("Unexpected asset response: {}", e)))
    }

    fn upload_asset(&self, slot: &AssetSlot, content_type: &str, bytes: &[u8]) -> Result<()> {
        self.agent
            .put(&slot.asset_url)
            .header("Authorization", &self.auth_header())
            .header("Content-Type", content_type)
            .send(bytes)
            .map_err(|e| map_http_error("asset upload", e))?;
        tracing::debug!(request_id = %slot.request_id, bytes = bytes.len(), "uploaded asset");
        Ok(())
    }

    fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| map_http_error("download", e))?;

        let mut reader = response.into_body().into_reader();
        let mut bytes = Vec::new();
        std::io::Read::read_to_end(&mut reader, &mut bytes)
            .map_err(|e| MpxError::Transport(format!("Failed to read download: {}", e)))?;
        Ok(bytes)
    }

    fn connection_test(&self) -> Result<()> {
        self.agent
            .get(&self.url("connection/test"))
            .header("Authorization", &self.auth_header())
            .call()
            .map_err(|e| map_http_error("connection test", e))?;
        Ok(())
    }
}

fn request_id_of(response: &Value) -> Option<RequestId> {
    response
        .get("requestId")
        .or_else(|| response.get("request_id"))
        .and_then(|id| id.as_str())
        .map(RequestId::from)
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build();
    config.into()
}

fn map_http_error(context: &str, e: ureq::Error) -> MpxError {
    match e {
        ureq::Error::StatusCode(code @ (401 | 403)) => {
            MpxError::Unauthorized(format!("{} rejected with HTTP {}", context, code))
        }
        other => MpxError::Transport(format!("{} failed: {}", context, other)),
    }
}
