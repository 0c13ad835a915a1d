//! Request and status types for the generation backend

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

/// Opaque identifier returned when a request is submitted
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle state of a submitted request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Complete,
    Failed,
    /// Anything else the backend reports (queued, processing, ...)
    #[serde(other)]
    Pending,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Pending)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Complete => write!(f, "complete"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A status report for one request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawStatus")]
pub struct StatusResult {
    pub request_id: RequestId,
    pub status: JobStatus,
    pub outputs: Map<String, Value>,
    pub output_url: Option<String>,
    pub error: Option<String>,
    pub progress: Option<f64>,
    pub processing_time_s: Option<f64>,
}

/// Wire form; the backend sends snake_case, camelCase, or both
#[derive(Deserialize)]
struct RawStatus {
    #[serde(default)]
    request_id: Option<RequestId>,
    #[serde(default, rename = "requestId")]
    request_id_camel: Option<RequestId>,
    status: JobStatus,
    #[serde(default)]
    outputs: Option<Map<String, Value>>,
    #[serde(default)]
    output_url: Option<String>,
    #[serde(default, rename = "outputUrl")]
    output_url_camel: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default)]
    processing_time_s: Option<f64>,
    #[serde(default, rename = "processingTime_s")]
    processing_time_camel: Option<f64>,
}

impl TryFrom<RawStatus> for StatusResult {
    type Error = String;

    fn try_from(raw: RawStatus) -> Result<Self, Self::Error> {
        let request_id = raw
            .request_id
            .or(raw.request_id_camel)
            .ok_or_else(|| "status response has no request id".to_string())?;
        Ok(Self {
            request_id,
            status: raw.status,
            outputs: raw.outputs.unwrap_or_default(),
            output_url: raw.output_url.or(raw.output_url_camel),
            error: raw.error,
            progress: raw.progress,
            processing_time_s: raw.processing_time_s.or(raw.processing_time_camel),
        })
    }
}

impl StatusResult {
    pub fn new(request_id: RequestId, status: JobStatus) -> Self {
        Self {
            request_id,
            status,
            outputs: Map::new(),
            output_url: None,
            error: None,
            progress: None,
            processing_time_s: None,
        }
    }

    /// A string output by name
    pub fn output_str(&self, key: &str) -> Option<&str> {
        self.outputs.get(key).and_then(|v| v.as_str())
    }

    /// A list-of-strings output by name
    pub fn output_strings(&self, key: &str) -> Vec<String> {
        self.outputs
            .get(key)
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// The kind of work a request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    LlmCall,
    ImageQuery,
    TextToImage,
    ImageTo3d,
    Optimize,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::LlmCall => write!(f, "llm_call"),
            RequestKind::ImageQuery => write!(f, "image_query"),
            RequestKind::TextToImage => write!(f, "text_to_image"),
            RequestKind::ImageTo3d => write!(f, "image_to_3d"),
            RequestKind::Optimize => write!(f, "optimize"),
        }
    }
}

/// Sampling parameters for model calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmParams {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for LlmParams {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            temperature: 0.0,
            max_tokens: 4096,
        }
    }
}

/// Where image-to-3D reads its input image from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ImageSource {
    /// A previously uploaded asset
    RequestId(RequestId),
    /// A publicly reachable image URL
    Url(String),
}

/// A typed request to the generation backend
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationRequest {
    LlmCall {
        system_prompt: String,
        user_prompt: String,
        params: LlmParams,
    },
    ImageQuery {
        user_prompt: String,
        image_urls: Vec<String>,
        params: LlmParams,
    },
    TextToImage {
        prompt: String,
        num_images: u32,
        num_steps: u32,
        seed: u64,
        lora_scale: f64,
        lora_weights: String,
    },
    ImageTo3d {
        source: ImageSource,
        seed: u64,
        texture_size: u32,
    },
    Optimize {
        asset_request_id: RequestId,
        target_ratio: f64,
        output_file_format: String,
        object_type: String,
    },
}

impl GenerationRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            GenerationRequest::LlmCall { .. } => RequestKind::LlmCall,
            GenerationRequest::ImageQuery { .. } => RequestKind::ImageQuery,
            GenerationRequest::TextToImage { .. } => RequestKind::TextToImage,
            GenerationRequest::ImageTo3d { .. } => RequestKind::ImageTo3d,
            GenerationRequest::Optimize { .. } => RequestKind::Optimize,
        }
    }

    /// Endpoint path relative to the API base URL
    pub fn endpoint(&self) -> &'static str {
        match self.kind() {
            RequestKind::LlmCall => "llms/call",
            RequestKind::ImageQuery => "llms/imagequery",
            RequestKind::TextToImage => "components/text2image",
            RequestKind::ImageTo3d => "functions/imageto3d",
            RequestKind::Optimize => "components/optimize",
        }
    }

    /// JSON body for the submit call
    pub fn payload(&self) -> Value {
        match self {
            GenerationRequest::LlmCall {
                system_prompt,
                user_prompt,
                params,
            } => json!({
                "systemPrompt": system_prompt,
                "userPrompt": user_prompt,
                "dataParams": {
                    "temperature": params.temperature,
                    "max_tokens": params.max_tokens,
                },
                "model": params.model,
            }),
            GenerationRequest::ImageQuery {
                user_prompt,
                image_urls,
                params,
            } => json!({
                "userPrompt": user_prompt,
                "imageUrls": image_urls,
                "temperature": params.temperature,
                "max_tokens": params.max_tokens,
                "model": params.model,
            }),
            GenerationRequest::TextToImage {
                prompt,
                num_images,
                num_steps,
                seed,
                lora_scale,
                lora_weights,
            } => json!({
                "prompt": prompt,
                "numImages": num_images,
                "numSteps": num_steps,
                "seed": seed,
                "loraScale": lora_scale,
                "loraWeights": lora_weights,
            }),
            GenerationRequest::ImageTo3d {
                source,
                seed,
                texture_size,
            } => {
                let mut body = json!({
                    "seed": seed,
                    "textureSize": texture_size,
                });
                match source {
                    ImageSource::RequestId(id) => body["imageRequestId"] = json!(id.as_str()),
                    ImageSource::Url(url) => body["imageUrl"] = json!(url),
                }
                body
            }
            GenerationRequest::Optimize {
                asset_request_id,
                target_ratio,
                output_file_format,
                object_type,
            } => json!({
                "assetRequestId": asset_request_id.as_str(),
                "targetRatio": target_ratio,
                "outputFileFormat": output_file_format,
                "objectType": object_type,
            }),
        }
    }
}

/// A request to create an upload slot for an asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSpec {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub content_type: String,
}

impl AssetSpec {
    pub fn png(description: &str) -> Self {
        Self {
            name: "image.png".to_string(),
            description: description.to_string(),
            content_type: "image/png".to_string(),
        }
    }

    pub fn glb(description: &str) -> Self {
        Self {
            name: "model.glb".to_string(),
            description: description.to_string(),
            content_type: "model/glb".to_string(),
        }
    }
}

/// A created asset: its request id and a signed upload URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSlot {
    #[serde(alias = "requestId")]
    pub request_id: RequestId,
    #[serde(alias = "assetUrl")]
    pub asset_url: String,
}

impl AssetSlot {
    /// The signed URL without its query string
    pub fn public_url(&self) -> &str {
        self.asset_url
            .split_once('?')
            .map(|(base, _)| base)
            .unwrap_or(&self.asset_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_decodes_camel_case() {
        let json = r#"{
            "requestId": "CUDNC0oowbeoV9MTnhFz",
            "status": "complete",
            "outputs": null,
            "outputUrl": "https://storage.example.com/exports/optimized.fbx",
            "processingTime_s": 4.815
        }"#;
        let status: StatusResult = serde_json::from_str(json).unwrap();
        assert_eq!(status.request_id.as_str(), "CUDNC0oowbeoV9MTnhFz");
        assert_eq!(status.status, JobStatus::Complete);
        assert!(status.outputs.is_empty());
        assert_eq!(
            status.output_url.as_deref(),
            Some("https://storage.example.com/exports/optimized.fbx")
        );
        assert_eq!(status.processing_time_s, Some(4.815));
    }

    #[test]
    fn test_unknown_status_is_pending() {
        let json = r#"{"request_id": "r1", "status": "processing", "progress": 40}"#;
        let status: StatusResult = serde_json::from_str(json).unwrap();
        assert_eq!(status.status, JobStatus::Pending);
        assert!(!status.status.is_terminal());
    }

    #[test]
    fn test_output_accessors() {
        let json = r#"{
            "request_id": "r2",
            "status": "complete",
            "outputs": {"output": "{\"a\": 1}", "images": ["u1", "u2"]}
        }"#;
        let status: StatusResult = serde_json::from_str(json).unwrap();
        assert_eq!(status.output_str("output"), Some("{\"a\": 1}"));
        assert_eq!(status.output_strings("images"), vec!["u1", "u2"]);
        assert!(status.output_strings("missing").is_empty());
    }

    #[test]
    fn test_image_to_3d_payload_source() {
        let by_id = GenerationRequest::ImageTo3d {
            source: ImageSource::RequestId(RequestId::new("asset-1")),
            seed: 7,
            texture_size: 1024,
        };
        let body = by_id.payload();
        assert_eq!(body["imageRequestId"], "asset-1");
        assert!(body.get("imageUrl").is_none());
        assert_eq!(by_id.endpoint(), "functions/imageto3d");

        let by_url = GenerationRequest::ImageTo3d {
            source: ImageSource::Url("https://x/y.png".into()),
            seed: 7,
            texture_size: 512,
        };
        assert_eq!(by_url.payload()["imageUrl"], "https://x/y.png");
        assert_eq!(by_url.payload()["textureSize"], 512);
    }

    #[test]
    fn test_public_url_strips_query() {
        let slot = AssetSlot {
            request_id: RequestId::new("a1"),
            asset_url: "https://bucket/path/image.png?X-Sig=abc&exp=1".to_string(),
        };
        assert_eq!(slot.public_url(), "https://bucket/path/image.png");

        let plain = AssetSlot {
            request_id: RequestId::new("a2"),
            asset_url: "https://bucket/model.glb".to_string(),
        };
        assert_eq!(plain.public_url(), "https://bucket/model.glb");
    }
}
