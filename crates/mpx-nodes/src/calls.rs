//! Backend calls shared by the nodes
//!
//! Every function here runs under the backend's retry policy: each attempt
//! submits a fresh request, waits for it, and validates the reply. A reply
//! that is missing what the caller needs counts as a failed attempt.

use crate::tensor::ImageTensor;
use mpx_client::{
    AssetSpec, Backend, CancelToken, GenerationRequest, ImageSource, LlmParams, RequestId,
    StatusResult,
};
use mpx_core::{parse_structured, MpxError, Result, StructuredResponse};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// LoRA weights tuned for isolated game-asset renders
pub const GAME_ASSETS_LORA: &str = "https://huggingface.co/gokaygokay/Flux-Game-Assets-LoRA-v2";
/// Trigger word the game-assets LoRA was trained on
pub const LORA_TRIGGER: &str = "wbgmsst.";
pub const DEFAULT_LORA_SCALE: f64 = 0.8;
pub const TEXT_TO_IMAGE_STEPS: u32 = 4;

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif", "bmp"];
pub const TEXTURE_SIZES: &[u32] = &[512, 1024, 2048];

/// Run `request` and decode its text output as a structured response.
///
/// `keys` must all be present; `validate` may reject the reply further
/// (as malformed, to retry) or convert it into the caller's type.
pub fn structured_call<T, V>(
    backend: &Backend,
    cancel: &CancelToken,
    request: &GenerationRequest,
    keys: &[&str],
    mut validate: V,
) -> Result<T>
where
    V: FnMut(StructuredResponse) -> Result<T>,
{
    backend.run_with_retry(request, cancel, |status| {
        let parsed = parse_structured(response_text(status)?)?;
        parsed.require(keys)?;
        validate(parsed)
    })
}

fn response_text(status: &StatusResult) -> Result<&str> {
    status.output_str("output").ok_or_else(|| {
        MpxError::malformed(format!(
            "request {} returned no text output",
            status.request_id
        ))
    })
}

/// A chat completion whose reply must be a JSON object holding `keys`
pub fn llm_json(
    backend: &Backend,
    cancel: &CancelToken,
    system_prompt: &str,
    user_prompt: &str,
    params: &LlmParams,
    keys: &[&str],
) -> Result<StructuredResponse> {
    let request = GenerationRequest::LlmCall {
        system_prompt: system_prompt.to_string(),
        user_prompt: user_prompt.to_string(),
        params: params.clone(),
    };
    structured_call(backend, cancel, &request, keys, Ok)
}

/// A question about hosted images whose reply must hold `keys`
pub fn image_query_json<T, V>(
    backend: &Backend,
    cancel: &CancelToken,
    query: &str,
    image_urls: &[String],
    params: &LlmParams,
    keys: &[&str],
    validate: V,
) -> Result<T>
where
    V: FnMut(StructuredResponse) -> Result<T>,
{
    let request = GenerationRequest::ImageQuery {
        user_prompt: query.to_string(),
        image_urls: image_urls.to_vec(),
        params: params.clone(),
    };
    structured_call(backend, cancel, &request, keys, validate)
}

/// Upload a tensor as PNG and return its asset slot
pub fn upload_image(
    backend: &Backend,
    image: &ImageTensor,
    description: &str,
) -> Result<mpx_client::AssetSlot> {
    backend.upload(&AssetSpec::png(description), &image.to_png_bytes()?)
}

/// Upload tensors and return their public URLs, in order
pub fn upload_images(backend: &Backend, images: &[ImageTensor]) -> Result<Vec<String>> {
    images
        .iter()
        .map(|img| {
            upload_image(backend, img, "User uploaded image").map(|slot| slot.public_url().to_string())
        })
        .collect()
}

/// Text-to-image with the game-assets LoRA. Returns image URLs and the request id.
pub fn text_to_image(
    backend: &Backend,
    cancel: &CancelToken,
    prompt: &str,
    num_images: u32,
    seed: u64,
) -> Result<(Vec<String>, RequestId)> {
    let request = GenerationRequest::TextToImage {
        prompt: prompt.to_string(),
        num_images,
        num_steps: TEXT_TO_IMAGE_STEPS,
        seed,
        lora_scale: DEFAULT_LORA_SCALE,
        lora_weights: GAME_ASSETS_LORA.to_string(),
    };
    backend.run_with_retry(&request, cancel, |status| {
        let urls = status.output_strings("images");
        if urls.len() < num_images as usize {
            return Err(MpxError::malformed(format!(
                "expected {} images from request {}, got {}",
                num_images,
                status.request_id,
                urls.len()
            )));
        }
        Ok((urls, status.request_id.clone()))
    })
}

/// Fetch and decode a remote image
pub fn download_image(backend: &Backend, url: &str) -> Result<ImageTensor> {
    let bytes = backend.client().download(url)?;
    ImageTensor::from_png_bytes(&bytes)
}

/// Where an image-to-3D input comes from
#[derive(Debug, Clone, PartialEq)]
pub enum ImageInput {
    /// Pixels in memory, uploaded as PNG
    Tensor(ImageTensor),
    /// An image file on disk, decoded then uploaded
    Path(PathBuf),
    /// A remote image the backend fetches itself
    Url(String),
}

impl ImageInput {
    /// A path if `location` exists on disk, otherwise a URL
    pub fn from_location(location: &str) -> Self {
        if Path::new(location).exists() {
            ImageInput::Path(PathBuf::from(location))
        } else {
            ImageInput::Url(location.to_string())
        }
    }
}

/// Check that `url` has a scheme, a host and an image file extension
pub fn validate_image_url(url: &str) -> Result<()> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| MpxError::validation(format!("'{}' is not a valid URL", url)))?;
    let host = rest.split('/').next().unwrap_or_default();
    if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+') {
        return Err(MpxError::validation(format!("'{}' has no valid scheme", url)));
    }
    if host.is_empty() {
        return Err(MpxError::validation(format!("'{}' has no host", url)));
    }

    let path = rest.split(['?', '#']).next().unwrap_or(rest);
    let filename = path.rsplit('/').next().unwrap_or_default();
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        return Err(MpxError::validation(format!(
            "Unsupported image file extension: '{}'",
            ext
        )));
    }
    Ok(())
}

pub fn validate_texture_size(texture_size: u32) -> Result<()> {
    if TEXTURE_SIZES.contains(&texture_size) {
        Ok(())
    } else {
        Err(MpxError::validation(format!(
            "texture_size must be one of: 512, 1024, 2048! Got: {}",
            texture_size
        )))
    }
}

/// URLs of one generated model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelUrls {
    pub glb_url: String,
    pub fbx_url: String,
    pub usdz_url: String,
    pub thumbnail_url: String,
    pub request_id: RequestId,
}

/// Image-to-3D for one image
pub fn image_to_3d(
    backend: &Backend,
    cancel: &CancelToken,
    input: &ImageInput,
    seed: u64,
    texture_size: u32,
) -> Result<ModelUrls> {
    validate_texture_size(texture_size)?;

    let source = match input {
        ImageInput::Tensor(tensor) => {
            ImageSource::RequestId(upload_image(backend, tensor, "User uploaded image.")?.request_id)
        }
        ImageInput::Path(path) => {
            if !path.is_file() {
                return Err(MpxError::validation(format!(
                    "'{}' is not an image file on disk",
                    path.display()
                )));
            }
            let tensor = ImageTensor::load(path)?;
            ImageSource::RequestId(upload_image(backend, &tensor, "User uploaded image.")?.request_id)
        }
        ImageInput::Url(url) => {
            validate_image_url(url)?;
            ImageSource::Url(url.clone())
        }
    };

    let request = GenerationRequest::ImageTo3d {
        source,
        seed,
        texture_size,
    };
    backend.run_with_retry(&request, cancel, |status| {
        let url = |key: &str| {
            status.output_str(key).map(str::to_string).ok_or_else(|| {
                MpxError::malformed(format!(
                    "request {} has no '{}' output",
                    status.request_id, key
                ))
            })
        };
        Ok(ModelUrls {
            glb_url: url("glb")?,
            fbx_url: url("fbx")?,
            usdz_url: url("usdz")?,
            thumbnail_url: url("thumbnail")?,
            request_id: status.request_id.clone(),
        })
    })
}

/// The mesh a model optimization starts from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeshSource {
    /// A GLB somewhere on the web; downloaded and re-uploaded first
    Url(String),
    /// An asset already known to the backend
    RequestId(RequestId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizedModel {
    pub model_url: String,
    pub request_id: RequestId,
}

/// Reduce a mesh's polygon count
pub fn optimize(
    backend: &Backend,
    cancel: &CancelToken,
    mesh: &MeshSource,
    target_ratio: f64,
    output_format: &str,
    object_type: &str,
) -> Result<OptimizedModel> {
    if !(target_ratio > 0.0 && target_ratio <= 1.0) {
        return Err(MpxError::validation(format!(
            "target_ratio must be in (0, 1], got {}",
            target_ratio
        )));
    }
    if output_format.trim().is_empty() {
        return Err(MpxError::validation("output format is required"));
    }

    let asset_request_id = match mesh {
        MeshSource::RequestId(id) => id.clone(),
        MeshSource::Url(url) => {
            tracing::info!(url = %url, "uploading mesh for optimization");
            let bytes = backend.client().download(url)?;
            backend
                .upload(&AssetSpec::glb("User uploaded glb."), &bytes)?
                .request_id
        }
    };

    let request = GenerationRequest::Optimize {
        asset_request_id,
        target_ratio,
        output_file_format: output_format.to_ascii_lowercase(),
        object_type: object_type.to_string(),
    };
    backend.run_with_retry(&request, cancel, |status| {
        let model_url = status.output_url.clone().ok_or_else(|| {
            MpxError::malformed(format!("request {} has no output url", status.request_id))
        })?;
        Ok(OptimizedModel {
            model_url,
            request_id: status.request_id.clone(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpx_client::{MockClient, MockReply, RequestKind, StatusPoller};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn backend(client: Arc<MockClient>) -> Backend {
        Backend::new(client).with_poller(StatusPoller::new(Duration::from_millis(1)))
    }

    #[test]
    fn test_llm_json_retries_missing_keys() {
        let client = Arc::new(MockClient::new(|_| {
            MockReply::Complete(json!({"output": "{\"reasoning\": \"no text\"}"}))
        }));
        let err = llm_json(
            &backend(client.clone()),
            &CancelToken::new(),
            "sys",
            "human",
            &LlmParams::default(),
            &["updated_text", "reasoning"],
        )
        .unwrap_err();
        assert!(matches!(err, MpxError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(client.submit_count(), 3);
    }

    #[test]
    fn test_llm_json_accepts_fenced_reply() {
        let client = Arc::new(MockClient::new(|_| {
            MockReply::Complete(json!({
                "output": "```json\n{\"updated_text\": \"hi\", \"reasoning\": \"r\",}\n```"
            }))
        }));
        let parsed = llm_json(
            &backend(client),
            &CancelToken::new(),
            "sys",
            "human",
            &LlmParams::default(),
            &["updated_text", "reasoning"],
        )
        .unwrap();
        assert_eq!(parsed.string("updated_text").unwrap(), "hi");
    }

    #[test]
    fn test_text_to_image_uses_lora() {
        let client = Arc::new(MockClient::canned());
        let (urls, id) =
            text_to_image(&backend(client.clone()), &CancelToken::new(), "a chair", 2, 7).unwrap();
        assert_eq!(urls.len(), 2);
        assert!(id.as_str().starts_with("mock-"));
        match &client.submissions()[0] {
            GenerationRequest::TextToImage {
                lora_weights,
                lora_scale,
                num_steps,
                seed,
                ..
            } => {
                assert_eq!(lora_weights, GAME_ASSETS_LORA);
                assert_eq!(*lora_scale, 0.8);
                assert_eq!(*num_steps, 4);
                assert_eq!(*seed, 7);
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn test_url_validation() {
        assert!(validate_image_url("https://cdn.example.com/a/b.PNG").is_ok());
        assert!(validate_image_url("https://cdn.example.com/a/b.webp?sig=1").is_ok());
        assert!(validate_image_url("https://cdn.example.com/a/model.glb").is_err());
        assert!(validate_image_url("cdn.example.com/a.png").is_err());
        assert!(validate_image_url("https:///a.png").is_err());
    }

    #[test]
    fn test_image_to_3d_from_tensor_uploads_first() {
        let client = Arc::new(MockClient::canned());
        let input = ImageInput::Tensor(ImageTensor::solid(4, 4, [1.0, 1.0, 1.0]));
        let urls = image_to_3d(&backend(client.clone()), &CancelToken::new(), &input, 1, 1024)
            .unwrap();
        assert!(urls.glb_url.ends_with(".glb"));
        assert_eq!(client.upload_count(), 1);
        match &client.submissions()[0] {
            GenerationRequest::ImageTo3d { source, .. } => {
                assert!(matches!(source, ImageSource::RequestId(_)))
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn test_image_to_3d_rejects_bad_texture_size() {
        let client = Arc::new(MockClient::canned());
        let input = ImageInput::Url("https://x.test/a.png".into());
        let err = image_to_3d(&backend(client.clone()), &CancelToken::new(), &input, 1, 768)
            .unwrap_err();
        assert!(matches!(err, MpxError::ValidationError(_)));
        assert_eq!(client.submit_count(), 0);
    }

    #[test]
    fn test_optimize_from_url_uploads_glb() {
        let client = Arc::new(MockClient::canned());
        let out = optimize(
            &backend(client.clone()),
            &CancelToken::new(),
            &MeshSource::Url("https://x.test/model.glb".into()),
            0.5,
            "GLB",
            "object",
        )
        .unwrap();
        assert!(out.model_url.ends_with("optimized.glb"));
        assert_eq!(client.upload_count(), 1);
        assert_eq!(client.submit_count_of(RequestKind::Optimize), 1);
    }
}
