//! 3D model nodes: image-to-3D, mesh optimization and downloads

use super::check_seed;
use crate::calls::{
    download_image, image_to_3d, optimize, validate_texture_size, ImageInput, MeshSource,
    OptimizedModel,
};
use crate::node::{file_timestamp, Node, NodeContext};
use crate::tensor::ImageTensor;
use mpx_client::RequestId;
use mpx_core::{InputHash, MpxError, Result, SingleEntryMemo};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ImagesTo3DModelsInput {
    pub images: Vec<ImageTensor>,
    /// 512, 1024 or 2048
    pub texture_size: u32,
    pub seed: u64,
    pub workers: Option<usize>,
}

impl Default for ImagesTo3DModelsInput {
    fn default() -> Self {
        Self {
            images: Vec::new(),
            texture_size: 1024,
            seed: 1,
            workers: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImagesTo3DModelsOutput {
    pub thumbnails: Vec<ImageTensor>,
    pub glb_urls: Vec<String>,
    pub fbx_urls: Vec<String>,
    pub usdz_urls: Vec<String>,
    pub request_ids: Vec<RequestId>,
}

/// Turn each image into a textured 3D model.
///
/// Repeated runs with identical pixels, texture size and seed return the
/// previous result without contacting the backend.
#[derive(Debug, Default)]
pub struct ImagesTo3DModels {
    memo: SingleEntryMemo<ImagesTo3DModelsOutput>,
}

impl ImagesTo3DModels {
    pub fn new() -> Self {
        Self::default()
    }

    fn input_hash(input: &ImagesTo3DModelsInput) -> Result<InputHash> {
        let images: Vec<String> = input
            .images
            .iter()
            .map(|img| img.content_hash().to_hex())
            .collect();
        InputHash::of(&serde_json::json!({
            "image_data": images,
            "texture_size": input.texture_size,
            "seed": input.seed,
        }))
    }

    fn generate(
        ctx: &NodeContext,
        input: &ImagesTo3DModelsInput,
        workers: usize,
    ) -> Result<ImagesTo3DModelsOutput> {
        let results = ctx.fan_out(&input.images, workers, |image, item| {
            tracing::info!(index = item.index, total = item.total, "processing 3D model");
            let urls = image_to_3d(
                ctx.backend(),
                &item.cancel,
                &ImageInput::Tensor(image.clone()),
                input.seed,
                input.texture_size,
            )?;
            tracing::debug!(index = item.index, request_id = %urls.request_id, glb = %urls.glb_url, "model generated");
            let thumbnail = download_image(ctx.backend(), &urls.thumbnail_url)?;
            Ok((thumbnail, urls))
        })?;

        let mut output = ImagesTo3DModelsOutput::default();
        for (thumbnail, urls) in results {
            output.thumbnails.push(thumbnail);
            output.glb_urls.push(urls.glb_url);
            output.fbx_urls.push(urls.fbx_url);
            output.usdz_urls.push(urls.usdz_url);
            output.request_ids.push(urls.request_id);
        }
        Ok(output)
    }
}

impl Node for ImagesTo3DModels {
    const NAME: &'static str = "images_to_3d_models";
    const DISPLAY_NAME: &'static str = "Images To 3D Models";
    const DESCRIPTION: &'static str =
        "Generate a 3D model for every input image; returns thumbnails and GLB/FBX/USDZ URLs";

    type Input = ImagesTo3DModelsInput;
    type Output = ImagesTo3DModelsOutput;

    fn execute(
        &mut self,
        ctx: &NodeContext,
        input: ImagesTo3DModelsInput,
    ) -> Result<ImagesTo3DModelsOutput> {
        validate_texture_size(input.texture_size)?;
        check_seed(input.seed)?;
        let workers = ctx.workers(input.workers)?;

        let hash = Self::input_hash(&input)?;
        self.memo
            .get_or_try_insert_with(hash, || Self::generate(ctx, &input, workers))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelOptimizerInput {
    pub mesh: MeshSource,
    /// Fraction of polygons to keep, in (0, 1]
    pub target_ratio: f64,
    pub output_format: String,
    pub object_type: String,
}

impl Default for ModelOptimizerInput {
    fn default() -> Self {
        Self {
            mesh: MeshSource::Url(String::new()),
            target_ratio: 0.85,
            output_format: "glb".to_string(),
            object_type: "object".to_string(),
        }
    }
}

/// Reduce the polygon count of a model
#[derive(Debug, Default)]
pub struct ModelOptimizer;

impl Node for ModelOptimizer {
    const NAME: &'static str = "model_optimizer";
    const DISPLAY_NAME: &'static str = "Model Optimizer";
    const DESCRIPTION: &'static str =
        "Reduce the polygon count of a 3D model given by URL or request id";

    type Input = ModelOptimizerInput;
    type Output = OptimizedModel;

    fn execute(&mut self, ctx: &NodeContext, input: ModelOptimizerInput) -> Result<OptimizedModel> {
        if let MeshSource::Url(url) = &input.mesh {
            if url.trim().is_empty() {
                return Err(MpxError::validation("a mesh URL or request id is required"));
            }
        }
        let optimized = optimize(
            ctx.backend(),
            ctx.cancel(),
            &input.mesh,
            input.target_ratio,
            &input.output_format,
            &input.object_type,
        )?;
        tracing::info!(request_id = %optimized.request_id, url = %optimized.model_url, "model optimized");
        Ok(optimized)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveModelsToDiskInput {
    pub model_urls: Vec<String>,
    /// Falls back to the context's output directory
    pub output_folder: Option<PathBuf>,
}

/// Download model files and return where they were written
#[derive(Debug, Default)]
pub struct SaveModelsToDisk {
    memo: SingleEntryMemo<Vec<PathBuf>>,
}

impl SaveModelsToDisk {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Lowercased file extension of a URL's path
fn model_extension(url: &str) -> Result<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let filename = path.rsplit('/').next().unwrap_or_default();
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Ok(ext.to_ascii_lowercase()),
        _ => Err(MpxError::validation(format!(
            "cannot tell the model format of '{}'",
            url
        ))),
    }
}

impl Node for SaveModelsToDisk {
    const NAME: &'static str = "save_models_to_disk";
    const DISPLAY_NAME: &'static str = "Save Models To Disk";
    const DESCRIPTION: &'static str = "Download 3D models from URLs into a local folder";

    type Input = SaveModelsToDiskInput;
    type Output = Vec<PathBuf>;

    fn execute(&mut self, ctx: &NodeContext, input: SaveModelsToDiskInput) -> Result<Vec<PathBuf>> {
        let hash = InputHash::of(&input)?;
        self.memo.get_or_try_insert_with(hash, || {
            let folder = ctx.resolve_output_dir(input.output_folder.as_deref())?;
            let extensions = input
                .model_urls
                .iter()
                .map(|url| model_extension(url))
                .collect::<Result<Vec<_>>>()?;

            let indices: Vec<usize> = (0..input.model_urls.len()).collect();
            ctx.fan_out(&indices, 1, |&idx, _| {
                let url = &input.model_urls[idx];
                let bytes = ctx.backend().client().download(url)?;
                let path = folder.join(format!(
                    "model_{}_{}.{}",
                    idx,
                    file_timestamp(),
                    extensions[idx]
                ));
                std::fs::write(&path, bytes)?;
                tracing::info!(url = %url, path = %path.display(), "model saved");
                Ok(path)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpx_client::{Backend, MockClient, RequestKind, StatusPoller};
    use std::sync::Arc;
    use std::time::Duration;

    fn ctx(client: Arc<MockClient>) -> NodeContext {
        NodeContext::new(
            Backend::new(client).with_poller(StatusPoller::new(Duration::from_millis(1))),
        )
    }

    fn images(n: usize) -> Vec<ImageTensor> {
        (0..n)
            .map(|i| ImageTensor::solid(2, 2, [0.1 * i as f32, 0.5, 0.5]))
            .collect()
    }

    #[test]
    fn test_models_collected_per_image() {
        let client = Arc::new(MockClient::canned());
        let out = ImagesTo3DModels::new()
            .execute(
                &ctx(client.clone()),
                ImagesTo3DModelsInput {
                    images: images(3),
                    workers: Some(2),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(out.thumbnails.len(), 3);
        assert_eq!(out.request_ids.len(), 3);
        assert!(out.glb_urls.iter().all(|u| u.ends_with(".glb")));
        assert_eq!(client.upload_count(), 3);
        assert_eq!(client.submit_count_of(RequestKind::ImageTo3d), 3);
    }

    #[test]
    fn test_bad_texture_size_makes_no_calls() {
        let client = Arc::new(MockClient::canned());
        let err = ImagesTo3DModels::new()
            .execute(
                &ctx(client.clone()),
                ImagesTo3DModelsInput {
                    images: images(1),
                    texture_size: 256,
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, MpxError::ValidationError(_)));
        assert_eq!(client.submit_count(), 0);
    }

    #[test]
    fn test_input_hash_tracks_pixels() {
        let a = ImagesTo3DModelsInput {
            images: images(2),
            ..Default::default()
        };
        let mut b = a.clone();
        b.images[1] = ImageTensor::solid(2, 2, [1.0, 1.0, 1.0]);
        assert_ne!(
            ImagesTo3DModels::input_hash(&a).unwrap(),
            ImagesTo3DModels::input_hash(&b).unwrap()
        );
        assert_eq!(
            ImagesTo3DModels::input_hash(&a).unwrap(),
            ImagesTo3DModels::input_hash(&a.clone()).unwrap()
        );
    }

    #[test]
    fn test_optimizer_by_request_id() {
        let client = Arc::new(MockClient::canned());
        let out = ModelOptimizer
            .execute(
                &ctx(client.clone()),
                ModelOptimizerInput {
                    mesh: MeshSource::RequestId(RequestId::new("asset-7")),
                    output_format: "FBX".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(out.model_url.ends_with("optimized.fbx"));
        assert_eq!(client.upload_count(), 0);
    }

    #[test]
    fn test_optimizer_requires_mesh() {
        let client = Arc::new(MockClient::canned());
        let err = ModelOptimizer
            .execute(&ctx(client), ModelOptimizerInput::default())
            .unwrap_err();
        assert!(matches!(err, MpxError::ValidationError(_)));
    }

    #[test]
    fn test_model_extension() {
        assert_eq!(model_extension("https://x.invalid/a/model.GLB?sig=1").unwrap(), "glb");
        assert_eq!(model_extension("https://x.invalid/m.usdz").unwrap(), "usdz");
        assert!(model_extension("https://x.invalid/model").is_err());
    }

    #[test]
    fn test_save_models_memoized() {
        let dir = std::env::temp_dir().join(format!("mpx_save_models_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let client = Arc::new(MockClient::canned());
        let context = ctx(client.clone());
        let input = SaveModelsToDiskInput {
            model_urls: vec![
                "https://mock.invalid/models/model.glb".into(),
                "https://mock.invalid/models/model.fbx".into(),
            ],
            output_folder: Some(dir.clone()),
        };

        let mut node = SaveModelsToDisk::new();
        let paths = node.execute(&context, input.clone()).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths[0].file_name().unwrap().to_string_lossy().starts_with("model_0_"));
        assert_eq!(paths[1].extension().unwrap(), "fbx");
        assert!(paths.iter().all(|p| p.exists()));

        let again = node.execute(&context, input).unwrap();
        assert_eq!(again, paths);
        assert_eq!(client.downloads().len(), 2);
        std::fs::remove_dir_all(&dir).ok();
    }
}
