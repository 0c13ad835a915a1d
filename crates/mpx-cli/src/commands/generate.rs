//! Image and 3D model commands

use super::{print_json, Session};
use anyhow::{bail, Context, Result};
use mpx_client::RequestId;
use mpx_nodes::calls::{image_to_3d, ImageInput};
use mpx_nodes::nodes::{
    ModelOptimizer, ModelOptimizerInput, PickBestImage, PickBestImageInput, SaveModelsToDisk,
    SaveModelsToDiskInput, TextToImage, TextToImageInput,
};
use mpx_nodes::{ImageTensor, MeshSource, Node};
use serde_json::json;
use std::path::PathBuf;

pub struct ImageArgs {
    pub prompt: String,
    pub count: u32,
    pub seed: u64,
    pub used_for_3d: bool,
    pub single_object: bool,
}

pub fn image(session: &Session, args: ImageArgs) -> Result<()> {
    let out = TextToImage.execute(
        &session.ctx,
        TextToImageInput {
            prompt: args.prompt,
            num_images: args.count,
            seed: args.seed,
            used_for_3d: args.used_for_3d,
            single_object: args.single_object,
        },
    )?;

    let dir = session.output_dir()?;
    let mut paths = Vec::with_capacity(out.images.len());
    for (i, img) in out.images.iter().enumerate() {
        let path = dir.join(format!("text_to_image_{}_{}.png", out.request_id, i));
        img.save_png(&path)?;
        paths.push(path);
    }

    print_json(&json!({
        "request_id": out.request_id,
        "urls": out.urls,
        "saved": paths,
    }))
}

pub struct PickArgs {
    pub images: Vec<PathBuf>,
    pub conditions: String,
    pub info: String,
    pub style: String,
    pub used_for_3d: bool,
    pub one_object: bool,
}

pub fn pick(session: &Session, args: PickArgs) -> Result<()> {
    let images = args
        .images
        .iter()
        .map(|p| ImageTensor::load(p).with_context(|| format!("Failed to load {}", p.display())))
        .collect::<Result<Vec<_>>>()?;

    let out = PickBestImage.execute(
        &session.ctx,
        PickBestImageInput {
            images,
            conditions: args.conditions,
            used_for_3d: args.used_for_3d,
            one_object_per_image: args.one_object,
            image_info: args.info,
            style_guide: args.style,
        },
    )?;

    print_json(&json!({
        "index": out.index + 1,
        "path": args.images[out.index],
        "reasoning": out.reasoning,
    }))
}

pub fn to_3d(
    session: &Session,
    locations: &[String],
    texture_size: u32,
    seed: u64,
    save: bool,
) -> Result<()> {
    let ctx = &session.ctx;
    let inputs: Vec<ImageInput> = locations.iter().map(|l| ImageInput::from_location(l)).collect();
    let workers = ctx.workers(None)?;

    let models = ctx.fan_out(&inputs, workers, |input, item| {
        tracing::info!(index = item.index, total = item.total, "processing 3D model");
        image_to_3d(ctx.backend(), &item.cancel, input, seed, texture_size)
    })?;

    let saved = if save {
        let urls = models.iter().map(|m| m.glb_url.clone()).collect();
        SaveModelsToDisk::new().execute(
            ctx,
            SaveModelsToDiskInput {
                model_urls: urls,
                output_folder: None,
            },
        )?
    } else {
        Vec::new()
    };

    print_json(&json!({
        "models": models,
        "saved": saved,
    }))
}

pub fn optimize(
    session: &Session,
    mesh: &str,
    is_request_id: bool,
    ratio: f64,
    format: &str,
    object_type: &str,
) -> Result<()> {
    if mesh.trim().is_empty() {
        bail!("a mesh URL or request id is required");
    }
    let mesh = if is_request_id {
        MeshSource::RequestId(RequestId::new(mesh))
    } else {
        MeshSource::Url(mesh.to_string())
    };

    let out = ModelOptimizer.execute(
        &session.ctx,
        ModelOptimizerInput {
            mesh,
            target_ratio: ratio,
            output_format: format.to_string(),
            object_type: object_type.to_string(),
        },
    )?;
    print_json(&out)
}
