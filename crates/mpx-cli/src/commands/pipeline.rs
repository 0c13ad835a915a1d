//! Theme to 3D models in one command

use super::{print_json, Session};
use anyhow::Result;
use mpx_nodes::nodes::{
    ImagesTo3DModels, ImagesTo3DModelsInput, ObjectListToImageList, ObjectListToImageListInput,
    ReflectOnImageList, ReflectOnImageListInput, SaveModelsToDisk, SaveModelsToDiskInput,
    TextToObjectList, TextToObjectListInput,
};
use mpx_nodes::Node;
use serde_json::json;

pub struct PipelineArgs {
    pub theme: String,
    pub min: u32,
    pub max: u32,
    pub reflect: bool,
    pub directions: String,
    pub seed: u64,
    pub texture_size: u32,
    pub skip_3d: bool,
}

pub fn run(session: &Session, args: PipelineArgs) -> Result<()> {
    let ctx = &session.ctx;
    let folder = session.output_dir()?;

    let objects = TextToObjectList.execute(
        ctx,
        TextToObjectListInput {
            text: args.theme.clone(),
            min_objects: args.min,
            max_objects: args.max,
        },
    )?;
    tracing::info!(count = objects.len(), objects = ?objects, "objects extracted");

    let rendered = ObjectListToImageList.execute(
        ctx,
        ObjectListToImageListInput {
            objects: objects.clone(),
            output_folder: Some(folder.clone()),
            seed: args.seed,
            ..Default::default()
        },
    )?;
    let mut images = rendered.images;

    let mut reflection = None;
    if args.reflect {
        let reflected = ReflectOnImageList.execute(
            ctx,
            ReflectOnImageListInput {
                theme: args.theme.clone(),
                user_directions: args.directions,
                images,
                objects: objects.clone(),
                output_folder: Some(folder.clone()),
                seed: args.seed,
                ..Default::default()
            },
        )?;
        images = reflected.images;
        reflection = Some(reflected.reasoning);
    }

    if args.skip_3d {
        return print_json(&json!({
            "objects": objects,
            "images": rendered.saved_paths,
            "reflection": reflection,
        }));
    }

    let models = ImagesTo3DModels::new().execute(
        ctx,
        ImagesTo3DModelsInput {
            images,
            texture_size: args.texture_size,
            seed: args.seed,
            workers: None,
        },
    )?;
    let saved = SaveModelsToDisk::new().execute(
        ctx,
        SaveModelsToDiskInput {
            model_urls: models.glb_urls.clone(),
            output_folder: Some(folder),
        },
    )?;

    print_json(&json!({
        "objects": objects,
        "images": rendered.saved_paths,
        "reflection": reflection,
        "glb_urls": models.glb_urls,
        "request_ids": models.request_ids,
        "saved_models": saved,
    }))
}
