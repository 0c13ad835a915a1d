//! Text-to-image nodes

use super::{check_seed, with_suffixes};
use crate::calls::{download_image, text_to_image, LORA_TRIGGER};
use crate::node::{file_timestamp, Node, NodeContext};
use crate::tensor::ImageTensor;
use mpx_client::RequestId;
use mpx_core::{MpxError, Result};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct TextToImageInput {
    pub prompt: String,
    /// 1 to 4
    pub num_images: u32,
    pub seed: u64,
    pub used_for_3d: bool,
    pub single_object: bool,
}

impl Default for TextToImageInput {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            num_images: 1,
            seed: 1,
            used_for_3d: true,
            single_object: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TextToImageOutput {
    pub images: Vec<ImageTensor>,
    pub urls: Vec<String>,
    pub request_id: RequestId,
}

/// Generate images from a prompt
#[derive(Debug, Default)]
pub struct TextToImage;

impl Node for TextToImage {
    const NAME: &'static str = "text_to_image";
    const DISPLAY_NAME: &'static str = "Text To Image";
    const DESCRIPTION: &'static str = "Generate one to four images from a text prompt";

    type Input = TextToImageInput;
    type Output = TextToImageOutput;

    fn execute(&mut self, ctx: &NodeContext, input: TextToImageInput) -> Result<TextToImageOutput> {
        if !(1..=4).contains(&input.num_images) {
            return Err(MpxError::validation(format!(
                "num_images must be within 1-4, got {}",
                input.num_images
            )));
        }
        check_seed(input.seed)?;

        let prompt = with_suffixes(&input.prompt, input.used_for_3d, input.single_object);
        let (urls, request_id) = text_to_image(
            ctx.backend(),
            ctx.cancel(),
            &prompt,
            input.num_images,
            input.seed,
        )?;
        let images = urls
            .iter()
            .map(|url| download_image(ctx.backend(), url))
            .collect::<Result<Vec<_>>>()?;

        tracing::info!(request_id = %request_id, count = images.len(), "images generated");
        Ok(TextToImageOutput {
            images,
            urls,
            request_id,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ObjectListToImageListInput {
    pub objects: Vec<String>,
    /// Where PNGs are written; falls back to the context's output directory
    pub output_folder: Option<PathBuf>,
    pub workers: Option<usize>,
    pub seed: u64,
    pub used_for_3d: bool,
    pub single_object: bool,
}

impl Default for ObjectListToImageListInput {
    fn default() -> Self {
        Self {
            objects: Vec::new(),
            output_folder: None,
            workers: None,
            seed: 1,
            used_for_3d: true,
            single_object: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObjectListToImageListOutput {
    pub images: Vec<ImageTensor>,
    pub saved_paths: Vec<PathBuf>,
}

/// One image per object description, rendered as an isolated game asset
#[derive(Debug, Default)]
pub struct ObjectListToImageList;

impl Node for ObjectListToImageList {
    const NAME: &'static str = "object_list_to_image_list";
    const DISPLAY_NAME: &'static str = "Object List To Image List";
    const DESCRIPTION: &'static str =
        "Generate one image for each object description and save them as PNG";

    type Input = ObjectListToImageListInput;
    type Output = ObjectListToImageListOutput;

    fn execute(
        &mut self,
        ctx: &NodeContext,
        input: ObjectListToImageListInput,
    ) -> Result<ObjectListToImageListOutput> {
        check_seed(input.seed)?;
        let workers = ctx.workers(input.workers)?;
        let folder = ctx.resolve_output_dir(input.output_folder.as_deref())?;

        let results = ctx.fan_out(&input.objects, workers, |description, item| {
            tracing::info!(index = item.index, total = item.total, object = %description, "generating object image");
            let prompt = with_suffixes(
                &format!("{} {}", LORA_TRIGGER, description),
                input.used_for_3d,
                input.single_object,
            );
            let (urls, _) = text_to_image(ctx.backend(), &item.cancel, &prompt, 1, input.seed)?;
            let image = download_image(ctx.backend(), &urls[0])?;

            let path = folder.join(format!(
                "object_to_image_{}_{}.png",
                item.index,
                file_timestamp()
            ));
            image.save_png(&path)?;
            Ok((image, path))
        })?;

        let (images, saved_paths) = results.into_iter().unzip();
        Ok(ObjectListToImageListOutput {
            images,
            saved_paths,
        })
    }
}
