//! Node implementations
//!
//! - [`text`]: text and string-list editing
//! - [`creative`]: object lists, stories and script breakdowns
//! - [`images`]: text-to-image generation
//! - [`agents`]: image selection and self-correcting regeneration
//! - [`models`]: image-to-3D, mesh optimization and model downloads
//! - [`data`]: list picking and display

pub mod agents;
pub mod creative;
pub mod data;
pub mod images;
pub mod models;
pub mod text;

pub use agents::{PickBestImage, PickBestImageInput, PickBestImageOutput, ReflectOnImageList,
    ReflectOnImageListInput, ReflectOnImageListOutput};
pub use creative::{
    ScriptBreakdown, TextToObjectList, TextToObjectListInput, TextToScriptBreakdown,
    TextToScriptBreakdownInput, TextToStory, TextToStoryInput, TransformObjectList,
    TransformObjectListInput, StoryOutput, STORY_GENRES,
};
pub use data::{PickFromList, PickFromListInput, ShowList, ShowString, Shown};
pub use images::{
    ObjectListToImageList, ObjectListToImageListInput, ObjectListToImageListOutput, TextToImage,
    TextToImageInput, TextToImageOutput,
};
pub use models::{
    ImagesTo3DModels, ImagesTo3DModelsInput, ImagesTo3DModelsOutput, ModelOptimizer,
    ModelOptimizerInput, SaveModelsToDisk, SaveModelsToDiskInput,
};
pub use text::{
    EditedList, EditedText, StringListToStringList, StringListToStringListInput,
    StringListToText, StringListToTextInput, TextList, TextToList, TextToListInput, TextToText,
    TextToTextInput, TwoTextToText, TwoTextToTextInput,
};

use mpx_core::{MpxError, PromptData, PromptTemplate, Result, StructuredResponse};

/// Appended to image prompts whose result will be turned into a 3D model
pub const FULL_VIEW_SUFFIX: &str = "Object must be in full view, centered and without any parts of the object cropped by the edge of the photo. Lighting is bright, diffuse, and indirect. Camera angle is a side view. Object must be on a completely blank white background.";

/// Appended to image prompts that must show a single object
pub const SINGLE_OBJECT_SUFFIX: &str = "There must be only one object in the image. Never have more than one object or character. Do not show walls or floor if not specified above.";

pub const SUPPORTED_MODELS: &[&str] = &["gpt-4o", "gpt-4o-mini"];

pub const MAX_SEED: u64 = 1_000_000;

pub(crate) fn with_suffixes(prompt: &str, used_for_3d: bool, single_object: bool) -> String {
    let mut out = prompt.to_string();
    if used_for_3d {
        out.push_str("\n\n");
        out.push_str(FULL_VIEW_SUFFIX);
    }
    if single_object {
        out.push_str("\n\n");
        out.push_str(SINGLE_OBJECT_SUFFIX);
    }
    out
}

/// Render a system/human prompt pair against the same data
pub(crate) fn render_pair(system: &str, human: &str, data: &PromptData) -> Result<(String, String)> {
    Ok((
        PromptTemplate::substitute(system, data)?,
        PromptTemplate::substitute(human, data)?,
    ))
}

pub(crate) fn check_temperature(temperature: Option<f64>) -> Result<Option<f64>> {
    match temperature {
        Some(t) if !(0.0..=1.0).contains(&t) => Err(MpxError::validation(format!(
            "temperature must be within 0.0-1.0, got {}",
            t
        ))),
        other => Ok(other),
    }
}

pub(crate) fn check_seed(seed: u64) -> Result<()> {
    if (1..=MAX_SEED).contains(&seed) {
        Ok(())
    } else {
        Err(MpxError::validation(format!(
            "seed must be within 1-{}, got {}",
            MAX_SEED, seed
        )))
    }
}

pub(crate) fn check_model(model: Option<&str>) -> Result<Option<&str>> {
    match model {
        Some(m) if !SUPPORTED_MODELS.contains(&m) => Err(MpxError::validation(format!(
            "unsupported model '{}', expected one of: {}",
            m,
            SUPPORTED_MODELS.join(", ")
        ))),
        other => Ok(other),
    }
}

/// A text field that some models return as a list; lists are joined by lines
pub(crate) fn text_or_lines(response: &StructuredResponse, key: &str) -> Result<String> {
    match response.get(key) {
        Some(serde_json::Value::Array(_)) => Ok(response.string_list(key)?.join("\n")),
        _ => response.string(key),
    }
}
