//! Image-judging agents
//!
//! [`PickBestImage`] asks a vision model to choose among candidate images.
//! [`ReflectOnImageList`] runs every image through a four-point checklist
//! and regenerates the ones that fail with a rewritten prompt.

use super::{check_seed, render_pair, text_or_lines, FULL_VIEW_SUFFIX};
use crate::calls::{
    download_image, image_query_json, llm_json, text_to_image, upload_images, LORA_TRIGGER,
};
use crate::node::{file_timestamp, Node, NodeContext};
use crate::tensor::ImageTensor;
use mpx_client::CancelToken;
use mpx_core::{MpxError, PromptData, PromptTemplate, Result};
use std::path::PathBuf;

const ONE_OBJECT_CONDITION: &str =
    "There must be only one object in the image. Never have more than one object or character.";

const PICK_QUERY: &str = "You are given {num_images} images.{image_info_section}{style_guide_section}\nYour task is to select the best image based on these conditions:\n{conditions}\n\nReturn your answer as a JSON with two keys:\n1. 'image_index': A number from 1 to {num_images} indicating the best image\n2. 'reasoning': Explain your choice by:\n   - Describing why the chosen image is best\n   - Pointing out specific elements that match the conditions and those that do not\n{extra_reasoning}   - Explaining why other images were not selected\nNote: When picking the best image, info about the object and conditions are most important and any adherence to style guides are of a lower importance.";

const MAX_CANDIDATES: usize = 4;

#[derive(Debug, Clone, Default)]
pub struct PickBestImageInput {
    /// One to four candidates
    pub images: Vec<ImageTensor>,
    pub conditions: String,
    pub used_for_3d: bool,
    pub one_object_per_image: bool,
    /// What the images are meant to show
    pub image_info: String,
    pub style_guide: String,
}

#[derive(Debug, Clone)]
pub struct PickBestImageOutput {
    pub image: ImageTensor,
    /// Zero-based position in the input
    pub index: usize,
    pub reasoning: String,
}

/// Choose the candidate image that best meets a set of conditions
#[derive(Debug, Default)]
pub struct PickBestImage;

impl PickBestImage {
    fn conditions(input: &PickBestImageInput) -> String {
        let mut conditions = input.conditions.clone();
        let mut append = |extra: &str| {
            if conditions.is_empty() {
                conditions = extra.to_string();
            } else {
                conditions = format!("{}\n\n{}", conditions, extra);
            }
        };
        if input.used_for_3d {
            append(FULL_VIEW_SUFFIX);
        }
        if input.one_object_per_image {
            append(ONE_OBJECT_CONDITION);
        }
        conditions
    }

    fn query(input: &PickBestImageInput) -> Result<String> {
        let mut data = PromptData::new()
            .with("num_images", input.images.len())
            .with("conditions", Self::conditions(input));

        let mut extra_reasoning = String::new();
        if input.image_info.is_empty() {
            data.insert("image_info_section", "");
        } else {
            data.insert(
                "image_info_section",
                format!(
                    "\nThese images represent: {}\nConsider this context when evaluating how well each image meets the conditions.\n",
                    input.image_info
                ),
            );
            extra_reasoning.push_str("   - Explaining how well it represents the intended context\n");
        }
        if input.style_guide.is_empty() {
            data.insert("style_guide_section", "");
        } else {
            data.insert(
                "style_guide_section",
                format!(
                    "\nStyle Guidelines:\n{}\nConsider how well each image adheres to these style guidelines.\n",
                    input.style_guide
                ),
            );
            extra_reasoning.push_str("   - Evaluating how well it follows the style guidelines\n");
        }
        data.insert("extra_reasoning", extra_reasoning);

        PromptTemplate::substitute(PICK_QUERY, &data)
    }
}

impl Node for PickBestImage {
    const NAME: &'static str = "pick_best_image";
    const DISPLAY_NAME: &'static str = "Agent: Pick Best Image";
    const DESCRIPTION: &'static str =
        "Select the image that best satisfies the given conditions using a vision model";

    type Input = PickBestImageInput;
    type Output = PickBestImageOutput;

    fn execute(&mut self, ctx: &NodeContext, input: PickBestImageInput) -> Result<PickBestImageOutput> {
        let count = input.images.len();
        if count == 0 || count > MAX_CANDIDATES {
            return Err(MpxError::validation(format!(
                "expected 1 to {} images, got {}",
                MAX_CANDIDATES, count
            )));
        }

        if count == 1 {
            return Ok(PickBestImageOutput {
                image: input.images[0].clone(),
                index: 0,
                reasoning: "Image 1 is selected because it is the only image".to_string(),
            });
        }

        let query = Self::query(&input)?;
        let urls = upload_images(ctx.backend(), &input.images)?;
        let (index, reasoning) = image_query_json(
            ctx.backend(),
            ctx.cancel(),
            &query,
            &urls,
            ctx.llm(),
            &["image_index", "reasoning"],
            |reply| {
                let picked = reply.integer("image_index")?;
                if picked < 1 || picked > count as i64 {
                    return Err(MpxError::malformed(format!(
                        "image_index {} is outside 1..={}",
                        picked, count
                    )));
                }
                Ok((picked as usize - 1, text_or_lines(&reply, "reasoning")?))
            },
        )?;

        tracing::info!(index, "best image selected");
        Ok(PickBestImageOutput {
            image: input.images[index].clone(),
            index,
            reasoning,
        })
    }
}

const CHECKLIST_QUERY: &str = "You are an expert at inspecting images for defects. You are given an image and you need to answer the following questions:\n(1) Is the main object fully visible (no portion is cut-off) and centered in the given image?\n(2) Here is a detailed description of the given image: {object_description}. Ignoring all the extra descriptions, is there only one main object in the given image?\n(3) Does the given image have a blank white background?\n(4) Here are custom user directions that the given image should adhere to: {user_directions}. Does the given image really adhere to the given custom user directions? Be critical.\n\nReturn the answers as only a JSON with two keys 'reasoning' and 'answers'.\nIn the 'reasoning' key provide a list of strings which explains how you came to your conclusion for each of the four questions. In each explanation ensure to point to specific elements of the image so that you're not just making up reasons.\nIn the 'answers' key provide the answer as a list consisting of 'yes' and 'no' by thinking things through in a step-by-step fashion. Ensure that no preamble or explanation is included. Recall you need to answer questions (1) to (4) so this list should have exactly four elements where each element is either a 'yes' or 'no'.\n";

const REWRITE_SYSTEM: &str = "You are a natural language expert who is specialized with creating new text prompts from existing text prompts. Your job is to take: (1) an existing user provided prompt, (2) a list of issues which detail what is wrong with it, (3) the original theme of the prompt, (4) some custom user directions and then produce a new prompt that addresses the list of issues as well as adhering to both the original theme of the prompt and the given custom user directions. It might be that the original theme and the custom user directions are in conflict with each other. In those cases do your best to balance the two.\n\nReturn the answer as only a JSON with two keys 'new_prompt' and 'reasoning'. In the 'new_prompt' key provide an updated prompt with no preamble or explanation. Ensure to address all of the issues that are given to you and that you've done your best to balance between the original theme and the custom user directions. In the 'reasoning' key provide an explanation for why the new prompt makes sense, addresses all of the given issues and also follows both the original theme and the custom user directions. Just the JSON only is returned.\n\n";

const REWRITE_HUMAN: &str = "### (1) Existing user provided prompt:\n{old_prompt}\n\n### (2) List of issues with the original prompt:\n{list_of_issues}\n\n### (3) Original theme of the prompt:\n\n{original_theme}\n\n### (4) Custom User Directions:\n\n{custom_user_directions}\n\n";

const REGENERATE_STYLE: &str =
    "Candid, full body view, side camera angle.  White matte background with bright, indirect lighting";

/// The four checklist items, in question order
const CHECKS: [(&str, &str); 4] = [
    (
        "object_is_centered_and_fully_visible",
        "The object is not centered and/or fully visible. There are elements of it that is cut off.",
    ),
    ("image_has_only_one_object", "There are multiple objects present."),
    ("has_blank_white_background", "The background is not blank and white."),
    ("adheres_to_user_directions", "Does not adhere to the custom user rules."),
];

/// Outcome of the checklist for one image
#[derive(Debug, Clone, PartialEq)]
struct Checklist {
    passed: [bool; 4],
    reasoning: Vec<String>,
}

impl Checklist {
    fn all_passed(&self) -> bool {
        self.passed.iter().all(|p| *p)
    }

    /// Numbered list of failed items, fed to the prompt rewrite
    fn issues(&self) -> String {
        CHECKS
            .iter()
            .zip(self.passed)
            .filter(|(_, passed)| !passed)
            .enumerate()
            .map(|(n, ((_, issue), _))| format!("({}) {}\n", n + 1, issue))
            .collect()
    }
}

fn is_yes(answer: &str) -> bool {
    answer.trim().trim_end_matches(',').eq_ignore_ascii_case("yes")
}

#[derive(Debug, Clone)]
pub struct ReflectOnImageListInput {
    /// The prompt that produced the images
    pub theme: String,
    pub user_directions: String,
    pub images: Vec<ImageTensor>,
    /// One description per image
    pub objects: Vec<String>,
    /// Regenerated images are saved here when set
    pub output_folder: Option<PathBuf>,
    pub workers: Option<usize>,
    pub seed: u64,
}

impl Default for ReflectOnImageListInput {
    fn default() -> Self {
        Self {
            theme: String::new(),
            user_directions: String::new(),
            images: Vec::new(),
            objects: Vec::new(),
            output_folder: None,
            workers: None,
            seed: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReflectOnImageListOutput {
    pub images: Vec<ImageTensor>,
    pub reasoning: String,
    /// Which positions were replaced
    pub regenerated: Vec<bool>,
}

/// Check each image against a quality checklist and regenerate failures
#[derive(Debug, Default)]
pub struct ReflectOnImageList;

struct Reflection {
    image: ImageTensor,
    log: String,
    regenerated: bool,
}

impl ReflectOnImageList {
    fn run_checklist(
        ctx: &NodeContext,
        cancel: &CancelToken,
        image: &ImageTensor,
        description: &str,
        directions: &str,
    ) -> Result<Checklist> {
        let data = PromptData::new()
            .with("object_description", description)
            .with("user_directions", directions);
        let query = PromptTemplate::substitute(CHECKLIST_QUERY, &data)?;
        let urls = upload_images(ctx.backend(), std::slice::from_ref(image))?;

        image_query_json(
            ctx.backend(),
            cancel,
            &query,
            &urls,
            ctx.llm(),
            &["answers", "reasoning"],
            |reply| {
                let answers = reply.string_list("answers")?;
                if answers.len() != CHECKS.len() {
                    return Err(MpxError::malformed(format!(
                        "expected {} checklist answers, got {}",
                        CHECKS.len(),
                        answers.len()
                    )));
                }
                let mut passed = [false; 4];
                for (slot, answer) in passed.iter_mut().zip(&answers) {
                    *slot = is_yes(answer);
                }
                Ok(Checklist {
                    passed,
                    reasoning: reply.string_list("reasoning")?,
                })
            },
        )
    }

    fn rewrite_prompt(
        ctx: &NodeContext,
        cancel: &CancelToken,
        old_prompt: &str,
        checklist: &Checklist,
        theme: &str,
        directions: &str,
    ) -> Result<(String, String)> {
        let data = PromptData::new()
            .with("old_prompt", old_prompt)
            .with("list_of_issues", checklist.issues())
            .with("original_theme", theme)
            .with("custom_user_directions", directions);
        let (system, human) = render_pair(REWRITE_SYSTEM, REWRITE_HUMAN, &data)?;
        let params = ctx.llm_with(Some("gpt-4o"), Some(0.0));

        let reply = llm_json(
            ctx.backend(),
            cancel,
            &system,
            &human,
            &params,
            &["new_prompt", "reasoning"],
        )?;
        tracing::debug!(old_prompt, "prompt rewritten");
        Ok((reply.string("new_prompt")?, text_or_lines(&reply, "reasoning")?))
    }

    fn reflect(
        ctx: &NodeContext,
        cancel: &CancelToken,
        input: &ReflectOnImageListInput,
        folder: Option<&PathBuf>,
        index: usize,
    ) -> Result<Reflection> {
        let image = &input.images[index];
        let description = &input.objects[index];
        tracing::info!(index, total = input.images.len(), "reflecting on image");

        let checklist =
            Self::run_checklist(ctx, cancel, image, description, &input.user_directions)?;
        if checklist.all_passed() {
            return Ok(Reflection {
                image: image.clone(),
                log: format!("Image #{} has PASSED all checklist items.\n\n", index + 1),
                regenerated: false,
            });
        }

        let mut log = format!(
            "Image #{} was generated with the prompt: '{}'\n",
            index + 1,
            description
        );
        for (i, ((name, _), passed)) in CHECKS.iter().zip(checklist.passed).enumerate() {
            if !passed {
                let why = checklist.reasoning.get(i).map(String::as_str).unwrap_or("");
                log.push_str(&format!("* FAILED {}. Reasoning: {}.\n", name, why));
            }
        }

        let (new_prompt, why) = Self::rewrite_prompt(
            ctx,
            cancel,
            description,
            &checklist,
            &input.theme,
            &input.user_directions,
        )?;
        log.push_str(&format!(
            "\nRegenerating Image #{} with new prompt:\n\n\n{}\n\n",
            index + 1,
            new_prompt
        ));
        log.push_str(&format!("Reasoning for new prompt: {}\n\n----\n\n", why));

        let prompt = format!("{} {}. {}", LORA_TRIGGER, new_prompt, REGENERATE_STYLE);
        let (urls, _) = text_to_image(ctx.backend(), cancel, &prompt, 1, input.seed)?;
        let regenerated = download_image(ctx.backend(), &urls[0])?;

        if let Some(folder) = folder {
            let path = folder.join(format!("reflected_image_{}_{}.png", index, file_timestamp()));
            regenerated.save_png(&path)?;
        }

        Ok(Reflection {
            image: regenerated,
            log,
            regenerated: true,
        })
    }
}

impl Node for ReflectOnImageList {
    const NAME: &'static str = "reflect_on_image_list";
    const DISPLAY_NAME: &'static str = "Agent: Reflect On Image List";
    const DESCRIPTION: &'static str =
        "Check generated images against a quality checklist and regenerate the ones that fail";

    type Input = ReflectOnImageListInput;
    type Output = ReflectOnImageListOutput;

    fn execute(
        &mut self,
        ctx: &NodeContext,
        input: ReflectOnImageListInput,
    ) -> Result<ReflectOnImageListOutput> {
        if input.images.len() != input.objects.len() {
            return Err(MpxError::validation(format!(
                "got {} images but {} object descriptions",
                input.images.len(),
                input.objects.len()
            )));
        }
        check_seed(input.seed)?;
        let workers = ctx.workers(input.workers)?;
        let folder = match &input.output_folder {
            Some(dir) => Some(ctx.resolve_output_dir(Some(dir))?),
            None => None,
        };

        let indices: Vec<usize> = (0..input.images.len()).collect();
        let reflections = ctx.fan_out(&indices, workers, |&index, item| {
            Self::reflect(ctx, &item.cancel, &input, folder.as_ref(), index)
        })?;

        let mut output = ReflectOnImageListOutput {
            images: Vec::with_capacity(reflections.len()),
            reasoning: String::new(),
            regenerated: Vec::with_capacity(reflections.len()),
        };
        for r in reflections {
            output.images.push(r.image);
            output.reasoning.push_str(&r.log);
            output.regenerated.push(r.regenerated);
        }
        Ok(output)
    }
}
