//! Text and string-list editing nodes

use super::{check_model, check_temperature, render_pair};
use crate::calls::llm_json;
use crate::node::{Node, NodeContext};
use mpx_core::{PromptData, Result};
use serde::{Deserialize, Serialize};

const EDIT_SYSTEM: &str = "You are an expert natural language editor who is tasked with understanding a given block of text and transforming it based on some custom user given instructions. Read the given block of text and reason about what needs to be changed based on the custom user given instructions. The changes don't need to be massive (but can be) so be precise and really only make the changes as dictated to you by the given instructions.\n\nReturn the answer as only a JSON with two keys 'updated_text' and 'reasoning'.\nIn the 'updated_text' key provide the text which is updated by the custom user instructions with no preamble or explanation. Remember to consult the custom user instructions when making any updates.\nIn the 'reasoning' key provide an explanation for why you made the changes you did and how it correlates to the given custom user instructions.";

const EDIT_HUMAN: &str =
    "### Here is the given block of text:\n{user_input}\n\n### Here are the custom user instructions:\n{custom_instructions}";

const MERGE_TWO_SYSTEM: &str = "You are an expert natural language editor who is tasked with understanding two blocks of text and then merging them into one block of text based on some custom user given instructions. Read each given block of text and reason about what needs to be done in order to merge them based on the custom user given instructions. The merged version doesn't need to be massive (but can be) so be precise and really only make the changes as dictated to you by the given instructions. If no custom instructions are given then just concatenate the two blocks of text in a seamless manner.\n\nReturn the answer as only a JSON with two keys 'updated_text' and 'reasoning'.\nIn the 'updated_text' key provide the text which is the merged version that respects the custom user instructions with no preamble or explanation. Remember to consult the custom user instructions when making any updates.\nIn the 'reasoning' key provide an explanation for why the merged version makes sense and how it correlates to the given custom user instructions.";

const MERGE_TWO_HUMAN: &str = "### Here is the first block of text:\n{user_input_a}\n\n### Here is the second block of text:\n{user_input_b}\n\n### Here are the custom user instructions:\n{custom_instructions}";

const SPLIT_SYSTEM: &str = "You are an expert natural language editor who is tasked with breaking down a block of text into a list of strings based on some custom user given instructions. Read the given block of text and reason about what's important and needs to be extracted into a separate string based on the custom user given instructions. If no custom instructions are given then just split it however you want in a way that makes sense.\n\nReturn the answer as only a JSON with two keys 'list_of_strings' and 'reasoning'.\nIn the 'list_of_strings' key provide the list of strings that were extracted from the block of text according to the custom user instructions with no preamble or explanation.\nIn the 'reasoning' key provide an explanation for why the split makes sense and how it correlates to the given custom user instructions.";

const SPLIT_HUMAN: &str =
    "### Here is the block of text:\n{user_input}\n\n### Here are the custom user instructions:\n{custom_instructions}";

const JOIN_SYSTEM: &str = "You are an expert natural language editor who is tasked with understanding a given list of strings and combining them all into a single block of text based on some custom user given instruction. Read each of the strings in the given list and reason about how to merge them into a single block of text based on the custom user instructions. The final merged result doesn't need to be overly long (but can be) so be precise and really only produce the result as dictated to you by the given instructions.\n\nReturn the answer as only a JSON with two keys 'merged_text' and 'reasoning'.\nIn the 'merged_text' key provide the merged text which is the result of combining the list of strings based on the custom user instructions with no preamble or explanation. Remember to consult the custom user instructions when making the merge.\nIn the 'reasoning' key provide an explanation for how you came to your result and why you merged it the way you did. Ensure that your reasoning includes correlations to the given custom user instructions.";

const JOIN_HUMAN: &str =
    "### Here is the given list of strings:\n{string_list}\n\n### Here are the custom user instructions:\n{custom_instructions}";

/// Edited text plus the model's explanation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditedText {
    pub text: String,
    pub reasoning: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TextToTextInput {
    pub text: String,
    pub custom_instructions: String,
    pub model: Option<String>,
    pub temperature: Option<f64>,
}

/// Rewrite a block of text following custom instructions
#[derive(Debug, Default)]
pub struct TextToText;

impl Node for TextToText {
    const NAME: &'static str = "text_to_text";
    const DISPLAY_NAME: &'static str = "Text To Text";
    const DESCRIPTION: &'static str = "Transform a block of text according to custom instructions";

    type Input = TextToTextInput;
    type Output = EditedText;

    fn execute(&mut self, ctx: &NodeContext, input: TextToTextInput) -> Result<EditedText> {
        let params = ctx.llm_with(
            check_model(input.model.as_deref())?,
            check_temperature(input.temperature)?,
        );
        let data = PromptData::new()
            .with("user_input", &input.text)
            .with("custom_instructions", &input.custom_instructions);
        let (system, human) = render_pair(EDIT_SYSTEM, EDIT_HUMAN, &data)?;

        let reply = llm_json(
            ctx.backend(),
            ctx.cancel(),
            &system,
            &human,
            &params,
            &["updated_text", "reasoning"],
        )?;
        Ok(EditedText {
            text: reply.string("updated_text")?,
            reasoning: reply.string("reasoning")?,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TwoTextToTextInput {
    pub text_a: String,
    pub text_b: String,
    pub custom_instructions: String,
    pub model: Option<String>,
    pub temperature: Option<f64>,
}

/// Merge two blocks of text into one
#[derive(Debug, Default)]
pub struct TwoTextToText;

impl Node for TwoTextToText {
    const NAME: &'static str = "two_text_to_text";
    const DISPLAY_NAME: &'static str = "Two Text To Text";
    const DESCRIPTION: &'static str = "Merge two blocks of text according to custom instructions";

    type Input = TwoTextToTextInput;
    type Output = EditedText;

    fn execute(&mut self, ctx: &NodeContext, input: TwoTextToTextInput) -> Result<EditedText> {
        let params = ctx.llm_with(
            check_model(input.model.as_deref())?,
            check_temperature(input.temperature)?,
        );
        let data = PromptData::new()
            .with("user_input_a", &input.text_a)
            .with("user_input_b", &input.text_b)
            .with("custom_instructions", &input.custom_instructions);
        let (system, human) = render_pair(MERGE_TWO_SYSTEM, MERGE_TWO_HUMAN, &data)?;

        let reply = llm_json(
            ctx.backend(),
            ctx.cancel(),
            &system,
            &human,
            &params,
            &["updated_text", "reasoning"],
        )?;
        Ok(EditedText {
            text: reply.string("updated_text")?,
            reasoning: reply.string("reasoning")?,
        })
    }
}

/// A list of strings plus the model's explanation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextList {
    pub items: Vec<String>,
    pub reasoning: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TextToListInput {
    pub text: String,
    pub custom_instructions: String,
    pub temperature: Option<f64>,
}

/// Split a block of text into a list of strings
#[derive(Debug, Default)]
pub struct TextToList;

impl Node for TextToList {
    const NAME: &'static str = "text_to_list";
    const DISPLAY_NAME: &'static str = "Text To List";
    const DESCRIPTION: &'static str = "Break a block of text into a list of strings";

    type Input = TextToListInput;
    type Output = TextList;

    fn execute(&mut self, ctx: &NodeContext, input: TextToListInput) -> Result<TextList> {
        // splitting quality drops sharply on smaller models
        let params = ctx.llm_with(Some("gpt-4o"), check_temperature(input.temperature)?);
        let data = PromptData::new()
            .with("user_input", &input.text)
            .with("custom_instructions", &input.custom_instructions);
        let (system, human) = render_pair(SPLIT_SYSTEM, SPLIT_HUMAN, &data)?;

        let reply = llm_json(
            ctx.backend(),
            ctx.cancel(),
            &system,
            &human,
            &params,
            &["list_of_strings", "reasoning"],
        )?;
        Ok(TextList {
            items: reply.string_list("list_of_strings")?,
            reasoning: reply.string("reasoning")?,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StringListToTextInput {
    pub strings: Vec<String>,
    pub custom_instructions: String,
    pub model: Option<String>,
    pub temperature: Option<f64>,
}

/// Combine a list of strings into one block of text
#[derive(Debug, Default)]
pub struct StringListToText;

impl Node for StringListToText {
    const NAME: &'static str = "string_list_to_text";
    const DISPLAY_NAME: &'static str = "String List To Text";
    const DESCRIPTION: &'static str = "Merge a list of strings into a single block of text";

    type Input = StringListToTextInput;
    type Output = EditedText;

    fn execute(&mut self, ctx: &NodeContext, input: StringListToTextInput) -> Result<EditedText> {
        let params = ctx.llm_with(
            check_model(input.model.as_deref())?,
            check_temperature(input.temperature)?,
        );
        let data = PromptData::new()
            .with("string_list", input.strings.as_slice())
            .with("custom_instructions", &input.custom_instructions);
        let (system, human) = render_pair(JOIN_SYSTEM, JOIN_HUMAN, &data)?;

        let reply = llm_json(
            ctx.backend(),
            ctx.cancel(),
            &system,
            &human,
            &params,
            &["merged_text", "reasoning"],
        )?;
        Ok(EditedText {
            text: reply.string("merged_text")?,
            reasoning: reply.string("reasoning")?,
        })
    }
}

/// An edited list plus a per-item log of what changed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditedList {
    pub items: Vec<String>,
    pub reasoning: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StringListToStringListInput {
    pub strings: Vec<String>,
    pub custom_instructions: String,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub workers: Option<usize>,
}

/// Apply the same edit to every string of a list, in parallel
#[derive(Debug, Default)]
pub struct StringListToStringList;

impl Node for StringListToStringList {
    const NAME: &'static str = "string_list_to_string_list";
    const DISPLAY_NAME: &'static str = "String List To String List";
    const DESCRIPTION: &'static str = "Transform each string of a list according to custom instructions";

    type Input = StringListToStringListInput;
    type Output = EditedList;

    fn execute(
        &mut self,
        ctx: &NodeContext,
        input: StringListToStringListInput,
    ) -> Result<EditedList> {
        let params = ctx.llm_with(
            check_model(input.model.as_deref())?,
            check_temperature(input.temperature)?,
        );
        let workers = ctx.workers(input.workers)?;

        let results = ctx.fan_out(&input.strings, workers, |original, item| {
            tracing::debug!(index = item.index, total = item.total, "editing string");
            let data = PromptData::new()
                .with("user_input", original)
                .with("custom_instructions", &input.custom_instructions);
            let (system, human) = render_pair(EDIT_SYSTEM, EDIT_HUMAN, &data)?;

            let reply = llm_json(
                ctx.backend(),
                &item.cancel,
                &system,
                &human,
                &params,
                &["updated_text", "reasoning"],
            )?;
            let updated = reply.string("updated_text")?;
            let log = format!(
                "Original: {}\nUpdated: {}\nReasoning: {}\n\n",
                original,
                updated,
                reply.string("reasoning")?
            );
            Ok((updated, log))
        })?;

        let (items, logs): (Vec<String>, Vec<String>) = results.into_iter().unzip();
        Ok(EditedList {
            items,
            reasoning: logs.concat(),
        })
    }
}
