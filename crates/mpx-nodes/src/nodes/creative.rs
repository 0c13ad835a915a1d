//! Object lists, stories and script breakdowns

use super::{check_temperature, render_pair, text_or_lines};
use crate::calls::llm_json;
use crate::node::{Node, NodeContext};
use mpx_core::{MpxError, PromptData, Result};
use serde::{Deserialize, Serialize};

const OBJECTS_SYSTEM: &str = "You are a natural language expert who is an expert at breaking down a block of text into a list of objects. This block of text does not necessarily contain the objects itself and can be generic descriptions so your job is to find a set of objects which fit the description and the intention of the user. For example, if the block of text is 'I want a scene of a living room', then you should return objects which should exist in a common living room.\n\nReturn the answer as only a JSON with two keys 'objects' and 'reasoning'. In the 'objects' key provide the list of objects with no preamble or explanation. Each object in the list should be more descriptive than just the object itself. Ensure the list has a minimum of {min_objects} items and at most {max_objects} items. In the 'reasoning' key provide an explanation for why the objects were chosen. Just the JSON only is returned.";

const OBJECTS_HUMAN: &str = "Here is the block of text: {user_input}";

const STORY_SYSTEM: &str = "You are a master storyteller with expertise across multiple genres and narrative styles. Your task is to craft a compelling, original story based on the client's specifications. The client will provide: (1) The overall concept or theme of the story, (2) the desired genre, (3) preferred length, and optionally (4) custom instructions or stylistic preferences.

STORY STRUCTURE:
- Begin with a strong hook that introduces the main character(s) and setting
- Develop a clear narrative arc with rising action, climax, and resolution
- Focus on a single compelling conflict unless otherwise requested below

CHARACTER DEVELOPMENT:
- Create memorable characters with distinct personalities, motivations, and flaws
- Show character growth or change through the story's events
- Ensure characters' decisions drive the plot forward

GENRE CONSIDERATIONS:
- Incorporate key elements and conventions of the specified genre
- Balance genre tropes with original elements to avoid clichés

WRITING STYLE:
- Maintain a consistent tone appropriate to the genre and story concept
- Use a mix of dialogue, description, and action to create a dynamic narrative
- Show rather than tell when depicting emotions and character traits
- Vary sentence structure and pacing to maintain reader interest

Return the answer as only a JSON with three keys: 'story', 'characters', and 'reasoning'.
- In 'story': Provide the complete narrative with appropriate paragraphing and dialogue formatting. No preamble or explanation.
- In 'characters': Provide a numbered list of all characters in the story with detailed character profiles. Each character should be described in a concise description starting with a number followed by a period (e.g., '1. Character description...'). Include: their name, age and gender, personality traits and quirks, visual details, motivations and goals, relationships with other characters, and any significant character arcs or development throughout the story. Focus on elements that help understand their role in the narrative and their impact on the story's themes. Include the protagonist, antagonist, and any supporting characters. Do not use JSON formatting within this section.
- In 'reasoning': Explain how the story fulfills the client's requirements, your narrative choices, and how the characters and their arcs serve the story's themes.
Make sure you return the answer as a JSON string with the ```json and ``` markers.";

const STORY_HUMAN: &str = "Here are the clients given information:\n\n### (1) The overall gist of what the story is about\n{story_gist}\n\n### (2) The genre of the story\n{story_genre}\n\n### (3) The target word count for the story\n{story_word_length}\n\n### (4) Set of custom instructions to incorporate\n{custom_instructions}\n\n";

const SCRIPT_SYSTEM: &str = "You are an expert film and animation script analyst. You are provided with a complete script for a film or animation. Your task is to extract and return three items in JSON format: (1) a list of all characters mentioned in the script (including any relevant descriptions), (2) a list of all props and environment objects present in the script (including any interactive items), and (3) a list where each element is a brief synopsis of each distinct scene in the script. Return the result as a JSON object with the keys 'characters', 'props', 'scene_synopses' and 'reasoning'.\nIn the 'characters' key provide a list of all characters mentioned in the script (including any relevant descriptions). Each element in the list is just a string.\nIn the 'props' key provide a list of all props and environment objects present in the script (including any interactive items). Each element in the list is just a string.\nIn the 'scene_synopses' key provide a list where each element is a brief synopsis of each distinct scene in the script.\nIn the 'reasoning' key provide an explanation for how the three items (1) to (3) as mentioned above were extracted and why the extracted elements make sense.";

const SCRIPT_HUMAN: &str =
    "### The following is the full film/animation script:\n\n{script_text}\n\nExtract the required elements as described.";

const TRANSFORM_SYSTEM: &str = "You are a natural language expert who transforms object descriptions to match a specific style and context. Your task is to:

1. Review a user-provided description of an object
2. Evaluate if and how it fits within the context of the provided scene description
3. Consider the custom instructions for additional guidance on style and content
4. Return an updated description that better fits the context (or keep it unchanged if it already fits well)

Return ONLY a JSON with two keys:
- 'description': The updated object description with no preamble or explanation
- 'reasoning': Your explanation for why changes were made or why no changes were needed

Follow the custom instructions carefully as they contain important details about the transformation requirements.
";

const TRANSFORM_HUMAN: &str = "### Object description:\n\n{object_description}\n\n### Contextual info about the scene the object is in:\n\n{scene_description}\n\n### Custom instructions:\n\n{custom_instructions}\n\n";

/// Genres offered for story generation
pub const STORY_GENRES: &[&str] = &[
    "Action",
    "Adventure",
    "Absurdist Fiction",
    "Comedy",
    "Children",
    "Crime",
    "Drama",
    "Historical Fiction",
    "Horror",
    "Mystery",
    "Romance",
    "Science Fiction",
    "Hard Science Fiction",
    "Thriller/Suspense",
    "Western",
    "Dystopian Fiction",
    "Cyberpunk",
    "Steampunk",
    "Magical Realism",
    "Paranormal Fiction",
    "Coming-of-Age (Bildungsroman)",
    "Satire",
    "Urban Fiction",
    "Mythic Fiction",
    "Political Fiction",
    "Speculative Fiction",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextToObjectListInput {
    pub text: String,
    pub min_objects: u32,
    pub max_objects: u32,
}

impl Default for TextToObjectListInput {
    fn default() -> Self {
        Self {
            text: String::new(),
            min_objects: 1,
            max_objects: 4,
        }
    }
}

/// Propose descriptive objects that belong in the described scene
#[derive(Debug, Default)]
pub struct TextToObjectList;

impl Node for TextToObjectList {
    const NAME: &'static str = "text_to_object_list";
    const DISPLAY_NAME: &'static str = "Text To Object List";
    const DESCRIPTION: &'static str = "Generate a list of object descriptions from a text prompt";

    type Input = TextToObjectListInput;
    type Output = Vec<String>;

    fn execute(&mut self, ctx: &NodeContext, input: TextToObjectListInput) -> Result<Vec<String>> {
        if input.min_objects == 0 || input.max_objects < input.min_objects {
            return Err(MpxError::validation(format!(
                "object bounds must satisfy 1 <= min <= max, got min={} max={}",
                input.min_objects, input.max_objects
            )));
        }

        let params = ctx.llm_with(Some("gpt-4o"), Some(0.0));
        let data = PromptData::new()
            .with("min_objects", input.min_objects)
            .with("max_objects", input.max_objects)
            .with("user_input", &input.text);
        let (system, human) = render_pair(OBJECTS_SYSTEM, OBJECTS_HUMAN, &data)?;

        let reply = llm_json(
            ctx.backend(),
            ctx.cancel(),
            &system,
            &human,
            &params,
            &["objects", "reasoning"],
        )?;
        let mut objects = reply.string_list("objects")?;
        // too few objects is tolerated, too many is truncated
        objects.truncate(input.max_objects as usize);
        tracing::info!(count = objects.len(), "object list generated");
        Ok(objects)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextToStoryInput {
    pub gist: String,
    pub genre: String,
    pub word_length: u32,
    pub temperature: f64,
    pub custom_instructions: String,
}

impl Default for TextToStoryInput {
    fn default() -> Self {
        Self {
            gist: String::new(),
            genre: "Adventure".to_string(),
            word_length: 150,
            temperature: 0.8,
            custom_instructions: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryOutput {
    pub story: String,
    pub characters: String,
    pub reasoning: String,
}

/// Write a short story from a gist and a genre
#[derive(Debug, Default)]
pub struct TextToStory;

impl Node for TextToStory {
    const NAME: &'static str = "text_to_story";
    const DISPLAY_NAME: &'static str = "Text To Story";
    const DESCRIPTION: &'static str = "Generate a story and its character profiles from a gist";

    type Input = TextToStoryInput;
    type Output = StoryOutput;

    fn execute(&mut self, ctx: &NodeContext, input: TextToStoryInput) -> Result<StoryOutput> {
        if !STORY_GENRES.contains(&input.genre.as_str()) {
            return Err(MpxError::validation(format!(
                "unknown genre '{}'",
                input.genre
            )));
        }
        if !(10..=2000).contains(&input.word_length) {
            return Err(MpxError::validation(format!(
                "story length must be within 10-2000 words, got {}",
                input.word_length
            )));
        }

        let params = ctx.llm_with(Some("gpt-4o"), check_temperature(Some(input.temperature))?);
        let data = PromptData::new()
            .with("story_gist", &input.gist)
            .with("story_genre", &input.genre)
            .with("story_word_length", input.word_length)
            .with("custom_instructions", &input.custom_instructions);
        let (system, human) = render_pair(STORY_SYSTEM, STORY_HUMAN, &data)?;

        let reply = llm_json(
            ctx.backend(),
            ctx.cancel(),
            &system,
            &human,
            &params,
            &["story", "characters", "reasoning"],
        )?;
        Ok(StoryOutput {
            story: reply.string("story")?,
            characters: text_or_lines(&reply, "characters")?,
            reasoning: reply.string("reasoning")?,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TextToScriptBreakdownInput {
    pub script: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptBreakdown {
    pub characters: Vec<String>,
    pub props: Vec<String>,
    pub scene_synopses: Vec<String>,
    pub reasoning: String,
}

/// Extract characters, props and scene synopses from a script
#[derive(Debug, Default)]
pub struct TextToScriptBreakdown;

impl Node for TextToScriptBreakdown {
    const NAME: &'static str = "text_to_script_breakdown";
    const DISPLAY_NAME: &'static str = "Text To Script Breakdown";
    const DESCRIPTION: &'static str =
        "Break a film or animation script into characters, props and scenes";

    type Input = TextToScriptBreakdownInput;
    type Output = ScriptBreakdown;

    fn execute(
        &mut self,
        ctx: &NodeContext,
        input: TextToScriptBreakdownInput,
    ) -> Result<ScriptBreakdown> {
        let params = ctx.llm_with(Some("gpt-4o"), Some(0.0));
        let data = PromptData::new().with("script_text", &input.script);
        let (system, human) = render_pair(SCRIPT_SYSTEM, SCRIPT_HUMAN, &data)?;

        let reply = llm_json(
            ctx.backend(),
            ctx.cancel(),
            &system,
            &human,
            &params,
            &["characters", "props", "scene_synopses", "reasoning"],
        )?;
        Ok(ScriptBreakdown {
            characters: reply.string_list("characters")?,
            props: reply.string_list("props")?,
            scene_synopses: reply.string_list("scene_synopses")?,
            reasoning: reply.string("reasoning")?,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformObjectListInput {
    pub objects: Vec<String>,
    pub scene_description: String,
    pub custom_instructions: String,
    pub temperature: Option<f64>,
    pub workers: Option<usize>,
}

/// Restyle each object description to fit a scene
#[derive(Debug, Default)]
pub struct TransformObjectList;

impl Node for TransformObjectList {
    const NAME: &'static str = "transform_object_list";
    const DISPLAY_NAME: &'static str = "Transform Object List";
    const DESCRIPTION: &'static str =
        "Rewrite object descriptions to match a scene and custom instructions";

    type Input = TransformObjectListInput;
    type Output = super::EditedList;

    fn execute(
        &mut self,
        ctx: &NodeContext,
        input: TransformObjectListInput,
    ) -> Result<super::EditedList> {
        let params = ctx.llm_with(Some("gpt-4o"), check_temperature(input.temperature)?);
        let workers = ctx.workers(input.workers)?;

        let results = ctx.fan_out(&input.objects, workers, |original, item| {
            let data = PromptData::new()
                .with("object_description", original)
                .with("scene_description", &input.scene_description)
                .with("custom_instructions", &input.custom_instructions);
            let (system, human) = render_pair(TRANSFORM_SYSTEM, TRANSFORM_HUMAN, &data)?;

            let reply = llm_json(
                ctx.backend(),
                &item.cancel,
                &system,
                &human,
                &params,
                &["description", "reasoning"],
            )?;
            let updated = reply.string("description")?;
            let log = format!(
                "({})\n\tOriginal: {}\n\tUpdated: {}\n\tReasoning: {}\n\n\n",
                item.index + 1,
                original,
                updated,
                reply.string("reasoning")?
            );
            Ok((updated, log))
        })?;

        let (items, logs): (Vec<String>, Vec<String>) = results.into_iter().unzip();
        Ok(super::EditedList {
            items,
            reasoning: logs.concat(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpx_client::{Backend, GenerationRequest, MockClient, MockReply, StatusPoller};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn ctx(client: Arc<MockClient>) -> NodeContext {
        NodeContext::new(
            Backend::new(client).with_poller(StatusPoller::new(Duration::from_millis(1))),
        )
    }

    fn replying(output: serde_json::Value) -> Arc<MockClient> {
        Arc::new(MockClient::new(move |_| {
            MockReply::Complete(json!({ "output": output.to_string() }))
        }))
    }

    #[test]
    fn test_object_list_truncated_to_max() {
        let client = replying(json!({
            "objects": ["a red sofa", "a glass lamp", "a wool rug"],
            "reasoning": "living room"
        }));
        let out = TextToObjectList
            .execute(
                &ctx(client.clone()),
                TextToObjectListInput {
                    text: "a living room".into(),
                    min_objects: 1,
                    max_objects: 2,
                },
            )
            .unwrap();
        assert_eq!(out, vec!["a red sofa", "a glass lamp"]);

        match &client.submissions()[0] {
            GenerationRequest::LlmCall { system_prompt, .. } => {
                assert!(system_prompt.contains("a minimum of 1 items and at most 2 items"))
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn test_object_bounds_validated() {
        let client = Arc::new(MockClient::canned());
        let err = TextToObjectList
            .execute(
                &ctx(client.clone()),
                TextToObjectListInput {
                    min_objects: 5,
                    max_objects: 2,
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, MpxError::ValidationError(_)));
        assert_eq!(client.submit_count(), 0);
    }

    #[test]
    fn test_story_characters_joined() {
        let client = Arc::new(MockClient::canned());
        let out = TextToStory
            .execute(
                &ctx(client),
                TextToStoryInput {
                    gist: "a chair meets a table".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(out.characters, "Chair\nTable");
        assert!(out.story.starts_with("Once upon a time"));
    }

    #[test]
    fn test_story_rejects_unknown_genre() {
        let client = Arc::new(MockClient::canned());
        let err = TextToStory
            .execute(
                &ctx(client),
                TextToStoryInput {
                    genre: "Opera".into(),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, MpxError::ValidationError(_)));
    }

    #[test]
    fn test_script_breakdown_lists() {
        let client = Arc::new(MockClient::canned());
        let out = TextToScriptBreakdown
            .execute(
                &ctx(client),
                TextToScriptBreakdownInput {
                    script: "INT. KITCHEN - DAY".into(),
                },
            )
            .unwrap();
        assert_eq!(out.props, vec!["lamp"]);
        assert_eq!(out.scene_synopses.len(), 1);
    }

    #[test]
    fn test_transform_log_numbers_items() {
        let client = replying(json!({"description": "a mossy stone", "reasoning": "forest"}));
        let out = TransformObjectList
            .execute(
                &ctx(client),
                TransformObjectListInput {
                    objects: vec!["a stone".into(), "a log".into()],
                    scene_description: "forest".into(),
                    workers: Some(2),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(out.items.len(), 2);
        assert!(out.reasoning.starts_with("(1)\n\tOriginal: a stone\n"));
        assert!(out.reasoning.contains("(2)\n\tOriginal: a log\n"));
    }
}
