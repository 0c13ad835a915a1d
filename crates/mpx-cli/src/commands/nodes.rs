//! Node listing and JSON-driven node execution

use super::{print_json, Session};
use anyhow::{bail, Context, Result};
use mpx_nodes::nodes::*;
use mpx_nodes::{registry, Node, NodeContext};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Nodes whose inputs are images; they have dedicated commands
const IMAGE_NODES: &[(&str, &str)] = &[
    ("text_to_image", "mpx image"),
    ("object_list_to_image_list", "mpx pipeline"),
    ("pick_best_image", "mpx pick"),
    ("reflect_on_image_list", "mpx pipeline --reflect"),
    ("images_to_3d_models", "mpx to3d"),
];

pub fn list(format: &str) -> Result<()> {
    let nodes = registry();
    match format {
        "json" => {
            let items: Vec<Value> = nodes
                .iter()
                .map(|n| {
                    serde_json::json!({
                        "name": n.name,
                        "display_name": n.display_name,
                        "description": n.description,
                    })
                })
                .collect();
            print_json(&items)
        }
        "text" => {
            println!("{} node(s):\n", nodes.len());
            for n in &nodes {
                println!("  {:<28} {}", n.name, n.description);
            }
            Ok(())
        }
        _ => bail!("Unknown format: {}", format),
    }
}

pub fn run(session: &Session, name: &str, input: &str) -> Result<()> {
    let input = read_input(input)?;
    let ctx = &session.ctx;

    let output = match name {
        TextToText::NAME => execute(TextToText, ctx, input)?,
        TwoTextToText::NAME => execute(TwoTextToText, ctx, input)?,
        TextToList::NAME => execute(TextToList, ctx, input)?,
        StringListToText::NAME => execute(StringListToText, ctx, input)?,
        StringListToStringList::NAME => execute(StringListToStringList, ctx, input)?,
        TextToObjectList::NAME => execute(TextToObjectList, ctx, input)?,
        TextToStory::NAME => execute(TextToStory, ctx, input)?,
        TextToScriptBreakdown::NAME => execute(TextToScriptBreakdown, ctx, input)?,
        TransformObjectList::NAME => execute(TransformObjectList, ctx, input)?,
        ModelOptimizer::NAME => execute(ModelOptimizer, ctx, input)?,
        SaveModelsToDisk::NAME => execute(SaveModelsToDisk::new(), ctx, input)?,
        PickFromList::NAME => execute(PickFromList::new(), ctx, input)?,
        ShowList::NAME => execute(ShowList, ctx, input)?,
        ShowString::NAME => execute(ShowString, ctx, input)?,
        other => {
            if let Some((_, command)) = IMAGE_NODES.iter().find(|(n, _)| *n == other) {
                bail!("'{}' takes images; use `{}` instead", other, command);
            }
            bail!("Unknown node '{}'. Run `mpx nodes` to list them.", other);
        }
    };

    print_json(&output)
}

fn execute<N>(mut node: N, ctx: &NodeContext, input: Value) -> Result<Value>
where
    N: Node,
    N::Input: DeserializeOwned,
    N::Output: Serialize,
{
    let input: N::Input = serde_json::from_value(input)
        .with_context(|| format!("Invalid input for node '{}'", N::NAME))?;
    tracing::info!(node = N::NAME, "running node");
    let output = node.execute(ctx, input)?;
    Ok(serde_json::to_value(output)?)
}

/// Inline JSON, or `@path` to a JSON file
fn read_input(arg: &str) -> Result<Value> {
    let text = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file {}", path))?,
        None => arg.to_string(),
    };
    serde_json::from_str(&text).context("Input is not valid JSON")
}
