//! List picking and display

use crate::node::{Node, NodeContext};
use mpx_core::{InputHash, MpxError, Result, SingleEntryMemo};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PickFromListInput {
    pub items: Vec<String>,
    /// 1-based
    pub index: i64,
}

impl Default for PickFromListInput {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            index: 1,
        }
    }
}

/// Select one item of a list by its 1-based position
#[derive(Debug, Default)]
pub struct PickFromList {
    memo: SingleEntryMemo<String>,
}

impl PickFromList {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Node for PickFromList {
    const NAME: &'static str = "pick_from_list";
    const DISPLAY_NAME: &'static str = "Pick From List";
    const DESCRIPTION: &'static str = "Select a single item from a list by its 1-based index";

    type Input = PickFromListInput;
    type Output = String;

    fn execute(&mut self, _ctx: &NodeContext, input: PickFromListInput) -> Result<String> {
        let n = input.items.len();
        if n == 0 {
            return Err(MpxError::validation("Input list has no elements!"));
        }
        if input.index == 0 {
            return Err(MpxError::validation("Cannot pick a zero'th element from a list!"));
        }
        if input.index < 0 {
            return Err(MpxError::validation("The desired index number cannot be negative!"));
        }
        if input.index as usize > n {
            return Err(MpxError::validation(format!(
                "Desired index number {} is too large! The list only has {} elements.",
                input.index, n
            )));
        }

        let hash = InputHash::of(&input)?;
        self.memo
            .get_or_try_insert_with(hash, || Ok(input.items[input.index as usize - 1].clone()))
    }
}

/// A value passed through unchanged along with its rendering
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Shown<T> {
    pub display: String,
    pub value: T,
}

/// Render a list as numbered lines and pass it through
#[derive(Debug, Default)]
pub struct ShowList;

impl Node for ShowList {
    const NAME: &'static str = "show_list";
    const DISPLAY_NAME: &'static str = "Show List";
    const DESCRIPTION: &'static str = "Display the contents of a list, one numbered item per line";

    type Input = Vec<String>;
    type Output = Shown<Vec<String>>;

    fn execute(&mut self, _ctx: &NodeContext, input: Vec<String>) -> Result<Shown<Vec<String>>> {
        let display = input
            .iter()
            .enumerate()
            .map(|(i, item)| format!("{}. {}\n", i + 1, item))
            .collect();
        Ok(Shown {
            display,
            value: input,
        })
    }
}

#[derive(Debug, Default)]
pub struct ShowString;

impl Node for ShowString {
    const NAME: &'static str = "show_string";
    const DISPLAY_NAME: &'static str = "Show String";
    const DESCRIPTION: &'static str = "Display a string and pass it through";

    type Input = String;
    type Output = Shown<String>;

    fn execute(&mut self, _ctx: &NodeContext, input: String) -> Result<Shown<String>> {
        Ok(Shown {
            display: input.clone(),
            value: input,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpx_client::{Backend, MockClient};
    use std::sync::Arc;

    fn ctx() -> NodeContext {
        NodeContext::new(Backend::new(Arc::new(MockClient::canned())))
    }

    fn pick(items: &[&str], index: i64) -> Result<String> {
        PickFromList::new().execute(
            &ctx(),
            PickFromListInput {
                items: items.iter().map(|s| s.to_string()).collect(),
                index,
            },
        )
    }

    #[test]
    fn test_pick_is_one_based() {
        assert_eq!(pick(&["a", "b", "c"], 1).unwrap(), "a");
        assert_eq!(pick(&["a", "b", "c"], 3).unwrap(), "c");
    }

    #[test]
    fn test_pick_errors() {
        let message = |r: Result<String>| match r {
            Err(MpxError::ValidationError(m)) => m,
            other => panic!("expected validation error, got {other:?}"),
        };
        assert_eq!(message(pick(&[], 1)), "Input list has no elements!");
        assert_eq!(message(pick(&["a"], 0)), "Cannot pick a zero'th element from a list!");
        assert_eq!(message(pick(&["a"], -2)), "The desired index number cannot be negative!");
        assert_eq!(
            message(pick(&["a", "b"], 5)),
            "Desired index number 5 is too large! The list only has 2 elements."
        );
    }

    #[test]
    fn test_pick_memo_follows_index() {
        let context = ctx();
        let mut node = PickFromList::new();
        let items = vec!["x".to_string(), "y".to_string()];
        let first = node
            .execute(&context, PickFromListInput { items: items.clone(), index: 1 })
            .unwrap();
        let second = node
            .execute(&context, PickFromListInput { items, index: 2 })
            .unwrap();
        assert_eq!((first.as_str(), second.as_str()), ("x", "y"));
    }

    #[test]
    fn test_show_list_numbers_lines() {
        let shown = ShowList
            .execute(&ctx(), vec!["lamp".into(), "desk".into()])
            .unwrap();
        assert_eq!(shown.display, "1. lamp\n2. desk\n");
        assert_eq!(shown.value.len(), 2);

        let shown = ShowString.execute(&ctx(), "hello".into()).unwrap();
        assert_eq!(shown.display, "hello");
    }
}
