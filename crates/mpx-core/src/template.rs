//! Prompt templates with named placeholders
//!
//! Templates use `{name}` placeholders; `{{` and `}}` produce literal braces.
//! Every placeholder must have a value in the accompanying `PromptData`.

use crate::error::{MpxError, Result};
use std::collections::BTreeMap;
use std::fmt;

/// A value substituted into a prompt template
#[derive(Debug, Clone, PartialEq)]
pub enum PromptValue {
    Text(String),
    Integer(i64),
    Float(f64),
    List(Vec<String>),
}

impl fmt::Display for PromptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptValue::Text(s) => write!(f, "{}", s),
            PromptValue::Integer(n) => write!(f, "{}", n),
            PromptValue::Float(x) => write!(f, "{}", x),
            PromptValue::List(items) => {
                // Rendered as a JSON array so the model sees element boundaries
                let rendered = serde_json::to_string(items).map_err(|_| fmt::Error)?;
                write!(f, "{}", rendered)
            }
        }
    }
}

impl From<&str> for PromptValue {
    fn from(s: &str) -> Self {
        PromptValue::Text(s.to_string())
    }
}

impl From<String> for PromptValue {
    fn from(s: String) -> Self {
        PromptValue::Text(s)
    }
}

impl From<&String> for PromptValue {
    fn from(s: &String) -> Self {
        PromptValue::Text(s.clone())
    }
}

impl From<i64> for PromptValue {
    fn from(n: i64) -> Self {
        PromptValue::Integer(n)
    }
}

impl From<u32> for PromptValue {
    fn from(n: u32) -> Self {
        PromptValue::Integer(n as i64)
    }
}

impl From<usize> for PromptValue {
    fn from(n: usize) -> Self {
        PromptValue::Integer(n as i64)
    }
}

impl From<f64> for PromptValue {
    fn from(x: f64) -> Self {
        PromptValue::Float(x)
    }
}

impl From<Vec<String>> for PromptValue {
    fn from(items: Vec<String>) -> Self {
        PromptValue::List(items)
    }
}

impl From<&[String]> for PromptValue {
    fn from(items: &[String]) -> Self {
        PromptValue::List(items.to_vec())
    }
}

/// Placeholder name → substitution value
#[derive(Debug, Clone, Default)]
pub struct PromptData {
    values: BTreeMap<String, PromptValue>,
}

impl PromptData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: &str, value: impl Into<PromptValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<PromptValue>) {
        self.values.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&PromptValue> {
        self.values.get(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A parsed prompt template
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    segments: Vec<Segment>,
}

impl PromptTemplate {
    /// Parse a template string
    pub fn parse(source: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for n in chars.by_ref() {
                        if n == '}' {
                            closed = true;
                            break;
                        }
                        name.push(n);
                    }
                    if !closed {
                        return Err(MpxError::TemplateSyntax(format!(
                            "unterminated placeholder '{{{}'",
                            name
                        )));
                    }
                    let name = name.trim().to_string();
                    if name.is_empty() || name.contains('{') {
                        return Err(MpxError::TemplateSyntax(format!(
                            "invalid placeholder name '{}'",
                            name
                        )));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(name));
                }
                '}' => {
                    return Err(MpxError::TemplateSyntax(
                        "single '}' encountered in template".to_string(),
                    ));
                }
                other => literal.push(other),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { segments })
    }

    /// Placeholder names in order of appearance (duplicates included)
    pub fn placeholders(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Placeholder(name) => Some(name.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Substitute every placeholder from `data`
    pub fn render(&self, data: &PromptData) -> Result<String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => {
                    let value = data
                        .get(name)
                        .ok_or_else(|| MpxError::MissingPlaceholder(name.clone()))?;
                    out.push_str(&value.to_string());
                }
            }
        }
        Ok(out)
    }

    /// Parse and render in one step
    pub fn substitute(source: &str, data: &PromptData) -> Result<String> {
        Self::parse(source)?.render(data)
    }
}
