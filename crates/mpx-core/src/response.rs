//! Lenient decoding of structured model output
//!
//! Language models asked for JSON tend to answer with something close to it:
//! wrapped in a markdown fence, with trailing or missing commas, comments,
//! single quotes, `'''` blocks or unquoted text. The grammar in
//! `lenient_json.pest` follows Hjson for those deviations and produces an
//! ordinary `serde_json::Value` tree.

use crate::error::{MpxError, Result};
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use serde_json::{Map, Number, Value};

#[derive(Parser)]
#[grammar = "lenient_json.pest"]
struct LenientJsonParser;

const OPEN_FENCES: [&str; 2] = ["```json\n", "```\n"];
const CLOSE_FENCE: &str = "\n```";

/// Decode model text with the default parser settings
pub fn parse_structured(text: &str) -> Result<StructuredResponse> {
    ResponseParser::default().parse(text)
}

/// Parser settings for structured responses
#[derive(Debug, Clone, Copy)]
pub struct ResponseParser {
    legacy_backslash_quirk: bool,
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self {
            legacy_backslash_quirk: true,
        }
    }
}

impl ResponseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle replacement of leftover backslashes in top-level strings with
    /// double quotes. Enabled by default; prompts downstream were written
    /// against that output.
    pub fn legacy_backslash_quirk(mut self, enabled: bool) -> Self {
        self.legacy_backslash_quirk = enabled;
        self
    }

    /// Strip one fence layer, decode, and clean up top-level values
    pub fn parse(&self, text: &str) -> Result<StructuredResponse> {
        let body = strip_fence(text.trim());

        let mut pairs = LenientJsonParser::parse(Rule::document, body)
            .map_err(|e| MpxError::malformed(e.to_string()))?;
        let document = pairs
            .next()
            .ok_or_else(|| MpxError::malformed("empty response"))?;
        let root = document
            .into_inner()
            .next()
            .ok_or_else(|| MpxError::malformed("empty response"))?;

        let map = match to_value(root)? {
            Value::Object(map) => map,
            other => {
                return Err(MpxError::malformed(format!(
                    "expected a JSON object at top level, found {}",
                    kind_of(&other)
                )))
            }
        };

        let cleaned = map
            .into_iter()
            .map(|(k, v)| (k, self.clean_top_level(v)))
            .collect();

        Ok(StructuredResponse { fields: cleaned })
    }

    fn clean_top_level(&self, value: Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.clean_string(&s)),
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| match item {
                        Value::String(s) => {
                            let trimmed = s.strip_suffix(',').unwrap_or(&s).to_string();
                            Value::String(trimmed)
                        }
                        other => other,
                    })
                    .collect(),
            ),
            other => other,
        }
    }

    fn clean_string(&self, s: &str) -> String {
        let unescaped = s.replace("\\n", "\n");
        if self.legacy_backslash_quirk {
            unescaped.replace('\\', "\"")
        } else {
            unescaped
        }
    }
}

fn strip_fence(text: &str) -> &str {
    for open in OPEN_FENCES {
        if text.len() >= open.len() + CLOSE_FENCE.len()
            && text.starts_with(open)
            && text.ends_with(CLOSE_FENCE)
        {
            return &text[open.len()..text.len() - CLOSE_FENCE.len()];
        }
    }
    text
}

fn to_value(pair: Pair<Rule>) -> Result<Value> {
    match pair.as_rule() {
        Rule::object => {
            let mut map = Map::new();
            for entry in pair.into_inner() {
                let mut inner = entry.into_inner();
                let (key, value) = match (inner.next(), inner.next()) {
                    (Some(k), Some(v)) => (k, v),
                    _ => return Err(MpxError::malformed("incomplete object entry")),
                };
                let key = match key.as_rule() {
                    Rule::string => string_contents(key)?,
                    _ => key.as_str().to_string(),
                };
                map.insert(key, to_value(value)?);
            }
            Ok(Value::Object(map))
        }
        Rule::array => pair
            .into_inner()
            .map(to_value)
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Rule::string => Ok(Value::String(string_contents(pair)?)),
        Rule::multiline => Ok(Value::String(multiline_contents(pair))),
        Rule::line_text | Rule::item_text => Ok(Value::String(pair.as_str().trim_end().to_string())),
        Rule::number => parse_number(pair.as_str()),
        Rule::boolean => Ok(Value::Bool(pair.as_str() == "true")),
        Rule::null => Ok(Value::Null),
        other => Err(MpxError::malformed(format!("unexpected token {:?}", other))),
    }
}

fn string_contents(pair: Pair<Rule>) -> Result<String> {
    let raw = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
    unescape(raw)
}

/// Body of a `'''` block, dedented to the column of the opening quotes.
/// A blank first line and the line holding the closing quotes are dropped.
fn multiline_contents(pair: Pair<Rule>) -> String {
    let indent = pair.as_span().start_pos().line_col().1 - 1;
    let raw = pair
        .into_inner()
        .next()
        .map(|p| p.as_str())
        .unwrap_or("")
        .replace("\r\n", "\n");

    let mut lines: Vec<&str> = raw.split('\n').collect();
    if lines.len() > 1 && lines[0].trim().is_empty() {
        lines.remove(0);
    }
    if lines.len() > 1 && lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }

    lines
        .iter()
        .map(|line| {
            let leading = line.len() - line.trim_start_matches([' ', '\t']).len();
            &line[leading.min(indent)..]
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn parse_number(text: &str) -> Result<Value> {
    if !text.contains(|c: char| matches!(c, '.' | 'e' | 'E')) {
        if let Ok(n) = text.parse::<i64>() {
            return Ok(Value::Number(n.into()));
        }
    }
    let x: f64 = text
        .parse()
        .map_err(|_| MpxError::malformed(format!("invalid number '{}'", text)))?;
    Number::from_f64(x)
        .map(Value::Number)
        .ok_or_else(|| MpxError::malformed(format!("number out of range '{}'", text)))
}

fn unescape(raw: &str) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('u') => {
                let high = read_hex4(&mut chars)?;
                let code = if (0xD800..0xDC00).contains(&high) {
                    // Surrogate pair: expect a following \uDC00-\uDFFF
                    let rest = chars.as_str();
                    if !rest.starts_with("\\u") {
                        return Err(MpxError::malformed("unpaired surrogate in string"));
                    }
                    chars.next();
                    chars.next();
                    let low = read_hex4(&mut chars)?;
                    if !(0xDC00..0xE000).contains(&low) {
                        return Err(MpxError::malformed("invalid low surrogate in string"));
                    }
                    0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00)
                } else {
                    high
                };
                let ch = char::from_u32(code)
                    .ok_or_else(|| MpxError::malformed(format!("invalid code point {:#x}", code)))?;
                out.push(ch);
            }
            // \" \\ \/ \' and anything unknown decode to the escaped character
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }

    Ok(out)
}

fn read_hex4(chars: &mut std::str::Chars<'_>) -> Result<u32> {
    let digits: String = chars.by_ref().take(4).collect();
    if digits.len() != 4 {
        return Err(MpxError::malformed("truncated \\u escape"));
    }
    u32::from_str_radix(&digits, 16)
        .map_err(|_| MpxError::malformed(format!("invalid \\u escape '{}'", digits)))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// A decoded model response: top-level key → JSON value
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredResponse {
    fields: Map<String, Value>,
}

impl StructuredResponse {
    /// Fail with a malformed-response error unless every key is present
    pub fn require(&self, keys: &[&str]) -> Result<()> {
        let missing: Vec<&str> = keys
            .iter()
            .copied()
            .filter(|k| !self.fields.contains_key(*k))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(MpxError::malformed(format!(
                "response missing expected keys: {}",
                missing.join(", ")
            )))
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// A scalar field as text
    pub fn string(&self, key: &str) -> Result<String> {
        match self.field(key)? {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(MpxError::malformed(format!(
                "'{}' should be a string, found {}",
                key,
                kind_of(other)
            ))),
        }
    }

    /// A list field as strings; a bare string counts as a one-element list
    pub fn string_list(&self, key: &str) -> Result<Vec<String>> {
        match self.field(key)? {
            Value::Array(items) => Ok(items.iter().map(render_element).collect()),
            Value::String(s) => Ok(vec![s.clone()]),
            other => Err(MpxError::malformed(format!(
                "'{}' should be a list, found {}",
                key,
                kind_of(other)
            ))),
        }
    }

    /// An integer field; integral floats and numeric strings are accepted
    pub fn integer(&self, key: &str) -> Result<i64> {
        let value = self.field(key)?;
        let parsed = match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|x| x.fract() == 0.0).map(|x| x as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        parsed.ok_or_else(|| {
            MpxError::malformed(format!("'{}' should be an integer, found {}", key, value))
        })
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.fields
    }

    fn field(&self, key: &str) -> Result<&Value> {
        self.fields
            .get(key)
            .ok_or_else(|| MpxError::malformed(format!("response missing key '{}'", key)))
    }
}

fn render_element(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fenced_response_with_trailing_comma_in_element() {
        let parsed =
            parse_structured("```json\n{\"a\": \"x\\ny\", \"b\": [\"p,\",\"q\"]}\n```").unwrap();
        assert_eq!(parsed.string("a").unwrap(), "x\ny");
        assert_eq!(parsed.string_list("b").unwrap(), vec!["p", "q"]);
    }

    #[test]
    fn test_unfenced_response_decodes_unchanged() {
        let parsed = parse_structured("{\"updated_text\": \"hello\", \"reasoning\": \"r\"}").unwrap();
        assert_eq!(parsed.string("updated_text").unwrap(), "hello");
        assert_eq!(parsed.string("reasoning").unwrap(), "r");
    }

    #[test]
    fn test_plain_fence_marker() {
        let parsed = parse_structured("```\n{\"k\": 1}\n```").unwrap();
        assert_eq!(parsed.integer("k").unwrap(), 1);
    }

    #[test]
    fn test_only_one_fence_layer_stripped() {
        let text = "```json\n```json\n{\"k\": 1}\n```\n```";
        assert!(parse_structured(text).is_err());
    }

    #[test]
    fn test_almost_json_is_accepted() {
        let text = r#"
            {
                // the model's answer
                objects: ['chair', "table",],
                /* block comment */
                count: 2,   # trailing note
                nested: {"x": [1, 2.5, -3e2,],},
            }
        "#;
        let parsed = parse_structured(text).unwrap();
        assert_eq!(parsed.string_list("objects").unwrap(), vec!["chair", "table"]);
        assert_eq!(parsed.integer("count").unwrap(), 2);
        assert_eq!(parsed.get("nested").unwrap(), &json!({"x": [1, 2.5, -300.0]}));
    }

    #[test]
    fn test_raw_newline_inside_string() {
        let parsed = parse_structured("{\"story\": \"line one\nline two\"}").unwrap();
        assert_eq!(parsed.string("story").unwrap(), "line one\nline two");
    }

    #[test]
    fn test_backslash_quirk() {
        // JSON `\\n` decodes to a literal backslash-n, which becomes a newline;
        // a lone decoded backslash becomes a double quote
        let text = r#"{"a": "one\\ntwo", "b": "say \\hi\\"}"#;
        let parsed = parse_structured(text).unwrap();
        assert_eq!(parsed.string("a").unwrap(), "one\ntwo");
        assert_eq!(parsed.string("b").unwrap(), "say \"hi\"");

        let parsed = ResponseParser::new()
            .legacy_backslash_quirk(false)
            .parse(text)
            .unwrap();
        assert_eq!(parsed.string("a").unwrap(), "one\ntwo");
        assert_eq!(parsed.string("b").unwrap(), "say \\hi\\");
    }

    #[test]
    fn test_nested_values_are_not_post_processed() {
        let parsed = parse_structured(r#"{"outer": {"inner": ["a,"]}}"#).unwrap();
        assert_eq!(parsed.get("outer").unwrap(), &json!({"inner": ["a,"]}));
    }

    #[test]
    fn test_unicode_escapes() {
        let parsed = parse_structured(r#"{"e": "caf\u00e9 \ud83d\ude00"}"#).unwrap();
        assert_eq!(parsed.string("e").unwrap(), "café 😀");
    }

    #[test]
    fn test_unquoted_list_elements() {
        let text = r#"{"answers": [yes, no, yes, yes], "reasoning": "r"}"#;
        let parsed = parse_structured(text).unwrap();
        assert_eq!(parsed.string_list("answers").unwrap(), vec!["yes", "no", "yes", "yes"]);

        let parsed = parse_structured("{\"objects\": [\n  red chair\n  oak table,\n]}").unwrap();
        assert_eq!(parsed.string_list("objects").unwrap(), vec!["red chair", "oak table"]);
    }

    #[test]
    fn test_members_separated_by_newlines() {
        let parsed = parse_structured("{\n \"updated_text\": \"x\"\n \"reasoning\": \"y\"\n}").unwrap();
        assert_eq!(parsed.string("updated_text").unwrap(), "x");
        assert_eq!(parsed.string("reasoning").unwrap(), "y");
    }

    #[test]
    fn test_unquoted_member_values_run_to_end_of_line() {
        let text = "{\n reasoning: the chair is centered   \n image_index: 2\n done: true story\n}";
        let parsed = parse_structured(text).unwrap();
        assert_eq!(parsed.string("reasoning").unwrap(), "the chair is centered");
        assert_eq!(parsed.integer("image_index").unwrap(), 2);
        assert_eq!(parsed.string("done").unwrap(), "true story");
    }

    #[test]
    fn test_triple_quoted_block() {
        let text = "{\n  story:\n    '''\n    First line.\n      Indented.\n    '''\n  title: '''One line'''\n}";
        let parsed = parse_structured(text).unwrap();
        assert_eq!(parsed.string("story").unwrap(), "First line.\n  Indented.");
        assert_eq!(parsed.string("title").unwrap(), "One line");
    }

    #[test]
    fn test_malformed_input_is_an_error() {
        for text in ["", "not json", "{\"a\": ", "{\"a\" 1}", "[1, 2]", "\"str\""] {
            match parse_structured(text) {
                Err(MpxError::MalformedResponse(_)) => {}
                other => panic!("expected malformed error for {:?}, got {:?}", text, other),
            }
        }
    }

    #[test]
    fn test_clean_json_round_trips() {
        let original = json!({
            "story": "Once upon a time",
            "characters": ["Ana", "Bo"],
            "count": 3,
            "meta": {"genre": "fable"}
        });
        let parsed = parse_structured(&original.to_string()).unwrap();
        assert_eq!(Value::Object(parsed.into_map()), original);
    }

    #[test]
    fn test_require_reports_missing_keys() {
        let parsed = parse_structured(r#"{"reasoning": "r"}"#).unwrap();
        assert!(parsed.require(&["reasoning"]).is_ok());
        let err = parsed.require(&["updated_text", "reasoning"]).unwrap_err();
        assert!(err.to_string().contains("updated_text"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_accessor_coercions() {
        let parsed =
            parse_structured(r#"{"idx": "2", "f": 3.0, "one": "solo", "objs": [{"n": 1}]}"#)
                .unwrap();
        assert_eq!(parsed.integer("idx").unwrap(), 2);
        assert_eq!(parsed.integer("f").unwrap(), 3);
        assert_eq!(parsed.string_list("one").unwrap(), vec!["solo"]);
        assert_eq!(parsed.string_list("objs").unwrap(), vec!["{\"n\":1}"]);
        assert!(parsed.string("objs").is_err());
    }
}
