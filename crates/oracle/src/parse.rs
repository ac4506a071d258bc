//! Parsing structured content out of free-form oracle replies.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Why a reply could not be turned into structured data.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// No fenced block of the expected kind
    #[error("reply contains no fenced block")]
    NoBlock,

    /// The block is not valid JSON
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// Valid JSON, but not an object
    #[error("expected a JSON object")]
    NotAnObject,
}

fn json_block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Greedy on purpose: the block runs to the last fence in the reply.
    RE.get_or_init(|| Regex::new(r"(?s)```json(.*)```").expect("literal pattern is valid"))
}

fn code_block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```([A-Za-z0-9_+\-]*)[ \t]*\r?\n(.*?)```").expect("literal pattern is valid")
    })
}

/// Contents of the ```` ```json ```` block of a reply.
pub fn extract_json_block(reply: &str) -> Option<&str> {
    json_block_regex()
        .captures(reply)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Language tag and body of the first fenced code block.
pub fn extract_code_block(reply: &str) -> Option<(Option<&str>, &str)> {
    let captures = code_block_regex().captures(reply)?;
    let language = captures
        .get(1)
        .map(|m| m.as_str())
        .filter(|lang| !lang.is_empty());
    let body = captures.get(2)?.as_str();
    Some((language, body))
}

/// Parse the fenced JSON block of a reply into an object.
pub fn parse_fenced_object(reply: &str) -> Result<Map<String, Value>, ParseError> {
    let block = extract_json_block(reply).ok_or(ParseError::NoBlock)?;
    into_object(serde_json::from_str(block)?)
}

/// Parse a reply that should be JSON, raw or fenced.
pub fn parse_json_reply(reply: &str) -> Result<Map<String, Value>, ParseError> {
    match serde_json::from_str::<Value>(reply.trim()) {
        Ok(value) => into_object(value),
        Err(raw_error) => match extract_json_block(reply) {
            Some(block) => into_object(serde_json::from_str(block)?),
            None => Err(ParseError::InvalidJson(raw_error)),
        },
    }
}

fn into_object(value: Value) -> Result<Map<String, Value>, ParseError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ParseError::NotAnObject),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_block() {
        let reply = "Here you go:\n```json\n{\"a\": 1}\n```\nbye";
        assert_eq!(extract_json_block(reply).map(str::trim), Some("{\"a\": 1}"));
        assert!(extract_json_block("no fences").is_none());
    }

    #[test]
    fn test_parse_fenced_object_rejects_arrays() {
        let reply = "```json\n[1, 2]\n```";
        assert!(matches!(parse_fenced_object(reply), Err(ParseError::NotAnObject)));
        assert!(matches!(parse_fenced_object("{}"), Err(ParseError::NoBlock)));
        assert!(matches!(
            parse_fenced_object("```json\n{oops\n```"),
            Err(ParseError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_parse_json_reply_raw_and_fenced() {
        assert!(parse_json_reply(" {\"k\": true} ").unwrap().contains_key("k"));
        assert!(parse_json_reply("sure\n```json\n{\"k\": 2}\n```").unwrap().contains_key("k"));
        assert!(parse_json_reply("not json").is_err());
    }

    #[test]
    fn test_extract_code_block() {
        let reply = "Try this:\n```python\nimport pandas as pd\n```\nand ```more```";
        let (lang, body) = extract_code_block(reply).unwrap();

        assert_eq!(lang, Some("python"));
        assert_eq!(body, "import pandas as pd\n");
    }
}
