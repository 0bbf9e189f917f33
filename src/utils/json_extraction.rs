//! Extraction helpers for LLM responses.
//!
//! LLM answers often wrap the useful part in markdown fences or surround it
//! with prose. The planner needs the JSON value out of such a response, and
//! content generation needs the bare source code.
//!
//! # Example
//!
//! ```
//! use scene_forge::utils::json_extraction::{extract_json_from_response, strip_code_fences};
//!
//! let response = "Here you go: [{\"title\": \"Intro\"}] Enjoy!";
//! assert_eq!(extract_json_from_response(response).unwrap(), "[{\"title\": \"Intro\"}]");
//!
//! let code = "```python\nfrom manim import *\n```";
//! assert_eq!(strip_code_fences(code), "from manim import *");
//! ```

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Error type for JSON extraction failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JsonExtractionError {
    #[error("JSON appears truncated: {unclosed} unclosed delimiters")]
    Truncated { unclosed: usize },

    #[error("No JSON content found in response. Content starts with: '{content_preview}'")]
    NotFound { content_preview: String },
}

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)```").expect("Invalid regex for fenced blocks")
});

/// Returns the body of the first fenced code block, if any.
pub fn extract_from_code_block(content: &str) -> Option<String> {
    FENCED_BLOCK
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Removes markdown code fences and returns the trimmed code.
///
/// Handles a single fenced block surrounded by prose as well as stray fence
/// markers (e.g. a missing closing fence).
pub fn strip_code_fences(content: &str) -> String {
    if let Some(block) = extract_from_code_block(content) {
        return block;
    }

    content
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Finds the index of the delimiter closing the one at position 0.
///
/// String literals and escapes are skipped. Returns `None` if `s` does not
/// start with `open` or the delimiter is never closed.
pub fn find_matching_delimiter(s: &str, open: char, close: char) -> Option<usize> {
    if !s.starts_with(open) {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in s.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Counts delimiters left open at the end of `s`, ignoring string contents.
fn unclosed_delimiters(s: &str) -> usize {
    let mut stack = 0isize;
    let mut in_string = false;
    let mut escaped = false;
    for ch in s.chars() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' | '[' => stack += 1,
            '}' | ']' => stack -= 1,
            _ => {}
        }
    }
    stack.max(0) as usize
}

/// Extracts the first complete JSON array or object from `content`.
///
/// Strategies, in order: fenced code block, then the first `[` or `{`
/// (whichever comes first) matched to its closing delimiter.
pub fn extract_json_from_response(content: &str) -> Result<String, JsonExtractionError> {
    let candidate = extract_from_code_block(content).unwrap_or_else(|| content.trim().to_string());

    let start = candidate.find(['[', '{']);
    let Some(start) = start else {
        let trimmed = content.trim();
        let preview: String = trimmed.chars().take(50).collect();
        return Err(JsonExtractionError::NotFound {
            content_preview: preview,
        });
    };

    let rest = &candidate[start..];
    let (open, close) = if rest.starts_with('[') {
        ('[', ']')
    } else {
        ('{', '}')
    };

    match find_matching_delimiter(rest, open, close) {
        Some(end) => Ok(rest[..=end].to_string()),
        None => Err(JsonExtractionError::Truncated {
            unclosed: unclosed_delimiters(rest),
        }),
    }
}
