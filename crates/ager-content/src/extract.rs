//! Structured payload extraction from free-form generative replies.
//!
//! Replies are supposed to be bare JSON but routinely arrive wrapped in
//! code fences or followed by prose. The extractor takes the first
//! balanced `{...}` object it can find and ignores everything else.

use crate::error::ContentError;
use serde_json::Value;

/// Remove a surrounding ``` fence (and its language tag line) if present.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let inner = trimmed.trim_matches('`');
    match inner.split_once('\n') {
        Some((_tag, rest)) => rest.trim(),
        None => inner.trim(),
    }
}

/// Return the first balanced brace-delimited object in `text`.
///
/// Scanning starts at the first `{`. Braces inside string literals do not
/// count towards nesting depth.
pub fn extract_json_object(text: &str) -> Result<&str, ContentError> {
    let body = strip_code_fence(text);
    let start = body.find('{').ok_or(ContentError::NoJsonFound)?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in body[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&body[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    Err(ContentError::NoJsonFound)
}

/// Extract and parse the first JSON object in `text`.
pub fn parse_json_object(text: &str) -> Result<Value, ContentError> {
    let candidate = extract_json_object(text)?;
    Ok(serde_json::from_str(candidate)?)
}
