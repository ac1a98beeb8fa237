//! Two-stage parser for structured payloads produced by the model.
//!
//! Stage one is strict JSON, optionally wrapped in a markdown code fence.
//! Stage two repairs the common ways a model breaks JSON (prose around the
//! object, trailing commas, truncated braces and brackets) and parses the
//! result strictly again, so nested values keep their shape. A payload that
//! still does not parse is an error, never a partial object.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("empty payload")]
    Empty,
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no JSON object found in payload")]
    NothingRecovered,
    #[error("expected a JSON object")]
    NotAnObject,
}

/// Strict stage: the whole payload (after fence stripping) must be JSON.
pub fn parse_strict(raw: &str) -> Result<Value, ParseError> {
    let body = strip_fence(raw.trim());
    if body.is_empty() {
        return Err(ParseError::Empty);
    }
    Ok(serde_json::from_str(body)?)
}

/// Lenient stage: repair the first object in the payload, then parse it.
pub fn parse_lenient(raw: &str) -> Result<Value, ParseError> {
    let body = strip_fence(raw.trim());
    if body.is_empty() {
        return Err(ParseError::Empty);
    }
    let repaired = repair_object(body).ok_or(ParseError::NothingRecovered)?;
    Ok(serde_json::from_str(&repaired)?)
}

/// Strict first, lenient on failure. The strict error is reported when both fail.
pub fn parse_structured(raw: &str) -> Result<Value, ParseError> {
    match parse_strict(raw) {
        Ok(v) => Ok(v),
        Err(ParseError::Empty) => Err(ParseError::Empty),
        Err(strict_err) => {
            tracing::debug!(error = %strict_err, "strict parse failed, trying repair");
            parse_lenient(raw).map_err(|_| strict_err)
        }
    }
}

fn strip_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else { return s };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Cuts the first `{ ... }` out of `body`, closing whatever the model left
/// open and dropping trailing commas. Text after the object is ignored.
fn repair_object(body: &str) -> Option<String> {
    let start = body.find('{')?;
    let mut out = String::with_capacity(body.len() - start + 4);
    let mut closers: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in body[start..].chars() {
        out.push(c);
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => closers.push('}'),
            '[' => closers.push(']'),
            '}' | ']' => {
                closers.pop();
                if closers.is_empty() {
                    break;
                }
            }
            _ => {}
        }
    }

    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }
    while let Some(c) = closers.pop() {
        out.push(c);
    }
    Some(trailing_commas().replace_all(&out, |cap: &Captures| match cap.get(1) {
        Some(close) => close.as_str().to_string(),
        None => cap[0].to_string(),
    }).into_owned())
}

/// Matches either a whole string literal (kept as is) or a comma directly
/// before a closing brace or bracket (group 1 keeps the closer).
fn trailing_commas() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""(?:[^"\\]|\\.)*"|,(\s*[}\]])"#).expect("static regex"))
}
