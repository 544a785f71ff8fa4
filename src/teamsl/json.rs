//! JSON parsing utilities for the TeamSL REST endpoints.

use crate::teamsl::adapters::AdapterKind;
use crate::teamsl::errors::UpstreamError;
use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Attempt to parse JSON and, on failure, include a contextual snippet of the
/// line where the error occurred along with the serde path and type mismatch.
pub fn parse_json_with_context<T: DeserializeOwned>(body: &str) -> Result<T> {
    let jd = &mut serde_json::Deserializer::from_str(body);
    match serde_path_to_error::deserialize(jd) {
        Ok(value) => Ok(value),
        Err(err) => {
            let inner_err = err.inner();
            let (line, column) = (inner_err.line(), inner_err.column());
            let path = err.path().to_string();

            let msg = inner_err.to_string();
            let loc = format!(" at line {line} column {column}");
            let msg_without_loc = msg.strip_suffix(&loc).unwrap_or(&msg);

            let type_info = parse_type_mismatch(msg_without_loc);
            let snippet = build_error_snippet(body, line, column, 20);

            let mut final_err = String::new();
            if !path.is_empty() && path != "." {
                final_err.push_str(&format!("at path '{path}': "));
            }
            final_err.push_str(&format!("{type_info} (line {line} col {column})\n{snippet}"));

            Err(anyhow::anyhow!(final_err))
        }
    }
}

/// Turns "invalid type: null, expected a string" into "expected a string, got null".
fn parse_type_mismatch(error_msg: &str) -> String {
    if let Some(invalid_start) = error_msg.find("invalid type: ") {
        let after_prefix = &error_msg[invalid_start + "invalid type: ".len()..];

        if let Some(comma_pos) = after_prefix.find(", expected ") {
            let actual_type = &after_prefix[..comma_pos];
            let expected_type = after_prefix[comma_pos + ", expected ".len()..]
                .split(" at line ")
                .next()
                .unwrap_or_default()
                .trim();

            return format!("expected {expected_type}, got {actual_type}");
        }
    }

    if error_msg.starts_with("missing field ") {
        return error_msg.split(" at line ").next().unwrap_or(error_msg).to_string();
    }

    if error_msg.starts_with("expected ")
        && let Some(expected_part) = error_msg.split(" at line ").next()
    {
        return expected_part.to_string();
    }

    error_msg.to_string()
}

fn build_error_snippet(body: &str, line: usize, column: usize, context_len: usize) -> String {
    let target_line = body.lines().nth(line.saturating_sub(1)).unwrap_or("");
    if target_line.is_empty() {
        return "(empty line)".to_string();
    }

    // Work in chars; upstream bodies are full of umlauts.
    let chars: Vec<char> = target_line.chars().collect();
    let error_idx = column.saturating_sub(1).min(chars.len());

    let half_len = context_len / 2;
    let start = error_idx.saturating_sub(half_len);
    let end = (error_idx + half_len).min(chars.len());

    let slice: String = chars[start..end].iter().collect();
    let indicator = " ".repeat(error_idx - start) + "^";

    format!("...{slice}...\n   {indicator}")
}

/// Status and message of a REST envelope; `data` is parsed separately.
#[derive(Debug, Deserialize)]
struct EnvelopeHead {
    status: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(bound = "T: DeserializeOwned")]
struct Envelope<T> {
    data: Option<T>,
}

/// The success sentinel is `0`, sent either as a number or as a string.
fn is_success_status(status: &Value) -> bool {
    match status {
        Value::Number(n) => n.as_i64() == Some(0),
        Value::String(s) => s.trim() == "0",
        _ => false,
    }
}

/// Validate a versioned REST envelope and deserialize its `data` member.
///
/// A non-zero status or a missing `data` is a format error carrying the
/// upstream `message`, so it is never mistaken for an empty result.
pub fn parse_envelope<T: DeserializeOwned>(
    adapter: AdapterKind,
    body: &str,
) -> Result<T, UpstreamError> {
    let head: EnvelopeHead = parse_json_with_context(body)
        .map_err(|e| UpstreamError::format(adapter, format!("invalid envelope: {e}")))?;

    let message = head.message.unwrap_or_default();
    match head.status {
        Some(status) if is_success_status(&status) => {}
        Some(status) => {
            return Err(UpstreamError::format(
                adapter,
                format!("envelope status {status}: {message}"),
            ));
        }
        None => {
            return Err(UpstreamError::format(adapter, "envelope has no status"));
        }
    }

    let envelope: Envelope<T> = parse_json_with_context(body)
        .map_err(|e| UpstreamError::format(adapter, e.to_string()))?;
    envelope.data.ok_or_else(|| {
        UpstreamError::format(adapter, format!("envelope has no data: {message}"))
    })
}

/// Accepts a string, a number or null; numbers are rendered as text.
pub fn lenient_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Accepts a non-negative integer, a numeric string or null (as zero).
pub fn lenient_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| D::Error::custom(format!("expected a count, got {n}"))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("expected a count, got \"{s}\""))),
        Some(other) => Err(D::Error::custom(format!("expected a count, got {other}"))),
    }
}
