//! Permissive decoding of the oracle's reply into a [`ComparisonResult`].

use regex::Regex;
use serde_json::{Map, Value};

use crate::model::ComparisonResult;

pub const MISSING_REASON_PLACEHOLDER: &str = "model response did not include reason";

#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePayload {
    /// A content part that already carries a JSON object.
    Structured(Map<String, Value>),
    Text(String),
    Empty,
}

/// Looks at the first candidate only. A structured part wins over text.
pub fn extract_payload(response: &Value) -> ResponsePayload {
    let parts = response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array);

    let Some(parts) = parts else {
        return ResponsePayload::Empty;
    };

    let structured = parts
        .iter()
        .filter(|part| part.get("text").is_none())
        .find_map(|part| part.get("json").and_then(Value::as_object));
    if let Some(object) = structured {
        return ResponsePayload::Structured(object.clone());
    }

    parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .map(str::trim)
        .find(|text| !text.is_empty())
        .map(|text| ResponsePayload::Text(text.to_string()))
        .unwrap_or(ResponsePayload::Empty)
}

fn strip_json_fence(text: &str) -> &str {
    let stripped = text.trim();
    if !stripped.starts_with("```") {
        return stripped;
    }

    let lines = stripped.lines().collect::<Vec<&str>>();
    if lines.len() >= 3 && lines[lines.len() - 1].trim() == "```" {
        let body_start = lines[0].len();
        let body_end = stripped.len() - lines[lines.len() - 1].len();
        return stripped[body_start..body_end].trim();
    }
    stripped
}

fn into_object(value: Value) -> Result<Map<String, Value>, String> {
    match value {
        Value::Object(object) => Ok(object),
        Value::Array(items) => match items.into_iter().next() {
            Some(Value::Object(object)) => Ok(object),
            _ => Err("model response JSON must be an object".to_string()),
        },
        _ => Err("model response JSON must be an object".to_string()),
    }
}

/// Strict JSON, then the outermost brace span, then a field-by-field regex
/// scrub that needs at least a `match` value.
pub fn parse_model_json(text: &str) -> Result<Map<String, Value>, String> {
    let cleaned = strip_json_fence(text);

    let first_error = match serde_json::from_str::<Value>(cleaned) {
        Ok(value) => return into_object(value),
        Err(error) => error.to_string(),
    };

    if let (Some(start), Some(end)) = (cleaned.find('{'), cleaned.rfind('}')) {
        if end > start {
            if let Ok(value) = serde_json::from_str::<Value>(&cleaned[start..=end]) {
                return into_object(value);
            }
        }
    }

    scrub_fields(cleaned)?.ok_or(first_error)
}

fn scrub_fields(text: &str) -> Result<Option<Map<String, Value>>, String> {
    let compile = |pattern: &str| Regex::new(pattern).map_err(|error| error.to_string());
    let match_pattern = compile(r#"(?i)["']?match["']?\s*:\s*(true|false)"#)?;
    let confidence_pattern = compile(r#"(?i)["']?confidence["']?\s*:\s*([0-9]*\.?[0-9]+)"#)?;
    let reason_pattern = compile(r#"(?i)["']?reason["']?\s*:\s*["']([^"']*)"#)?;

    let Some(matched) = match_pattern
        .captures(text)
        .and_then(|captures| captures.get(1))
    else {
        return Ok(None);
    };

    let mut partial = Map::new();
    partial.insert(
        "match".to_string(),
        Value::Bool(matched.as_str().eq_ignore_ascii_case("true")),
    );
    if let Some(confidence) = confidence_pattern
        .captures(text)
        .and_then(|captures| captures.get(1))
        .and_then(|value| value.as_str().parse::<f64>().ok())
        .and_then(serde_json::Number::from_f64)
    {
        partial.insert("confidence".to_string(), Value::Number(confidence));
    }
    if let Some(reason) = reason_pattern
        .captures(text)
        .and_then(|captures| captures.get(1))
    {
        partial.insert(
            "reason".to_string(),
            Value::String(reason.as_str().to_string()),
        );
    }

    Ok(Some(partial))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(object) => !object.is_empty(),
    }
}

fn coerce_match(value: &Value) -> Result<bool, String> {
    match value {
        Value::Bool(flag) => Ok(*flag),
        Value::String(text) => match text.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" => Ok(false),
            _ => Err("model response 'match' value is not boolean".to_string()),
        },
        other => Ok(truthy(other)),
    }
}

fn coerce_confidence(value: Option<&Value>) -> Result<Option<f64>, String> {
    let raw = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::Bool(flag)) => Some(if *flag { 1.0 } else { 0.0 }),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        Some(_) => None,
    };

    match raw {
        Some(confidence) if confidence.is_finite() => Ok(Some(confidence.clamp(0.0, 1.0))),
        _ => Err("model response 'confidence' is not a number".to_string()),
    }
}

fn coerce_reason(value: Option<&Value>) -> String {
    let text = match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    };
    if text.trim().is_empty() {
        MISSING_REASON_PLACEHOLDER.to_string()
    } else {
        text
    }
}

/// Case-insensitive keys; `match` is mandatory, confidence is clamped to
/// `[0, 1]`.
pub fn coerce_comparison(object: &Map<String, Value>) -> Result<ComparisonResult, String> {
    let normalized = object
        .iter()
        .map(|(key, value)| (key.to_lowercase(), value))
        .collect::<Vec<(String, &Value)>>();
    let field = |name: &str| {
        normalized
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| *value)
    };

    let matched = field("match")
        .ok_or_else(|| "model response missing 'match' field".to_string())
        .and_then(coerce_match)?;

    Ok(ComparisonResult {
        matched,
        reason: coerce_reason(field("reason")),
        confidence: coerce_confidence(field("confidence"))?,
    })
}
