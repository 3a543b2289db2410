//! Alias-fallback normalization of course-like JSON into [`DisplayCourse`].

use coursecat_core::{DisplayCourse, Fee, FALLBACK_COURSE_NAME};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub const CRATE_NAME: &str = "coursecat-normalize";

/// Envelope keys that may carry the course array, checked in order.
pub const ENVELOPE_KEYS: [&str; 3] = ["data", "courses", "results"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShapeError {
    #[error("response is neither a course array nor an object with one of data/courses/results")]
    Unrecognized,
}

/// Pulls a typed value out of one aliased field; `None` means "try the next key".
type Extractor<T> = fn(&JsonValue) -> Option<T>;

const NAME_KEYS: &[(&str, Extractor<String>)] = &[
    ("name", label),
    ("title", label),
    ("programName", label),
];

const UNIVERSITY_KEYS: &[(&str, Extractor<String>)] = &[
    ("universityName", label),
    ("university", label_or_named_object),
    ("institution", label_or_named_object),
];

const COUNTRY_KEYS: &[(&str, Extractor<String>)] = &[
    ("country", label_or_named_object),
    ("countryName", label),
];

const CATEGORY_KEYS: &[(&str, Extractor<String>)] = &[
    ("fieldOfStudy", label),
    ("category", label_or_named_object),
    ("discipline", label),
];

const FEE_KEYS: &[(&str, Extractor<Fee>)] = &[
    ("tuition", fee),
    ("fee", fee),
    ("price", fee),
];

fn first_of<T>(raw: &JsonValue, chain: &[(&str, Extractor<T>)]) -> Option<T> {
    chain
        .iter()
        .find_map(|(key, extract)| raw.get(*key).and_then(extract))
}

fn text_or_none(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn label(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => text_or_none(s),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Some APIs nest the label, e.g. `"university": {"name": "ETH Zurich"}`.
fn label_or_named_object(value: &JsonValue) -> Option<String> {
    label(value).or_else(|| value.get("name").and_then(label))
}

fn fee(value: &JsonValue) -> Option<Fee> {
    match value {
        JsonValue::Null => None,
        JsonValue::Number(n) => n.as_f64().map(Fee::from_amount),
        JsonValue::String(s) => Some(Fee::Text(s.clone())),
        other => Some(Fee::Text(other.to_string())),
    }
}

/// Map one course-like object onto the display shape. Never fails: missing
/// fields are omitted and a missing name becomes [`FALLBACK_COURSE_NAME`].
pub fn normalize(raw: &JsonValue) -> DisplayCourse {
    DisplayCourse {
        name: first_of(raw, NAME_KEYS).unwrap_or_else(|| FALLBACK_COURSE_NAME.to_string()),
        university: first_of(raw, UNIVERSITY_KEYS),
        country: first_of(raw, COUNTRY_KEYS),
        category: first_of(raw, CATEGORY_KEYS),
        fee: first_of(raw, FEE_KEYS),
    }
}

/// Locate the course array inside a response body.
pub fn extract_course_list(body: &JsonValue) -> Result<&[JsonValue], ShapeError> {
    if let Some(items) = body.as_array() {
        return Ok(items);
    }
    ENVELOPE_KEYS
        .iter()
        .find_map(|key| body.get(*key).and_then(JsonValue::as_array))
        .map(Vec::as_slice)
        .ok_or(ShapeError::Unrecognized)
}

/// Extract and normalize in one pass.
pub fn normalize_response(body: &JsonValue) -> Result<Vec<DisplayCourse>, ShapeError> {
    Ok(extract_course_list(body)?.iter().map(normalize).collect())
}
