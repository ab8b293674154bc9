//! Lenient decoding of the model's JSON answer.

use serde::Deserialize;
use serde_json::Value;

use crate::errors::{AppError, AppResult};
use crate::headers::normalize_header;
use crate::records::OTHER_CATEGORY;
use crate::region::Region;

const UNKNOWN_MARKERS: &[&str] = &[
    "unknown",
    "desconhecido",
    "desconhecida",
    "null",
    "n/a",
    "none",
    "br",
    "indefinido",
    "undefined",
];

/// Shape the model is asked for; every field optional and loosely typed.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AiPayload {
    #[serde(alias = "categories")]
    category: Option<Value>,
    region: Option<Value>,
    state: Option<Value>,
    city: Option<Value>,
    #[serde(alias = "latitude")]
    lat: Option<Value>,
    #[serde(alias = "longitude")]
    lng: Option<Value>,
    #[serde(alias = "address", alias = "formattedAddress")]
    clean_address: Option<Value>,
    phone: Option<Value>,
    website: Option<Value>,
}

/// Validated answer. Sentinel strings ("Unknown", "null", ...) are dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AiAnswer {
    pub categories: Option<Value>,
    pub region: Region,
    pub state: Option<String>,
    pub city: Option<String>,
    pub coordinates: Option<(f64, f64)>,
    pub clean_address: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
}

impl From<AiPayload> for AiAnswer {
    fn from(payload: AiPayload) -> Self {
        let lat = payload.lat.as_ref().and_then(as_number);
        let lng = payload.lng.as_ref().and_then(as_number);
        let coordinates = match (lat, lng) {
            (Some(lat), Some(lng)) if !(lat == 0.0 && lng == 0.0) => Some((lat, lng)),
            _ => None,
        };
        Self {
            categories: payload.category,
            region: payload
                .region
                .as_ref()
                .and_then(as_text)
                .map(|label| Region::parse_label(&label))
                .unwrap_or_default(),
            state: payload
                .state
                .as_ref()
                .and_then(known_text)
                .map(|state| state.to_uppercase()),
            city: payload.city.as_ref().and_then(known_text),
            coordinates,
            clean_address: payload.clean_address.as_ref().and_then(known_text),
            phone: payload.phone.as_ref().and_then(known_text),
            website: payload.website.as_ref().and_then(known_text),
        }
    }
}

/// Strips code fences, then parses the whole text or, failing that, the first
/// balanced `{...}` block inside it.
pub fn parse_reply(text: &str) -> AppResult<AiAnswer> {
    let stripped = strip_fences(text);
    if let Ok(payload) = serde_json::from_str::<AiPayload>(&stripped) {
        return Ok(payload.into());
    }

    let candidate = first_object(&stripped)
        .ok_or_else(|| AppError::Parse(preview(&stripped)))?;
    serde_json::from_str::<AiPayload>(candidate)
        .map(AiAnswer::from)
        .map_err(|err| AppError::Parse(format!("{err}: {}", preview(candidate))))
}

/// Maps whatever the model returned for the category onto the caller's
/// vocabulary, matching case- and accent-insensitively.
///
/// Accepts a bare string or an array. Unmatched tags are dropped; an empty
/// vocabulary keeps the model's own tags. Never returns an empty list.
pub fn normalize_categories(raw: Option<&Value>, vocabulary: &[String]) -> Vec<String> {
    let tags: Vec<String> = match raw {
        Some(Value::String(tag)) => vec![tag.clone()],
        Some(Value::Array(items)) => items.iter().filter_map(as_text).collect(),
        _ => Vec::new(),
    };

    let mut categories: Vec<String> = Vec::new();
    for tag in tags {
        let key = normalize_header(&tag);
        if key.is_empty() {
            continue;
        }
        let resolved = if is_other(&key) {
            Some(OTHER_CATEGORY.to_string())
        } else if vocabulary.is_empty() {
            Some(tag.trim().to_string())
        } else {
            vocabulary
                .iter()
                .find(|entry| normalize_header(entry) == key)
                .map(|entry| entry.trim().to_string())
        };
        if let Some(category) = resolved {
            if !categories.contains(&category) {
                categories.push(category);
            }
        }
    }

    if categories.len() > 1 {
        categories.retain(|category| category != OTHER_CATEGORY);
    }
    if categories.is_empty() {
        categories.push(OTHER_CATEGORY.to_string());
    }
    categories
}

fn is_other(key: &str) -> bool {
    matches!(key, "other" | "outros" | "outro" | "others")
}

fn strip_fences(text: &str) -> String {
    text.replace("```json", "")
        .replace("```JSON", "")
        .replace("```", "")
        .trim()
        .to_string()
}

/// First balanced object, ignoring braces inside string literals.
fn first_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
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
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn as_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn known_text(value: &Value) -> Option<String> {
    as_text(value).filter(|text| !UNKNOWN_MARKERS.contains(&normalize_header(text).as_str()))
}

fn as_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

fn preview(text: &str) -> String {
    text.chars().take(80).collect()
}
