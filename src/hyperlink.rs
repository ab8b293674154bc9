//! Extracts a readable address, a map link and optional coordinates from a
//! single spreadsheet cell.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};

static HYPERLINK_FORMULA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)^=?\s*HYPERLINK\s*\(\s*["']+(.*?)["']+\s*[;,]\s*["']+(.*?)["']+\s*\)$"#)
        .expect("hyperlink formula pattern")
});

static AT_COORDINATES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"@(-?\d+(?:\.\d+)?),\s*(-?\d+(?:\.\d+)?)").expect("@lat,lng pattern")
});

static QUERY_COORDINATES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[?&](?:q|query)=(-?\d+(?:\.\d+)?)(?:,|%2C)\s*(-?\d+(?:\.\d+)?)")
        .expect("q=lat,lng pattern")
});

static COORDINATE_PAIR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*-?\d+(?:\.\d+)?\s*,\s*-?\d+(?:\.\d+)?\s*$").expect("coordinate pair pattern")
});

static TRAILING_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""([^"]+)"\s*\)$"#).expect("trailing label pattern"));

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedAddress {
    pub address: String,
    pub link: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

impl ResolvedAddress {
    fn plain(address: String) -> Self {
        Self {
            address,
            ..Self::default()
        }
    }

    pub fn has_coordinates(&self) -> bool {
        self.lat.is_some() && self.lng.is_some()
    }
}

pub fn resolve_cell(value: &str) -> ResolvedAddress {
    let raw = value.trim();
    if raw.is_empty() {
        return ResolvedAddress::default();
    }

    if let Some(captures) = HYPERLINK_FORMULA.captures(raw) {
        let link = unescape_quotes(&captures[1]);
        let address = unescape_quotes(&captures[2]);
        let (lat, lng) = split_coordinates(extract_coordinates(&link));
        return ResolvedAddress {
            address,
            link: Some(link).filter(|l| !l.is_empty()),
            lat,
            lng,
        };
    }

    let cleaned = clean_text(raw);
    if is_map_url(&cleaned) {
        let (lat, lng) = split_coordinates(extract_coordinates(&cleaned));
        let address = extract_query_address(&cleaned).unwrap_or_else(|| cleaned.clone());
        return ResolvedAddress {
            address,
            link: Some(cleaned),
            lat,
            lng,
        };
    }

    ResolvedAddress::plain(cleaned)
}

/// Pulls `@lat,lng` or `q=lat,lng` out of a map URL.
pub fn extract_coordinates(link: &str) -> Option<(f64, f64)> {
    let captures = AT_COORDINATES
        .captures(link)
        .or_else(|| QUERY_COORDINATES.captures(link))?;
    let lat = captures[1].parse::<f64>().ok()?;
    let lng = captures[2].parse::<f64>().ok()?;
    if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng) {
        Some((lat, lng))
    } else {
        None
    }
}

/// Reads a bare `lat,lng` pair, as found in dedicated coordinate columns.
pub fn parse_coordinate_pair(text: &str) -> Option<(f64, f64)> {
    if !COORDINATE_PAIR.is_match(text) {
        return None;
    }
    let (lat, lng) = text.split_once(',')?;
    let lat = lat.trim().parse::<f64>().ok()?;
    let lng = lng.trim().parse::<f64>().ok()?;
    ((-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng)).then_some((lat, lng))
}

/// Best-effort cleanup of formula debris around a plain label.
pub fn clean_text(raw: &str) -> String {
    if let Some(captures) = TRAILING_LABEL.captures(raw) {
        let label = captures[1].trim();
        if !label.is_empty() {
            return label.to_string();
        }
    }

    if raw.starts_with('=') {
        return raw
            .chars()
            .filter(|c| !matches!(c, '=' | '"' | '(' | ')'))
            .collect::<String>()
            .trim()
            .to_string();
    }

    raw.trim().trim_matches('"').trim().to_string()
}

fn is_map_url(candidate: &str) -> bool {
    let lowered = candidate.to_ascii_lowercase();
    if !(lowered.starts_with("http://") || lowered.starts_with("https://")) {
        return false;
    }
    match Url::parse(candidate) {
        Ok(url) => {
            let host = url.host_str().unwrap_or_default();
            host.contains("maps") || host == "goo.gl" || url.path().starts_with("/maps")
        }
        Err(_) => lowered.contains("google.com/maps") || lowered.contains("maps.app.goo.gl"),
    }
}

fn extract_query_address(link: &str) -> Option<String> {
    let url = Url::parse(link).ok()?;
    let query = url
        .query_pairs()
        .find(|(key, _)| key == "query")
        .or_else(|| url.query_pairs().find(|(key, _)| key == "q"))
        .map(|(_, value)| value.trim().to_string())?;
    if query.is_empty() || COORDINATE_PAIR.is_match(&query) {
        None
    } else {
        Some(query)
    }
}

fn unescape_quotes(value: &str) -> String {
    value.replace("\"\"", "\"").trim().to_string()
}

fn split_coordinates(pair: Option<(f64, f64)>) -> (Option<f64>, Option<f64>) {
    match pair {
        Some((lat, lng)) => (Some(lat), Some(lng)),
        None => (None, None),
    }
}
