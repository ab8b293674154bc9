use std::fmt;

use serde::{Deserialize, Serialize};

use crate::headers::normalize_header;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Region {
    North,
    Northeast,
    #[serde(rename = "Central-West")]
    CentralWest,
    Southeast,
    South,
    #[default]
    Undefined,
}

const NORTH: &[&str] = &["AC", "AP", "AM", "PA", "RO", "RR", "TO"];
const NORTHEAST: &[&str] = &["MA", "PI", "CE", "RN", "PB", "PE", "AL", "SE", "BA"];
const CENTRAL_WEST: &[&str] = &["GO", "MT", "MS", "DF"];
const SOUTHEAST: &[&str] = &["ES", "MG", "RJ", "SP"];
const SOUTH: &[&str] = &["PR", "SC", "RS"];

impl Region {
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::North => "North",
            Region::Northeast => "Northeast",
            Region::CentralWest => "Central-West",
            Region::Southeast => "Southeast",
            Region::South => "South",
            Region::Undefined => "Undefined",
        }
    }

    pub fn is_defined(&self) -> bool {
        !matches!(self, Region::Undefined)
    }

    /// Looks up a two-letter state code.
    pub fn from_state(code: &str) -> Self {
        let code = code.trim().to_ascii_uppercase();
        if NORTH.contains(&code.as_str()) {
            Region::North
        } else if NORTHEAST.contains(&code.as_str()) {
            Region::Northeast
        } else if CENTRAL_WEST.contains(&code.as_str()) {
            Region::CentralWest
        } else if SOUTHEAST.contains(&code.as_str()) {
            Region::Southeast
        } else if SOUTH.contains(&code.as_str()) {
            Region::South
        } else {
            Region::Undefined
        }
    }

    /// Classifies by postal-code prefix; needs at least five digits.
    ///
    /// First digit 0-3 is Southeast, 4-5 Northeast, 8-9 South. Prefix 6 splits
    /// at 60-65 (Northeast) versus 66-69 (North); prefix 7 sends 76-77 North and
    /// the rest Central-West.
    pub fn from_postal_code(postal_code: &str) -> Self {
        let digits: String = postal_code.chars().filter(char::is_ascii_digit).collect();
        if digits.len() < 5 {
            return Region::Undefined;
        }
        let Ok(range) = digits[..2].parse::<u8>() else {
            return Region::Undefined;
        };
        match range / 10 {
            0..=3 => Region::Southeast,
            4 | 5 => Region::Northeast,
            6 if range <= 65 => Region::Northeast,
            6 => Region::North,
            7 if matches!(range, 76 | 77) => Region::North,
            7 => Region::CentralWest,
            8 | 9 => Region::South,
            _ => Region::Undefined,
        }
    }

    /// Accepts the English or Portuguese region label a model may echo back.
    pub fn parse_label(label: &str) -> Self {
        match normalize_header(label).replace(['-', '_'], " ").as_str() {
            "north" | "norte" => Region::North,
            "northeast" | "nordeste" => Region::Northeast,
            "central west" | "centro oeste" | "midwest" => Region::CentralWest,
            "southeast" | "sudeste" => Region::Southeast,
            "south" | "sul" => Region::South,
            _ => Region::Undefined,
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
