use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::region::Region;

pub const OTHER_CATEGORY: &str = "Other";
pub const UNKNOWN_CITY: &str = "Unknown";
pub const UNKNOWN_STATE: &str = "Unknown";
pub const UNKNOWN_COMPANY: &str = "Unknown Company";

/// One spreadsheet record after header normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRow {
    pub company_name: String,
    pub owner_name: String,
    pub phone: String,
    pub address: String,
    pub map_link: Option<String>,
    pub explicit_lat: Option<f64>,
    pub explicit_lng: Option<f64>,
    pub tax_id: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
}

impl RawRow {
    /// No company, no address and no tax id: nothing to enrich.
    pub fn is_blank(&self) -> bool {
        let company = self.company_name.trim();
        (company.is_empty() || company == UNKNOWN_COMPANY)
            && self.address.trim().is_empty()
            && self.tax_id.as_deref().map_or(true, |id| id.trim().is_empty())
    }

    pub fn display_company(&self) -> &str {
        let company = self.company_name.trim();
        if company.is_empty() {
            UNKNOWN_COMPANY
        } else {
            company
        }
    }

    pub fn explicit_coordinates(&self) -> Option<(f64, f64)> {
        match (self.explicit_lat, self.explicit_lng) {
            (Some(lat), Some(lng)) if !(lat == 0.0 && lng == 0.0) => Some((lat, lng)),
            _ => None,
        }
    }

    /// Stable content hash used to reference a row in logs without its contents.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            self.company_name.as_str(),
            self.owner_name.as_str(),
            self.phone.as_str(),
            self.address.as_str(),
            self.map_link.as_deref().unwrap_or_default(),
            self.tax_id.as_deref().unwrap_or_default(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0x1f]);
        }
        if let Some((lat, lng)) = self.explicit_coordinates() {
            hasher.update(lat.to_le_bytes());
            hasher.update(lng.to_le_bytes());
        }
        let digest = STANDARD_NO_PAD.encode(hasher.finalize());
        digest.chars().take(12).collect()
    }
}

/// Geolocated, categorized output record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedRecord {
    pub id: String,
    pub owner_id: String,
    pub company_name: String,
    pub owner_name: String,
    pub contact: String,
    pub address: String,
    pub categories: Vec<String>,
    pub region: Region,
    pub state: String,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
    pub map_link: Option<String>,
}

impl EnrichedRecord {
    /// Degraded record for a row whose enrichment permanently failed.
    pub fn fallback(id: String, owner_id: &str, row: &RawRow) -> Self {
        Self {
            id,
            owner_id: owner_id.to_string(),
            company_name: row.display_company().to_string(),
            owner_name: row.owner_name.clone(),
            contact: row.phone.clone(),
            address: row.address.clone(),
            categories: vec![OTHER_CATEGORY.to_string()],
            region: Region::Undefined,
            state: UNKNOWN_STATE.to_string(),
            city: UNKNOWN_CITY.to_string(),
            latitude: 0.0,
            longitude: 0.0,
            map_link: row.map_link.clone(),
        }
    }

    pub fn has_coordinates(&self) -> bool {
        !(self.latitude == 0.0 && self.longitude == 0.0)
    }
}
