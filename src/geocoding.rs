use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::errors::AppResult;

const GEOCODE_PATH: &str = "/maps/api/geocode/json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressComponent {
    pub long_name: String,
    pub short_name: String,
    #[serde(default)]
    pub types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeocodeResult {
    pub lat: f64,
    pub lng: f64,
    pub formatted_address: Option<String>,
    pub components: Vec<AddressComponent>,
}

impl GeocodeResult {
    /// Short name of the first-level administrative area (the state code).
    pub fn state_code(&self) -> Option<&str> {
        self.component(&["administrative_area_level_1"])
            .map(|component| component.short_name.as_str())
    }

    pub fn city(&self) -> Option<&str> {
        self.component(&["administrative_area_level_2", "locality"])
            .map(|component| component.long_name.as_str())
    }

    fn component(&self, kinds: &[&str]) -> Option<&AddressComponent> {
        self.components.iter().find(|component| {
            component
                .types
                .iter()
                .any(|kind| kinds.contains(&kind.as_str()))
        })
    }
}

/// Free-text address lookup. `None` means "no information", never failure.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, address: &str, credential: &SecretString) -> Option<GeocodeResult>;
}

pub struct HttpGeocoder {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpGeocoder {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        Self::with_base_url(
            &config.geocoding_api_base,
            Duration::from_millis(config.geocode_timeout_ms),
        )
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> AppResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: format!("{}{GEOCODE_PATH}", base_url.trim_end_matches('/')),
        })
    }

    async fn request(&self, address: &str, credential: &SecretString) -> AppResult<GeocodeResponse> {
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[("address", address), ("key", credential.expose_secret())])
            .send()
            .await?;
        Ok(response.json().await?)
    }
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<ResponseResult>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseResult {
    geometry: ResponseGeometry,
    formatted_address: Option<String>,
    #[serde(default)]
    address_components: Vec<AddressComponent>,
}

#[derive(Debug, Deserialize)]
struct ResponseGeometry {
    location: ResponseLocation,
}

#[derive(Debug, Deserialize)]
struct ResponseLocation {
    lat: f64,
    lng: f64,
}

#[async_trait]
impl Geocoder for HttpGeocoder {
    async fn geocode(&self, address: &str, credential: &SecretString) -> Option<GeocodeResult> {
        if address.trim().is_empty() || credential.expose_secret().trim().is_empty() {
            debug!("geocoding skipped: missing address or credential");
            return None;
        }

        let parsed = match self.request(address, credential).await {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(%err, "geocoding request failed");
                return None;
            }
        };

        if parsed.status != "OK" {
            debug!(
                status = %parsed.status,
                error = parsed.error_message.as_deref().unwrap_or_default(),
                "geocoder returned no usable status"
            );
            return None;
        }

        let first = parsed.results.into_iter().next()?;
        Some(GeocodeResult {
            lat: first.geometry.location.lat,
            lng: first.geometry.location.lng,
            formatted_address: first.formatted_address,
            components: first.address_components,
        })
    }
}
