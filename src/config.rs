use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

const DEFAULT_AI_API_BASE: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_AI_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_GEOCODING_API_BASE: &str = "https://maps.googleapis.com";
const DEFAULT_TAX_ID_API_BASE: &str = "https://brasilapi.com.br";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub ai_api_base: String,
    pub ai_model: String,
    pub ai_timeout_ms: u64,
    pub geocoding_api_base: String,
    pub geocode_timeout_ms: u64,
    pub tax_id_api_base: String,
    pub tax_id_timeout_ms: u64,
    pub tax_id_lookup_enabled: bool,
    pub enrich_concurrency: usize,
    pub enrich_max_attempts: u32,
    pub enrich_base_backoff_ms: u64,
    pub enrich_courtesy_delay_ms: u64,
    pub gemini_api_key: Option<SecretString>,
    pub google_maps_api_key: Option<SecretString>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub ai_api_base: String,
    pub ai_model: String,
    pub ai_timeout_ms: u64,
    pub geocoding_api_base: String,
    pub geocode_timeout_ms: u64,
    pub tax_id_api_base: String,
    pub tax_id_timeout_ms: u64,
    pub tax_id_lookup_enabled: bool,
    pub enrich_concurrency: usize,
    pub enrich_max_attempts: u32,
    pub enrich_base_backoff_ms: u64,
    pub enrich_courtesy_delay_ms: u64,
    pub has_gemini_key: bool,
    pub has_google_maps_key: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            ai_api_base: parse_string("AI_API_BASE", DEFAULT_AI_API_BASE),
            ai_model: parse_string("AI_MODEL", DEFAULT_AI_MODEL),
            ai_timeout_ms: parse_u64("AI_TIMEOUT_MS", 30_000),
            geocoding_api_base: parse_string("GEOCODING_API_BASE", DEFAULT_GEOCODING_API_BASE),
            geocode_timeout_ms: parse_u64("GEOCODE_TIMEOUT_MS", 10_000),
            tax_id_api_base: parse_string("TAX_ID_API_BASE", DEFAULT_TAX_ID_API_BASE),
            tax_id_timeout_ms: parse_u64("TAX_ID_TIMEOUT_MS", 10_000),
            tax_id_lookup_enabled: parse_bool("TAX_ID_LOOKUP_ENABLED", true),
            enrich_concurrency: parse_usize("ENRICH_CONCURRENCY", 3),
            enrich_max_attempts: parse_u32("ENRICH_MAX_ATTEMPTS", 5),
            enrich_base_backoff_ms: parse_u64("ENRICH_BASE_BACKOFF_MS", 2_000),
            enrich_courtesy_delay_ms: parse_u64("ENRICH_COURTESY_DELAY_MS", 250),
            gemini_api_key: parse_secret("GEMINI_API_KEY"),
            google_maps_api_key: parse_secret("GOOGLE_MAPS_API_KEY"),
        }
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            ai_api_base: self.ai_api_base.clone(),
            ai_model: self.ai_model.clone(),
            ai_timeout_ms: self.ai_timeout_ms,
            geocoding_api_base: self.geocoding_api_base.clone(),
            geocode_timeout_ms: self.geocode_timeout_ms,
            tax_id_api_base: self.tax_id_api_base.clone(),
            tax_id_timeout_ms: self.tax_id_timeout_ms,
            tax_id_lookup_enabled: self.tax_id_lookup_enabled,
            enrich_concurrency: self.enrich_concurrency,
            enrich_max_attempts: self.enrich_max_attempts,
            enrich_base_backoff_ms: self.enrich_base_backoff_ms,
            enrich_courtesy_delay_ms: self.enrich_courtesy_delay_ms,
            has_gemini_key: self.gemini_api_key.is_some(),
            has_google_maps_key: self.google_maps_api_key.is_some(),
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_string(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .map(|v| v.trim().trim_end_matches('/').to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_secret(key: &str) -> Option<SecretString> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(SecretString::from)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}
