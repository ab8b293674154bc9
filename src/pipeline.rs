use std::path::Path;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::info;

use crate::ai::ModelService;
use crate::config::{AppConfig, PublicAppConfig};
use crate::enrichment::{Enricher, ProgressCallback};
use crate::errors::{AppError, AppResult};
use crate::geocoding::{Geocoder, HttpGeocoder};
use crate::ingestion::{ingest, UploadedFile};
use crate::records::{EnrichedRecord, RawRow};
use crate::registry::HttpTaxIdLookup;
use crate::settings::EnrichmentSettings;

#[derive(Debug, Serialize)]
pub struct PipelineHealth {
    pub config: PublicAppConfig,
    pub settings: EnrichmentSettings,
}

/// File-to-records entry point: ingest a spreadsheet, then enrich its rows.
pub struct ProspectPipeline {
    enricher: Enricher,
    geocoding_key: Option<SecretString>,
    config: AppConfig,
}

impl ProspectPipeline {
    /// Wires the HTTP model, geocoding and registry clients from configuration.
    pub fn from_config(config: AppConfig) -> AppResult<Self> {
        let model = ModelService::new(&config)?;
        let geocoder: Arc<dyn Geocoder> = Arc::new(HttpGeocoder::new(&config)?);
        let settings = EnrichmentSettings::from_config(&config);
        let mut enricher = Enricher::new(model, geocoder, settings);
        if config.tax_id_lookup_enabled {
            enricher = enricher.with_tax_id_lookup(Arc::new(HttpTaxIdLookup::new(&config)?));
        }
        Ok(Self {
            enricher,
            geocoding_key: config.google_maps_api_key.clone(),
            config,
        })
    }

    pub fn with_enricher(config: AppConfig, enricher: Enricher) -> Self {
        Self {
            enricher,
            geocoding_key: config.google_maps_api_key.clone(),
            config,
        }
    }

    pub fn health(&self) -> PipelineHealth {
        PipelineHealth {
            config: self.config.public_profile(),
            settings: self.enricher.settings().clone(),
        }
    }

    pub async fn ingest_file(&self, path: impl AsRef<Path>) -> AppResult<Vec<RawRow>> {
        let file = UploadedFile::from_path(path).await?;
        ingest(&file).await
    }

    pub async fn enrich(
        &self,
        rows: Vec<RawRow>,
        owner_id: &str,
        vocabulary: &[String],
        progress: Option<ProgressCallback>,
    ) -> AppResult<Vec<EnrichedRecord>> {
        let credential = self.geocoding_credential()?;
        self.enricher
            .enrich(rows, owner_id, credential, vocabulary, progress)
            .await
    }

    /// Reads the whole file before any model call; a bad file fails fast.
    pub async fn import_file(
        &self,
        path: impl AsRef<Path>,
        owner_id: &str,
        vocabulary: &[String],
        progress: Option<ProgressCallback>,
    ) -> AppResult<Vec<EnrichedRecord>> {
        self.geocoding_credential()?;
        let path = path.as_ref();
        let rows = self.ingest_file(path).await?;
        let records = self.enrich(rows, owner_id, vocabulary, progress).await?;
        info!(file = %path.display(), records = records.len(), "import finished");
        Ok(records)
    }

    fn geocoding_credential(&self) -> AppResult<&SecretString> {
        self.geocoding_key
            .as_ref()
            .filter(|key| !key.expose_secret().trim().is_empty())
            .ok_or_else(|| AppError::Config("GOOGLE_MAPS_API_KEY is not configured".into()))
    }
}
