mod ai;
mod config;
mod enrichment;
mod errors;
mod geocoding;
mod headers;
mod hyperlink;
mod ingestion;
mod pipeline;
mod prompt;
mod records;
mod region;
mod registry;
mod reply;
mod settings;

use once_cell::sync::OnceCell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use ai::{GroundedModel, GroundedReply, HttpGroundedModel, ModelService};
pub use config::{AppConfig, PublicAppConfig};
pub use enrichment::{
    merge_contact, Enricher, EnrichmentProgress, ProgressCallback, ProgressState, RetryPolicy,
    TaskState,
};
pub use errors::{AppError, AppResult};
pub use geocoding::{AddressComponent, GeocodeResult, Geocoder, HttpGeocoder};
pub use headers::{locate_header_row, normalize_header, Field, HeaderMap, HEADER_SCAN_ROWS};
pub use hyperlink::{extract_coordinates, parse_coordinate_pair, resolve_cell, ResolvedAddress};
pub use ingestion::{
    ingest, ingest_csv, ingest_excel, rows_from_grid, SpreadsheetKind, UploadedFile,
};
pub use pipeline::{PipelineHealth, ProspectPipeline};
pub use prompt::build_prompt;
pub use records::{
    EnrichedRecord, RawRow, OTHER_CATEGORY, UNKNOWN_CITY, UNKNOWN_COMPANY, UNKNOWN_STATE,
};
pub use region::Region;
pub use registry::{company_tax_id, HttpTaxIdLookup, RegistryRecord, TaxIdLookup};
pub use reply::{normalize_categories, parse_reply, AiAnswer};
pub use settings::EnrichmentSettings;

/// Installs the fmt subscriber once; later calls are no-ops.
pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,prospect_mapper=debug"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init();
    });
}
