//! Turns ingested rows into enriched records under a bounded number of
//! concurrent model calls.
//!
//! Every non-blank row yields exactly one record. A row whose model call
//! keeps failing, or whose reply cannot be decoded, degrades to a fallback
//! record instead of failing the batch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

use crate::ai::{GroundedReply, ModelService};
use crate::errors::{AppError, AppResult};
use crate::geocoding::{GeocodeResult, Geocoder};
use crate::prompt::build_prompt;
use crate::records::{EnrichedRecord, RawRow, UNKNOWN_CITY, UNKNOWN_STATE};
use crate::region::Region;
use crate::registry::{company_tax_id, RegistryRecord, TaxIdLookup};
use crate::reply::{normalize_categories, parse_reply, AiAnswer};
use crate::settings::EnrichmentSettings;

const MAX_BACKOFF_EXPONENT: u32 = 6;

static POSTAL_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{5}-?\d{3}\b").expect("postal code pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EnrichmentProgress {
    pub processed: usize,
    pub total: usize,
}

pub type ProgressCallback = Arc<dyn Fn(EnrichmentProgress) + Send + Sync>;

/// Shared processed-row counter. The callback runs under the counter lock, so
/// observers see strictly increasing values even when tasks finish together.
pub struct ProgressState {
    processed: Mutex<usize>,
    total: usize,
    observer: Option<ProgressCallback>,
}

impl ProgressState {
    pub fn new(total: usize, observer: Option<ProgressCallback>) -> Self {
        Self {
            processed: Mutex::new(0),
            total,
            observer,
        }
    }

    pub fn advance(&self) -> usize {
        let mut processed = self.processed.lock();
        *processed += 1;
        if let Some(callback) = &self.observer {
            callback(EnrichmentProgress {
                processed: *processed,
                total: self.total,
            });
        }
        *processed
    }

    /// Advances once per `reported` flag; later calls with the same flag are no-ops.
    pub fn advance_once(&self, reported: &AtomicBool) -> Option<usize> {
        if reported.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(self.advance())
    }

    pub fn processed(&self) -> usize {
        *self.processed.lock()
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

/// Per-row lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskState {
    Pending,
    Calling { attempt: u32 },
    Retry { attempt: u32, delay: Duration },
    Fallback { reason: String },
    Emitted,
}

/// Attempt budget plus exponential backoff with jitter.
pub struct RetryPolicy {
    max_attempts: u32,
    base_backoff: Duration,
    jitter_rng: Arc<Mutex<StdRng>>,
}

impl RetryPolicy {
    pub fn new(settings: &EnrichmentSettings, jitter_rng: Arc<Mutex<StdRng>>) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_backoff: settings.base_backoff,
            jitter_rng,
        }
    }

    /// Delay before the attempt following `attempt`: base, 2x base, 4x base...
    /// plus up to a quarter of the base as jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_backoff.as_millis() as u64;
        if base_ms == 0 {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        let backoff = base_ms.saturating_mul(1 << exponent);
        let jitter = self.jitter_rng.lock().gen_range(0..=base_ms / 4);
        Duration::from_millis(backoff + jitter)
    }

    /// Next state after `attempt` failed with `err`.
    pub fn after_failure(&self, attempt: u32, err: &AppError) -> TaskState {
        if err.is_retryable() && attempt < self.max_attempts {
            TaskState::Retry {
                attempt,
                delay: self.delay_for(attempt),
            }
        } else {
            TaskState::Fallback {
                reason: err.to_string(),
            }
        }
    }
}

struct TaskContext {
    model: ModelService,
    geocoder: Arc<dyn Geocoder>,
    tax_ids: Option<Arc<dyn TaxIdLookup>>,
    credential: SecretString,
    vocabulary: Vec<String>,
    owner_id: String,
    batch_stamp: i64,
    settings: EnrichmentSettings,
    retry: RetryPolicy,
    progress: ProgressState,
    permits: Arc<Semaphore>,
}

type TaskHandle = (
    usize,
    RawRow,
    Arc<AtomicBool>,
    JoinHandle<Option<EnrichedRecord>>,
);

/// One row bound to its position in the batch.
struct EnrichmentTask {
    index: usize,
    row: RawRow,
    state: TaskState,
    reported: Arc<AtomicBool>,
}

impl EnrichmentTask {
    fn new(index: usize, row: RawRow, reported: Arc<AtomicBool>) -> Self {
        Self {
            index,
            row,
            state: TaskState::Pending,
            reported,
        }
    }

    async fn run(mut self, ctx: Arc<TaskContext>) -> Option<EnrichedRecord> {
        if self.row.is_blank() {
            trace!(index = self.index, "blank row skipped");
            ctx.progress.advance_once(&self.reported);
            return None;
        }

        let Ok(permit) = ctx.permits.clone().acquire_owned().await else {
            warn!(index = self.index, "enrichment slots closed; emitting fallback");
            ctx.progress.advance_once(&self.reported);
            return Some(fallback_record(&ctx, self.index, &self.row));
        };

        let registry = self.lookup_registry(&ctx).await;
        let record = match self.call_model(&ctx).await {
            Ok((answer, maps_uri)) => {
                let target = geocode_target(&self.row, &answer, registry.as_ref(), &ctx.settings);
                let geocoded = match target {
                    Some(address) => ctx.geocoder.geocode(&address, &ctx.credential).await,
                    None => None,
                };
                merge_record(
                    record_id(&ctx, self.index),
                    &ctx.owner_id,
                    &self.row,
                    registry.as_ref(),
                    &answer,
                    maps_uri,
                    geocoded.as_ref(),
                    &ctx.vocabulary,
                )
            }
            Err(reason) => {
                warn!(
                    index = self.index,
                    row = %self.row.fingerprint(),
                    %reason,
                    "enrichment failed; emitting fallback record"
                );
                fallback_record(&ctx, self.index, &self.row)
            }
        };
        self.state = TaskState::Emitted;

        if !ctx.settings.courtesy_delay.is_zero() {
            sleep(ctx.settings.courtesy_delay).await;
        }
        drop(permit);
        ctx.progress.advance_once(&self.reported);
        trace!(index = self.index, state = ?self.state, "task finished");
        Some(record)
    }

    /// Company ids found in the public registry replace the row's own
    /// company, address, phone and locality before the model is asked.
    async fn lookup_registry(&mut self, ctx: &TaskContext) -> Option<RegistryRecord> {
        let lookup = ctx.tax_ids.as_ref()?;
        let tax_id = self.row.tax_id.as_deref().and_then(company_tax_id)?;
        let record = lookup.lookup(&tax_id).await?;
        debug!(index = self.index, "registry record found for tax id");
        record.overlay(&mut self.row);
        Some(record)
    }

    /// Drives Calling/Retry until a decoded answer or a fallback reason.
    async fn call_model(
        &mut self,
        ctx: &TaskContext,
    ) -> Result<(AiAnswer, Option<String>), String> {
        let prompt = build_prompt(&self.row, &ctx.vocabulary);
        self.state = TaskState::Calling { attempt: 1 };
        loop {
            match self.state.clone() {
                TaskState::Calling { attempt } => {
                    match ctx.model.generate(&prompt).await.and_then(decode) {
                        Ok(done) => {
                            debug!(index = self.index, attempt, "model answer decoded");
                            return Ok(done);
                        }
                        Err(err) => self.state = ctx.retry.after_failure(attempt, &err),
                    }
                }
                TaskState::Retry { attempt, delay } => {
                    warn!(
                        index = self.index,
                        attempt,
                        "model call rate limited; retrying after {:?}",
                        delay
                    );
                    sleep(delay).await;
                    self.state = TaskState::Calling {
                        attempt: attempt + 1,
                    };
                }
                TaskState::Fallback { reason } => return Err(reason),
                state @ (TaskState::Pending | TaskState::Emitted) => {
                    return Err(format!("task left the call loop in {state:?}"));
                }
            }
        }
    }
}

fn decode(reply: GroundedReply) -> AppResult<(AiAnswer, Option<String>)> {
    parse_reply(&reply.text).map(|answer| (answer, reply.maps_uri))
}

fn record_id(ctx: &TaskContext, index: usize) -> String {
    format!("{}-{}-{index}", ctx.owner_id, ctx.batch_stamp)
}

fn fallback_record(ctx: &TaskContext, index: usize, row: &RawRow) -> EnrichedRecord {
    EnrichedRecord::fallback(record_id(ctx, index), &ctx.owner_id, row)
}

/// Address to geocode when coordinates or locality are still unset.
fn geocode_target(
    row: &RawRow,
    answer: &AiAnswer,
    registry: Option<&RegistryRecord>,
    settings: &EnrichmentSettings,
) -> Option<String> {
    let has_coordinates = row.explicit_coordinates().is_some() || answer.coordinates.is_some();
    let has_locality = registry
        .is_some_and(|record| record.city().is_some() && record.state_code().is_some())
        || (answer.city.is_some() && answer.state.is_some());
    if has_coordinates && has_locality {
        return None;
    }
    let address = registry
        .and_then(RegistryRecord::full_address)
        .or_else(|| answer.clean_address.clone())
        .unwrap_or_else(|| row.address.clone());
    let address = address.trim();
    (address.chars().count() >= settings.min_geocode_address_len).then(|| address.to_string())
}

/// Combines row, registry, answer and geocoder data. Coordinates come from
/// the row, then the answer, then the geocoder. Registry address and locality
/// beat the answer; the geocoder only fills fields both left empty.
#[allow(clippy::too_many_arguments)]
fn merge_record(
    id: String,
    owner_id: &str,
    row: &RawRow,
    registry: Option<&RegistryRecord>,
    answer: &AiAnswer,
    maps_uri: Option<String>,
    geocoded: Option<&GeocodeResult>,
    vocabulary: &[String],
) -> EnrichedRecord {
    let geocoded_coordinates = geocoded
        .map(|result| (result.lat, result.lng))
        .filter(|(lat, lng)| !(*lat == 0.0 && *lng == 0.0));
    let (latitude, longitude) = row
        .explicit_coordinates()
        .or(answer.coordinates)
        .or(geocoded_coordinates)
        .unwrap_or((0.0, 0.0));

    let address = registry
        .and_then(RegistryRecord::full_address)
        .or_else(|| answer.clean_address.clone())
        .or_else(|| geocoded.and_then(|result| result.formatted_address.clone()))
        .unwrap_or_else(|| row.address.clone());

    let state = registry
        .and_then(RegistryRecord::state_code)
        .or_else(|| answer.state.clone())
        .or_else(|| geocoded.and_then(|result| result.state_code().map(str::to_string)))
        .or_else(|| non_blank(row.state.as_deref()).map(|state| state.to_uppercase()))
        .unwrap_or_else(|| UNKNOWN_STATE.to_string());

    let city = registry
        .and_then(|record| record.city().map(str::to_string))
        .or_else(|| answer.city.clone())
        .or_else(|| geocoded.and_then(|result| result.city().map(str::to_string)))
        .or_else(|| non_blank(row.city.as_deref()).map(str::to_string))
        .unwrap_or_else(|| UNKNOWN_CITY.to_string());

    let region = resolve_region(&state, answer.region, row, &address);

    EnrichedRecord {
        id,
        owner_id: owner_id.to_string(),
        company_name: row.display_company().to_string(),
        owner_name: row.owner_name.clone(),
        contact: merge_contact(
            &row.phone,
            answer.phone.as_deref(),
            answer.website.as_deref(),
        ),
        address,
        categories: normalize_categories(answer.categories.as_ref(), vocabulary),
        region,
        state,
        city,
        latitude,
        longitude,
        map_link: row.map_link.clone().or(maps_uri),
    }
}

fn resolve_region(state: &str, answered: Region, row: &RawRow, address: &str) -> Region {
    let from_state = Region::from_state(state);
    if from_state.is_defined() {
        return from_state;
    }
    if answered.is_defined() {
        return answered;
    }
    postal_code(row, address)
        .map(|code| Region::from_postal_code(&code))
        .unwrap_or_default()
}

fn postal_code(row: &RawRow, address: &str) -> Option<String> {
    if let Some(code) = non_blank(row.postal_code.as_deref()) {
        return Some(code.to_string());
    }
    [row.address.as_str(), address]
        .into_iter()
        .find_map(|text| POSTAL_CODE.find(text).map(|found| found.as_str().to_string()))
}

/// `"<row phone> | Maps: <found phone> | Site: <website>"`, skipping parts
/// that are absent or repeat the row's phone.
pub fn merge_contact(phone: &str, found_phone: Option<&str>, website: Option<&str>) -> String {
    let mut contact = phone.trim().to_string();
    if let Some(found) = found_phone.map(str::trim).filter(|found| !found.is_empty()) {
        if contact.is_empty() {
            contact = found.to_string();
        } else if digits(found) != digits(&contact) {
            contact = format!("{contact} | Maps: {found}");
        }
    }
    if let Some(site) = website.map(str::trim).filter(|site| !site.is_empty()) {
        contact = if contact.is_empty() {
            format!("Site: {site}")
        } else {
            format!("{contact} | Site: {site}")
        };
    }
    contact
}

fn digits(value: &str) -> String {
    value.chars().filter(char::is_ascii_digit).collect()
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

pub struct Enricher {
    model: ModelService,
    geocoder: Arc<dyn Geocoder>,
    tax_ids: Option<Arc<dyn TaxIdLookup>>,
    settings: EnrichmentSettings,
    jitter_rng: Arc<Mutex<StdRng>>,
}

impl Enricher {
    pub fn new(model: ModelService, geocoder: Arc<dyn Geocoder>, settings: EnrichmentSettings) -> Self {
        Self {
            model,
            geocoder,
            tax_ids: None,
            settings,
            jitter_rng: Arc::new(Mutex::new(StdRng::from_entropy())),
        }
    }

    pub fn with_tax_id_lookup(mut self, lookup: Arc<dyn TaxIdLookup>) -> Self {
        self.tax_ids = Some(lookup);
        self
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.jitter_rng = Arc::new(Mutex::new(rng));
        self
    }

    pub fn settings(&self) -> &EnrichmentSettings {
        &self.settings
    }

    /// Enriches one uploaded batch.
    ///
    /// `credential` authorizes the geocoding fallback. Only a blank credential
    /// or owner id is an error; per-row failures become fallback records.
    /// Blank rows advance progress but produce no record.
    pub async fn enrich(
        &self,
        rows: Vec<RawRow>,
        owner_id: &str,
        credential: &SecretString,
        vocabulary: &[String],
        progress: Option<ProgressCallback>,
    ) -> AppResult<Vec<EnrichedRecord>> {
        if credential.expose_secret().trim().is_empty() {
            return Err(AppError::Config("geocoding credential is blank".into()));
        }
        let owner_id = owner_id.trim();
        if owner_id.is_empty() {
            return Err(AppError::Config("owner id is blank".into()));
        }

        let total = rows.len();
        info!(
            total,
            width = self.settings.concurrency,
            max_attempts = self.settings.max_attempts,
            "starting enrichment batch"
        );

        let ctx = Arc::new(TaskContext {
            model: self.model.clone(),
            geocoder: self.geocoder.clone(),
            tax_ids: self.tax_ids.clone(),
            credential: credential.clone(),
            vocabulary: vocabulary.to_vec(),
            owner_id: owner_id.to_string(),
            batch_stamp: chrono::Utc::now().timestamp_millis(),
            settings: self.settings.clone(),
            retry: RetryPolicy::new(&self.settings, self.jitter_rng.clone()),
            progress: ProgressState::new(total, progress),
            permits: Arc::new(Semaphore::new(self.settings.concurrency.max(1))),
        });

        let handles: Vec<TaskHandle> = rows
            .into_iter()
            .enumerate()
            .map(|(index, row)| {
                let reported = Arc::new(AtomicBool::new(false));
                let task = EnrichmentTask::new(index, row.clone(), reported.clone());
                let handle = tokio::spawn(task.run(ctx.clone()));
                (index, row, reported, handle)
            })
            .collect();

        let mut records = Vec::with_capacity(total);
        for (index, row, reported, handle) in handles {
            match handle.await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(err) => {
                    warn!(index, ?err, "enrichment task aborted; emitting fallback record");
                    ctx.progress.advance_once(&reported);
                    if !row.is_blank() {
                        records.push(fallback_record(&ctx, index, &row));
                    }
                }
            }
        }

        let degraded = records
            .iter()
            .filter(|record| !record.has_coordinates())
            .count();
        info!(
            total,
            emitted = records.len(),
            degraded,
            processed = ctx.progress.processed(),
            "enrichment batch finished"
        );
        Ok(records)
    }
}
