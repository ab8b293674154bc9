use std::sync::Arc;

use httptest::matchers::{all_of, contains, request, url_decoded};
use httptest::responders::{json_encoded, status_code};
use httptest::{Expectation, Server};
use parking_lot::Mutex;
use secrecy::SecretString;
use serde_json::json;
use tempfile::tempdir;

use prospect_mapper::{
    AppConfig, AppError, EnrichmentProgress, ProgressCallback, ProspectPipeline, Region,
    OTHER_CATEGORY,
};

const MODEL_PATH: &str = "/v1beta/models/test-model:generateContent";
const GEOCODE_PATH: &str = "/maps/api/geocode/json";

const SAMPLE_CSV: &str = "Razão Social;Responsável;Telefone;Endereço;CEP\n\
Auto Som Centro;Maria;85 3222-0000;Rua Barão, 100, Fortaleza - CE;60115-170\n\
Pneus Sul;João;51 3000-1111;=HYPERLINK(\"https://www.google.com/maps/@-30.03,-51.22,17z\",\"Av. Ipiranga, 500\");\n\
;;;;\n";

fn config(ai: &Server, maps: &Server) -> AppConfig {
    let mut config = AppConfig::from_env();
    config.ai_api_base = ai.url_str("");
    config.ai_model = "test-model".into();
    config.geocoding_api_base = maps.url_str("");
    config.gemini_api_key = Some(SecretString::from("ai-key".to_string()));
    config.google_maps_api_key = Some(SecretString::from("maps-key".to_string()));
    config.enrich_concurrency = 2;
    config.enrich_max_attempts = 2;
    config.enrich_base_backoff_ms = 0;
    config.enrich_courtesy_delay_ms = 0;
    config
}

fn vocabulary() -> Vec<String> {
    vec!["Som Automotivo".into(), "Auto Elétrica".into()]
}

fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<EnrichmentProgress>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (Arc::new(move |progress| sink.lock().push(progress)), seen)
}

#[tokio::test]
async fn csv_import_enriches_every_row() {
    let ai = Server::run();
    ai.expect(
        Expectation::matching(all_of!(
            request::method("POST"),
            request::path(MODEL_PATH),
            request::query(url_decoded(contains(("key", "ai-key"))))
        ))
        .times(2)
        .respond_with(json_encoded(json!({
            "candidates": [{
                "content": { "parts": [{
                    "text": "```json\n{\"category\": \"som automotivo\", \"phone\": \"85 99999-0000\"}\n```"
                }] },
                "groundingMetadata": {
                    "groundingChunks": [{ "maps": { "uri": "https://maps.google.com/?cid=99" } }]
                }
            }]
        }))),
    );

    let maps = Server::run();
    maps.expect(
        Expectation::matching(all_of!(
            request::method("GET"),
            request::path(GEOCODE_PATH),
            request::query(url_decoded(contains(("key", "maps-key"))))
        ))
        .times(2)
        .respond_with(json_encoded(json!({
            "status": "OK",
            "results": [{
                "formatted_address": "R. Barão, 100 - Centro, Fortaleza - CE, 60115-170, Brasil",
                "geometry": { "location": { "lat": -3.73, "lng": -38.52 } },
                "address_components": [
                    { "long_name": "Fortaleza", "short_name": "Fortaleza", "types": ["administrative_area_level_2"] },
                    { "long_name": "Ceará", "short_name": "CE", "types": ["administrative_area_level_1"] }
                ]
            }]
        }))),
    );

    let dir = tempdir().unwrap();
    let path = dir.path().join("clientes.csv");
    tokio::fs::write(&path, SAMPLE_CSV).await.unwrap();

    let pipeline = ProspectPipeline::from_config(config(&ai, &maps)).unwrap();
    let (progress, seen) = recorder();
    let records = pipeline
        .import_file(&path, "seller-7", &vocabulary(), Some(progress))
        .await
        .unwrap();

    assert_eq!(records.len(), 2);

    let first = &records[0];
    assert_eq!(first.company_name, "Auto Som Centro");
    assert_eq!(first.categories, vec!["Som Automotivo".to_string()]);
    assert_eq!((first.latitude, first.longitude), (-3.73, -38.52));
    assert_eq!(first.state, "CE");
    assert_eq!(first.city, "Fortaleza");
    assert_eq!(first.region, Region::Northeast);
    assert_eq!(first.contact, "85 3222-0000 | Maps: 85 99999-0000");
    assert_eq!(first.map_link.as_deref(), Some("https://maps.google.com/?cid=99"));

    let second = &records[1];
    assert_eq!((second.latitude, second.longitude), (-30.03, -51.22));
    assert_eq!(
        second.map_link.as_deref(),
        Some("https://www.google.com/maps/@-30.03,-51.22,17z")
    );
    assert_ne!(first.id, second.id);

    let seen = seen.lock();
    let last = seen.last().unwrap();
    assert_eq!((last.processed, last.total), (2, 2));
}

#[tokio::test]
async fn exhausted_rate_limits_still_return_every_row() {
    let ai = Server::run();
    ai.expect(
        Expectation::matching(request::path(MODEL_PATH))
            .times(4)
            .respond_with(status_code(429).body("Quota exceeded")),
    );
    let maps = Server::run();

    let dir = tempdir().unwrap();
    let path = dir.path().join("clientes.csv");
    tokio::fs::write(&path, SAMPLE_CSV).await.unwrap();

    let pipeline = ProspectPipeline::from_config(config(&ai, &maps)).unwrap();
    let records = pipeline
        .import_file(&path, "seller-7", &vocabulary(), None)
        .await
        .unwrap();

    assert_eq!(records.len(), 2);
    for record in &records {
        assert_eq!(record.categories, vec![OTHER_CATEGORY.to_string()]);
        assert_eq!(record.region, Region::Undefined);
        assert!(!record.has_coordinates());
    }
    assert_eq!(records[0].address, "Rua Barão, 100, Fortaleza - CE, 60115-170");
}

#[tokio::test]
async fn empty_spreadsheet_fails_before_any_call() {
    let ai = Server::run();
    let maps = Server::run();

    let dir = tempdir().unwrap();
    let path = dir.path().join("vazio.csv");
    tokio::fs::write(&path, "Razão Social;Endereço\n;\n;\n").await.unwrap();

    let pipeline = ProspectPipeline::from_config(config(&ai, &maps)).unwrap();
    let err = pipeline
        .import_file(&path, "seller-7", &vocabulary(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::EmptyFile(_)));
}
