use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};

/// Raw text plus the grounding reference, if the service attached one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroundedReply {
    pub text: String,
    pub maps_uri: Option<String>,
}

/// A text model that can ground its answer in map-service data.
#[async_trait]
pub trait GroundedModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> AppResult<GroundedReply>;
}

#[derive(Clone)]
pub struct ModelService {
    inner: Arc<dyn GroundedModel>,
}

impl ModelService {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let key = config
            .gemini_api_key
            .clone()
            .ok_or_else(|| AppError::Config("GEMINI_API_KEY is not configured".into()))?;
        let client = HttpGroundedModel::new(
            &config.ai_api_base,
            &config.ai_model,
            key,
            Duration::from_millis(config.ai_timeout_ms),
        )?;
        Ok(Self {
            inner: Arc::new(client),
        })
    }

    pub fn from_model(model: Arc<dyn GroundedModel>) -> Self {
        Self { inner: model }
    }

    pub async fn generate(&self, prompt: &str) -> AppResult<GroundedReply> {
        self.inner.generate(prompt).await
    }
}

pub struct HttpGroundedModel {
    http: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
}

impl HttpGroundedModel {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: SecretString,
        timeout: Duration,
    ) -> AppResult<Self> {
        if api_key.expose_secret().trim().is_empty() {
            return Err(AppError::Config("AI credential is blank".into()));
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: format!(
                "{}/v1beta/models/{model}:generateContent",
                base_url.trim_end_matches('/')
            ),
            api_key,
        })
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    tools: [Tool; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Tool {
    #[serde(rename = "googleMaps")]
    google_maps: EmptyObject,
}

#[derive(Serialize)]
struct EmptyObject {}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Default, Deserialize)]
struct GroundingChunk {
    maps: Option<MapsChunk>,
}

#[derive(Debug, Default, Deserialize)]
struct MapsChunk {
    uri: Option<String>,
}

impl GenerateResponse {
    fn into_reply(self) -> GroundedReply {
        let Some(first) = self.candidates.into_iter().next() else {
            return GroundedReply::default();
        };
        let text = first
            .content
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        let maps_uri = first.grounding_metadata.and_then(|metadata| {
            metadata
                .grounding_chunks
                .into_iter()
                .filter_map(|chunk| chunk.maps.and_then(|maps| maps.uri))
                .find(|uri| !uri.trim().is_empty())
        });
        GroundedReply { text, maps_uri }
    }
}

#[async_trait]
impl GroundedModel for HttpGroundedModel {
    async fn generate(&self, prompt: &str) -> AppResult<GroundedReply> {
        let body = GenerateRequest {
            contents: [Content {
                parts: [Part { text: prompt }],
            }],
            tools: [Tool {
                google_maps: EmptyObject {},
            }],
        };

        let response = self
            .http
            .post(&self.endpoint)
            .query(&[("key", self.api_key.expose_secret())])
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateResponse = response.json().await?;
        let reply = parsed.into_reply();
        trace!(
            chars = reply.text.len(),
            grounded = reply.maps_uri.is_some(),
            "model reply received"
        );
        Ok(reply)
    }
}
