//! Model-candidate fallback with a last-known-good cache.
//!
//! ## Call algorithm
//!
//! ```text
//! cached id? ──yes──▶ try cached ──ok──▶ return
//!     │                  │ err
//!     no                 ▼
//!     │             clear cache
//!     ▼                  │
//! discovery: for each candidate (bounded by max_candidates)
//!     try ──ok──▶ cache it, return
//!      │ err
//!      └──▶ next
//! exhausted ──▶ ModelUnavailable { last cause }
//! ```
//!
//! Every try runs under `per_candidate_timeout`. A failure whose message
//! complains about the image format is retried once on the same candidate
//! with the alternate encoding before moving on.
//!
//! A failed cached id is cleared and discovery restarts from the first
//! candidate, so the cached id gets a second try in its normal slot.
//! Configuration errors (missing API key, bad provider setup) are returned
//! at once and never retried.
//!
//! Only model *calls* are retried here. Parsing the reply happens after this
//! module returns and a malformed reply is never sent to another candidate.

use crate::config::ModelPolicy;
use crate::document::{ExtractedText, NormalizedPayload};
use crate::error::ExtractError;
use crate::pipeline::encode::{encode_image, ImageEncoding};
use crate::pipeline::llm::{ModelBackend, ModelRequest};
use crate::prompts;
use edgequake_llm::ImageData;
use image::RgbImage;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Substrings that mark a provider complaint about the attached image.
const ENCODING_HINTS: &[&str] = &["format", "blob", "webp", "image", "mime", "encoding"];

/// Last model id that answered successfully.
///
/// Owned by one [`Orchestrator`]; never global. A stale entry costs at most
/// one failed call before discovery runs again.
#[derive(Debug, Default)]
pub struct ModelCache {
    slot: Mutex<Option<String>>,
}

impl ModelCache {
    pub fn get(&self) -> Option<String> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set(&self, model: &str) {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(model.to_string());
    }

    pub fn clear(&self) {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// A successful model call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelReply {
    /// Candidate that produced the reply.
    pub model: String,
    pub text: String,
    /// Candidates tried in this invocation, including the successful one.
    pub attempts: usize,
}

/// Drives the fallback policy against one [`ModelBackend`].
pub struct Orchestrator {
    backend: Arc<dyn ModelBackend>,
    policy: ModelPolicy,
    cache: ModelCache,
    temperature: f32,
    max_tokens: usize,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn ModelBackend>, policy: ModelPolicy) -> Self {
        Self {
            backend,
            policy,
            cache: ModelCache::default(),
            temperature: 0.1,
            max_tokens: 2048,
        }
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: usize) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn policy(&self) -> &ModelPolicy {
        &self.policy
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Get a reply for `payload` from the first candidate that answers.
    pub async fn call(
        &self,
        payload: &NormalizedPayload,
        ocr: Option<&ExtractedText>,
    ) -> Result<ModelReply, ExtractError> {
        let prepared = Prepared::new(payload, ocr, self.temperature, self.max_tokens)?;
        let mut attempts = 0usize;
        let mut last: Option<ExtractError> = None;

        let cached = if self.policy.cache_first {
            self.cache.get()
        } else {
            None
        };

        if let Some(model) = cached.as_deref() {
            attempts += 1;
            debug!("Trying cached model {}", model);
            match self.try_candidate(model, &prepared).await {
                Ok(text) => {
                    return Ok(ModelReply {
                        model: model.to_string(),
                        text,
                        attempts,
                    })
                }
                Err(e) if e.is_config_error() => return Err(e),
                Err(e) => {
                    warn!("Cached model {} failed, rediscovering: {}", model, e);
                    self.cache.clear();
                    last = Some(e);
                }
            }
        }

        for model in self.policy.discovery_order() {
            attempts += 1;
            match self.try_candidate(model, &prepared).await {
                Ok(text) => {
                    info!("Model {} answered ({} attempt(s))", model, attempts);
                    self.cache.set(model);
                    return Ok(ModelReply {
                        model: model.to_string(),
                        text,
                        attempts,
                    });
                }
                Err(e) if e.is_config_error() => return Err(e),
                Err(e) => {
                    warn!("Model {} failed: {}", model, e);
                    last = Some(e);
                }
            }
        }

        let last = last.unwrap_or_else(|| {
            ExtractError::InvalidConfig("no model candidates to try".into())
        });
        Err(ExtractError::ModelUnavailable {
            attempted: attempts,
            last: Box::new(last),
        })
    }

    /// One candidate, with at most one re-encoded retry.
    async fn try_candidate(&self, model: &str, prepared: &Prepared<'_>) -> Result<String, ExtractError> {
        let first = prepared.primary();
        match self.call_once(model, &first).await {
            Err(e) if prepared.has_image() && is_encoding_mismatch(&e) => {
                let alternate = prepared.alternate()?;
                warn!(
                    "Model {} rejected {}, retrying as {}",
                    model,
                    first.image_mime().unwrap_or("?"),
                    alternate.image_mime().unwrap_or("?")
                );
                self.call_once(model, &alternate).await
            }
            other => other,
        }
    }

    async fn call_once(&self, model: &str, request: &ModelRequest) -> Result<String, ExtractError> {
        let limit = self.policy.per_candidate_timeout;
        let start = Instant::now();
        let text = tokio::time::timeout(limit, self.backend.generate(model, request))
            .await
            .map_err(|_| ExtractError::ModelTimeout {
                model: model.to_string(),
                secs: limit.as_secs(),
            })??;

        if text.trim().is_empty() {
            return Err(ExtractError::ModelCall {
                model: model.to_string(),
                detail: "empty response".into(),
            });
        }
        debug!("{}: {} chars in {:?}", model, text.len(), start.elapsed());
        Ok(text)
    }
}

/// `true` when a candidate failure reads like an image-format rejection.
pub fn is_encoding_mismatch(err: &ExtractError) -> bool {
    match err {
        ExtractError::ModelCall { detail, .. } => {
            let detail = detail.to_lowercase();
            ENCODING_HINTS.iter().any(|h| detail.contains(h))
        }
        _ => false,
    }
}

/// Prompt and primary encoding built once per invocation; the alternate
/// encoding is produced only if a candidate asks for it.
struct Prepared<'a> {
    base: ModelRequest,
    bitmap: Option<&'a RgbImage>,
    png: Option<ImageData>,
}

impl<'a> Prepared<'a> {
    fn new(
        payload: &'a NormalizedPayload,
        ocr: Option<&ExtractedText>,
        temperature: f32,
        max_tokens: usize,
    ) -> Result<Self, ExtractError> {
        match payload {
            NormalizedPayload::Text(text) => Ok(Self {
                base: ModelRequest::text(prompts::text_prompt(text))
                    .with_sampling(temperature, max_tokens),
                bitmap: None,
                png: None,
            }),
            NormalizedPayload::Image(img) => Ok(Self {
                base: ModelRequest::text(prompts::image_prompt(ocr))
                    .with_sampling(temperature, max_tokens),
                bitmap: Some(img),
                png: Some(encode_image(img, ImageEncoding::Png)?),
            }),
        }
    }

    fn has_image(&self) -> bool {
        self.bitmap.is_some()
    }

    fn primary(&self) -> ModelRequest {
        match &self.png {
            Some(png) => self.base.clone().with_image(png.clone()),
            None => self.base.clone(),
        }
    }

    fn alternate(&self) -> Result<ModelRequest, ExtractError> {
        match self.bitmap {
            Some(img) => {
                let jpeg = encode_image(img, ImageEncoding::Png.alternate())?;
                Ok(self.base.clone().with_image(jpeg))
            }
            None => Ok(self.base.clone()),
        }
    }
}
