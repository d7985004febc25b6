//! Model interaction: one prompt (plus optional image) → one text reply.
//!
//! The orchestrator only knows the [`ModelBackend`] trait. It names a model
//! per call because the fallback policy walks several candidates against the
//! same backend. Prompt wording lives in [`crate::prompts`]; this module is
//! transport only and does no retrying of its own.
//!
//! Two implementations ship:
//!
//! * [`EdgequakeBackend`]: async, one `edgequake-llm` provider per candidate
//!   model, created lazily and reused for the life of the backend.
//! * [`BlockingBackend`]: wraps a synchronous [`BlockingModel`] and runs each
//!   call on the blocking pool. When the orchestrator's timeout fires the
//!   `spawn_blocking` task is detached: its result is dropped, it is not
//!   killed.

use crate::error::ExtractError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::debug;

/// One model call's input.
#[derive(Clone)]
pub struct ModelRequest {
    pub prompt: String,
    /// Encoded bitmap for image mode; `None` in text mode.
    pub image: Option<ImageData>,
    pub temperature: f32,
    pub max_tokens: usize,
}

impl ModelRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            image: None,
            temperature: 0.1,
            max_tokens: 2048,
        }
    }

    pub fn with_image(mut self, image: ImageData) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: usize) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    /// Mime type of the attached image, if any.
    pub fn image_mime(&self) -> Option<&str> {
        self.image.as_ref().map(|i| i.mime_type.as_str())
    }
}

impl fmt::Debug for ModelRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRequest")
            .field("prompt_chars", &self.prompt.chars().count())
            .field("image", &self.image_mime())
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

/// Anything that can answer a [`ModelRequest`] with a named model.
///
/// Errors should be [`ExtractError::ModelCall`] so the orchestrator can read
/// the message for encoding complaints.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn generate(&self, model: &str, request: &ModelRequest) -> Result<String, ExtractError>;
}

// ── edgequake-llm backend ────────────────────────────────────────────────

/// [`ModelBackend`] over `edgequake-llm` providers.
///
/// The provider name is fixed (default `"gemini"`); the model varies per
/// call. API keys come from the provider's usual environment variable
/// (`GEMINI_API_KEY`, `OPENAI_API_KEY`, …).
pub struct EdgequakeBackend {
    provider_name: String,
    providers: Mutex<HashMap<String, Arc<dyn LLMProvider>>>,
}

impl EdgequakeBackend {
    pub fn new(provider_name: impl Into<String>) -> Self {
        Self {
            provider_name: provider_name.into(),
            providers: Mutex::new(HashMap::new()),
        }
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    fn provider_for(&self, model: &str) -> Result<Arc<dyn LLMProvider>, ExtractError> {
        let mut providers = self.providers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(p) = providers.get(model) {
            return Ok(Arc::clone(p));
        }
        let provider =
            ProviderFactory::create_llm_provider(&self.provider_name, model).map_err(|e| {
                ExtractError::ProviderNotConfigured {
                    provider: self.provider_name.clone(),
                    hint: format!("{e}"),
                }
            })?;
        providers.insert(model.to_string(), Arc::clone(&provider));
        Ok(provider)
    }
}

impl fmt::Debug for EdgequakeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgequakeBackend")
            .field("provider_name", &self.provider_name)
            .finish()
    }
}

#[async_trait]
impl ModelBackend for EdgequakeBackend {
    async fn generate(&self, model: &str, request: &ModelRequest) -> Result<String, ExtractError> {
        let provider = self.provider_for(model)?;
        let messages = build_messages(request);
        let options = build_options(request);

        let start = Instant::now();
        let response = provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| ExtractError::ModelCall {
                model: model.to_string(),
                detail: format!("{e}"),
            })?;

        debug!(
            "{}: {} input tokens, {} output tokens, {:?}",
            model,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        Ok(response.content)
    }
}

/// A single user turn: prompt text alone, or prompt plus the attached image.
///
/// No system message; the prompt carries the whole instruction so the same
/// wording works for providers without a system role.
fn build_messages(request: &ModelRequest) -> Vec<ChatMessage> {
    match &request.image {
        Some(image) => vec![ChatMessage::user_with_images(
            request.prompt.as_str(),
            vec![image.clone()],
        )],
        None => vec![ChatMessage::user(request.prompt.as_str())],
    }
}

fn build_options(request: &ModelRequest) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(request.temperature),
        max_tokens: Some(request.max_tokens),
        ..Default::default()
    }
}

// ── Blocking adapter ─────────────────────────────────────────────────────

/// A synchronous model client, e.g. one built on a blocking HTTP SDK.
pub trait BlockingModel: Send + Sync + 'static {
    fn generate_blocking(&self, model: &str, request: &ModelRequest) -> Result<String, ExtractError>;
}

/// Runs a [`BlockingModel`] on tokio's blocking pool.
pub struct BlockingBackend<M> {
    inner: Arc<M>,
}

impl<M: BlockingModel> BlockingBackend<M> {
    pub fn new(inner: M) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }
}

#[async_trait]
impl<M: BlockingModel> ModelBackend for BlockingBackend<M> {
    async fn generate(&self, model: &str, request: &ModelRequest) -> Result<String, ExtractError> {
        let inner = Arc::clone(&self.inner);
        let model_owned = model.to_string();
        let request = request.clone();
        tokio::task::spawn_blocking(move || inner.generate_blocking(&model_owned, &request))
            .await
            .map_err(|e| ExtractError::ModelCall {
                model: model.to_string(),
                detail: format!("blocking model worker failed: {e}"),
            })?
    }
}
