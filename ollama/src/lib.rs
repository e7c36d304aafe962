//! Minimal Ollama API client.
//!
//! This crate provides a focused client for a local Ollama server with:
//! - Model listing (`GET /api/tags`)
//! - Non-streaming and streaming generation (`POST /api/generate`)
//! - Model unloading via `keep_alive: 0`
//! - Incremental decoding of the concatenated-JSON stream body

pub mod decoder;

pub use decoder::{decode_stream, StreamDecoder};

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Model used when neither the client nor the request names one.
pub const DEFAULT_MODEL: &str = "llama3.2";

/// Context window requested when the caller does not set one.
pub const DEFAULT_NUM_CTX: u32 = 4096;

/// Decoded chunks buffered between the transport task and the consumer.
const STREAM_CHANNEL_CAPACITY: usize = 32;

/// Errors that can occur when using the Ollama client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Server reported an error: {0}")]
    Server(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Ollama API client.
#[derive(Clone)]
pub struct Ollama {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl Ollama {
    /// Create a client for the server at `base_url`.
    ///
    /// A bare `host:port` is accepted and treated as plain HTTP.
    pub fn new(base_url: impl Into<String>) -> Result<Self, Error> {
        // Connect timeout only. Callers bound the whole generation.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: normalize_base_url(&base_url.into()),
            model: DEFAULT_MODEL.to_string(),
        })
    }

    /// Create a client from the OLLAMA_HOST environment variable.
    ///
    /// Falls back to `http://localhost:11434` when unset.
    pub fn from_env() -> Result<Self, Error> {
        let base_url = std::env::var("OLLAMA_HOST").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(base_url)
    }

    /// Set the default model for this client.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// The default model for this client.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// The normalized server address.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// List the models installed on the server.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, Error> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let response = check_status(response).await?;

        let tags: ApiTagsResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        Ok(tags.models)
    }

    /// Send a generation request and return the single final chunk.
    pub async fn generate(&self, request: GenerateRequest) -> Result<GenerateChunk, Error> {
        let body = self.build_api_request(&request, false);
        let response = self.post_generate(&body).await?;

        let chunk: GenerateChunk = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        match chunk.error {
            Some(message) => Err(Error::Server(message)),
            None => Ok(chunk),
        }
    }

    /// Send a generation request and stream the response.
    ///
    /// Resolves once the server has accepted the request. The body is read
    /// by a background task; dropping or closing the returned stream stops
    /// that task and releases the connection.
    pub async fn generate_stream(&self, request: GenerateRequest) -> Result<GenerationStream, Error> {
        let body = self.build_api_request(&request, true);
        let response = self.post_generate(&body).await?;

        debug!(model = %body.model, "generation stream opened");
        Ok(spawn_decoder(response.bytes_stream()))
    }

    /// Ask the server to evict `model` from memory.
    pub async fn unload_model(&self, model: &str) -> Result<(), Error> {
        let body = ApiGenerateRequest {
            model: model.to_string(),
            prompt: String::new(),
            system: None,
            context: None,
            stream: false,
            options: None,
            keep_alive: Some(0),
        };

        self.post_generate(&body).await?;
        debug!(model, "model unloaded");
        Ok(())
    }

    async fn post_generate(&self, body: &ApiGenerateRequest) -> Result<reqwest::Response, Error> {
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        check_status(response).await
    }

    fn build_api_request(&self, request: &GenerateRequest, stream: bool) -> ApiGenerateRequest {
        ApiGenerateRequest {
            model: request.model.clone().unwrap_or_else(|| self.model.clone()),
            prompt: request.prompt.clone(),
            system: request.system.clone(),
            context: request.context.clone(),
            stream,
            options: Some(ApiOptions {
                num_ctx: request.num_ctx.unwrap_or(DEFAULT_NUM_CTX),
                num_predict: request.num_predict,
            }),
            keep_alive: None,
        }
    }
}

/// Run the decoder over `source` in a background task.
///
/// The task stops at its next suspension point once the returned stream is
/// closed or dropped, and after forwarding the final (`done`) chunk or the
/// first error.
pub fn spawn_decoder<S, B, E>(source: S) -> GenerationStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut chunks = std::pin::pin!(decode_stream::<GenerateChunk, _, _, _>(source));

        loop {
            let next = tokio::select! {
                _ = tx.closed() => {
                    debug!("generation stream closed by consumer");
                    return;
                }
                next = chunks.next() => next,
            };

            let Some(item) = next else {
                break;
            };

            let item = item.and_then(|chunk| match chunk.error.clone() {
                Some(message) => Err(Error::Server(message)),
                None => Ok(chunk),
            });
            let last = match &item {
                Ok(chunk) => chunk.done,
                Err(_) => true,
            };

            if tx.send(item).await.is_err() || last {
                break;
            }
        }

        debug!("generation stream finished");
    });

    GenerationStream {
        inner: ReceiverStream::new(rx),
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, Error> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(Error::Api {
        status,
        message: body,
    })
}

fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        DEFAULT_BASE_URL.to_string()
    } else if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

// ============================================================================
// Public types
// ============================================================================

/// A generation request.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub model: Option<String>,
    pub prompt: String,
    pub system: Option<String>,
    /// Continuation token returned by the previous generation.
    pub context: Option<Vec<i64>>,
    pub num_ctx: Option<u32>,
    pub num_predict: Option<i32>,
}

impl GenerateRequest {
    /// Create a new request for the given prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_context(mut self, context: Option<Vec<i64>>) -> Self {
        self.context = context;
        self
    }

    pub fn with_num_ctx(mut self, num_ctx: u32) -> Self {
        self.num_ctx = Some(num_ctx);
        self
    }

    pub fn with_num_predict(mut self, num_predict: i32) -> Self {
        self.num_predict = Some(num_predict);
        self
    }
}

/// One object of a generate response.
///
/// Streaming responses carry one of these per generated token; the last one
/// has `done` set and carries the continuation token in `context`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateChunk {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GenerateChunk {
    /// A text-bearing chunk, as sent mid-stream.
    pub fn text(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            ..Self::default()
        }
    }

    /// The terminal chunk of a generation.
    pub fn finished(context: Option<Vec<i64>>) -> Self {
        Self {
            done: true,
            done_reason: Some("stop".to_string()),
            context,
            ..Self::default()
        }
    }
}

/// A model installed on the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub modified_at: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub digest: String,
}

/// Decoded chunks of a streaming generation.
///
/// Closing or dropping the stream cancels the generation.
pub struct GenerationStream {
    inner: ReceiverStream<Result<GenerateChunk, Error>>,
}

impl GenerationStream {
    /// Stop the background reader. Chunks already buffered can still be read.
    pub fn close(&mut self) {
        self.inner.close();
    }
}

impl Stream for GenerationStream {
    type Item = Result<GenerateChunk, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
struct ApiGenerateRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<Vec<i64>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<ApiOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<i64>,
}

#[derive(Debug, Serialize)]
struct ApiOptions {
    num_ctx: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct ApiTagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}
