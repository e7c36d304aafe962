//! The model-facing side of the adventure.
//!
//! Contains the backend seam over the model server, the tag grammar the
//! narrator writes state changes in, and the fallback heuristics for when it
//! forgets to.

pub mod commands;
pub mod fallback;
pub mod tags;

pub use commands::{slugify, Command, CommandCategory, Importance};
pub use tags::{display_text, parse_tags, ParsedResponse};

use async_trait::async_trait;
use futures::Stream;
use ollama::{GenerateChunk, GenerateRequest, ModelInfo, Ollama};
use std::pin::Pin;

/// Decoded chunks of one generation. Dropping it cancels the generation.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<GenerateChunk, ollama::Error>> + Send>>;

/// The system prompt used when the session is not given one.
pub fn default_system_prompt() -> String {
    let mut prompt = String::new();
    prompt.push_str(include_str!("prompts/narrator_base.txt"));
    prompt.push_str("\n\n");
    prompt.push_str(include_str!("prompts/tags.txt"));
    prompt
}

/// Parse a completed response into its display text and every command it
/// carries: tag commands first, then fallback inferences.
pub fn parse_completed(raw: &str) -> ParsedResponse {
    let mut parsed = parse_tags(raw);
    fallback::fill_gaps(&mut parsed);
    parsed
}

/// A language-model server the narrator can talk to.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Start a streaming generation. Resolves once the server accepted it.
    async fn generate_stream(&self, request: GenerateRequest) -> Result<ChunkStream, ollama::Error>;

    /// Models available on the server.
    async fn list_models(&self) -> Result<Vec<ModelInfo>, ollama::Error>;

    /// Evict a model from server memory.
    async fn unload_model(&self, model: &str) -> Result<(), ollama::Error>;
}

#[async_trait]
impl Backend for Ollama {
    async fn generate_stream(&self, request: GenerateRequest) -> Result<ChunkStream, ollama::Error> {
        let stream = Ollama::generate_stream(self, request).await?;
        Ok(Box::pin(stream))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, ollama::Error> {
        Ollama::list_models(self).await
    }

    async fn unload_model(&self, model: &str) -> Result<(), ollama::Error> {
        Ollama::unload_model(self, model).await
    }
}
