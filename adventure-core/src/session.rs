//! AdventureSession - the primary public API for playing an adventure.
//!
//! Wraps the backend, the conversation memory, the cancel signal and the
//! optional store into a single turn driver. One generation is in flight at
//! a time; every turn supersedes the previous one.

use crate::memory::{ChatMessage, ConversationMemory};
use crate::movement::{detect_movement, MovementIntent};
use crate::narrator::{default_system_prompt, display_text, parse_completed, Backend, Command};
use crate::persist::{PersistError, SavedAdventure, Storage, STORAGE_KEY};
use futures::StreamExt;
use ollama::{GenerateRequest, ModelInfo, DEFAULT_MODEL, DEFAULT_NUM_CTX};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default bound on one whole generation, connection included.
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(180);

/// Errors from AdventureSession operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Model server error: {0}")]
    Transport(#[from] ollama::Error),

    #[error("Generation cancelled")]
    Cancelled,

    #[error("Generation timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Storage error: {0}")]
    Storage(#[from] PersistError),
}

impl SessionError {
    /// Whether the player should be told about this error.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, SessionError::Cancelled)
    }

    /// Text to show the player.
    pub fn player_message(&self) -> String {
        match self {
            SessionError::Transport(e) => {
                format!("The narrator could not be reached ({e}). Is the model server running?")
            }
            SessionError::Cancelled => "The narration was interrupted.".to_string(),
            SessionError::Timeout { secs } => format!(
                "The narrator did not finish within {secs} seconds. The server may still be \
                 loading the model; try again in a moment."
            ),
            SessionError::Storage(e) => format!("Your adventure could not be saved or loaded ({e})."),
        }
    }
}

/// Configuration for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Model that narrates.
    pub model: String,

    pub system_prompt: String,

    /// Context window requested from the server.
    pub num_ctx: u32,

    /// Cap on generated tokens per response.
    pub num_predict: Option<i32>,

    /// Bound on a whole generation.
    pub generation_timeout: Duration,

    /// Key the adventure is stored under.
    pub storage_key: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            system_prompt: default_system_prompt(),
            num_ctx: DEFAULT_NUM_CTX,
            num_predict: None,
            generation_timeout: DEFAULT_GENERATION_TIMEOUT,
            storage_key: STORAGE_KEY.to_string(),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, with the model taken from `ADVENTURE_MODEL` when set.
    pub fn from_env() -> Self {
        let config = Self::default();
        match std::env::var("ADVENTURE_MODEL") {
            Ok(model) if !model.trim().is_empty() => config.with_model(model.trim()),
            _ => config,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_num_ctx(mut self, num_ctx: u32) -> Self {
        self.num_ctx = num_ctx;
        self
    }

    pub fn with_num_predict(mut self, num_predict: i32) -> Self {
        self.num_predict = Some(num_predict);
        self
    }

    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }
}

/// Cancels whatever generation the session has in flight.
///
/// Cheap to clone and safe to use from another task while a turn runs.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    epoch: Arc<watch::Sender<u64>>,
    generating: Arc<AtomicBool>,
}

impl CancelHandle {
    fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            epoch: Arc::new(tx),
            generating: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancel the generation in flight, if any.
    pub fn cancel(&self) {
        self.epoch.send_modify(|epoch| *epoch = epoch.wrapping_add(1));
    }

    /// Cancel the generation in flight and report whether there was one.
    pub fn interrupt(&self) -> bool {
        let generating = self.is_generating();
        if generating {
            self.cancel();
        }
        generating
    }

    pub fn is_generating(&self) -> bool {
        self.generating.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.epoch.subscribe()
    }

    fn begin(&self) -> GeneratingGuard {
        self.generating.store(true, Ordering::SeqCst);
        GeneratingGuard(self.generating.clone())
    }
}

/// Clears the generating flag when the turn's generation ends, however it ends.
struct GeneratingGuard(Arc<AtomicBool>);

impl Drop for GeneratingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Result of one completed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Narrative text with tags removed.
    pub narrative: String,

    /// Commands applied to memory, in application order.
    pub commands: Vec<Command>,

    /// Movement detected in the player's input.
    pub movement: Option<MovementIntent>,
}

/// A text adventure narrated by a language model.
pub struct AdventureSession<B: Backend> {
    backend: B,
    config: SessionConfig,
    memory: ConversationMemory,
    cancel: CancelHandle,
    store: Option<Arc<dyn Storage>>,
}

impl<B: Backend> AdventureSession<B> {
    pub fn new(backend: B, config: SessionConfig) -> Self {
        Self {
            backend,
            config,
            memory: ConversationMemory::new(),
            cancel: CancelHandle::new(),
            store: None,
        }
    }

    /// Save to `store` after every completed turn.
    pub fn with_store(mut self, store: Arc<dyn Storage>) -> Self {
        self.store = Some(store);
        self
    }

    /// Process a player action and stream the narrator's response.
    ///
    /// `on_text` receives the cleaned narrative so far each time it grows.
    /// Commands are applied once the generation completes; if it fails, is
    /// cancelled or times out, memory is left untouched.
    pub async fn player_action<F>(
        &mut self,
        input: &str,
        mut on_text: F,
    ) -> Result<TurnOutcome, SessionError>
    where
        F: FnMut(&str) + Send,
    {
        // A new turn supersedes anything still in flight.
        self.cancel.cancel();
        let mut cancelled = self.cancel.subscribe();
        let generating = self.cancel.begin();

        let movement = detect_movement(input);
        let request = self.build_request(input, movement.as_ref());
        info!(model = %self.config.model, ?movement, "starting turn");

        let secs = self.config.generation_timeout.as_secs();
        let generation = stream_generation(&self.backend, request, &mut on_text);

        let (raw, context) = tokio::select! {
            result = tokio::time::timeout(self.config.generation_timeout, generation) => match result {
                Ok(completed) => completed?,
                Err(_) => {
                    warn!(secs, "generation timed out");
                    return Err(SessionError::Timeout { secs });
                }
            },
            Ok(()) = cancelled.changed() => {
                info!("turn cancelled");
                return Err(SessionError::Cancelled);
            }
        };
        drop(generating);

        let parsed = parse_completed(&raw);

        self.memory.append_message(ChatMessage::user(input));
        self.memory.append_message(ChatMessage::assistant(parsed.text.clone()));
        self.memory.set_context(context);
        self.memory.apply_commands(&parsed.commands);
        info!(commands = parsed.commands.len(), "turn complete");

        if let Err(e) = self.save().await {
            warn!(error = %e, "autosave failed");
        }

        Ok(TurnOutcome {
            narrative: parsed.text,
            commands: parsed.commands,
            movement,
        })
    }

    fn build_request(&self, input: &str, movement: Option<&MovementIntent>) -> GenerateRequest {
        let mut sections = Vec::new();
        let summary = self.memory.context_summary();
        if !summary.is_empty() {
            sections.push(summary);
        }
        sections.push(input.trim().to_string());
        if let Some(intent) = movement {
            sections.push(intent.directive());
        }

        let request = GenerateRequest::new(sections.join("\n\n"))
            .with_model(&self.config.model)
            .with_system(&self.config.system_prompt)
            .with_context(self.memory.context().map(<[i64]>::to_vec))
            .with_num_ctx(self.config.num_ctx);

        match self.config.num_predict {
            Some(n) => request.with_num_predict(n),
            None => request,
        }
    }

    /// Handle for cancelling from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Cancel the generation in flight, if any.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Switch the narrating model.
    ///
    /// The old model is unloaded from the server; a failure to do so is
    /// logged and otherwise ignored. The continuation token belongs to the
    /// old model and is dropped.
    pub async fn switch_model(&mut self, model: impl Into<String>) {
        self.cancel.cancel();

        let model = model.into();
        let previous = std::mem::replace(&mut self.config.model, model.clone());
        if previous != model {
            if let Err(e) = self.backend.unload_model(&previous).await {
                warn!(model = %previous, error = %e, "failed to unload model");
            }
        }

        self.memory.set_context(None);
        info!(from = %previous, to = %model, "switched model");
    }

    /// Models installed on the server.
    pub async fn available_models(&self) -> Result<Vec<ModelInfo>, SessionError> {
        Ok(self.backend.list_models().await?)
    }

    /// Keep only the most recent `max_messages` and restart the server-side
    /// context.
    pub fn trim_history(&mut self, max_messages: usize) {
        self.memory.trim(max_messages);
    }

    /// Save to the configured store. Does nothing without one.
    pub async fn save(&self) -> Result<(), SessionError> {
        let Some(store) = &self.store else {
            return Ok(());
        };

        let saved = SavedAdventure::new(
            &self.config.model,
            &self.config.system_prompt,
            self.memory.clone(),
        );
        saved.save(store.as_ref(), &self.config.storage_key).await?;
        debug!(key = %self.config.storage_key, "saved adventure");
        Ok(())
    }

    /// Restore the stored adventure. Returns whether one was found.
    pub async fn restore(&mut self) -> Result<bool, SessionError> {
        let Some(store) = &self.store else {
            return Ok(false);
        };

        let Some(saved) = SavedAdventure::load(store.as_ref(), &self.config.storage_key).await?
        else {
            return Ok(false);
        };

        self.cancel.cancel();
        self.config.model = saved.model;
        self.config.system_prompt = saved.system_prompt;
        self.memory = saved.memory;
        info!(
            model = %self.config.model,
            messages = self.memory.messages().len(),
            "restored adventure"
        );
        Ok(true)
    }

    /// Forget the current adventure, including its stored copy.
    pub async fn new_adventure(&mut self) -> Result<(), SessionError> {
        self.cancel.cancel();
        self.memory.clear();
        if let Some(store) = &self.store {
            store.delete(&self.config.storage_key).await?;
        }
        info!("started a new adventure");
        Ok(())
    }

    /// Add a player note to the journal and save.
    pub async fn add_journal_entry(&mut self, text: impl Into<String>) -> Result<Uuid, SessionError> {
        let id = self.memory.add_journal_entry(text);
        self.save().await?;
        Ok(id)
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

/// Read a generation to the end, reporting display text as it grows.
async fn stream_generation<B, F>(
    backend: &B,
    request: GenerateRequest,
    on_text: &mut F,
) -> Result<(String, Option<Vec<i64>>), SessionError>
where
    B: Backend,
    F: FnMut(&str),
{
    let mut stream = backend.generate_stream(request).await?;
    let mut raw = String::new();
    let mut shown = String::new();
    let mut context = None;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;

        if !chunk.response.is_empty() {
            raw.push_str(&chunk.response);
            let text = display_text(&raw);
            if text != shown {
                on_text(&text);
                shown = text;
            }
        }

        if chunk.done {
            context = chunk.context;
            break;
        }
    }

    debug!(bytes = raw.len(), has_context = context.is_some(), "generation finished");
    Ok((raw, context))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config() {
        let config = SessionConfig::new()
            .with_model("mistral")
            .with_system_prompt("Be terse.")
            .with_num_ctx(8192)
            .with_num_predict(256)
            .with_generation_timeout(Duration::from_secs(30))
            .with_storage_key("slot-2");

        assert_eq!(config.model, "mistral");
        assert_eq!(config.system_prompt, "Be terse.");
        assert_eq!(config.num_ctx, 8192);
        assert_eq!(config.num_predict, Some(256));
        assert_eq!(config.generation_timeout, Duration::from_secs(30));
        assert_eq!(config.storage_key, "slot-2");
    }

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.num_ctx, 4096);
        assert_eq!(config.generation_timeout, Duration::from_secs(180));
        assert_eq!(config.storage_key, "text-adventure-state");
        assert!(config.system_prompt.contains("ITEM_ADD"));
    }

    #[test]
    fn test_error_visibility() {
        assert!(!SessionError::Cancelled.is_user_visible());
        assert!(SessionError::Timeout { secs: 180 }.is_user_visible());
        assert!(SessionError::Transport(ollama::Error::Network("refused".into())).is_user_visible());
    }

    #[test]
    fn test_timeout_message_is_distinct() {
        let timeout = SessionError::Timeout { secs: 180 }.player_message();
        let transport =
            SessionError::Transport(ollama::Error::Network("refused".into())).player_message();

        assert!(timeout.contains("loading the model"));
        assert!(!transport.contains("loading the model"));
        assert!(transport.contains("refused"));
    }

    #[tokio::test]
    async fn test_cancel_handle_wakes_subscribers() {
        let handle = CancelHandle::new();
        let mut rx = handle.subscribe();
        handle.clone().cancel();
        assert!(rx.changed().await.is_ok());
        assert_eq!(*rx.borrow(), 1);
    }
}
