//! Testing utilities for adventures.
//!
//! This module provides tools for integration testing:
//! - `ScriptedBackend` for deterministic generations without a model server
//! - `TestHarness` for scripted multi-turn scenarios
//! - Assertion helpers for verifying memory
//!
//! Scripts are raw transport text, so every scripted generation goes through
//! the real stream decoder exactly as a server response would.

use crate::memory::ConversationMemory;
use crate::narrator::{Backend, ChunkStream};
use crate::session::{AdventureSession, SessionConfig, SessionError, TurnOutcome};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use ollama::{GenerateChunk, GenerateRequest, ModelInfo};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Fragment length used by [`Script::narrate`].
const DEFAULT_FRAGMENT_LEN: usize = 7;

/// One scripted generation.
#[derive(Debug, Clone)]
pub enum Script {
    /// Transport fragments delivered in order, then end of stream.
    Fragments(Vec<String>),
    /// The server refuses the request.
    Refuse(String),
    /// Fragments, then a transport failure mid-stream.
    Break { fragments: Vec<String>, error: String },
    /// Fragments, then silence until cancelled.
    Stall(Vec<String>),
}

impl Script {
    /// A complete generation of `text`, split into word tokens and then
    /// into small transport fragments that cut through the JSON.
    pub fn narrate(text: &str) -> Self {
        Self::narrate_in(text, DEFAULT_FRAGMENT_LEN, None)
    }

    /// Like [`Script::narrate`], with a fragment length and a continuation
    /// token on the final chunk.
    pub fn narrate_in(text: &str, fragment_len: usize, context: Option<Vec<i64>>) -> Self {
        let mut chunks: Vec<GenerateChunk> =
            tokens(text).into_iter().map(GenerateChunk::text).collect();
        chunks.push(GenerateChunk::finished(context));
        Script::Fragments(split_transport(&chunks, fragment_len))
    }

    /// `text` streams in, then the generation hangs.
    pub fn stall_after(text: &str) -> Self {
        let chunks: Vec<GenerateChunk> = tokens(text).into_iter().map(GenerateChunk::text).collect();
        Script::Stall(split_transport(&chunks, DEFAULT_FRAGMENT_LEN))
    }

    /// `text` streams in, then the connection drops.
    pub fn break_after(text: &str, error: impl Into<String>) -> Self {
        let chunks: Vec<GenerateChunk> = tokens(text).into_iter().map(GenerateChunk::text).collect();
        Script::Break {
            fragments: split_transport(&chunks, DEFAULT_FRAGMENT_LEN),
            error: error.into(),
        }
    }
}

/// Split text into word tokens that keep their trailing whitespace.
fn tokens(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if !c.is_whitespace() && current.ends_with(char::is_whitespace) {
            out.push(std::mem::take(&mut current));
        }
        current.push(c);
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Serialize chunks as newline-delimited JSON and cut the bytes into
/// fragments of about `len` characters.
fn split_transport(chunks: &[GenerateChunk], len: usize) -> Vec<String> {
    let body: String = chunks
        .iter()
        .filter_map(|chunk| serde_json::to_string(chunk).ok())
        .map(|line| line + "\n")
        .collect();

    let chars: Vec<char> = body.chars().collect();
    chars
        .chunks(len.max(1))
        .map(|piece| piece.iter().collect())
        .collect()
}

#[derive(Debug, Default)]
struct ScriptedState {
    scripts: VecDeque<Script>,
    requests: Vec<GenerateRequest>,
    unloaded: Vec<String>,
    models: Vec<ModelInfo>,
}

/// A backend that replays queued scripts.
///
/// Clones share state, so a test can keep one to inspect requests after
/// handing another to a session.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBackend {
    state: Arc<Mutex<ScriptedState>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue scripts in order.
    pub fn with_scripts(scripts: impl IntoIterator<Item = Script>) -> Self {
        let backend = Self::new();
        for script in scripts {
            backend.push(script);
        }
        backend
    }

    pub fn push(&self, script: Script) {
        self.state().scripts.push_back(script);
    }

    /// Models reported by `list_models`.
    pub fn set_models(&self, names: &[&str]) {
        self.state().models = names
            .iter()
            .map(|name| ModelInfo {
                name: name.to_string(),
                modified_at: String::new(),
                size: 0,
                digest: String::new(),
            })
            .collect();
    }

    /// Every generation request received so far.
    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.state().requests.clone()
    }

    pub fn last_request(&self) -> Option<GenerateRequest> {
        self.state().requests.last().cloned()
    }

    /// Models unloaded so far, in order.
    pub fn unloaded(&self) -> Vec<String> {
        self.state().unloaded.clone()
    }

    pub fn remaining_scripts(&self) -> usize {
        self.state().scripts.len()
    }

    fn state(&self) -> MutexGuard<'_, ScriptedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn generate_stream(&self, request: GenerateRequest) -> Result<ChunkStream, ollama::Error> {
        let script = {
            let mut state = self.state();
            state.requests.push(request);
            state.scripts.pop_front()
        };

        let fragments = |fragments: Vec<String>| {
            stream::iter(fragments.into_iter().map(Ok::<String, String>))
        };

        let stream = match script {
            None => return Err(ollama::Error::Config("no scripted generation left".to_string())),
            Some(Script::Refuse(message)) => return Err(ollama::Error::Network(message)),
            Some(Script::Fragments(parts)) => ollama::spawn_decoder(fragments(parts)),
            Some(Script::Break { fragments: parts, error }) => {
                ollama::spawn_decoder(fragments(parts).chain(stream::iter([Err(error)])))
            }
            Some(Script::Stall(parts)) => {
                ollama::spawn_decoder(fragments(parts).chain(stream::pending()))
            }
        };

        Ok(Box::pin(stream))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, ollama::Error> {
        Ok(self.state().models.clone())
    }

    async fn unload_model(&self, model: &str) -> Result<(), ollama::Error> {
        self.state().unloaded.push(model.to_string());
        Ok(())
    }
}

/// Test harness for scripted adventures.
pub struct TestHarness {
    pub session: AdventureSession<ScriptedBackend>,
    pub backend: ScriptedBackend,
    /// Every display update of the last turn.
    pub updates: Vec<String>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        let backend = ScriptedBackend::new();
        Self {
            session: AdventureSession::new(backend.clone(), config),
            backend,
            updates: Vec::new(),
        }
    }

    /// Queue the narrator's next response.
    pub fn expect_narration(&mut self, text: &str) -> &mut Self {
        self.backend.push(Script::narrate(text));
        self
    }

    pub fn expect(&mut self, script: Script) -> &mut Self {
        self.backend.push(script);
        self
    }

    /// Play one turn, recording display updates.
    pub async fn input(&mut self, text: &str) -> Result<TurnOutcome, SessionError> {
        let mut updates = Vec::new();
        let result = self
            .session
            .player_action(text, |shown| updates.push(shown.to_string()))
            .await;
        self.updates = updates;
        result
    }

    pub fn memory(&self) -> &ConversationMemory {
        self.session.memory()
    }

    /// The text the player saw last.
    pub fn last_shown(&self) -> Option<&str> {
        self.updates.last().map(String::as_str)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Assertion helpers
// ============================================================================

#[track_caller]
pub fn assert_has_item(memory: &ConversationMemory, id: &str, quantity: u32) {
    let item = memory.inventory().iter().find(|item| item.id == id);
    match item {
        Some(item) => assert_eq!(
            item.quantity, quantity,
            "expected {quantity} of '{id}', found {}",
            item.quantity
        ),
        None => panic!(
            "expected item '{id}' in inventory: {:?}",
            memory.inventory().iter().map(|i| &i.id).collect::<Vec<_>>()
        ),
    }
}

#[track_caller]
pub fn assert_no_item(memory: &ConversationMemory, id: &str) {
    assert!(
        !memory.inventory().iter().any(|item| item.id == id),
        "expected no item '{id}'"
    );
}

#[track_caller]
pub fn assert_at(memory: &ConversationMemory, location_id: &str) {
    assert_eq!(memory.current_location_id(), Some(location_id));
}

#[track_caller]
pub fn assert_npc_here(memory: &ConversationMemory, npc_id: &str) {
    assert!(
        memory.npcs_here().iter().any(|npc| npc.id == npc_id),
        "expected '{npc_id}' at the current location"
    );
}
