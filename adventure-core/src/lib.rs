//! Text adventure engine narrated by a local language model.
//!
//! This crate provides:
//! - A tag grammar the narrator uses to announce state changes, with
//!   heuristic fallbacks for when it forgets
//! - Bounded conversation memory with priority-aware fact eviction
//! - Context reminders and movement directives injected into each request
//! - A streaming, cancellable turn driver
//! - Adventure persistence over a key/value store
//!
//! # Quick Start
//!
//! ```ignore
//! use adventure_core::{AdventureSession, SessionConfig};
//! use ollama::Ollama;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Ollama::from_env()?;
//!     let mut session = AdventureSession::new(client, SessionConfig::from_env());
//!
//!     let outcome = session
//!         .player_action("I push open the tavern door", |text| println!("{text}"))
//!         .await?;
//!     println!("{} state changes", outcome.commands.len());
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod memory;
pub mod movement;
pub mod narrator;
pub mod persist;
pub mod session;
pub mod testing;

// Primary public API
pub use context::build_context_summary;
pub use memory::{ChatMessage, ConversationMemory, Role};
pub use movement::{detect_movement, MovementIntent};
pub use narrator::{Backend, Command, Importance};
pub use persist::{FileStore, MemoryStore, PersistError, SavedAdventure, Storage, STORAGE_KEY};
pub use session::{AdventureSession, CancelHandle, SessionConfig, SessionError, TurnOutcome};
pub use testing::{ScriptedBackend, Script, TestHarness};
