//! Conversation memory for long-running adventures.
//!
//! Holds everything the session remembers between turns: the chat log, the
//! continuation token, and the world state the narrator has established.
//! Every collection that grows with play has a cap and an eviction order, so
//! memory stays bounded no matter how long the adventure runs.

use crate::context::build_context_summary;
use crate::narrator::{Command, Importance};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, warn};
use uuid::Uuid;

/// Maximum chat messages kept in the log.
pub const MAX_MESSAGES: usize = 50;

/// Maximum story events kept.
pub const MAX_EVENTS: usize = 10;

/// Maximum facts kept before eviction.
pub const MAX_FACTS: usize = 20;

/// Longest continuation token that is kept.
pub const MAX_CONTEXT_LEN: usize = 20_000;

/// Events rendered into the context reminder.
const REMINDER_EVENTS: usize = 5;

/// The author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A message in the chat log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// Something the player carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: String,
    pub name: String,
    pub description: String,
    pub quantity: u32,
}

/// A place the player has been.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    pub name: String,
    pub description: String,
    pub visited_at: DateTime<Utc>,
}

/// A character the player has met.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Npc {
    pub id: String,
    pub name: String,
    pub description: String,
    pub current_location_id: Option<String>,
    pub first_met_at: DateTime<Utc>,
}

/// Something that happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryEvent {
    pub id: Uuid,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

/// A lasting truth about the world, ranked for eviction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryFact {
    pub id: Uuid,
    pub fact: String,
    pub importance: Importance,
    pub timestamp: DateTime<Utc>,
}

/// A note the player wrote for themselves. Never sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: Uuid,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Bounded state of one adventure.
///
/// Owned by the session and mutated only through this narrow API. The
/// continuation token is runtime-only and is never serialized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationMemory {
    messages: Vec<ChatMessage>,
    #[serde(skip)]
    context: Option<Vec<i64>>,
    inventory: Vec<InventoryItem>,
    locations: Vec<Location>,
    current_location_id: Option<String>,
    npcs: Vec<Npc>,
    events: VecDeque<StoryEvent>,
    facts: Vec<StoryFact>,
    journal: Vec<JournalEntry>,
    #[serde(skip)]
    generations_applied: u64,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Chat log
    // =========================================================================

    /// Append to the log, dropping the oldest messages beyond the cap.
    pub fn append_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
        if self.messages.len() > MAX_MESSAGES {
            let excess = self.messages.len() - MAX_MESSAGES;
            self.messages.drain(..excess);
        }
    }

    /// Keep only the most recent `max_messages`.
    ///
    /// The continuation token encodes the untrimmed conversation, so it is
    /// cleared as well.
    pub fn trim(&mut self, max_messages: usize) {
        if self.messages.len() > max_messages {
            let excess = self.messages.len() - max_messages;
            self.messages.drain(..excess);
        }
        self.context = None;
        debug!(kept = self.messages.len(), "trimmed chat log");
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    // =========================================================================
    // Continuation token
    // =========================================================================

    /// Store the continuation token from the last generation.
    ///
    /// A token longer than [`MAX_CONTEXT_LEN`] is dropped, not truncated: a
    /// truncated token would describe a conversation that never happened.
    pub fn set_context(&mut self, context: Option<Vec<i64>>) {
        self.context = match context {
            Some(tokens) if tokens.len() > MAX_CONTEXT_LEN => {
                warn!(
                    len = tokens.len(),
                    max = MAX_CONTEXT_LEN,
                    "continuation token too large, dropping it"
                );
                None
            }
            other => other,
        };
    }

    pub fn context(&self) -> Option<&[i64]> {
        self.context.as_deref()
    }

    // =========================================================================
    // World state
    // =========================================================================

    /// Apply the commands of one completed generation, in order.
    pub fn apply_commands(&mut self, commands: &[Command]) {
        let now = Utc::now();

        for command in commands {
            match command {
                Command::AddItem {
                    id,
                    name,
                    description,
                    quantity,
                } => {
                    if id.is_empty() {
                        continue;
                    }
                    match self.inventory.iter_mut().find(|item| item.id == *id) {
                        Some(item) => item.quantity = item.quantity.saturating_add(*quantity),
                        None => self.inventory.push(InventoryItem {
                            id: id.clone(),
                            name: name.clone(),
                            description: description.clone(),
                            quantity: *quantity,
                        }),
                    }
                }
                Command::SetLocation {
                    id,
                    name,
                    description,
                } => {
                    if id.is_empty() {
                        continue;
                    }
                    if !self.locations.iter().any(|loc| loc.id == *id) {
                        self.locations.push(Location {
                            id: id.clone(),
                            name: name.clone(),
                            description: description.clone(),
                            visited_at: now,
                        });
                    }
                    self.current_location_id = Some(id.clone());
                }
                Command::AddNpc {
                    id,
                    name,
                    description,
                    location_id,
                } => {
                    if id.is_empty() {
                        continue;
                    }
                    let location = location_id
                        .clone()
                        .or_else(|| self.current_location_id.clone());
                    match self.npcs.iter_mut().find(|npc| npc.id == *id) {
                        Some(npc) => {
                            if location.is_some() {
                                npc.current_location_id = location;
                            }
                        }
                        None => self.npcs.push(Npc {
                            id: id.clone(),
                            name: name.clone(),
                            description: description.clone(),
                            current_location_id: location,
                            first_met_at: now,
                        }),
                    }
                }
                Command::StoryEvent { description } => {
                    self.events.push_back(StoryEvent {
                        id: Uuid::new_v4(),
                        description: description.clone(),
                        timestamp: now,
                    });
                    while self.events.len() > MAX_EVENTS {
                        self.events.pop_front();
                    }
                }
                Command::StoryFact { fact, importance } => {
                    self.remember(fact, *importance);
                }
            }
        }

        self.generations_applied += 1;
        debug!(count = commands.len(), "applied commands");
    }

    /// Record a fact unless an equal one (ignoring case) is already known.
    ///
    /// Returns whether the fact was added.
    pub fn remember(&mut self, fact: &str, importance: Importance) -> bool {
        let fact = fact.trim();
        if fact.is_empty() {
            return false;
        }

        let key = fact.to_lowercase();
        if self.facts.iter().any(|f| f.fact.to_lowercase() == key) {
            return false;
        }

        self.facts.push(StoryFact {
            id: Uuid::new_v4(),
            fact: fact.to_string(),
            importance,
            timestamp: Utc::now(),
        });

        if self.facts.len() > MAX_FACTS {
            self.evict_facts();
        }
        true
    }

    /// Drop facts beyond the cap: least severe first, oldest first within
    /// the same severity. Survivors keep their original order.
    pub fn evict_facts(&mut self) {
        if self.facts.len() <= MAX_FACTS {
            return;
        }

        let mut ranked: Vec<(usize, StoryFact)> =
            std::mem::take(&mut self.facts).into_iter().enumerate().collect();

        ranked.sort_by(|(ia, a), (ib, b)| {
            b.importance
                .cmp(&a.importance)
                .then(b.timestamp.cmp(&a.timestamp))
                .then(ib.cmp(ia))
        });
        let dropped = ranked.split_off(MAX_FACTS);
        ranked.sort_by_key(|(index, _)| *index);

        self.facts = ranked.into_iter().map(|(_, fact)| fact).collect();
        debug!(dropped = dropped.len(), "evicted facts");
    }

    /// Re-apply every cap. Used on memory that did not arrive through this
    /// API, such as a loaded save.
    pub fn normalize(&mut self) {
        if self.messages.len() > MAX_MESSAGES {
            let excess = self.messages.len() - MAX_MESSAGES;
            self.messages.drain(..excess);
        }
        while self.events.len() > MAX_EVENTS {
            self.events.pop_front();
        }
        self.evict_facts();
    }

    /// The location the player is at, if any has been established.
    pub fn current_location(&self) -> Option<&Location> {
        let id = self.current_location_id.as_deref()?;
        self.locations.iter().find(|loc| loc.id == id)
    }

    pub fn current_location_id(&self) -> Option<&str> {
        self.current_location_id.as_deref()
    }

    /// Characters at the current location.
    pub fn npcs_here(&self) -> Vec<&Npc> {
        let Some(here) = self.current_location_id.as_deref() else {
            return Vec::new();
        };
        self.npcs
            .iter()
            .filter(|npc| npc.current_location_id.as_deref() == Some(here))
            .collect()
    }

    /// The `count` most recent events, oldest first.
    pub fn recent_events(&self, count: usize) -> Vec<&StoryEvent> {
        let skip = self.events.len().saturating_sub(count);
        self.events.iter().skip(skip).collect()
    }

    pub fn inventory(&self) -> &[InventoryItem] {
        &self.inventory
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    pub fn npcs(&self) -> &[Npc] {
        &self.npcs
    }

    pub fn facts(&self) -> &[StoryFact] {
        &self.facts
    }

    /// Number of completed generations whose commands have been applied.
    pub fn generations_applied(&self) -> u64 {
        self.generations_applied
    }

    // =========================================================================
    // Journal
    // =========================================================================

    /// Add a player note and return its id.
    pub fn add_journal_entry(&mut self, text: impl Into<String>) -> Uuid {
        let entry = JournalEntry {
            id: Uuid::new_v4(),
            text: text.into(),
            timestamp: Utc::now(),
        };
        let id = entry.id;
        self.journal.push(entry);
        id
    }

    /// Remove a note. Returns whether it existed.
    pub fn remove_journal_entry(&mut self, id: Uuid) -> bool {
        let before = self.journal.len();
        self.journal.retain(|entry| entry.id != id);
        self.journal.len() != before
    }

    pub fn journal(&self) -> &[JournalEntry] {
        &self.journal
    }

    // =========================================================================
    // Context
    // =========================================================================

    /// Render the reminder re-sent with every request.
    pub fn context_summary(&self) -> String {
        build_context_summary(
            self.current_location(),
            &self.inventory,
            &self.npcs_here(),
            &self.recent_events(REMINDER_EVENTS),
            &self.facts,
        )
    }

    /// Forget everything and start a new adventure.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_creation() {
        let memory = ConversationMemory::new();
        assert!(memory.messages().is_empty());
        assert!(memory.current_location().is_none());
        assert!(memory.context().is_none());
        assert_eq!(memory.context_summary(), "");
    }

    #[test]
    fn test_message_log_is_bounded() {
        let mut memory = ConversationMemory::new();
        for i in 0..60 {
            memory.append_message(ChatMessage::user(format!("Message {i}")));
        }

        assert_eq!(memory.messages().len(), MAX_MESSAGES);
        assert_eq!(memory.messages()[0].content, "Message 10");
        assert_eq!(memory.messages()[49].content, "Message 59");
    }

    #[test]
    fn test_item_quantities_merge_across_calls() {
        let mut memory = ConversationMemory::new();
        let torch = Command::add_item("Torch", "Pitch-soaked", 1);

        memory.apply_commands(&[torch.clone()]);
        memory.apply_commands(&[torch]);

        assert_eq!(memory.inventory().len(), 1);
        assert_eq!(memory.inventory()[0].id, "torch");
        assert_eq!(memory.inventory()[0].quantity, 2);
        assert_eq!(memory.generations_applied(), 2);
    }

    #[test]
    fn test_first_location_record_wins_but_current_moves() {
        let mut memory = ConversationMemory::new();
        memory.apply_commands(&[
            Command::set_location("Harbor", "Gulls and tar"),
            Command::set_location("Market", "Loud"),
            Command::set_location("harbor", "Rewritten description"),
        ]);

        assert_eq!(memory.locations().len(), 2);
        let here = memory.current_location().unwrap();
        assert_eq!(here.id, "harbor");
        assert_eq!(here.name, "Harbor");
        assert_eq!(here.description, "Gulls and tar");
    }

    #[test]
    fn test_npc_moves_but_keeps_record() {
        let mut memory = ConversationMemory::new();
        memory.apply_commands(&[
            Command::set_location("Harbor", ""),
            Command::add_npc("Mira", None, "A smuggler"),
        ]);
        assert_eq!(memory.npcs_here().len(), 1);

        memory.apply_commands(&[
            Command::add_npc("Mira", Some("Lighthouse"), "Someone else entirely"),
        ]);

        let mira = &memory.npcs()[0];
        assert_eq!(memory.npcs().len(), 1);
        assert_eq!(mira.description, "A smuggler");
        assert_eq!(mira.current_location_id.as_deref(), Some("lighthouse"));
        assert!(memory.npcs_here().is_empty());
    }

    #[test]
    fn test_npc_keeps_location_when_none_is_known() {
        let mut memory = ConversationMemory::new();
        memory.apply_commands(&[Command::add_npc("Mira", Some("Lighthouse"), "")]);
        memory.apply_commands(&[Command::add_npc("Mira", None, "")]);

        assert!(memory.current_location_id().is_none());
        assert_eq!(memory.npcs()[0].current_location_id.as_deref(), Some("lighthouse"));
    }

    #[test]
    fn test_events_are_bounded() {
        let mut memory = ConversationMemory::new();
        let events: Vec<Command> = (0..15)
            .map(|i| Command::story_event(format!("Event {i}")))
            .collect();
        memory.apply_commands(&events);

        let recent = memory.recent_events(100);
        assert_eq!(recent.len(), MAX_EVENTS);
        assert_eq!(recent[0].description, "Event 5");
        assert_eq!(memory.recent_events(2)[1].description, "Event 14");
    }

    #[test]
    fn test_facts_deduplicate_ignoring_case() {
        let mut memory = ConversationMemory::new();
        assert!(memory.remember("The Well Is Cursed", Importance::Major));
        assert!(!memory.remember("  the well is cursed ", Importance::Critical));
        assert_eq!(memory.facts().len(), 1);
    }

    #[test]
    fn test_eviction_drops_oldest_minor() {
        let mut memory = ConversationMemory::new();
        memory.remember("The king is an impostor", Importance::Critical);
        for i in 0..20 {
            memory.remember(&format!("Minor detail number {i}"), Importance::Minor);
        }

        assert_eq!(memory.facts().len(), MAX_FACTS);
        assert_eq!(memory.facts()[0].fact, "The king is an impostor");
        assert!(!memory.facts().iter().any(|f| f.fact == "Minor detail number 0"));
        assert!(memory.facts().iter().any(|f| f.fact == "Minor detail number 1"));
        assert_eq!(memory.facts()[MAX_FACTS - 1].fact, "Minor detail number 19");
    }

    #[test]
    fn test_eviction_prefers_severity_over_age() {
        let mut memory = ConversationMemory::new();
        for i in 0..MAX_FACTS {
            memory.remember(&format!("Major detail number {i}"), Importance::Major);
        }
        memory.remember("A late minor detail", Importance::Minor);

        assert_eq!(memory.facts().len(), MAX_FACTS);
        assert!(memory.facts().iter().all(|f| f.importance == Importance::Major));
    }

    #[test]
    fn test_oversized_token_is_dropped() {
        let mut memory = ConversationMemory::new();
        memory.set_context(Some(vec![1; 25_000]));
        assert!(memory.context().is_none());

        memory.set_context(Some(vec![1; MAX_CONTEXT_LEN]));
        assert_eq!(memory.context().map(<[i64]>::len), Some(MAX_CONTEXT_LEN));
    }

    #[test]
    fn test_trim_clears_token() {
        let mut memory = ConversationMemory::new();
        for i in 0..10 {
            memory.append_message(ChatMessage::assistant(format!("Reply {i}")));
        }
        memory.set_context(Some(vec![1, 2, 3]));

        memory.trim(4);

        assert_eq!(memory.messages().len(), 4);
        assert_eq!(memory.messages()[0].content, "Reply 6");
        assert!(memory.context().is_none());
    }

    #[test]
    fn test_token_is_never_serialized() {
        let mut memory = ConversationMemory::new();
        memory.set_context(Some(vec![9, 9, 9]));
        memory.append_message(ChatMessage::system("Welcome"));

        let json = serde_json::to_value(&memory).unwrap();
        assert!(json.get("context").is_none());
        assert!(json.get("generations_applied").is_none());

        let restored: ConversationMemory = serde_json::from_value(json).unwrap();
        assert!(restored.context().is_none());
        assert_eq!(restored.messages().len(), 1);
    }

    #[test]
    fn test_journal() {
        let mut memory = ConversationMemory::new();
        let id = memory.add_journal_entry("Ask Mira about the lighthouse");
        assert_eq!(memory.journal().len(), 1);
        assert!(memory.remove_journal_entry(id));
        assert!(!memory.remove_journal_entry(id));
    }

    #[test]
    fn test_clear() {
        let mut memory = ConversationMemory::new();
        memory.apply_commands(&[Command::set_location("Harbor", "")]);
        memory.clear();
        assert!(memory.locations().is_empty());
        assert_eq!(memory.generations_applied(), 0);
    }
}
