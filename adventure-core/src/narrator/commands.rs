//! Typed game-state commands extracted from narrator output.

use serde::{Deserialize, Serialize};

/// Description used when an item tag carries none.
pub const DEFAULT_ITEM_DESCRIPTION: &str = "An item you picked up along the way.";

/// Derive the identity slug for an item, location or character name.
///
/// Trims, lowercases and collapses every whitespace run into one hyphen, so
/// "Rusty  Key" and " rusty key" both become `rusty-key`.
pub fn slugify(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

/// How much a remembered fact matters when memory has to evict.
///
/// Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Minor,
    Major,
    Critical,
}

impl Importance {
    /// Parse a tag field, accepting the usual synonyms.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "minor" | "low" => Some(Importance::Minor),
            "major" | "medium" | "normal" => Some(Importance::Major),
            "critical" | "high" => Some(Importance::Critical),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Importance::Minor => "minor",
            Importance::Major => "major",
            Importance::Critical => "critical",
        }
    }
}

/// A single game-state mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Command {
    AddItem {
        id: String,
        name: String,
        description: String,
        quantity: u32,
    },
    SetLocation {
        id: String,
        name: String,
        description: String,
    },
    AddNpc {
        id: String,
        name: String,
        description: String,
        /// Where the character is. `None` places them at the current
        /// location when the command is applied.
        location_id: Option<String>,
    },
    StoryEvent {
        description: String,
    },
    StoryFact {
        fact: String,
        importance: Importance,
    },
}

impl Command {
    pub fn add_item(name: impl Into<String>, description: impl Into<String>, quantity: u32) -> Self {
        let name = name.into();
        Command::AddItem {
            id: slugify(&name),
            name,
            description: description.into(),
            quantity: quantity.max(1),
        }
    }

    pub fn set_location(name: impl Into<String>, description: impl Into<String>) -> Self {
        let name = name.into();
        Command::SetLocation {
            id: slugify(&name),
            name,
            description: description.into(),
        }
    }

    pub fn add_npc(
        name: impl Into<String>,
        location_name: Option<&str>,
        description: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Command::AddNpc {
            id: slugify(&name),
            name,
            description: description.into(),
            location_id: location_name.map(slugify).filter(|id| !id.is_empty()),
        }
    }

    pub fn story_event(description: impl Into<String>) -> Self {
        Command::StoryEvent {
            description: description.into(),
        }
    }

    pub fn story_fact(fact: impl Into<String>, importance: Importance) -> Self {
        Command::StoryFact {
            fact: fact.into(),
            importance,
        }
    }

    /// The category this command belongs to, used to decide fallbacks.
    pub fn category(&self) -> CommandCategory {
        match self {
            Command::AddItem { .. } => CommandCategory::Item,
            Command::SetLocation { .. } => CommandCategory::Location,
            Command::AddNpc { .. } => CommandCategory::Npc,
            Command::StoryEvent { .. } => CommandCategory::Event,
            Command::StoryFact { .. } => CommandCategory::Fact,
        }
    }
}

/// Coarse command kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCategory {
    Item,
    Location,
    Npc,
    Event,
    Fact,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Rusty Key"), "rusty-key");
        assert_eq!(slugify("  The   Old\tMill "), "the-old-mill");
        assert_eq!(slugify("TORCH"), "torch");
        assert_eq!(slugify("   "), "");
    }

    #[test]
    fn test_same_name_collides() {
        let a = Command::add_item("Silver Dagger", "", 1);
        let b = Command::add_item("silver   dagger", "", 1);
        let (Command::AddItem { id: a, .. }, Command::AddItem { id: b, .. }) = (a, b) else {
            panic!("expected items");
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_npc_location_slug() {
        let cmd = Command::add_npc("Mira", Some("The Rusty Anchor"), "A barkeep");
        assert_eq!(
            cmd,
            Command::AddNpc {
                id: "mira".to_string(),
                name: "Mira".to_string(),
                description: "A barkeep".to_string(),
                location_id: Some("the-rusty-anchor".to_string()),
            }
        );
        let cmd = Command::add_npc("Mira", Some("  "), "");
        assert!(matches!(cmd, Command::AddNpc { location_id: None, .. }));
    }

    #[test]
    fn test_importance_order_and_parse() {
        assert!(Importance::Minor < Importance::Major);
        assert!(Importance::Major < Importance::Critical);
        assert_eq!(Importance::parse(" HIGH "), Some(Importance::Critical));
        assert_eq!(Importance::parse("whatever"), None);
    }

    #[test]
    fn test_zero_quantity_becomes_one() {
        assert!(matches!(
            Command::add_item("Coin", "", 0),
            Command::AddItem { quantity: 1, .. }
        ));
    }
}
