//! The reminder re-sent to the narrator with every request.

use crate::memory::{InventoryItem, Location, Npc, StoryEvent, StoryFact};
use crate::narrator::Importance;

/// Render the parts of memory the narrator should not lose track of.
///
/// Lines appear in a fixed order: critical facts, major facts, location,
/// characters present, inventory, recent events. Empty sections are left
/// out, and minor facts are never rendered. Returns an empty string when
/// there is nothing to remind.
pub fn build_context_summary(
    location: Option<&Location>,
    inventory: &[InventoryItem],
    npcs_here: &[&Npc],
    recent_events: &[&StoryEvent],
    facts: &[StoryFact],
) -> String {
    let mut lines = Vec::new();

    let facts_of = |importance: Importance| {
        facts
            .iter()
            .filter(|f| f.importance == importance)
            .map(|f| f.fact.as_str())
            .collect::<Vec<_>>()
    };

    let critical = facts_of(Importance::Critical);
    if !critical.is_empty() {
        lines.push(format!("Critical facts: {}", critical.join("; ")));
    }

    let major = facts_of(Importance::Major);
    if !major.is_empty() {
        lines.push(format!("Known facts: {}", major.join("; ")));
    }

    if let Some(location) = location {
        lines.push(format!("Current location: {}", location.name));
    }

    if !npcs_here.is_empty() {
        let names: Vec<&str> = npcs_here.iter().map(|npc| npc.name.as_str()).collect();
        lines.push(format!("Characters present: {}", names.join(", ")));
    }

    if !inventory.is_empty() {
        let items: Vec<String> = inventory
            .iter()
            .map(|item| {
                if item.quantity > 1 {
                    format!("{} x{}", item.name, item.quantity)
                } else {
                    item.name.clone()
                }
            })
            .collect();
        lines.push(format!("Inventory: {}", items.join(", ")));
    }

    if !recent_events.is_empty() {
        let events: Vec<&str> = recent_events
            .iter()
            .map(|event| event.description.as_str())
            .collect();
        lines.push(format!("Recent events: {}", events.join("; ")));
    }

    if lines.is_empty() {
        return String::new();
    }
    format!("[Story so far]\n{}", lines.join("\n"))
}
