//! Detection of player movement in free-form input.
//!
//! Narrators tend to drag journeys out over several turns or describe a
//! player who already arrived as still walking. A detected intent adds a
//! directive to the request that pins the narrator to the right framing.

use regex::Regex;
use std::sync::LazyLock;

static ARRIVAL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\b(?:i|we)\s+(?:finally\s+|have\s+)?(?:arrive|arrived)\s+(?:at|in)\s+(.+)",
        r"(?i)\b(?:i|we)\s+(?:finally\s+|have\s+)?(?:reach|reached)\s+((?:the|a|an)\s+.+)",
        r"(?i)\b(?:i|we)(?:\s+am|\s+are|'m|'re)\s+(?:now|finally)\s+(?:at|in|inside)\s+(.+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("arrival pattern is valid"))
    .collect()
});

static HOME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:go|head|walk|return|travel|run|hurry)\s+(?:back\s+)?(?:home|to\s+my\s+(?:home|room|house|quarters|bed))\b",
    )
    .expect("home pattern is valid")
});

static TRAVEL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:go|head|walk|travel|run|hurry|move|journey|return|ride|sail|set\s+off|make\s+my\s+way)\s+(?:back\s+)?(?:to|towards?|into)\s+(.+)",
    )
    .expect("travel pattern is valid")
});

/// What the player is trying to do with their position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MovementIntent {
    /// The player says they are already there.
    Arrival { destination: String },
    /// The player sets out for somewhere.
    Travel { destination: String },
    /// The player heads home.
    HomeTravel,
}

impl MovementIntent {
    /// Instruction appended to the request for this turn.
    pub fn directive(&self) -> String {
        match self {
            MovementIntent::Arrival { destination } => format!(
                "[Directive: The player has already arrived at {destination}. Describe them \
                 present there now. Do not narrate any further travel.]"
            ),
            MovementIntent::Travel { destination } => format!(
                "[Directive: The player travels to {destination}. Complete the journey within \
                 this response, using at most one sentence of travel narration, and tag the \
                 destination with [LOCATION: name|description].]"
            ),
            MovementIntent::HomeTravel => "[Directive: The player travels home to their room. \
                 Complete the journey within this response, using at most one sentence of \
                 travel narration, and tag the destination with [LOCATION: name|description].]"
                .to_string(),
        }
    }
}

/// Classify player input. Arrival wins over home travel, which wins over
/// generic travel.
pub fn detect_movement(input: &str) -> Option<MovementIntent> {
    let arrival = ARRIVAL_PATTERNS
        .iter()
        .find_map(|pattern| destination(pattern, input));
    if let Some(destination) = arrival {
        return Some(MovementIntent::Arrival { destination });
    }

    if HOME_PATTERN.is_match(input) {
        return Some(MovementIntent::HomeTravel);
    }

    destination(&TRAVEL_PATTERN, input).map(|destination| MovementIntent::Travel { destination })
}

fn destination(pattern: &Regex, input: &str) -> Option<String> {
    let raw = pattern.captures(input)?.get(1)?.as_str();
    let place = raw
        .split(['.', '!', '?', ',', ';'])
        .next()
        .unwrap_or_default()
        .trim();
    (!place.is_empty()).then(|| place.to_string())
}
