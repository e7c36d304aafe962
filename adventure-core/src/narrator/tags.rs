//! The bracket tag grammar the narrator uses to announce state changes.
//!
//! Tags look like `[KEYWORD: field1|field2|field3]`:
//!
//! | Keyword | Fields |
//! |---|---|
//! | `ITEM_ADD` / `ADD_ITEM` | name, description?, quantity? |
//! | `LOCATION` | name, description? |
//! | `NPC` | name, location name?, description? |
//! | `EVENT` | description |
//! | `FACT` | fact, importance? |
//!
//! Keywords are case-insensitive. The last field of a tag runs to the closing
//! bracket and may contain pipes, quotes and punctuation; earlier fields end
//! at the next pipe. Parsing is pure: it never touches memory, so it is safe
//! to run repeatedly over a growing stream.

use super::commands::{Command, Importance, DEFAULT_ITEM_DESCRIPTION};
use regex::Regex;
use std::sync::LazyLock;

static TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[\s*([a-z_]+)\s*:([^\[\]]*)\]").expect("tag pattern is valid")
});

/// A tag that has started streaming in but is not closed yet.
static PARTIAL_TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\s*[A-Za-z_]*\s*(?::[^\[\]]*)?$").expect("partial tag pattern is valid")
});

static BLANK_RUN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("blank run pattern is valid"));

/// Narrative text with its tags stripped, plus the commands they encoded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedResponse {
    pub text: String,
    pub commands: Vec<Command>,
}

/// Extract every valid tag from `raw`.
///
/// Valid tags are removed from the returned text; unknown keywords and tags
/// with an empty name are left where they are. Runs of blank lines are
/// collapsed whether or not a tag was removed. Commands come back in
/// document order.
pub fn parse_tags(raw: &str) -> ParsedResponse {
    let mut text = String::with_capacity(raw.len());
    let mut commands = Vec::new();
    let mut copied_to = 0;

    for caps in TAG_PATTERN.captures_iter(raw) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let Some(command) = tag_command(&caps[1], &caps[2]) else {
            continue;
        };

        text.push_str(&raw[copied_to..whole.start()]);
        copied_to = whole.end();
        commands.push(command);
    }

    text.push_str(&raw[copied_to..]);
    let text = BLANK_RUN_PATTERN.replace_all(&text, "\n\n");

    ParsedResponse {
        text: text.trim().to_string(),
        commands,
    }
}

/// Clean text for showing a response that is still streaming.
///
/// Strips complete tags and hides a trailing tag that has not been closed
/// yet, so successive calls on a growing response only ever extend what the
/// player has already seen.
pub fn display_text(raw: &str) -> String {
    let mut text = parse_tags(raw).text;

    if let Some(partial) = PARTIAL_TAG_PATTERN.find(&text) {
        text.truncate(partial.start());
        text.truncate(text.trim_end().len());
    }

    text
}

fn tag_command(keyword: &str, body: &str) -> Option<Command> {
    let keyword = keyword.to_ascii_uppercase();
    let arity = match keyword.as_str() {
        "ITEM_ADD" | "ADD_ITEM" | "NPC" => 3,
        "LOCATION" | "FACT" => 2,
        "EVENT" => 1,
        _ => return None,
    };

    let fields: Vec<String> = body.splitn(arity, '|').map(clean_field).collect();
    let name = fields.first().filter(|f| !f.is_empty())?;
    let field = |i: usize| fields.get(i).map(String::as_str).filter(|f| !f.is_empty());

    let command = match keyword.as_str() {
        "ITEM_ADD" | "ADD_ITEM" => Command::add_item(
            name,
            field(1).unwrap_or(DEFAULT_ITEM_DESCRIPTION),
            field(2).and_then(parse_quantity).unwrap_or(1),
        ),
        "LOCATION" => Command::set_location(name, field(1).unwrap_or_default()),
        "NPC" => Command::add_npc(name, field(1), field(2).unwrap_or_default()),
        "EVENT" => Command::story_event(name),
        "FACT" => Command::story_fact(
            name,
            field(1).and_then(Importance::parse).unwrap_or(Importance::Major),
        ),
        _ => return None,
    };

    Some(command)
}

fn clean_field(raw: &str) -> String {
    const QUOTES: [(char, char); 3] = [('"', '"'), ('\'', '\''), ('“', '”')];

    let trimmed = raw.trim();
    let unquoted = QUOTES
        .iter()
        .find_map(|(open, close)| {
            trimmed
                .strip_prefix(*open)
                .and_then(|rest| rest.strip_suffix(*close))
        })
        .unwrap_or(trimmed);

    unquoted.trim().to_string()
}

/// Leading digits of a quantity field ("3 coins" is 3). Zero is no quantity.
fn parse_quantity(value: &str) -> Option<u32> {
    let digits: String = value.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok().filter(|q| *q > 0)
}
