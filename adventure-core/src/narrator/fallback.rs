//! Heuristic extraction for narrators that forget to tag.
//!
//! Tags are authoritative. These patterns only fill a category the tags left
//! empty, except facts, which are always mined because they are supplementary
//! memory rather than a primary state channel. False positives are kept in
//! check by an exclusion vocabulary and a length window.

use super::commands::{Command, CommandCategory, Importance};
use super::tags::ParsedResponse;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Description given to items inferred from prose.
pub const INFERRED_ITEM_DESCRIPTION: &str = "Picked up during your travels.";

/// Accepted length of an inferred fact, in characters.
const FACT_LENGTH: std::ops::RangeInclusive<usize> = 15..=100;

/// Generic nouns that show up after "you take" and friends but are never
/// something the player carries away.
const EXCLUDED_NOUNS: &[&str] = &[
    "moment", "moments", "shadow", "shadows", "door", "doors", "breath", "step", "steps", "look",
    "glance", "seat", "turn", "chance", "note", "notice", "deep", "time", "hand", "hands", "way",
    "path", "lead", "stock", "place", "rest", "aim", "care", "advantage", "silence", "sight",
    "cover", "hold", "heart", "offense", "part", "charge", "control", "stand",
];

/// Pronouns, determiners and negations that stand in for a thing without
/// naming it.
const EXCLUDED_WORDS: &[&str] = &[
    "it", "them", "this", "that", "these", "those", "one", "ones", "him", "her", "all", "both",
    "nothing", "everything", "something", "anything", "none", "any", "each", "either", "neither",
    "more", "less", "another", "other", "others", "what", "whatever",
];

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("fallback pattern is valid")
}

/// A short noun phrase, ended by punctuation or a linking word.
const ITEM_PHRASE: &str = r"(?:the\s+|a\s+|an\s+|some\s+|your\s+)?([a-z][a-z'\- ]{1,40}?)";
const ITEM_END: &str = r"(?:[.,;:!?]|\s+(?:and|from|off|out|with|into|to|as|in|which|that|before)\b|$)";

static ITEM_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        compile(&format!(
            r"(?im)\byou\s+(?:carefully\s+|quickly\s+)?(?:pick\s+up|take|grab|obtain|receive|acquire|pocket)\s+{ITEM_PHRASE}{ITEM_END}"
        )),
        compile(&format!(r"(?im)\b(?:hands|gives|tosses)\s+you\s+{ITEM_PHRASE}{ITEM_END}")),
        compile(&format!(r"(?im)\byou\s+now\s+(?:have|carry|hold)\s+{ITEM_PHRASE}{ITEM_END}")),
    ]
});

const PLACE_PHRASE: &str = r"(?:the\s+|a\s+|an\s+)?([a-z][a-z'\- ]{2,50}?)";
const PLACE_END: &str = r"(?:[.,;:!?]|\s+(?:and|where|with|as|at|which|that|before)\b|$)";

static LOCATION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        compile(&format!(
            r"(?im)\byou\s+(?:finally\s+)?(?:arrive\s+at|arrive\s+in|enter|reach|step\s+into|walk\s+into|stride\s+into)\s+{PLACE_PHRASE}{PLACE_END}"
        )),
        compile(&format!(r"(?im)\b(?:you\s+are\s+|you're\s+)?standing\s+(?:in|at|inside)\s+{PLACE_PHRASE}{PLACE_END}")),
        compile(&format!(
            r"(?im)\b(?:gate|gates|door|doors)\s+(?:opens?|swings?\s+open|creaks?\s+open)\s+(?:onto|into|to)\s+{PLACE_PHRASE}{PLACE_END}"
        )),
    ]
});

/// Fact patterns with the importance given to their matches.
static FACT_PATTERNS: LazyLock<Vec<(Regex, Importance)>> = LazyLock::new(|| {
    vec![
        (
            compile(r"(?i)\byou\s+(?:discover|learn|realize|realise|notice)\s+(?:that\s+)?([^.!?\n]+)"),
            Importance::Minor,
        ),
        (
            compile(r#"(?i)["“]([^"”\n]+)["”]\s*(?:is\s+|are\s+|was\s+)?(?:written|inscribed|carved|etched|scrawled)"#),
            Importance::Major,
        ),
        (
            compile(r#"(?i)\b(?:written|inscribed|carved|etched|scrawled)\b[^"“\n]{0,40}["“]([^"”\n]+)["”]"#),
            Importance::Major,
        ),
        (
            compile(r"(?i)\b((?:a|the)\s+(?:secret|hidden)\s+[^.!?\n]+)"),
            Importance::Major,
        ),
    ]
});

/// Add fallback commands to a tag parse of a completed response.
///
/// Items and locations are inferred only when the tags produced none of
/// their kind. Fallback commands are appended after the tag commands: items,
/// then the location, then facts.
pub fn fill_gaps(parsed: &mut ParsedResponse) {
    let has = |category| parsed.commands.iter().any(|c| c.category() == category);
    let has_items = has(CommandCategory::Item);
    let has_location = has(CommandCategory::Location);

    let mut inferred = Vec::new();
    if !has_items {
        inferred.extend(infer_items(&parsed.text));
    }
    if !has_location {
        inferred.extend(infer_location(&parsed.text));
    }
    inferred.extend(infer_facts(&parsed.text));

    parsed.commands.extend(inferred);
}

/// Every acquisition phrase in the text, in document order, one per name.
pub fn infer_items(text: &str) -> Vec<Command> {
    let mut found: Vec<(usize, String)> = Vec::new();
    for pattern in ITEM_PATTERNS.iter() {
        for caps in pattern.captures_iter(text) {
            if let Some(name) = caps.get(1) {
                found.push((name.start(), name.as_str().to_string()));
            }
        }
    }
    found.sort_by_key(|(pos, _)| *pos);

    let mut seen = HashSet::new();
    found
        .into_iter()
        .filter_map(|(_, raw)| clean_name(&raw))
        .filter(|name| seen.insert(name.to_lowercase()))
        .map(|name| Command::add_item(name, INFERRED_ITEM_DESCRIPTION, 1))
        .collect()
}

/// The first arrival phrase of the first pattern that matches at all.
pub fn infer_location(text: &str) -> Option<Command> {
    LOCATION_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures_iter(text)
            .filter_map(|caps| caps.get(1).and_then(|m| clean_name(m.as_str())))
            .next()
            .map(|name| Command::set_location(capitalize(&name), ""))
    })
}

/// Discovery phrases, inscriptions and secrets within the length window.
pub fn infer_facts(text: &str) -> Vec<Command> {
    let mut seen = HashSet::new();
    let mut facts = Vec::new();

    for (pattern, importance) in FACT_PATTERNS.iter() {
        for caps in pattern.captures_iter(text) {
            let Some(capture) = caps.get(1) else {
                continue;
            };
            let fact = capture.as_str().trim();
            if !FACT_LENGTH.contains(&fact.chars().count()) {
                continue;
            }
            if seen.insert(fact.to_lowercase()) {
                facts.push(Command::story_fact(capitalize(fact), *importance));
            }
        }
    }

    facts
}

/// Trim a captured phrase and reject generic nouns and stand-in words.
fn clean_name(raw: &str) -> Option<String> {
    let name = raw.trim().trim_matches(|c: char| c == '\'' || c == '-').trim();
    let words: Vec<String> = name.split_whitespace().map(str::to_lowercase).collect();
    let head = words.last()?;
    if EXCLUDED_NOUNS.contains(&head.as_str()) || EXCLUDED_WORDS.contains(&head.as_str()) {
        return None;
    }
    if words.iter().all(|w| EXCLUDED_WORDS.contains(&w.as_str())) {
        return None;
    }
    Some(name.to_string())
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
