//! Session state and entity extraction

use chrono::{DateTime, Utc};
use prism_common::reference::{RefKind, StructuralRef};
use prism_common::text::{is_cjk, is_stop_word, token_set, tokenize};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::OnceLock;
use std::time::Instant;

/// Entity type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Named organisation, product or person ("Company X")
    ProperNoun,
    /// Numbered figure or chart ("figure 4")
    Visual,
    /// Numbered table ("table 2")
    Tabular,
    /// Subject of a turn ("revenue")
    Topic,
}

/// Entity remembered across turns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub kind: EntityKind,

    /// Turn number of the latest mention
    pub last_turn: u64,

    /// Order of appearance within that turn
    pub position: usize,

    pub mentions: u32,

    /// Terms of the latest turn that mentioned it
    #[serde(skip)]
    pub context: HashSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
    pub mentioned_entities: Vec<String>,
    pub topic: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Per-session conversation state, owned by the memory
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub turns: VecDeque<ConversationTurn>,
    pub entities: Vec<Entity>,

    /// Turns committed over the session lifetime, including dropped ones
    pub turn_count: u64,

    pub created_at: DateTime<Utc>,
    pub(crate) last_active: Instant,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            turns: VecDeque::new(),
            entities: Vec::new(),
            turn_count: 0,
            created_at: Utc::now(),
            last_active: Instant::now(),
        }
    }

    pub(crate) fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    /// Record a turn, keeping at most `max_turns` turns and `max_entities` entities
    pub fn push_turn(&mut self, question: &str, answer: &str, max_turns: usize, max_entities: usize) {
        let turn_number = self.turn_count;
        self.turn_count += 1;

        let mut extracted = extract_entities(question);
        for entity in extract_entities(answer) {
            if !extracted.iter().any(|(name, _)| name.eq_ignore_ascii_case(&entity.0)) {
                extracted.push(entity);
            }
        }
        let topic = identify_topic(question, &extracted);
        if let Some(topic) = &topic {
            extracted.push((topic.clone(), EntityKind::Topic));
        }

        let mut context = token_set(question);
        context.extend(token_set(answer));

        for (position, (name, kind)) in extracted.iter().enumerate() {
            match self
                .entities
                .iter_mut()
                .find(|e| e.kind == *kind && e.name.eq_ignore_ascii_case(name))
            {
                Some(existing) => {
                    existing.last_turn = turn_number;
                    existing.position = position;
                    existing.mentions += 1;
                    existing.context = context.clone();
                }
                None => self.entities.push(Entity {
                    name: name.clone(),
                    kind: *kind,
                    last_turn: turn_number,
                    position,
                    mentions: 1,
                    context: context.clone(),
                }),
            }
        }

        // Most recent first
        self.entities.sort_by(|a, b| {
            b.last_turn
                .cmp(&a.last_turn)
                .then_with(|| a.position.cmp(&b.position))
        });
        self.entities.truncate(max_entities.max(1));

        self.turns.push_back(ConversationTurn {
            question: question.to_string(),
            answer: answer.to_string(),
            mentioned_entities: extracted.into_iter().map(|(name, _)| name).collect(),
            topic,
            timestamp: Utc::now(),
        });
        while self.turns.len() > max_turns.max(1) {
            self.turns.pop_front();
        }
        self.touch();
    }

    /// Turns between the latest turn and `entity`'s last mention
    pub fn age_of(&self, entity: &Entity) -> u64 {
        self.turn_count.saturating_sub(1).saturating_sub(entity.last_turn)
    }
}

fn proper_noun_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b[A-Z][A-Za-z0-9&\-]*(?:\s+[A-Z][A-Za-z0-9&\-]*)*")
            .expect("proper noun pattern is valid")
    })
}

const CJK_ORG_SUFFIXES: &[&str] = &["公司", "集团", "银行", "大学", "医院"];

/// Entities mentioned in a text, in order of appearance
pub fn extract_entities(text: &str) -> Vec<(String, EntityKind)> {
    let mut entities: Vec<(usize, String, EntityKind)> = Vec::new();

    for reference in StructuralRef::find_all(text) {
        let kind = match reference.kind {
            RefKind::Figure => EntityKind::Visual,
            RefKind::Table => EntityKind::Tabular,
        };
        let name = reference.to_string();
        let offset = text.to_lowercase().find(&reference.label()).unwrap_or(0);
        entities.push((offset, name, kind));
    }

    for m in proper_noun_pattern().find_iter(text) {
        let words: Vec<&str> = m
            .as_str()
            .split_whitespace()
            .map(|w| w.trim_end_matches("'s").trim_end_matches('-'))
            .collect();

        // Drop leading question words and sentence-initial filler ("What", "The")
        let start = words
            .iter()
            .position(|w| !is_stop_word(&w.to_lowercase()) && !is_filler(w))
            .unwrap_or(words.len());
        let words = &words[start..];
        if words.is_empty() || is_reference_word(words[0]) {
            continue;
        }
        // A lone capitalised word at the start of a sentence is usually not a name
        if words.len() == 1 && start == 0 && at_sentence_start(text, m.start()) {
            continue;
        }
        entities.push((m.start(), words.join(" "), EntityKind::ProperNoun));
    }

    for suffix in CJK_ORG_SUFFIXES {
        for (idx, _) in text.match_indices(suffix) {
            let prefix: Vec<char> = text[..idx]
                .chars()
                .rev()
                .take_while(|c| (is_cjk(*c) || c.is_ascii_alphanumeric()) && !is_stop_word(&c.to_string()))
                .take(6)
                .collect();
            // "该公司" and "本公司" refer back, they do not name anything
            if prefix.is_empty() || prefix.iter().all(|c| matches!(c, '该' | '本' | '家')) {
                continue;
            }
            let name: String = prefix.into_iter().rev().chain(suffix.chars()).collect();
            entities.push((idx, name, EntityKind::ProperNoun));
        }
    }

    entities.sort_by_key(|(offset, _, _)| *offset);
    let mut seen = HashSet::new();
    entities
        .into_iter()
        .filter(|(_, name, kind)| seen.insert((name.to_lowercase(), *kind)))
        .map(|(_, name, kind)| (name, kind))
        .collect()
}

/// Subject of a question: its first content term not covered by an entity
pub fn identify_topic(question: &str, entities: &[(String, EntityKind)]) -> Option<String> {
    let covered: HashSet<String> = entities.iter().flat_map(|(name, _)| tokenize(name)).collect();
    tokenize(question).into_iter().find(|token| {
        !covered.contains(token)
            && token.chars().count() >= 2
            && !token.chars().all(|c| c.is_ascii_digit())
            && !is_filler(token)
            && !is_reference_word(token)
    })
}

fn is_filler(word: &str) -> bool {
    const FILLER: &[&str] = &[
        "sorry", "yes", "no", "also", "then", "please", "thanks", "based", "according", "overall",
        "compare", "compared", "describe", "explain", "list", "summarize", "about",
    ];
    FILLER.contains(&word.to_lowercase().as_str())
}

fn is_reference_word(word: &str) -> bool {
    const REFERENCE_WORDS: &[&str] = &["figure", "fig", "table", "tab", "image", "chart", "graph", "diagram", "picture"];
    REFERENCE_WORDS.contains(&word.to_lowercase().trim_end_matches('.'))
}

fn at_sentence_start(text: &str, offset: usize) -> bool {
    let before = text[..offset].trim_end();
    before.is_empty() || before.ends_with(['.', '?', '!', ':', '\n'])
}
