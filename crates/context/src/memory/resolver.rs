//! Pronoun and demonstrative resolution
//!
//! Each reference in the incoming text is matched against the session's
//! entities of a compatible kind. A candidate scores
//! `0.7 * recency + 0.3 * overlap`, where recency decays per turn of age
//! and overlap is the share of the query's terms found in the turn that
//! last mentioned the entity. References whose best score stays below the
//! threshold are left untouched.

use super::session::{Entity, EntityKind, Session};
use prism_common::config::MemoryConfig;
use prism_common::text::{overlap_ratio, token_set};
use regex_lite::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

const RECENCY_WEIGHT: f32 = 0.7;
const OVERLAP_WEIGHT: f32 = 0.3;

const PERSONAL: &[EntityKind] = &[EntityKind::ProperNoun, EntityKind::Visual, EntityKind::Tabular];
const POSSESSIVE: &[EntityKind] = &[EntityKind::ProperNoun];
const VISUAL: &[EntityKind] = &[EntityKind::Visual];
const TABULAR: &[EntityKind] = &[EntityKind::Tabular];

/// Chinese references, longest first
const CJK_REFERENCES: &[(&str, &[EntityKind])] = &[
    ("那张图表", VISUAL),
    ("这张图表", VISUAL),
    ("那个图表", VISUAL),
    ("这个图表", VISUAL),
    ("那张表格", TABULAR),
    ("这张表格", TABULAR),
    ("那个表格", TABULAR),
    ("这个表格", TABULAR),
    ("刚才说的", PERSONAL),
    ("那张图", VISUAL),
    ("这张图", VISUAL),
    ("那张表", TABULAR),
    ("这张表", TABULAR),
    ("该公司", POSSESSIVE),
    ("它们", PERSONAL),
    ("那个", PERSONAL),
    ("这个", PERSONAL),
    ("它", PERSONAL),
];

/// Bare demonstratives that modify a following noun ("这个问题") are not
/// references; they stand alone before punctuation or one of these particles
const BARE_DEMONSTRATIVES: &[&str] = &["那个", "这个"];
const PARTICLES: &[char] = &['的', '呢', '吗', '是', '有', '在', '怎', '也', '还', '和'];

fn modifies_noun(phrase: &str, tail: &str) -> bool {
    BARE_DEMONSTRATIVES.contains(&phrase)
        && tail
            .chars()
            .next()
            .is_some_and(|c| prism_common::text::is_cjk(c) && !PARTICLES.contains(&c))
}

fn demonstrative_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:that|this|the previous|the same|the above)\s+(chart|figure|graph|image|picture|diagram|plot|table|spreadsheet)s?\b",
        )
        .expect("demonstrative pattern is valid")
    })
}

fn ordinal_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\bthe\s+(former|latter)\b").expect("ordinal pattern is valid"))
}

fn pronoun_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\b(its|it|they|them)\b").expect("pronoun pattern is valid"))
}

pub(crate) struct Resolver<'a> {
    session: &'a Session,
    config: &'a MemoryConfig,
    query_tokens: HashSet<String>,
}

/// Outcome of one resolution pass
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Resolution {
    pub text: String,
    pub replaced: usize,
}

impl<'a> Resolver<'a> {
    pub fn new(session: &'a Session, config: &'a MemoryConfig, text: &str) -> Self {
        Self {
            session,
            config,
            query_tokens: token_set(text),
        }
    }

    pub fn resolve(&self, text: &str) -> Resolution {
        let mut replaced = 0;

        let text = self.replace_matches(text, demonstrative_pattern(), &mut replaced, |caps| {
            let noun = caps.get(1).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
            let kinds = if matches!(noun.as_str(), "table" | "spreadsheet") {
                TABULAR
            } else {
                VISUAL
            };
            self.best(kinds).map(|e| e.name.clone())
        });

        let text = self.replace_matches(&text, ordinal_pattern(), &mut replaced, |caps| {
            let latter = caps
                .get(1)
                .map(|m| m.as_str().eq_ignore_ascii_case("latter"))
                .unwrap_or(false);
            self.ordinal(latter).map(|e| e.name.clone())
        });

        let text = self.replace_matches(&text, pronoun_pattern(), &mut replaced, |caps| {
            let pronoun = caps.get(1).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
            if pronoun == "its" {
                self.best(POSSESSIVE).map(|e| format!("{}'s", e.name))
            } else {
                self.best(PERSONAL).map(|e| e.name.clone())
            }
        });

        let text = self.replace_cjk(&text, &mut replaced);
        Resolution { text, replaced }
    }

    fn score(&self, entity: &Entity) -> f32 {
        let age = self.session.age_of(entity);
        let recency = self.config.recency_decay.clamp(0.0, 1.0).powi(age.min(64) as i32);
        let overlap = overlap_ratio(&self.query_tokens, &entity.context);
        RECENCY_WEIGHT * recency + OVERLAP_WEIGHT * overlap
    }

    /// Highest scoring entity of the given kinds above the threshold
    fn best(&self, kinds: &[EntityKind]) -> Option<&'a Entity> {
        self.session
            .entities
            .iter()
            .filter(|e| kinds.contains(&e.kind))
            .map(|e| (self.score(e), e))
            .filter(|(score, _)| *score >= self.config.resolution_threshold)
            .max_by(|(sa, a), (sb, b)| {
                sa.total_cmp(sb)
                    .then_with(|| kind_rank(b.kind).cmp(&kind_rank(a.kind)))
                    .then_with(|| b.position.cmp(&a.position))
            })
            .map(|(_, e)| e)
    }

    /// "the former" / "the latter" among the two latest proper nouns of one turn
    fn ordinal(&self, latter: bool) -> Option<&'a Entity> {
        let newest = self
            .session
            .entities
            .iter()
            .filter(|e| e.kind == EntityKind::ProperNoun)
            .map(|e| e.last_turn)
            .max()?;
        let mut pair: Vec<&Entity> = self
            .session
            .entities
            .iter()
            .filter(|e| e.kind == EntityKind::ProperNoun && e.last_turn == newest)
            .collect();
        if pair.len() < 2 {
            return None;
        }
        pair.sort_by_key(|e| e.position);
        let entity = if latter { pair[pair.len() - 1] } else { pair[0] };
        (self.score(entity) >= self.config.resolution_threshold).then_some(entity)
    }

    fn replace_matches<F>(&self, text: &str, pattern: &Regex, replaced: &mut usize, mut pick: F) -> String
    where
        F: FnMut(&regex_lite::Captures<'_>) -> Option<String>,
    {
        let mut output = String::with_capacity(text.len());
        let mut last = 0;
        for caps in pattern.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            // "it's" is a contraction, not a reference
            if text[whole.end()..].starts_with('\'') {
                continue;
            }
            if let Some(replacement) = pick(&caps) {
                output.push_str(&text[last..whole.start()]);
                output.push_str(&replacement);
                last = whole.end();
                *replaced += 1;
            }
        }
        output.push_str(&text[last..]);
        output
    }

    fn replace_cjk(&self, text: &str, replaced: &mut usize) -> String {
        if !text.chars().any(prism_common::text::is_cjk) {
            return text.to_string();
        }
        let mut output = String::with_capacity(text.len());
        let mut rest = text;
        'scan: while !rest.is_empty() {
            for (phrase, kinds) in CJK_REFERENCES {
                if let Some(tail) = rest.strip_prefix(phrase) {
                    if modifies_noun(phrase, tail) {
                        output.push_str(phrase);
                    } else if let Some(entity) = self.best(kinds) {
                        output.push_str(&entity.name);
                        *replaced += 1;
                    } else {
                        output.push_str(phrase);
                    }
                    rest = tail;
                    continue 'scan;
                }
            }
            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                output.push(c);
            }
            rest = chars.as_str();
        }
        output
    }
}

fn kind_rank(kind: EntityKind) -> u8 {
    match kind {
        EntityKind::ProperNoun => 0,
        EntityKind::Visual => 1,
        EntityKind::Tabular => 2,
        EntityKind::Topic => 3,
    }
}
