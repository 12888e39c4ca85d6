//! Language-aware tokenization
//!
//! Words are segmented with Unicode word boundaries (UAX #29) instead of
//! whitespace. Han and kana runs are emitted as single characters plus
//! adjacent-character bigrams so that unsegmented Chinese text still
//! produces overlapping terms.

use std::collections::HashSet;
use unicode_segmentation::UnicodeSegmentation;

const ENGLISH_STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "of", "in", "on",
    "at", "to", "for", "and", "or", "but", "with", "by", "from", "as", "into", "about",
    "what", "which", "who", "whom", "how", "why", "when", "where", "do", "does", "did",
    "can", "could", "would", "should", "will", "me", "my", "i", "we", "our", "you", "your",
    "it", "its", "they", "them", "their", "this", "that", "these", "those", "there",
    "here", "please", "tell", "show", "give", "any", "some", "all", "s",
];

const CHINESE_STOP_CHARS: &[char] = &[
    '的', '了', '是', '在', '和', '与', '及', '或', '吗', '呢', '吧', '啊', '么', '我', '你',
    '他', '她', '们', '请', '这', '那', '个', '有', '也', '都', '就', '把', '被', '给',
];

/// True for Han ideographs and Japanese kana
pub fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF   // Hiragana, Katakana
        | 0x3400..=0x4DBF // CJK Extension A
        | 0x4E00..=0x9FFF // CJK Unified Ideographs
        | 0xF900..=0xFAFF // CJK Compatibility Ideographs
    )
}

pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk)
}

pub fn is_stop_word(token: &str) -> bool {
    if let Some(c) = single_char(token) {
        if CHINESE_STOP_CHARS.contains(&c) {
            return true;
        }
    }
    ENGLISH_STOP_WORDS.contains(&token)
}

fn single_char(word: &str) -> Option<char> {
    let mut chars = word.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c),
        _ => None,
    }
}

fn normalize_word(word: &str) -> String {
    let lower = word.to_lowercase();
    lower
        .strip_suffix("'s")
        .or_else(|| lower.strip_suffix("\u{2019}s"))
        .map(str::to_string)
        .unwrap_or(lower)
}

/// Tokenize into lowercase terms with stop words removed
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    // (byte offset just past the previous CJK character, that character)
    let mut prev_cjk: Option<(usize, char)> = None;

    for (offset, word) in text.unicode_word_indices() {
        if let Some(c) = single_char(word).filter(|c| is_cjk(*c)) {
            let stop = CHINESE_STOP_CHARS.contains(&c);
            if let Some((end, p)) = prev_cjk {
                if end == offset && !stop && !CHINESE_STOP_CHARS.contains(&p) {
                    tokens.push(format!("{p}{c}"));
                }
            }
            if !stop {
                tokens.push(c.to_string());
            }
            prev_cjk = Some((offset + c.len_utf8(), c));
            continue;
        }

        prev_cjk = None;
        let token = normalize_word(word);
        if token.is_empty() || is_stop_word(&token) {
            continue;
        }
        tokens.push(token);
    }

    tokens
}

/// Distinct tokens of a text
pub fn token_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// Share of `query` terms present in `field`, in [0, 1]
pub fn overlap_ratio(query: &HashSet<String>, field: &HashSet<String>) -> f32 {
    if query.is_empty() {
        return 0.0;
    }
    let shared = query.intersection(field).count();
    shared as f32 / query.len() as f32
}

/// Overlap coefficient |a ∩ b| / min(|a|, |b|), in [0, 1]
pub fn overlap_coefficient(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    let denom = a.len().min(b.len());
    if denom == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f32 / denom as f32
}

/// Truncate to at most `max_chars` characters, marking the cut with "..."
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_english_tokens() {
        let tokens = tokenize("What is the revenue of Company X?");
        assert_eq!(tokens, vec!["revenue", "company", "x"]);
    }

    #[test]
    fn test_possessive_stripped() {
        let tokens = tokenize("Company X's revenue");
        assert_eq!(tokens, vec!["company", "x", "revenue"]);
    }

    #[test]
    fn test_cjk_unigrams_and_bigrams() {
        let tokens = tokenize("净利润");
        assert!(tokens.contains(&"净".to_string()));
        assert!(tokens.contains(&"利润".to_string()));
        assert!(tokens.contains(&"净利".to_string()));
    }

    #[test]
    fn test_cjk_stop_chars_break_bigrams() {
        let tokens = tokenize("公司的利润");
        assert!(tokens.contains(&"公司".to_string()));
        assert!(tokens.contains(&"利润".to_string()));
        assert!(!tokens.iter().any(|t| t.contains('的')));
    }

    #[test]
    fn test_mixed_script() {
        let tokens = tokenize("图4 Net Profit");
        assert!(tokens.contains(&"图".to_string()));
        assert!(tokens.contains(&"4".to_string()));
        assert!(tokens.contains(&"profit".to_string()));
    }

    #[test]
    fn test_overlap() {
        let q = token_set("net profit overview");
        let f = token_set("Figure 4: Net Profit Overview");
        assert_eq!(overlap_ratio(&q, &f), 1.0);
        assert!(overlap_coefficient(&q, &token_set("profit")) > 0.99);
        assert_eq!(overlap_ratio(&HashSet::new(), &f), 0.0);
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("利润增长很快", 2), "利润...");
        assert_eq!(truncate_chars("short", 10), "short");
    }
}
