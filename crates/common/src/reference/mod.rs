//! Structural figure/table identifiers
//!
//! Parses numbered references such as "figure 4", "Fig. 2.1", "Table 3" or
//! "图4" out of query text and chunk captions. A number only counts when
//! it is followed by a delimiter, so "figure 4" never matches "figure 41",
//! "figure 14" or "figure 4a". Generic words ("chart", "image") followed by
//! a year ("chart 2023 revenue") are not references unless written with an
//! explicit "no." or "#".

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    Figure,
    Table,
}

/// A numbered figure or table reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructuralRef {
    pub kind: RefKind,
    /// Dotted number components ("2.1" is `[2, 1]`)
    pub number: Vec<u32>,
}

fn pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)(?:\b(figure|fig|image|chart|graph|diagram|picture|table|tab)\.?|(图表|图片|图|表格|表))\s*(no\.\s*|#\s*)?(\d+(?:\.\d+)*)",
        )
        .expect("structural reference pattern is valid")
    })
}

fn kind_for(word: &str) -> RefKind {
    match word.to_lowercase().as_str() {
        "table" | "tab" | "表格" | "表" => RefKind::Table,
        _ => RefKind::Figure,
    }
}

/// Words that name a visual without being a numbering scheme
fn is_generic(word: &str) -> bool {
    matches!(
        word.to_lowercase().as_str(),
        "image" | "chart" | "graph" | "diagram" | "picture" | "图表" | "图片"
    )
}

fn is_year(number: &[u32]) -> bool {
    matches!(number, [n] if (1900..=2100).contains(n))
}

/// The character after a number must end the identifier
fn is_delimited(rest: &str) -> bool {
    match rest.chars().next() {
        None => true,
        Some(c) => !(c.is_ascii_alphanumeric() || c == '-' || c == '_'),
    }
}

impl StructuralRef {
    pub fn new(kind: RefKind, number: Vec<u32>) -> Self {
        Self { kind, number }
    }

    /// Every delimited reference in `text`, in order of appearance
    pub fn find_all(text: &str) -> Vec<Self> {
        let mut refs = Vec::new();
        for caps in pattern().captures_iter(text) {
            let (Some(word), Some(num)) = (caps.get(1).or_else(|| caps.get(2)), caps.get(4)) else {
                continue;
            };
            if !is_delimited(&text[num.end()..]) {
                continue;
            }
            let number: Option<Vec<u32>> = num.as_str().split('.').map(|p| p.parse().ok()).collect();
            let Some(number) = number else { continue };
            let marked = caps.get(3).is_some();
            if !marked && is_generic(word.as_str()) && is_year(&number) {
                continue;
            }
            refs.push(Self::new(kind_for(word.as_str()), number));
        }
        refs
    }

    /// First delimited reference in `text`
    pub fn parse_first(text: &str) -> Option<Self> {
        Self::find_all(text).into_iter().next()
    }

    /// Number rendered as written ("4", "2.1")
    pub fn label(&self) -> String {
        self.number
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for StructuralRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            RefKind::Figure => "figure",
            RefKind::Table => "table",
        };
        write!(f, "{} {}", kind, self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn figure(n: &[u32]) -> StructuralRef {
        StructuralRef::new(RefKind::Figure, n.to_vec())
    }

    #[test]
    fn test_parse_simple() {
        assert_eq!(StructuralRef::parse_first("show figure 4"), Some(figure(&[4])));
        assert_eq!(StructuralRef::parse_first("Fig. 4: Net Profit"), Some(figure(&[4])));
        assert_eq!(
            StructuralRef::parse_first("see Table 3."),
            Some(StructuralRef::new(RefKind::Table, vec![3]))
        );
    }

    #[test]
    fn test_number_is_not_a_prefix_match() {
        let four = figure(&[4]);
        for caption in ["Figure 41: Cash", "Figure 14", "Figure 4.1 Detail"] {
            let found = StructuralRef::find_all(caption);
            assert!(!found.contains(&four), "{caption} should not match figure 4");
        }
    }

    #[test]
    fn test_undelimited_number_rejected() {
        assert!(StructuralRef::find_all("figure 4a").is_empty());
        assert!(StructuralRef::find_all("figure 4-b").is_empty());
    }

    #[test]
    fn test_delimiters_accepted() {
        for text in ["figure 4", "figure 4:", "(figure 4)", "figure 4, left", "figure 4\nnext"] {
            assert_eq!(StructuralRef::parse_first(text), Some(figure(&[4])), "{text}");
        }
    }

    #[test]
    fn test_chinese_references() {
        assert_eq!(StructuralRef::parse_first("请展示图4的内容"), Some(figure(&[4])));
        assert_eq!(
            StructuralRef::parse_first("表格 2 中的数据"),
            Some(StructuralRef::new(RefKind::Table, vec![2]))
        );
    }

    #[test]
    fn test_dotted_numbers_and_label() {
        let r = StructuralRef::parse_first("Figure 2.1 shows").unwrap();
        assert_eq!(r.number, vec![2, 1]);
        assert_eq!(r.label(), "2.1");
        assert_eq!(r.to_string(), "figure 2.1");
    }

    #[test]
    fn test_year_after_generic_word_is_not_a_reference() {
        assert!(StructuralRef::find_all("chart 2023 revenue trend").is_empty());
        assert!(StructuralRef::find_all("image 1999 archive").is_empty());
        assert_eq!(StructuralRef::parse_first("chart no. 2023"), Some(figure(&[2023])));
        assert_eq!(StructuralRef::parse_first("chart 3 shows"), Some(figure(&[3])));
        assert_eq!(StructuralRef::parse_first("figure 2023"), Some(figure(&[2023])));
    }

    #[test]
    fn test_embedded_word_does_not_match() {
        assert!(StructuralRef::find_all("configure 4 nodes").is_empty());
    }
}
