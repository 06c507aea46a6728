//! Snapshot differ: "what changed" digest between two topic summaries.
//!
//! Summaries are split into segments: lines first (list markers stripped),
//! then sentences ending in `.`, `!` or `?` followed by whitespace, and
//! clauses ending in `;`. Segments are compared on a normalized form
//! (lowercase, collapsed whitespace, no trailing punctuation).
//!
//! Matching runs in two greedy passes over the new segments, in order:
//! 1. exact normalized match against an unused previous segment
//! 2. word-set Jaccard similarity >= threshold, provided the words the two
//!    segments do not share are all filler words. A changed number, name or
//!    verb ("4.1" to "4.3", "rose" to "fell") never matches.
//!
//! Each previous segment is consumed at most once. Unmatched new segments
//! form `changes.new`, unmatched previous segments form `changes.removed`,
//! both joined with a single space in their original order. The result is a
//! pure function of the input pair and the threshold.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

use crate::models::Changes;

/// Default similarity above which two segments count as the same content.
pub const PARAPHRASE_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Copy)]
pub struct SnapshotDiffer {
    threshold: f64,
}

impl Default for SnapshotDiffer {
    fn default() -> Self {
        Self {
            threshold: PARAPHRASE_THRESHOLD,
        }
    }
}

#[derive(Debug)]
struct Segment {
    text: String,
    normalized: String,
    tokens: BTreeSet<String>,
}

impl SnapshotDiffer {
    pub fn diff(&self, previous: Option<&str>, new: &str) -> Changes {
        let previous = match previous {
            Some(p) => p,
            None => {
                return Changes {
                    new: Some(new.to_string()),
                    removed: None,
                }
            }
        };

        if previous == new {
            return Changes::default();
        }

        let before = segments(previous);
        let after = segments(new);

        let mut consumed = vec![false; before.len()];
        let mut matched = vec![false; after.len()];

        for (j, seg) in after.iter().enumerate() {
            if let Some(i) = (0..before.len())
                .find(|&i| !consumed[i] && before[i].normalized == seg.normalized)
            {
                consumed[i] = true;
                matched[j] = true;
            }
        }

        for (j, seg) in after.iter().enumerate() {
            if matched[j] {
                continue;
            }
            if let Some(i) = (0..before.len()).find(|&i| !consumed[i] && self.paraphrase(&before[i], seg)) {
                consumed[i] = true;
                matched[j] = true;
            }
        }

        let added: Vec<&str> = after
            .iter()
            .zip(&matched)
            .filter(|(_, m)| !**m)
            .map(|(s, _)| s.text.as_str())
            .collect();
        let removed: Vec<&str> = before
            .iter()
            .zip(&consumed)
            .filter(|(_, c)| !**c)
            .map(|(s, _)| s.text.as_str())
            .collect();

        Changes {
            new: join(added),
            removed: join(removed),
        }
    }
}

impl SnapshotDiffer {
    fn paraphrase(&self, a: &Segment, b: &Segment) -> bool {
        jaccard(&a.tokens, &b.tokens) >= self.threshold
            && a.tokens.symmetric_difference(&b.tokens).all(|t| is_filler(t))
    }
}

/// Words whose presence or absence does not change what a sentence reports.
const FILLER: &[&str] = &[
    "a", "about", "again", "also", "an", "and", "as", "at", "by", "currently", "for", "from",
    "has", "have", "in", "is", "it", "its", "just", "now", "of", "on", "once", "reportedly",
    "so", "still", "that", "the", "their", "this", "to", "very", "was", "were", "with",
];

fn is_filler(token: &str) -> bool {
    FILLER.binary_search(&token).is_ok()
}

/// [`SnapshotDiffer::diff`] with the default threshold.
pub fn diff(previous: Option<&str>, new: &str) -> Changes {
    SnapshotDiffer::default().diff(previous, new)
}

fn join(parts: Vec<&str>) -> Option<String> {
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

fn list_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:[-*•]+|\d+[.)])\s+").expect("static regex"))
}

fn whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}

fn segments(text: &str) -> Vec<Segment> {
    let mut out = Vec::new();
    for line in text.lines() {
        let line = list_marker().replace(line.trim(), "");
        let chars: Vec<char> = line.chars().collect();
        let mut current = String::new();
        for (i, &c) in chars.iter().enumerate() {
            current.push(c);
            let boundary = match c {
                '.' | '!' | '?' => chars.get(i + 1).map_or(true, |n| n.is_whitespace()),
                ';' => true,
                _ => false,
            };
            if boundary {
                push_segment(&mut out, &current);
                current.clear();
            }
        }
        push_segment(&mut out, &current);
    }
    out
}

fn push_segment(out: &mut Vec<Segment>, raw: &str) {
    let text = raw.trim();
    let tokens = tokenize(text);
    if tokens.is_empty() {
        return;
    }
    out.push(Segment {
        text: text.to_string(),
        normalized: normalize(text),
        tokens,
    });
}

fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let collapsed = whitespace().replace_all(lowered.trim(), " ");
    collapsed
        .trim_end_matches(|c: char| matches!(c, '.' | '!' | '?' | ';' | ':' | ','))
        .trim_end()
        .to_string()
}

fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 1.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_snapshot_is_all_new() {
        let c = diff(None, "X");
        assert_eq!(c.new.as_deref(), Some("X"));
        assert!(c.removed.is_none());
    }

    #[test]
    fn test_identical_summaries_are_unchanged() {
        let c = diff(Some("X"), "X");
        assert!(c.is_unchanged());
    }

    #[test]
    fn test_disjoint_words_keep_both_sides() {
        let c = diff(Some("A B"), "B C");
        assert!(c.new.as_deref().unwrap().contains('C'));
        assert!(c.removed.as_deref().unwrap().contains('A'));
    }

    #[test]
    fn test_appended_sentence_is_new() {
        let c = diff(
            Some("Rust adoption is growing in systems teams."),
            "Rust adoption is growing in systems teams. New frameworks emerged.",
        );
        assert_eq!(c.new.as_deref(), Some("New frameworks emerged."));
        assert!(c.removed.is_none());
    }

    #[test]
    fn test_dropped_sentence_is_removed() {
        let c = diff(
            Some("Chip exports slowed. Tariffs were announced on Monday."),
            "Chip exports slowed.",
        );
        assert!(c.new.is_none());
        assert_eq!(c.removed.as_deref(), Some("Tariffs were announced on Monday."));
    }

    #[test]
    fn test_punctuation_and_case_are_ignored() {
        let c = diff(
            Some("Markets   rallied on Friday."),
            "markets rallied on friday!",
        );
        assert!(c.is_unchanged(), "got {:?}", c);
    }

    #[test]
    fn test_close_paraphrase_counts_as_unchanged() {
        let c = diff(
            Some("The central bank held rates steady at five percent this week."),
            "The central bank held rates steady at five percent this week again.",
        );
        assert!(c.is_unchanged(), "got {:?}", c);
    }

    #[test]
    fn test_changed_figure_in_long_sentence_is_reported() {
        let before = "Unemployment stood at 4.1 percent in the latest monthly report from the labor department.";
        let after = "Unemployment stood at 4.3 percent in the latest monthly report from the labor department.";
        let c = diff(Some(before), after);
        assert_eq!(c.new.as_deref(), Some(after));
        assert_eq!(c.removed.as_deref(), Some(before));
    }

    #[test]
    fn test_direction_flip_is_reported() {
        let before = "Shares of the largest chipmakers rose sharply on Tuesday after the ministry published new export guidance for advanced processors.";
        let after = "Shares of the largest chipmakers fell sharply on Tuesday after the ministry published new export guidance for advanced processors.";
        let c = diff(Some(before), after);
        assert!(!c.is_unchanged());
        assert!(c.new.as_deref().unwrap().contains("fell"));
        assert!(c.removed.as_deref().unwrap().contains("rose"));
    }

    #[test]
    fn test_filler_list_is_sorted() {
        assert!(FILLER.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_list_markers_and_lines_split_segments() {
        let before = "- Apple shipped a new phone\n- Storage prices fell";
        let after = "1. Apple shipped a new phone\n2. Memory prices rose";
        let c = diff(Some(before), after);
        assert_eq!(c.new.as_deref(), Some("Memory prices rose"));
        assert_eq!(c.removed.as_deref(), Some("Storage prices fell"));
    }

    #[test]
    fn test_decimal_points_do_not_split() {
        let c = diff(Some("Version 1.75 shipped."), "Version 1.75 shipped. Version 1.76 is next.");
        assert_eq!(c.new.as_deref(), Some("Version 1.76 is next."));
    }

    #[test]
    fn test_repeated_sentence_consumes_once() {
        let c = diff(Some("Rates held."), "Rates held. Rates held.");
        assert_eq!(c.new.as_deref(), Some("Rates held."));
        assert!(c.removed.is_none());
    }

    #[test]
    fn test_diff_is_deterministic() {
        let prev = "Alpha rose. Beta fell; Gamma flat.";
        let next = "Beta fell. Delta launched; Alpha rose sharply.";
        let first = diff(Some(prev), next);
        for _ in 0..10 {
            assert_eq!(diff(Some(prev), next), first);
        }
    }
}
