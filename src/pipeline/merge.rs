//! Boundary-fingerprint merger for stitching per-window results.
//!
//! Folds completed windows (sorted by order index) into one ordered
//! transcript, handling:
//! - Out-of-order window completion
//! - Overlap deduplication via normalized boundary fingerprints
//! - Missing matches (duplication is kept rather than risking loss)
//!
//! The merge recomputes its output from scratch on every newly completed
//! window rather than incrementally, trading recompute cost for simplicity
//! and correctness under out-of-order completion.

use crate::pipeline::types::TranscriptItem;

/// How many items on each side of a window boundary are fingerprinted.
const FINGERPRINT_SPAN: usize = 2;

/// Normalizes an item's text for fingerprint comparison: case-fold, strip
/// punctuation, collapse whitespace.
fn fingerprint(item: &TranscriptItem) -> String {
    let mut out = String::with_capacity(item.original_text.len());
    let mut last_was_space = true;
    for ch in item.original_text.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
            last_was_space = false;
        } else if ch.is_whitespace() || ch.is_ascii_punctuation() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        }
    }
    out.trim_end().to_string()
}

/// Merges completed window results into one ordered transcript.
///
/// `windows` holds `(order_index, items)` pairs for every *completed* window;
/// they may arrive in any order. For each adjacent pair of windows, the last
/// two items of the previous window and the first two items of the current
/// window are fingerprinted; if a current item at position `k` matches any
/// previous fingerprint, items `0..=k` of the current window are treated as
/// the re-transcribed overlap and dropped. With no match, everything is kept.
pub fn merge_windows(windows: &[(usize, Vec<TranscriptItem>)]) -> Vec<TranscriptItem> {
    let mut ordered: Vec<&(usize, Vec<TranscriptItem>)> = windows.iter().collect();
    ordered.sort_by_key(|(order_index, _)| *order_index);

    let mut merged: Vec<TranscriptItem> = Vec::new();
    for (_, items) in ordered {
        let skip = overlap_len(&merged, items);
        merged.extend(items.iter().skip(skip).cloned());
    }
    merged
}

/// Number of leading items of `current` that duplicate the tail of `merged`.
fn overlap_len(merged: &[TranscriptItem], current: &[TranscriptItem]) -> usize {
    if merged.is_empty() || current.is_empty() {
        return 0;
    }

    let tail: Vec<String> = merged
        .iter()
        .rev()
        .take(FINGERPRINT_SPAN)
        .map(fingerprint)
        .filter(|fp| !fp.is_empty())
        .collect();
    if tail.is_empty() {
        return 0;
    }

    // Largest matching position wins: if both leading items duplicate the
    // tail, both are dropped.
    let mut skip = 0;
    for (k, item) in current.iter().take(FINGERPRINT_SPAN).enumerate() {
        let fp = fingerprint(item);
        if !fp.is_empty() && tail.iter().any(|t| *t == fp) {
            skip = k + 1;
        }
    }
    skip
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(marker: &str, text: &str) -> TranscriptItem {
        TranscriptItem {
            time_marker: marker.to_string(),
            speaker_tag: "S1".to_string(),
            original_text: text.to_string(),
            edited_text: String::new(),
            uncertain: false,
            non_substantive: false,
        }
    }

    #[test]
    fn fingerprint_normalizes_case_punctuation_whitespace() {
        let a = item("0", "Hello,   World!");
        let b = item("0", "hello world");
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn single_window_passes_through() {
        let w = vec![(0, vec![item("0", "one"), item("1", "two")])];
        let merged = merge_windows(&w);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn matching_boundary_drops_retranscribed_overlap() {
        // Window 2's first two items exactly match window 1's last two →
        // both leading items are dropped before concatenation.
        let w1 = vec![
            item("0", "alpha"),
            item("1", "the quick brown"),
            item("2", "fox jumps"),
        ];
        let w2 = vec![
            item("3", "The quick brown,"),
            item("4", "fox jumps!"),
            item("5", "over the lazy dog"),
        ];
        let merged = merge_windows(&[(0, w1), (1, w2)]);
        let texts: Vec<&str> = merged.iter().map(|i| i.original_text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["alpha", "the quick brown", "fox jumps", "over the lazy dog"]
        );
    }

    #[test]
    fn single_item_match_drops_one() {
        let w1 = vec![item("0", "alpha"), item("1", "bravo")];
        let w2 = vec![item("2", "bravo"), item("3", "charlie")];
        let merged = merge_windows(&[(0, w1), (1, w2)]);
        let texts: Vec<&str> = merged.iter().map(|i| i.original_text.as_str()).collect();
        assert_eq!(texts, vec!["alpha", "bravo", "charlie"]);
    }

    #[test]
    fn no_match_keeps_both_sides_in_full() {
        // Favor duplication over loss.
        let w1 = vec![item("0", "alpha"), item("1", "bravo")];
        let w2 = vec![item("2", "charlie"), item("3", "delta")];
        let merged = merge_windows(&[(0, w1), (1, w2)]);
        assert_eq!(merged.len(), 4);
    }

    #[test]
    fn out_of_order_completion_merges_by_order_index() {
        let w0 = vec![item("0", "first")];
        let w1 = vec![item("1", "second")];
        let w2 = vec![item("2", "third")];
        let merged = merge_windows(&[(2, w2), (0, w0), (1, w1)]);
        let texts: Vec<&str> = merged.iter().map(|i| i.original_text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[test]
    fn merge_is_idempotent() {
        let windows = vec![
            (0, vec![item("0", "one"), item("1", "two")]),
            (1, vec![item("2", "two"), item("3", "three")]),
            (2, vec![item("4", "four")]),
        ];
        let first = merge_windows(&windows);
        let second = merge_windows(&windows);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[test]
    fn empty_windows_are_tolerated() {
        let windows = vec![
            (0, vec![item("0", "one")]),
            (1, Vec::new()),
            (2, vec![item("1", "two")]),
        ];
        let merged = merge_windows(&windows);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn punctuation_only_items_never_match() {
        // An empty fingerprint must not count as a boundary match.
        let w1 = vec![item("0", "alpha"), item("1", "...")];
        let w2 = vec![item("2", "!!!"), item("3", "bravo")];
        let merged = merge_windows(&[(0, w1), (1, w2)]);
        assert_eq!(merged.len(), 4);
    }
}
