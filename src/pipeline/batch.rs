//! Batch planner: regroups a flat item sequence into byte/item-bounded
//! batches for the second transformation pass.

use crate::defaults;
use serde::{Deserialize, Serialize};

/// Configuration for the batch planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Target maximum serialized size of one batch, in bytes.
    pub max_bytes: usize,
    /// Maximum item count per batch.
    pub max_items: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_bytes: defaults::MAX_BATCH_BYTES,
            max_items: defaults::MAX_BATCH_ITEMS,
        }
    }
}

/// Greedily packs `items` into batches, starting a new batch when either
/// bound would be exceeded by the next item.
///
/// Every batch contains at least one item; an oversized single item still
/// gets its own batch rather than being rejected. Output batches preserve
/// original order and partition the input exactly.
pub fn plan_batches<T: Serialize + Clone>(items: &[T], config: BatchConfig) -> Vec<Vec<T>> {
    let mut batches: Vec<Vec<T>> = Vec::new();
    let mut current: Vec<T> = Vec::new();
    let mut current_bytes = 0usize;

    for item in items {
        let item_bytes = serde_json::to_string(item).map_or(0, |s| s.len());
        let would_overflow = !current.is_empty()
            && (current.len() >= config.max_items
                || current_bytes + item_bytes > config.max_bytes);

        if would_overflow {
            batches.push(std::mem::take(&mut current));
            current_bytes = 0;
        }

        current.push(item.clone());
        current_bytes += item_bytes;
    }

    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::TranscriptItem;

    fn item(n: usize, text: &str) -> TranscriptItem {
        TranscriptItem {
            time_marker: format!("{:02}:{:02}", n / 60, n % 60),
            speaker_tag: "S1".to_string(),
            original_text: text.to_string(),
            edited_text: String::new(),
            uncertain: false,
            non_substantive: false,
        }
    }

    fn items(n: usize) -> Vec<TranscriptItem> {
        (0..n).map(|i| item(i, "some spoken words")).collect()
    }

    #[test]
    fn empty_input_plans_no_batches() {
        let batches = plan_batches(&items(0), BatchConfig::default());
        assert!(batches.is_empty());
    }

    #[test]
    fn item_count_bound_splits_batches() {
        let config = BatchConfig {
            max_bytes: usize::MAX,
            max_items: 10,
        };
        let batches = plan_batches(&items(25), config);
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
    }

    #[test]
    fn byte_bound_splits_batches() {
        let one_item_bytes = serde_json::to_string(&item(0, "some spoken words"))
            .unwrap()
            .len();
        let config = BatchConfig {
            // Room for exactly three items per batch.
            max_bytes: one_item_bytes * 3 + 1,
            max_items: usize::MAX,
        };
        let batches = plan_batches(&items(7), config);
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[test]
    fn oversized_single_item_gets_its_own_batch() {
        let big = item(0, &"x".repeat(10_000));
        let config = BatchConfig {
            max_bytes: 100,
            max_items: 10,
        };
        let batches = plan_batches(&[item(1, "small"), big.clone(), item(2, "small")], config);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[1], vec![big]);
    }

    #[test]
    fn concatenated_batches_reconstruct_input_exactly() {
        let input = items(137);
        let config = BatchConfig {
            max_bytes: 900,
            max_items: 12,
        };
        let batches = plan_batches(&input, config);
        let rebuilt: Vec<TranscriptItem> = batches.into_iter().flatten().collect();
        assert_eq!(rebuilt, input, "no loss, no duplication, no reordering");
    }

    #[test]
    fn every_batch_is_nonempty() {
        let config = BatchConfig {
            max_bytes: 1,
            max_items: 1,
        };
        for batch in plan_batches(&items(9), config) {
            assert!(!batch.is_empty());
        }
    }
}
