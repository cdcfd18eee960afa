//! Default configuration constants for longform.
//!
//! This module provides shared constants used across different configuration
//! types to ensure consistency and eliminate duplication.

/// Default segmentation window length in time units (seconds).
///
/// 60 seconds keeps each encoded audio payload comfortably below typical
/// request-size limits while giving the transform service enough context
/// to produce coherent speaker-attributed items.
pub const WINDOW_LEN: f64 = 60.0;

/// Default overlap between adjacent windows in time units (seconds).
///
/// The overlap is re-transcribed in both windows so the boundary merger can
/// fingerprint and drop the duplicated items. 3 seconds covers a spoken
/// sentence boundary without meaningfully inflating cost.
pub const WINDOW_OVERLAP: f64 = 3.0;

/// Smallest window length the segmenter will shrink to, in time units.
///
/// Below this, per-window context becomes too thin for useful transcription.
pub const MIN_WINDOW_LEN: f64 = 15.0;

/// Fixed decrement applied when shrinking the window length to fit the
/// payload ceiling.
pub const WINDOW_SHRINK_STEP: f64 = 5.0;

/// Default hard ceiling on a single window's encoded payload, in bytes.
pub const MAX_PAYLOAD_BYTES: usize = 4 * 1024 * 1024;

/// Default maximum number of invocations in flight at once.
pub const MAX_CONCURRENT: usize = 5;

/// Cooldown duration after a rate-limit signal, in ticks (seconds).
///
/// While the cooldown is active no new invocations are dispatched. A second
/// rate-limit signal arriving mid-cooldown does not extend it.
pub const COOLDOWN_TICKS: u32 = 60;

/// Hard timeout for a single transform invocation, in seconds.
pub const INVOKE_TIMEOUT_SECS: u64 = 300;

/// Maximum attempts per invocation before splitting or falling back.
pub const MAX_ATTEMPTS: u32 = 3;

/// Base backoff delay between attempts, in milliseconds.
pub const BACKOFF_BASE_MS: u64 = 2000;

/// Multiplier applied to the backoff delay after each failed attempt.
pub const BACKOFF_FACTOR: u64 = 3;

/// Sampling temperatures per attempt, escalating as a last resort.
///
/// Higher temperatures occasionally shake a model out of a degenerate
/// malformed-output loop at the cost of fidelity, so they come last.
pub const ATTEMPT_TEMPERATURES: [f32; 3] = [0.2, 0.5, 0.9];

/// Minimum item count for a failing batch to be split in half.
///
/// Batches at or below this size fall straight back to the deterministic
/// passthrough result instead.
pub const MIN_SPLIT_ITEMS: usize = 40;

/// Maximum recursion depth for adaptive batch splitting.
pub const MAX_SPLIT_DEPTH: u32 = 6;

/// Default maximum serialized size of one stage-2/3 batch, in bytes.
pub const MAX_BATCH_BYTES: usize = 48 * 1024;

/// Default maximum item count per stage-2/3 batch.
pub const MAX_BATCH_ITEMS: usize = 120;

/// Reason code attached to every fallback-synthesized segment.
pub const FALLBACK_REASON: &str = "fallback_passthrough";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_floor_is_reachable_by_whole_steps() {
        // 60 → 55 → … → 15 must land exactly on the floor.
        let steps = (WINDOW_LEN - MIN_WINDOW_LEN) / WINDOW_SHRINK_STEP;
        assert_eq!(steps.fract(), 0.0);
    }

    #[test]
    fn one_temperature_per_attempt() {
        assert_eq!(ATTEMPT_TEMPERATURES.len(), MAX_ATTEMPTS as usize);
    }

    #[test]
    fn temperatures_escalate() {
        for pair in ATTEMPT_TEMPERATURES.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }
}
