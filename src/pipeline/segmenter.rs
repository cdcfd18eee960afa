//! Segmenter: splits a continuous timeline into overlapping fixed-size
//! windows.
//!
//! Window sizing is a static pre-pass: if the estimated encoded payload for
//! the target window length would exceed the hard ceiling, the target is
//! shrunk in fixed decrements (floor 15 time units) before any window is
//! produced. Sizing is never adapted per-window.

use crate::defaults;
use serde::{Deserialize, Serialize};

/// Configuration for the segmenter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Target window length in time units.
    pub window_len: f64,
    /// Overlap carried into each subsequent window, in time units.
    pub overlap: f64,
    /// Hard ceiling on one window's encoded payload, in bytes.
    pub max_payload_bytes: usize,
    /// Decrement applied while shrinking the window length to fit.
    pub shrink_step: f64,
    /// Smallest window length the shrink loop may reach.
    pub min_window_len: f64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            window_len: defaults::WINDOW_LEN,
            overlap: defaults::WINDOW_OVERLAP,
            max_payload_bytes: defaults::MAX_PAYLOAD_BYTES,
            shrink_step: defaults::WINDOW_SHRINK_STEP,
            min_window_len: defaults::MIN_WINDOW_LEN,
        }
    }
}

/// One planned window on the recording timeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Window {
    pub index: usize,
    pub start: f64,
    pub end: f64,
}

/// Segmenter that plans the stage-1 windows for a recording.
#[derive(Debug, Clone)]
pub struct Segmenter {
    config: SegmenterConfig,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self { config }
    }

    /// Returns the window length actually used after the payload pre-pass.
    ///
    /// `bytes_per_time_unit` is the audio collaborator's encoding-rate
    /// estimate for this recording.
    pub fn effective_window_len(&self, bytes_per_time_unit: usize) -> f64 {
        let mut len = self.config.window_len;
        while len > self.config.min_window_len
            && len * bytes_per_time_unit as f64 > self.config.max_payload_bytes as f64
        {
            len = (len - self.config.shrink_step).max(self.config.min_window_len);
        }
        len
    }

    /// Plans the ordered window list covering `[0, duration]`.
    ///
    /// Guarantees: windows are contiguous in content (no time gap), overlap
    /// only at boundaries, and the final window's end equals `duration`
    /// exactly.
    pub fn segment(&self, duration: f64, bytes_per_time_unit: usize) -> Vec<Window> {
        if duration <= 0.0 {
            return Vec::new();
        }

        let window_len = self.effective_window_len(bytes_per_time_unit);
        let count = (duration / window_len).ceil() as usize;

        (0..count)
            .map(|i| {
                let start = if i == 0 {
                    0.0
                } else {
                    (i as f64 * window_len - self.config.overlap).max(0.0)
                };
                let end = ((i + 1) as f64 * window_len).min(duration);
                Window {
                    index: i,
                    start,
                    end,
                }
            })
            .collect()
    }
}
