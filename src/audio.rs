//! Audio source collaborator.
//!
//! The pipeline never decodes audio itself; it asks this collaborator for
//! the recording's duration and for encoded payload bytes per window.

use crate::error::{LongformError, Result};

/// Trait for the audio decoding/encoding collaborator.
///
/// This trait allows swapping implementations (real decoder vs mock).
pub trait AudioSource: Send + Sync {
    /// Total duration of the recording, in time units.
    fn duration(&self) -> f64;

    /// Encoded payload bytes for the samples in `[start, end]`.
    fn encode_window(&self, start: f64, end: f64) -> Result<Vec<u8>>;

    /// Estimated encoded bytes per time unit, used by the segmenter's
    /// payload pre-pass.
    fn bytes_per_time_unit(&self) -> usize;
}

/// Mock audio source for testing.
#[derive(Debug, Clone)]
pub struct MockAudioSource {
    duration: f64,
    bytes_per_time_unit: usize,
    fail_encode: bool,
}

impl MockAudioSource {
    pub fn new(duration: f64) -> Self {
        Self {
            duration,
            bytes_per_time_unit: 100,
            fail_encode: false,
        }
    }

    pub fn with_bytes_per_time_unit(mut self, bytes: usize) -> Self {
        self.bytes_per_time_unit = bytes;
        self
    }

    /// Configure the mock to fail on encode.
    pub fn with_encode_failure(mut self) -> Self {
        self.fail_encode = true;
        self
    }
}

impl AudioSource for MockAudioSource {
    fn duration(&self) -> f64 {
        self.duration
    }

    fn encode_window(&self, start: f64, end: f64) -> Result<Vec<u8>> {
        if self.fail_encode {
            return Err(LongformError::AudioEncode {
                start,
                end,
                message: "mock encode failure".to_string(),
            });
        }
        let len = ((end - start).max(0.0) * self.bytes_per_time_unit as f64) as usize;
        Ok(vec![0u8; len])
    }

    fn bytes_per_time_unit(&self) -> usize {
        self.bytes_per_time_unit
    }
}
