//! longform - resilient LLM refinement pipeline for long-recording
//! transcripts.
//!
//! Splits a long recording into bounded windows, runs them concurrently
//! against an external transform service under an adaptively-throttled
//! scheduler, and merges the results deterministically, degrading via
//! retries, adaptive splitting and deterministic fallback when the service
//! misbehaves, without ever losing source content.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod pipeline;
pub mod transform;

// Core traits (audio in → transform service → structured output)
pub use audio::{AudioSource, MockAudioSource};
pub use transform::service::{MockTransformService, TransformRequest, TransformService};

// Pipeline
pub use pipeline::orchestrator::Pipeline;
pub use pipeline::types::{
    ProseOutcome, RefineOutcome, RefinedSegment, RemovalRecord, SchedulerState, Stage,
    TranscriptItem, Unit, UnitStatus,
};

// Error handling
pub use error::{LongformError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.2.0+abc1234"` when git hash is available, `"0.2.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
