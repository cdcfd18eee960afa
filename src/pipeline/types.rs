//! Core data types shared across the pipeline stages.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Lifecycle of one schedulable work item.
///
/// Units are created once and only ever transitioned, never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One schedulable work item: a time-window chunk in stage 1, a batch in
/// stage 2/3.
///
/// `order_index` is dense, zero-based and stable: it is the sole ordering
/// key for merging, regardless of completion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit<P, R> {
    pub id: u64,
    pub order_index: usize,
    pub status: UnitStatus,
    pub payload: P,
    pub result: Option<R>,
    pub error: Option<String>,
}

impl<P, R> Unit<P, R> {
    pub fn new(id: u64, order_index: usize, payload: P) -> Self {
        Self {
            id,
            order_index,
            status: UnitStatus::Pending,
            payload,
            result: None,
            error: None,
        }
    }
}

/// Stage-1 unit payload: one time window plus its encoded audio bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowPayload {
    pub start: f64,
    pub end: f64,
    #[serde(skip)]
    pub audio: Vec<u8>,
}

/// One transcript line as produced by stage 1.
///
/// Immutable once produced: a later stage builds a new collection rather
/// than editing items in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptItem {
    pub time_marker: String,
    pub speaker_tag: String,
    pub original_text: String,
    pub edited_text: String,
    #[serde(default)]
    pub uncertain: bool,
    #[serde(default)]
    pub non_substantive: bool,
}

impl TranscriptItem {
    /// The text a later stage should work from: the edit when present,
    /// otherwise the original.
    pub fn best_text(&self) -> &str {
        if self.edited_text.trim().is_empty() {
            &self.original_text
        } else {
            &self.edited_text
        }
    }
}

/// Stage-2 output item: one refined, speaker-attributed segment.
///
/// `source_markers` references the stage-1 items (by time marker) that were
/// condensed into this segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinedSegment {
    pub speaker_tag: String,
    pub start_marker: String,
    pub end_marker: String,
    pub text: String,
    #[serde(default)]
    pub source_markers: Vec<String>,
    #[serde(default)]
    pub needs_review: bool,
}

/// Accounts for a stage-1 item that did not survive into stage 2.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovalRecord {
    pub time_marker: String,
    pub speaker_tag: String,
    pub reason_code: String,
    pub verbatim_excerpt: String,
}

/// Audit metadata carried alongside stage-2/3 output.
///
/// Counters are merged by numeric sum, attestations by logical AND, and
/// `models_used` by deduplicating union (see the result merger).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuditReport {
    pub input_items: usize,
    pub output_segments: usize,
    pub removed_items: usize,
    /// True when every input item is accounted for by a segment's
    /// `source_markers` or a removal record.
    pub all_covered: bool,
    pub fallback_batches: usize,
    pub models_used: BTreeSet<String>,
}

/// Stage-2 result: the refined script plus its accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefineOutcome {
    /// Output shape tag. Rewritten to its `…_batched` variant when the
    /// result is a concatenation of per-batch results.
    pub mode: String,
    pub refined_script: Vec<RefinedSegment>,
    #[serde(default)]
    pub removals: Vec<RemovalRecord>,
    #[serde(default)]
    pub audit: AuditReport,
}

impl RefineOutcome {
    pub fn empty(mode: &str) -> Self {
        Self {
            mode: mode.to_string(),
            refined_script: Vec::new(),
            removals: Vec::new(),
            audit: AuditReport::default(),
        }
    }
}

/// Stage-3 self-verification report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct VerificationReport {
    pub claims_checked: usize,
    pub claims_flagged: usize,
    pub attests_faithful: bool,
    pub notes: Vec<String>,
}

/// Stage-3 result: continuous prose plus a self-verification report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProseOutcome {
    pub mode: String,
    pub paragraphs: Vec<String>,
    #[serde(default)]
    pub verification: VerificationReport,
}

/// Read-only snapshot of scheduler progress, exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerState {
    pub total_units: usize,
    pub completed: usize,
    pub processing: usize,
    pub failed: usize,
    pub concurrency_cap: usize,
    pub cooldown_active: bool,
    pub cooldown_remaining: u32,
}

/// Pipeline stage identifier, used in rate-limit signals and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Transcribe,
    Refine,
    Prose,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transcribe => write!(f, "transcribe"),
            Self::Refine => write!(f, "refine"),
            Self::Prose => write!(f, "prose"),
        }
    }
}

/// Transient rate-limit event. Triggers a cooldown, then is discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitSignal {
    pub stage: Stage,
    pub offending_model_id: String,
    /// Seconds since the run started, for diagnostics only.
    pub observed_at: f64,
}
