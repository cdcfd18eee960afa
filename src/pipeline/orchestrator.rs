//! Pipeline orchestrator: drives the three transformation stages.
//!
//! Stage 1 segments the recording into overlapping windows and runs them
//! through the transform service under the concurrency controller, folding
//! completions into a running merged transcript. Stage 2 regroups the
//! merged transcript into batches and refines each one; stage 3 turns the
//! refined script into continuous prose with a self-verification report.
//!
//! The driver is one logical loop: spawned invocation tasks report back
//! over an mpsc channel and every event is folded through the immutable
//! `RunState` reducer. Merge order is always by `order_index`, recomputed
//! from the completed set, so intermediate output stays order-correct even
//! under out-of-order completion.

use crate::audio::AudioSource;
use crate::config::Config;
use crate::defaults;
use crate::error::{LongformError, Result};
use crate::pipeline::batch::plan_batches;
use crate::pipeline::invoke::{RobustInvoker, TransformTask};
use crate::pipeline::merge::merge_windows;
use crate::pipeline::result_merge::{merge_prose_outcomes, merge_refine_outcomes};
use crate::pipeline::scheduler::{CooldownPolicy, RunEvent, RunState};
use crate::pipeline::segmenter::Segmenter;
use crate::pipeline::types::{
    AuditReport, ProseOutcome, RateLimitSignal, RefineOutcome, RefinedSegment, SchedulerState,
    Stage, TranscriptItem, Unit, UnitStatus, VerificationReport, WindowPayload,
};
use crate::transform::decode::decode;
use crate::transform::service::{TransformRequest, TransformService, from_value};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Scheduler tick interval. Cooldown durations are measured in these ticks.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Cooldown-and-retry rounds per batch before a rate limit is surfaced as
/// an explicit failure.
const MAX_COOLDOWN_RETRIES: u32 = 3;

const TRANSCRIBE_PROMPT: &str = "Transcribe the attached audio window verbatim. Return a JSON \
array of items with time_marker, speaker_tag, original_text, edited_text, uncertain and \
non_substantive fields. Do not summarize or skip content.";

const REFINE_PROMPT: &str = "Refine the following transcript items into a polished script. \
Return JSON with mode, refined_script, removals and audit. Every input item must appear in a \
segment's source_markers or in removals.";

const PROSE_PROMPT: &str = "Rewrite the following refined script as continuous prose. Return \
JSON with mode, paragraphs and a verification report attesting faithfulness to the source.";

// ---------------------------------------------------------------------------
// Stage tasks
// ---------------------------------------------------------------------------

/// Stage-1 task: one audio window → transcript items.
///
/// Window payloads carry no item list, so the engine's split/fallback ladder
/// does not apply; exhaustion surfaces as a unit failure.
struct TranscribeTask {
    service: Arc<dyn TransformService>,
    model: String,
}

#[async_trait]
impl TransformTask for TranscribeTask {
    type Payload = WindowPayload;
    type Output = Vec<TranscriptItem>;

    async fn attempt(&self, payload: &WindowPayload, temperature: f32) -> Result<Vec<TranscriptItem>> {
        let input = json!({
            "start": payload.start,
            "end": payload.end,
            "audio_b64": BASE64.encode(&payload.audio),
        });
        let request = TransformRequest::new(TRANSCRIBE_PROMPT, input, &self.model)
            .with_schema(json!({"type": "array"}))
            .with_temperature(temperature);
        let raw = self.service.transform(&request).await?;
        from_value(decode(&raw)?)
    }

    fn item_count(&self, _payload: &WindowPayload) -> usize {
        0
    }

    fn split(&self, _payload: &WindowPayload) -> Option<(WindowPayload, WindowPayload)> {
        None
    }

    fn merge(&self, mut left: Vec<TranscriptItem>, right: Vec<TranscriptItem>) -> Vec<TranscriptItem> {
        left.extend(right);
        left
    }

    fn fallback(&self, _payload: &WindowPayload) -> Option<Vec<TranscriptItem>> {
        None
    }
}

/// Stage-2 task: a batch of transcript items → refined outcome.
struct RefineTask {
    service: Arc<dyn TransformService>,
    model: String,
}

impl RefineTask {
    /// Recomputes the audit bookkeeping from the actual output rather than
    /// trusting the model's own numbers.
    fn audited(&self, items: &[TranscriptItem], mut outcome: RefineOutcome) -> RefineOutcome {
        let covered: BTreeSet<&str> = outcome
            .refined_script
            .iter()
            .flat_map(|s| s.source_markers.iter().map(String::as_str))
            .chain(outcome.removals.iter().map(|r| r.time_marker.as_str()))
            .collect();

        outcome.audit = AuditReport {
            input_items: items.len(),
            output_segments: outcome.refined_script.len(),
            removed_items: outcome.removals.len(),
            all_covered: items.iter().all(|i| covered.contains(i.time_marker.as_str())),
            fallback_batches: 0,
            models_used: BTreeSet::from([self.model.clone()]),
        };
        outcome
    }
}

#[async_trait]
impl TransformTask for RefineTask {
    type Payload = Vec<TranscriptItem>;
    type Output = RefineOutcome;

    async fn attempt(&self, payload: &Vec<TranscriptItem>, temperature: f32) -> Result<RefineOutcome> {
        let request = TransformRequest::new(
            REFINE_PROMPT,
            serde_json::to_value(payload)?,
            &self.model,
        )
        .with_schema(json!({"type": "object"}))
        .with_temperature(temperature);
        let raw = self.service.transform(&request).await?;
        let outcome: RefineOutcome = from_value(decode(&raw)?)?;
        Ok(self.audited(payload, outcome))
    }

    fn item_count(&self, payload: &Vec<TranscriptItem>) -> usize {
        payload.len()
    }

    fn split(&self, payload: &Vec<TranscriptItem>) -> Option<(Vec<TranscriptItem>, Vec<TranscriptItem>)> {
        if payload.len() < 2 {
            return None;
        }
        let mid = payload.len() / 2;
        Some((payload[..mid].to_vec(), payload[mid..].to_vec()))
    }

    fn merge(&self, left: RefineOutcome, right: RefineOutcome) -> RefineOutcome {
        merge_refine_outcomes(vec![left, right])
    }

    fn fallback(&self, payload: &Vec<TranscriptItem>) -> Option<RefineOutcome> {
        Some(refine_fallback(payload))
    }
}

/// Deterministic stage-2 fallback: verbatim passthrough of every item's
/// best-available text, flagged for review. Items whose source text is empty
/// are absent from both the output and the removal report.
fn refine_fallback(items: &[TranscriptItem]) -> RefineOutcome {
    let refined_script: Vec<RefinedSegment> = items
        .iter()
        .filter(|item| !item.best_text().trim().is_empty())
        .map(|item| RefinedSegment {
            speaker_tag: item.speaker_tag.clone(),
            start_marker: item.time_marker.clone(),
            end_marker: item.time_marker.clone(),
            text: item.best_text().to_string(),
            source_markers: vec![item.time_marker.clone()],
            needs_review: true,
        })
        .collect();

    let output_segments = refined_script.len();
    RefineOutcome {
        mode: defaults::FALLBACK_REASON.to_string(),
        refined_script,
        removals: Vec::new(),
        audit: AuditReport {
            input_items: items.len(),
            output_segments,
            removed_items: 0,
            all_covered: items.iter().all(|i| !i.best_text().trim().is_empty()),
            fallback_batches: 1,
            models_used: BTreeSet::new(),
        },
    }
}

/// Stage-3 task: a batch of refined segments → continuous prose.
struct ProseTask {
    service: Arc<dyn TransformService>,
    model: String,
}

#[async_trait]
impl TransformTask for ProseTask {
    type Payload = Vec<RefinedSegment>;
    type Output = ProseOutcome;

    async fn attempt(&self, payload: &Vec<RefinedSegment>, temperature: f32) -> Result<ProseOutcome> {
        let request = TransformRequest::new(
            PROSE_PROMPT,
            serde_json::to_value(payload)?,
            &self.model,
        )
        .with_schema(json!({"type": "object"}))
        .with_temperature(temperature);
        let raw = self.service.transform(&request).await?;
        from_value(decode(&raw)?)
    }

    fn item_count(&self, payload: &Vec<RefinedSegment>) -> usize {
        payload.len()
    }

    fn split(&self, payload: &Vec<RefinedSegment>) -> Option<(Vec<RefinedSegment>, Vec<RefinedSegment>)> {
        if payload.len() < 2 {
            return None;
        }
        let mid = payload.len() / 2;
        Some((payload[..mid].to_vec(), payload[mid..].to_vec()))
    }

    fn merge(&self, left: ProseOutcome, right: ProseOutcome) -> ProseOutcome {
        merge_prose_outcomes(vec![left, right])
    }

    fn fallback(&self, payload: &Vec<RefinedSegment>) -> Option<ProseOutcome> {
        Some(ProseOutcome {
            mode: defaults::FALLBACK_REASON.to_string(),
            paragraphs: payload
                .iter()
                .filter(|s| !s.text.trim().is_empty())
                .map(|s| s.text.clone())
                .collect(),
            verification: VerificationReport {
                claims_checked: 0,
                claims_flagged: 0,
                attests_faithful: false,
                notes: vec![defaults::FALLBACK_REASON.to_string()],
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// The three-stage refinement pipeline over one recording.
///
/// All state is in-memory and scoped to one run; `reset` discards it.
pub struct Pipeline {
    config: Config,
    service: Arc<dyn TransformService>,
    invoker: RobustInvoker,
    state: RunState,
    units: Vec<Unit<WindowPayload, Vec<TranscriptItem>>>,
    merged: Vec<TranscriptItem>,
    stage2: Option<RefineOutcome>,
    stage3: Option<ProseOutcome>,
    started_at: Instant,
}

impl Pipeline {
    pub fn new(config: Config, service: Arc<dyn TransformService>) -> Self {
        let invoker = RobustInvoker::new(config.retry.clone());
        let state = RunState::new(0, config.scheduler);
        Self {
            config,
            service,
            invoker,
            state,
            units: Vec::new(),
            merged: Vec::new(),
            stage2: None,
            stage3: None,
            started_at: Instant::now(),
        }
    }

    // -- snapshots ---------------------------------------------------------

    /// Read-only snapshot of scheduler progress.
    pub fn scheduler_state(&self) -> SchedulerState {
        self.state.snapshot()
    }

    /// Read-only view of the stage-1 unit list.
    pub fn units(&self) -> &[Unit<WindowPayload, Vec<TranscriptItem>>] {
        &self.units
    }

    /// The running merged transcript, recomputed after each completion.
    pub fn merged_transcript(&self) -> &[TranscriptItem] {
        &self.merged
    }

    pub fn stage2_outcome(&self) -> Option<&RefineOutcome> {
        self.stage2.as_ref()
    }

    pub fn stage3_outcome(&self) -> Option<&ProseOutcome> {
        self.stage3.as_ref()
    }

    // -- commands ----------------------------------------------------------

    /// Segments the recording, creates the unit set and runs stage 1 to
    /// quiescence (every unit completed or explicitly failed).
    pub async fn start(&mut self, audio: &dyn AudioSource) -> Result<()> {
        let segmenter = Segmenter::new(self.config.segmenter.clone());
        let windows = segmenter.segment(audio.duration(), audio.bytes_per_time_unit());
        info!(windows = windows.len(), duration = audio.duration(), "starting stage 1");

        self.units = windows
            .iter()
            .map(|w| {
                let payload = WindowPayload {
                    start: w.start,
                    end: w.end,
                    audio: audio.encode_window(w.start, w.end)?,
                };
                Ok(Unit::new(w.index as u64, w.index, payload))
            })
            .collect::<Result<Vec<_>>>()?;
        self.state = RunState::new(self.units.len(), self.config.scheduler);
        self.merged.clear();
        self.stage2 = None;
        self.stage3 = None;
        self.started_at = Instant::now();

        self.run_scan_loop().await;
        Ok(())
    }

    /// Requeues one failed unit and resumes the scan loop.
    pub async fn retry_unit(&mut self, id: u64) -> Result<()> {
        let index = self
            .units
            .iter()
            .position(|u| u.id == id)
            .ok_or_else(|| LongformError::Other(format!("no unit with id {id}")))?;
        self.apply(RunEvent::UnitRequeued(index));
        self.run_scan_loop().await;
        Ok(())
    }

    /// Requeues every failed unit and resumes the scan loop.
    pub async fn retry_all_failed(&mut self) {
        let failed: Vec<usize> = self
            .units
            .iter()
            .enumerate()
            .filter(|(_, u)| u.status == UnitStatus::Failed)
            .map(|(i, _)| i)
            .collect();
        if failed.is_empty() {
            return;
        }
        for index in failed {
            self.apply(RunEvent::UnitRequeued(index));
        }
        self.run_scan_loop().await;
    }

    /// Discards all unit state and stage outputs.
    pub fn reset(&mut self) {
        info!("pipeline reset, discarding run state");
        self.units.clear();
        self.merged.clear();
        self.stage2 = None;
        self.stage3 = None;
        self.state = RunState::new(0, self.config.scheduler);
    }

    /// Ends an active cooldown immediately.
    pub fn clear_cooldown_now(&mut self, reason: &str) {
        self.apply(RunEvent::CooldownCleared(reason.to_string()));
    }

    /// Replaces the merged stage-1 transcript with externally-supplied
    /// items, allowing stage 2 to run without a stage-1 pass.
    pub fn import_transcript(&mut self, items: Vec<TranscriptItem>) {
        self.merged = items;
    }

    /// Accepts an externally-exported stage-2 result.
    pub fn import_stage2(&mut self, value: serde_json::Value) -> Result<()> {
        self.stage2 = Some(from_value(value)?);
        Ok(())
    }

    /// Accepts an externally-exported stage-3 result.
    pub fn import_stage3(&mut self, value: serde_json::Value) -> Result<()> {
        self.stage3 = Some(from_value(value)?);
        Ok(())
    }

    /// Runs stage 2: batches the merged transcript and refines each batch.
    pub async fn run_stage2(&mut self) -> Result<&RefineOutcome> {
        if self.merged.is_empty() {
            return Err(LongformError::Other(
                "no merged transcript; run stage 1 or import items first".to_string(),
            ));
        }
        let batches = plan_batches(&self.merged, self.config.batch);
        info!(batches = batches.len(), items = self.merged.len(), "starting stage 2");

        let mut parts = Vec::with_capacity(batches.len());
        for (i, batch) in batches.into_iter().enumerate() {
            debug!(batch = i, items = batch.len(), "refining batch");
            let service = self.service.clone();
            let outcome = self
                .invoke_with_model_escalation(
                    move |model| RefineTask {
                        service: service.clone(),
                        model,
                    },
                    batch,
                    Stage::Refine,
                )
                .await?;
            parts.push(outcome);
        }

        self.stage2 = Some(merge_refine_outcomes(parts));
        Ok(self.stage2.as_ref().unwrap_or_else(|| unreachable!()))
    }

    /// Runs stage 3 over the stage-2 output.
    pub async fn run_stage3(&mut self) -> Result<&ProseOutcome> {
        let segments = self
            .stage2
            .as_ref()
            .map(|o| o.refined_script.clone())
            .ok_or_else(|| {
                LongformError::Other(
                    "no stage-2 output; run stage 2 or import it first".to_string(),
                )
            })?;
        let batches = plan_batches(&segments, self.config.batch);
        info!(batches = batches.len(), segments = segments.len(), "starting stage 3");

        let mut parts = Vec::with_capacity(batches.len());
        for batch in batches {
            let service = self.service.clone();
            let outcome = self
                .invoke_with_model_escalation(
                    move |model| ProseTask {
                        service: service.clone(),
                        model,
                    },
                    batch,
                    Stage::Prose,
                )
                .await?;
            parts.push(outcome);
        }

        self.stage3 = Some(merge_prose_outcomes(parts));
        Ok(self.stage3.as_ref().unwrap_or_else(|| unreachable!()))
    }

    // -- internals ---------------------------------------------------------

    fn apply(&mut self, event: RunEvent) {
        self.state = self.state.apply(event);
        for (i, unit) in self.units.iter_mut().enumerate() {
            if let Some(status) = self.state.status(i) {
                unit.status = status;
            }
        }
    }

    fn signal(&self, stage: Stage, model_id: &str) -> RateLimitSignal {
        RateLimitSignal {
            stage,
            offending_model_id: model_id.to_string(),
            observed_at: self.started_at.elapsed().as_secs_f64(),
        }
    }

    /// The stage-1 scan loop: fill the gap between in-flight work and the
    /// cap, fold completion events, tick the cooldown, until quiescent.
    async fn run_scan_loop(&mut self) {
        if self.units.is_empty() {
            return;
        }
        let (tx, mut rx) = mpsc::channel::<(usize, Result<Vec<TranscriptItem>>)>(self.units.len());
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if self.state.is_settled() {
                break;
            }

            for index in self.state.launchable() {
                self.apply(RunEvent::UnitStarted(index));
                let task = TranscribeTask {
                    service: self.service.clone(),
                    model: self.config.service.model.clone(),
                };
                let payload = self.units[index].payload.clone();
                let invoker = self.invoker.clone();
                let tx = tx.clone();
                debug!(unit = index, "dispatching window invocation");
                tokio::spawn(async move {
                    let result = invoker.invoke(&task, payload).await;
                    let _ = tx.send((index, result)).await;
                });
            }

            tokio::select! {
                Some((index, result)) = rx.recv() => self.on_unit_result(index, result),
                _ = ticker.tick() => self.apply(RunEvent::CooldownTick),
            }
        }
    }

    fn on_unit_result(&mut self, index: usize, result: Result<Vec<TranscriptItem>>) {
        match result {
            Ok(items) => {
                debug!(unit = index, items = items.len(), "window completed");
                self.units[index].result = Some(items);
                self.units[index].error = None;
                self.apply(RunEvent::UnitCompleted(index));
                self.recompute_merged();
            }
            Err(e) if e.is_rate_limit() => {
                let model = self.config.service.model.clone();
                self.apply(RunEvent::RateLimited(
                    index,
                    self.signal(Stage::Transcribe, &model),
                ));
            }
            Err(e) => {
                warn!(unit = index, error = %e, "window failed");
                self.units[index].error = Some(e.to_string());
                self.apply(RunEvent::UnitFailed(index));
            }
        }
    }

    /// Recomputes the merged transcript from scratch over all completed
    /// units, keeping intermediate output order-correct under out-of-order
    /// completion.
    fn recompute_merged(&mut self) {
        let completed: Vec<(usize, Vec<TranscriptItem>)> = self
            .units
            .iter()
            .filter(|u| u.status == UnitStatus::Completed)
            .filter_map(|u| u.result.as_ref().map(|r| (u.order_index, r.clone())))
            .collect();
        self.merged = merge_windows(&completed);
    }

    /// Invokes one batch, walking the ranked fallback model list on rate
    /// limits and then entering a bounded cooldown-and-retry loop on the
    /// last model.
    async fn invoke_with_model_escalation<T, F>(
        &self,
        make_task: F,
        payload: T::Payload,
        stage: Stage,
    ) -> Result<T::Output>
    where
        T: TransformTask,
        T::Payload: Clone,
        F: Fn(String) -> T,
    {
        let mut models = std::iter::once(self.config.service.model.clone())
            .chain(self.config.service.fallback_models.iter().cloned());
        let mut current = models.next().unwrap_or_else(|| "transform-default".to_string());
        let mut cooldown = CooldownPolicy::new(self.config.scheduler.cooldown_ticks);
        let mut cooldown_rounds = 0u32;

        loop {
            let task = make_task(current.clone());
            match self.invoker.invoke(&task, payload.clone()).await {
                Ok(output) => return Ok(output),
                Err(e) if e.is_rate_limit() => {
                    if let Some(next) = models.next() {
                        warn!(%stage, from = %current, to = %next, "rate limited, escalating model");
                        current = next;
                        continue;
                    }
                    if cooldown_rounds >= MAX_COOLDOWN_RETRIES {
                        return Err(e);
                    }
                    cooldown_rounds += 1;
                    cooldown.on_rate_limited(&self.signal(stage, &current));
                    while cooldown.is_blocked() {
                        tokio::time::sleep(TICK_INTERVAL).await;
                        cooldown.tick();
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::TranscriptItem;

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
    fn refine_fallback_preserves_every_nonempty_item() {
        let items = vec![item("00:00", "alpha"), item("00:05", "bravo")];
        let outcome = refine_fallback(&items);
        assert_eq!(outcome.refined_script.len(), 2);
        assert!(outcome.refined_script.iter().all(|s| s.needs_review));
        assert_eq!(outcome.mode, defaults::FALLBACK_REASON);
        assert!(outcome.audit.all_covered);
        assert_eq!(outcome.audit.fallback_batches, 1);
    }

    #[test]
    fn refine_fallback_omits_empty_items_from_both_reports() {
        let items = vec![item("00:00", "alpha"), item("00:05", "  ")];
        let outcome = refine_fallback(&items);
        assert_eq!(outcome.refined_script.len(), 1);
        assert!(outcome.removals.is_empty());
        assert!(!outcome.audit.all_covered);
    }

    #[test]
    fn refine_fallback_uses_edited_text_when_present() {
        let mut it = item("00:00", "helo");
        it.edited_text = "hello".to_string();
        let outcome = refine_fallback(&[it]);
        assert_eq!(outcome.refined_script[0].text, "hello");
    }
}
