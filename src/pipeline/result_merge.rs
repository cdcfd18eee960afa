//! Result merger for stage-2/3 batch outputs.
//!
//! Concatenates per-batch lists in batch order and merges audit metadata:
//! numeric counters by sum, boolean attestations by logical AND, string
//! sets by deduplicating union. The output `mode` is rewritten to its
//! `…_batched` variant so downstream consumers can tell a concatenation
//! from a single-shot result.

use crate::pipeline::types::{AuditReport, ProseOutcome, RefineOutcome, VerificationReport};

const BATCHED_SUFFIX: &str = "_batched";

fn batched_mode(mode: &str) -> String {
    if mode.ends_with(BATCHED_SUFFIX) {
        mode.to_string()
    } else {
        format!("{mode}{BATCHED_SUFFIX}")
    }
}

fn merge_audits(audits: impl IntoIterator<Item = AuditReport>) -> AuditReport {
    let mut merged = AuditReport {
        all_covered: true,
        ..Default::default()
    };
    let mut saw_any = false;
    for audit in audits {
        saw_any = true;
        merged.input_items += audit.input_items;
        merged.output_segments += audit.output_segments;
        merged.removed_items += audit.removed_items;
        merged.fallback_batches += audit.fallback_batches;
        merged.all_covered &= audit.all_covered;
        merged.models_used.extend(audit.models_used);
    }
    if !saw_any {
        merged.all_covered = false;
    }
    merged
}

/// Combines per-batch stage-2 results into one coherent outcome.
pub fn merge_refine_outcomes(parts: Vec<RefineOutcome>) -> RefineOutcome {
    let mode = parts
        .first()
        .map_or_else(|| "refined".to_string(), |p| p.mode.clone());

    let mut refined_script = Vec::new();
    let mut removals = Vec::new();
    let mut audits = Vec::new();
    for part in parts {
        refined_script.extend(part.refined_script);
        removals.extend(part.removals);
        audits.push(part.audit);
    }

    RefineOutcome {
        mode: batched_mode(&mode),
        refined_script,
        removals,
        audit: merge_audits(audits),
    }
}

/// Combines per-batch stage-3 results into one coherent outcome.
pub fn merge_prose_outcomes(parts: Vec<ProseOutcome>) -> ProseOutcome {
    let mode = parts
        .first()
        .map_or_else(|| "prose".to_string(), |p| p.mode.clone());

    let mut paragraphs = Vec::new();
    let mut verification = VerificationReport {
        attests_faithful: !parts.is_empty(),
        ..Default::default()
    };
    for part in parts {
        paragraphs.extend(part.paragraphs);
        verification.claims_checked += part.verification.claims_checked;
        verification.claims_flagged += part.verification.claims_flagged;
        verification.attests_faithful &= part.verification.attests_faithful;
        for note in part.verification.notes {
            if !verification.notes.contains(&note) {
                verification.notes.push(note);
            }
        }
    }

    ProseOutcome {
        mode: batched_mode(&mode),
        paragraphs,
        verification,
    }
}
