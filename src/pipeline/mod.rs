//! The segmentation-scheduling-and-resilient-transform pipeline.
//!
//! Control flow: segmenter → units queued to the scheduler → each unit
//! invoked through the robust invocation engine → completions folded
//! through the boundary-fingerprint merger → the merged transcript is
//! regrouped by the batch planner and refined (stage 2) → the result
//! merger produces the final structured output; stage 3 repeats
//! invocation+merge to produce continuous prose.

pub mod batch;
pub mod invoke;
pub mod merge;
pub mod orchestrator;
pub mod result_merge;
pub mod scheduler;
pub mod segmenter;
pub mod types;

pub use batch::{BatchConfig, plan_batches};
pub use invoke::{RetryConfig, RobustInvoker, TransformTask};
pub use merge::merge_windows;
pub use orchestrator::Pipeline;
pub use result_merge::{merge_prose_outcomes, merge_refine_outcomes};
pub use scheduler::{CooldownPolicy, RunEvent, RunState, SchedulerConfig};
pub use segmenter::{Segmenter, SegmenterConfig, Window};
