//! Command-line interface for longform
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Resilient LLM refinement for long-recording transcripts
#[derive(Parser, Debug)]
#[command(
    name = "longform",
    version,
    about = "Resilient LLM refinement for long-recording transcripts"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: progress, -vv: full diagnostics)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Transform model override (e.g. transform-large)
    #[arg(long, global = true, value_name = "MODEL")]
    pub model: Option<String>,

    /// Transform service endpoint override
    #[arg(long, global = true, value_name = "URL")]
    pub endpoint: Option<String>,
}

/// Parse a duration string into fractional seconds.
///
/// Supports any duration format accepted by `humantime`: bare numbers
/// (seconds), single-unit (`30s`, `5m`, `2h`), and compound (`1h30m`).
fn parse_duration_secs(s: &str) -> Result<f64, String> {
    let s = s.trim();
    // Bare number → seconds
    if let Ok(secs) = s.parse::<f64>() {
        return Ok(secs);
    }
    humantime::parse_duration(s)
        .map(|d| d.as_secs_f64())
        .map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the window plan for a recording of the given duration
    Plan {
        /// Recording duration. Examples: 185, 30m, 1h30m
        #[arg(long, value_name = "DURATION", value_parser = parse_duration_secs)]
        duration: f64,

        /// Encoded payload size per second of audio, in bytes
        #[arg(long, value_name = "BYTES", default_value = "16000")]
        bytes_per_sec: usize,
    },

    /// Refine transcript items (stage 2) into a polished script
    Refine {
        /// Transcript items as JSON (reads stdin when omitted)
        #[arg(long, value_name = "FILE")]
        input: Option<PathBuf>,

        /// Write the refined outcome here instead of stdout
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Rewrite a refined script (stage 3) as continuous prose
    Prose {
        /// Stage-2 outcome as JSON (reads stdin when omitted)
        #[arg(long, value_name = "FILE")]
        input: Option<PathBuf>,

        /// Write the prose outcome here instead of stdout
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}
