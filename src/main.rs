use anyhow::{Context, Result};
use clap::Parser;
use longform::cli::{Cli, Commands};
use longform::config::Config;
use longform::pipeline::orchestrator::Pipeline;
use longform::pipeline::segmenter::Segmenter;
use longform::pipeline::types::TranscriptItem;
use longform::transform::http::HttpTransformService;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    let config = load_config(cli.config.as_deref(), cli.model, cli.endpoint)?;

    match cli.command {
        Commands::Plan {
            duration,
            bytes_per_sec,
        } => {
            print_plan(&config, duration, bytes_per_sec);
        }
        Commands::Refine { input, output } => {
            let items: Vec<TranscriptItem> = read_json(input.as_deref())
                .context("reading transcript items")?;
            let mut pipeline = build_pipeline(config)?;
            pipeline.import_transcript(items);
            let outcome = pipeline.run_stage2().await?;
            write_json(output.as_deref(), outcome)?;
        }
        Commands::Prose { input, output } => {
            let stage2: serde_json::Value = read_json(input.as_deref())
                .context("reading stage-2 outcome")?;
            let mut pipeline = build_pipeline(config)?;
            pipeline.import_stage2(stage2)?;
            let outcome = pipeline.run_stage3().await?;
            write_json(output.as_deref(), outcome)?;
        }
    }

    Ok(())
}

/// Initialize tracing to stderr; stdout is reserved for JSON results.
///
/// `RUST_LOG` wins when set, otherwise verbosity flags pick the level.
fn init_logging(quiet: bool, verbose: u8) {
    let default_level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/longform/config.toml)
/// 3. Built-in defaults with environment variable overrides
///
/// CLI flags win over both the file and the environment.
fn load_config(
    custom_path: Option<&Path>,
    model: Option<String>,
    endpoint: Option<String>,
) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path)?
    } else {
        let default_path = Config::default_path();
        Config::load_or_default(&default_path)
    };

    let mut config = config.with_env_overrides();
    if let Some(model) = model {
        config.service.model = model;
    }
    if let Some(endpoint) = endpoint {
        config.service.endpoint = endpoint;
    }
    Ok(config)
}

fn build_pipeline(config: Config) -> Result<Pipeline> {
    let service = HttpTransformService::new(&config.service)?;
    Ok(Pipeline::new(config, Arc::new(service)))
}

/// Print the window plan without contacting the service.
fn print_plan(config: &Config, duration: f64, bytes_per_sec: usize) {
    let segmenter = Segmenter::new(config.segmenter.clone());
    let windows = segmenter.segment(duration, bytes_per_sec);

    println!(
        "Plan for {duration:.1}s recording ({} windows):",
        windows.len()
    );
    for window in &windows {
        println!(
            "  [{}] {:.1}s – {:.1}s ({:.1}s)",
            window.index,
            window.start,
            window.end,
            window.end - window.start
        );
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: Option<&Path>) -> Result<T> {
    let contents = match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    Ok(serde_json::from_str(&contents)?)
}

fn write_json<T: serde::Serialize>(path: Option<&Path>, value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)?;
    match path {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("writing {}", path.display()))?;
        }
        None => println!("{rendered}"),
    }
    Ok(())
}
