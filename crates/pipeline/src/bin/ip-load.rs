//! `ip-load`: stream image files through the pipeline one after another.
//!
//! ```text
//! ip-load [--config pipeline.json] FILE...
//! ```
//!
//! Each file is loaded, its render notification awaited, and the pipeline
//! reset before the next one. Runs against the simulated platform; set
//! `RUST_LOG=debug` to watch the command/event traffic.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam::channel;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ip_common::PipelineConfig;
use ip_pipeline::sim::{SimPlatform, SimSettings, SimSurface};
use ip_pipeline::{FileSource, Pipeline};

const RENDER_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "ip-load")]
#[command(about = "Stream image files through the decoder and renderer")]
struct Cli {
    /// Pipeline configuration file (JSON).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Image files, loaded in order.
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    let Some(path) = path else {
        return Ok(PipelineConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    let config: PipelineConfig = serde_json::from_str(&text)
        .with_context(|| format!("parse config {}", path.display()))?;
    Ok(config)
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    config.validate().context("invalid pipeline config")?;

    let platform = Arc::new(SimPlatform::new(SimSettings::default()));
    let mut pipeline =
        Pipeline::new(platform.clone(), config).context("failed to initialize pipeline")?;

    for path in &cli.files {
        let source = FileSource::open(path).with_context(|| format!("open {}", path.display()))?;
        let (tx, rx) = channel::bounded::<bool>(1);

        let report = pipeline
            .load(Box::new(source), Box::new(SimSurface::new()), move |filled| {
                let _ = tx.try_send(filled);
            })
            .with_context(|| format!("load {}", path.display()))?;

        match rx.recv_timeout(RENDER_TIMEOUT) {
            Ok(filled) => info!(
                file = %path.display(),
                filled,
                submissions = report.submissions,
                bytes = report.bytes_consumed,
                geometry = %report.geometry,
                "Rendered"
            ),
            Err(_) => warn!(file = %path.display(), "No render notification"),
        }

        pipeline.reset().context("reset failed")?;
    }

    pipeline.shutdown().context("shutdown failed")?;
    let record = platform.record();
    info!(
        commands = record.commands.len(),
        submissions = record.submissions.len(),
        returns = record.returns,
        "Done"
    );
    Ok(())
}
