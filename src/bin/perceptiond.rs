//! perceptiond - ambient activity perception daemon
//!
//! Reads every configured camera, tracks motion per camera and emits one fused
//! feature vector per tick, either as log lines or as JSON lines on stdout.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ambient_perception::{FeatureSink, JsonLinesSink, LogSink, Pipeline, PipelineConfig};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Turn live camera feeds into smoothed ambient-activity features"
)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(long, env = "AMBIENT_CONFIG")]
    config: Option<PathBuf>,

    /// Write features to stdout as JSON lines instead of logging them.
    #[arg(long)]
    json: bool,

    /// Stop after this many ticks.
    #[arg(long)]
    ticks: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = PipelineConfig::load(args.config.as_deref())?;
    for camera in &cfg.cameras {
        log::info!("camera {} via {}", camera.id, camera.transport.name());
    }

    let sink: Box<dyn FeatureSink> = if args.json {
        Box::new(JsonLinesSink::stdout())
    } else {
        Box::new(LogSink)
    };
    let mut pipeline = Pipeline::new(&cfg, sink)?;

    let stop = Arc::new(AtomicBool::new(false));
    let handler_flag = stop.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    let ticks = pipeline.run(&stop, args.ticks)?;
    log::info!("perceptiond stopped after {} tick(s)", ticks);
    Ok(())
}
