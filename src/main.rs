use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use frontier_frames::{ContextKind, FrameConfig, ScriptHost, TickReport};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: frontier-frames <script.js> [document|worker] [frames]";
const DEFAULT_FRAMES: usize = 60;
/// Stand-in for the display's vsync when running documents headless.
const DISPLAY_REFRESH: Duration = Duration::from_micros(16_667);

fn main() {
    let subscriber_result = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .try_init();
    if subscriber_result.is_err() {
        // tracing was already initialised; continue silently
    }

    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let script_path = args.next().map(PathBuf::from).context(USAGE)?;
    let kind = match args.next().as_deref() {
        None | Some("document") => ContextKind::Document,
        Some("worker") => ContextKind::DedicatedWorker,
        Some(other) => bail!("unknown global kind {other:?}; {USAGE}"),
    };
    let frames = args
        .next()
        .map(|raw| raw.parse::<usize>())
        .transpose()
        .context("frame count must be a non-negative integer")?
        .unwrap_or(DEFAULT_FRAMES);

    let source = std::fs::read_to_string(&script_path)
        .with_context(|| format!("failed to read {}", script_path.display()))?;
    let config = FrameConfig::from_env().context("failed to load frame configuration")?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    rt.block_on(drive(config, kind, &script_path, &source, frames))
}

async fn drive(
    config: FrameConfig,
    kind: ContextKind,
    script_path: &Path,
    source: &str,
    frames: usize,
) -> Result<()> {
    let host = ScriptHost::new(config)?;
    let global = match kind {
        ContextKind::Document => host.create_document()?,
        ContextKind::DedicatedWorker => host.create_worker()?,
    };
    global.eval(source, &script_path.display().to_string())?;

    let mut refresh = tokio::time::interval(DISPLAY_REFRESH);
    let mut delivered = 0;
    while delivered < frames && host.has_pending_frames() {
        let reports = match kind {
            ContextKind::Document => {
                refresh.tick().await;
                host.present_frame(Instant::now())
            }
            ContextKind::DedicatedWorker => host.next_worker_frame().await,
        };
        for report in &reports {
            log_report(report);
        }
        delivered += reports.len();
    }

    info!(
        frames = delivered,
        pending = global.pending_animation_frames(),
        "finished"
    );
    Ok(())
}

fn log_report(report: &TickReport) {
    info!(
        context = %report.context,
        timestamp = report.timestamp,
        fired = report.fired.len(),
        rescheduled = report.rescheduled,
        "frame"
    );
    for (handle, err) in &report.failures {
        warn!(handle = handle.get(), error = %err, "frame callback failed");
    }
}
