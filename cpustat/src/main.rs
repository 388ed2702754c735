//! # cpustat - Main Entry Point
//!
//! Supports two capture sources:
//! - **Kernel** (default): fexit probe on `kcpustat_cpu_fetch()`, needs root and BTF
//! - **Procfs** (`--source procfs`): periodic `/proc/stat` sampling, no privileges
//!
//! Both feed the same poll loop and table renderer. SIGINT or SIGTERM stops
//! the loop; the probe is detached before the process exits.

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use std::io;
use tokio_util::sync::CancellationToken;

use cpustat::capture::{ProbeSession, ProcStatSampler};
use cpustat::channel::{channel, RING_BYTE_SIZE};
use cpustat::cli::{Args, SourceKind};
use cpustat::config::ProbeConfig;
use cpustat::poll_loop::{PollLoop, PollSummary};
use cpustat::preflight::run_preflight_checks;
use cpustat::render::TableRenderer;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_NOPERM: i32 = 77;

fn main() {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    std::process::exit(match run(args) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let denied = err.chain().any(|cause| {
        cause
            .downcast_ref::<io::Error>()
            .is_some_and(|e| e.kind() == io::ErrorKind::PermissionDenied)
    });
    let msg = err.to_string().to_lowercase();
    if denied || msg.contains("permission denied") || msg.contains("requires root") {
        EXIT_NOPERM
    } else {
        EXIT_ERROR
    }
}

/// Cancel `token` on the first SIGINT or SIGTERM
fn spawn_signal_handler(token: CancellationToken) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl+C: {e}");
                    return;
                }
                debug!("SIGINT received");
            }
            _ = terminate.recv() => debug!("SIGTERM received"),
        }
        token.cancel();
    });
    Ok(())
}

#[tokio::main]
async fn run(args: Args) -> Result<()> {
    let config = ProbeConfig::from(&args);
    let stop = CancellationToken::new();
    spawn_signal_handler(stop.clone())?;

    let summary = match config.source {
        SourceKind::Kernel => run_kernel(&config, &stop).await?,
        SourceKind::Procfs => run_procfs(&config, &stop).await?,
    };

    info!(
        "Stopped after {} records ({} malformed, {} idle polls)",
        summary.records, summary.malformed, summary.idle_polls
    );
    Ok(())
}

async fn run_kernel(config: &ProbeConfig, stop: &CancellationToken) -> Result<PollSummary> {
    run_preflight_checks(&config.bpf_path)?;

    let mut session = ProbeSession::attach(config).context("Failed to set up the eBPF probe")?;
    info!("Tracing {}... Hit Ctrl-C to end.", cpustat::capture::HOOK_FUNCTION);

    let mut renderer = TableRenderer::new(io::stdout().lock());
    renderer.write_header().context("Failed to write table header")?;

    let result = PollLoop::default().run(session.ring_mut(), &mut renderer, stop).await;
    session.detach();
    Ok(result?)
}

async fn run_procfs(config: &ProbeConfig, stop: &CancellationToken) -> Result<PollSummary> {
    let (producer, mut consumer) = channel(RING_BYTE_SIZE)?;
    let sampler = ProcStatSampler::new(config);
    let sampler_task = tokio::spawn(sampler.run(producer, stop.clone()));
    info!("Sampling /proc/stat every {:?}... Hit Ctrl-C to end.", config.interval);

    let mut renderer = TableRenderer::new(io::stdout().lock());
    renderer.write_header().context("Failed to write table header")?;

    let result = PollLoop::default().run(&mut consumer, &mut renderer, stop).await;

    // The sampler also ends on its own if /proc/stat becomes unreadable,
    // which closes the channel; report its error in that case.
    stop.cancel();
    sampler_task
        .await
        .context("Sampler task panicked")?
        .context("Failed to sample /proc/stat")?;

    Ok(result?)
}
