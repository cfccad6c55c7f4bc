//! lofi-loop: prompt-to-loop music daemon.
//!
//! This binary can run in two modes:
//! - CLI mode: play prompts back to back, or render one to a WAV file
//! - Daemon mode: JSON-RPC server over stdio for editor integration

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lofi_loop::audio::WavTarget;
use lofi_loop::cli::Cli;
use lofi_loop::config::DaemonConfig;
use lofi_loop::engine::LoopEngine;
use lofi_loop::error::DaemonError;
use lofi_loop::events::{EventSink, LogSink};
use lofi_loop::generation::GenerationPipeline;
use lofi_loop::models::{ModelLoader, ProceduralRuntime};
use lofi_loop::rpc::{run_server, write_lines, NotificationSink, ServerState};

const WRITER_DRAIN: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
    // stdout carries JSON-RPC in daemon mode; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lofi_loop=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse_args();

    let mut config = DaemonConfig::from_env();
    cli.apply_to(&mut config);
    if let Some(message) = config.validate() {
        bail!(DaemonError::Config(message));
    }

    if !cli.is_daemon_mode() && !cli.is_cli_mode() {
        print_usage();
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;

    let outcome = if cli.is_daemon_mode() {
        runtime.block_on(run_daemon_mode(&config))
    } else if let Some(output) = &cli.output {
        runtime.block_on(run_render_mode(&cli, &config, output))
    } else {
        runtime.block_on(run_play_mode(&cli, &config))
    };

    // The stdin reader may still be parked in a blocking read.
    runtime.shutdown_background();
    outcome
}

/// Runs the daemon mode (JSON-RPC server).
async fn run_daemon_mode(config: &DaemonConfig) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "lofi-loop daemon starting");

    let (tx, rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_lines(rx, tokio::io::stdout()));

    let sink: Arc<dyn EventSink> = Arc::new(NotificationSink::new(tx.clone()));
    let engine = LoopEngine::from_config(config, sink);
    let state = ServerState::new(engine.clone());

    let served = run_server(&state, BufReader::new(tokio::io::stdin()), &tx).await;
    engine.shutdown();

    // Dropping every sender lets the writer drain and finish.
    drop(state);
    drop(engine);
    drop(tx);
    // A run still in flight holds a sender; give it a moment, not forever.
    match tokio::time::timeout(WRITER_DRAIN, writer).await {
        Ok(Ok(Err(e))) => warn!(error = %e, "stdout closed early"),
        Ok(Err(e)) => warn!(error = %e, "output writer aborted"),
        Err(_) => warn!("output writer still busy, exiting anyway"),
        Ok(Ok(Ok(()))) => {}
    }

    served.context("reading requests from stdin")
}

/// Plays each prompt in turn, crossfading between them.
async fn run_play_mode(cli: &Cli, config: &DaemonConfig) -> Result<()> {
    let engine = LoopEngine::from_config(config, Arc::new(LogSink));

    for (i, prompt) in cli.prompts.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(cli.interval()).await;
        }
        info!(prompt = %prompt, "generating");
        match engine.generate(prompt).await {
            Some(Ok(buffer)) => {
                info!(secs = format!("{:.2}", buffer.duration_sec()), "loop playing")
            }
            Some(Err(e)) => warn!(error = %e, "prompt failed, keeping current loop"),
            None => warn!("empty prompt skipped"),
        }
    }

    tokio::time::sleep(cli.play_duration()).await;
    engine.shutdown();
    Ok(())
}

/// Renders the first prompt to a WAV file without touching the audio device.
async fn run_render_mode(cli: &Cli, config: &DaemonConfig, output: &Path) -> Result<()> {
    let Some(prompt) = cli.prompts.first() else {
        bail!("a prompt is required with --output");
    };
    if cli.prompts.len() > 1 {
        warn!("only the first prompt is rendered with --output");
    }

    let sink: Arc<dyn EventSink> = Arc::new(LogSink);
    let loader = ModelLoader::new(Arc::new(ProceduralRuntime::from_config(config)), sink.clone());
    let pipeline = GenerationPipeline::new(loader, sink, Arc::new(WavTarget::new(output)))
        .with_max_steps(config.max_new_tokens);

    let start = Instant::now();
    let buffer = match pipeline.generate(prompt).await {
        Some(result) => result?,
        None => bail!("prompt is empty"),
    };

    info!(
        path = %output.display(),
        samples = buffer.len(),
        audio_secs = format!("{:.2}", buffer.duration_sec()),
        elapsed_secs = format!("{:.2}", start.elapsed().as_secs_f32()),
        "loop written"
    );
    Ok(())
}

/// Prints usage information.
fn print_usage() {
    eprintln!("lofi-loop: looping music from text prompts");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  Play prompts, crossfading every 20s:");
    eprintln!("    lofi-loop -p \"calm piano\" -p \"upbeat drums\" --interval 20");
    eprintln!();
    eprintln!("  Render one loop to a file:");
    eprintln!("    lofi-loop -p \"rainy lofi\" --output loop.wav");
    eprintln!();
    eprintln!("  Daemon mode (JSON-RPC server):");
    eprintln!("    lofi-loop --daemon");
    eprintln!();
    eprintln!("Run 'lofi-loop --help' for full options.");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print_usage_doesnt_panic() {
        print_usage();
    }
}
