//! Headless gateway runner.
//!
//! This binary loads a scenario and serves script calls as JSON on
//! stdin/stdout. Designed for CI checks and transcript verification.
//!
//! # Usage
//!
//! ```bash
//! # Serve requests from stdin, recording a transcript
//! cargo run -p gateway_headless -- run --scenario scenarios/duel.ron --record duel.json
//!
//! # Replay a transcript and check its final hash
//! cargo run -p gateway_headless -- replay --transcript duel.json --verify
//! ```
//!
//! # Protocol
//!
//! Input (stdin): JSON requests, one per line
//! Output (stdout): JSON responses, one per line
//! Logs (stderr): Debug information
//!
//! See the protocol module for request/response format.

use std::io;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use gateway_core::config::GatewayConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gateway_headless::{HeadlessRunner, Scenario, Session, Transcript};

#[derive(Parser)]
#[command(name = "gateway_headless")]
#[command(about = "Headless synced-gateway runner for CI and replay verification")]
#[command(version)]
struct Cli {
    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve script calls for one scenario
    Run {
        /// Scenario file to load
        #[arg(short, long)]
        scenario: PathBuf,

        /// Gateway configuration (RON); defaults when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write a transcript of the session here
        #[arg(short, long)]
        record: Option<PathBuf>,
    },

    /// Replay a recorded transcript
    Replay {
        /// Transcript file path
        #[arg(short, long)]
        transcript: PathBuf,

        /// Fail unless the replay reproduces the recorded hash
        #[arg(long)]
        verify: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    // Logs go to stderr (stdout is for protocol); RUST_LOG overrides the level
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .init();

    match cli.command {
        Commands::Run {
            scenario,
            config,
            record,
        } => cmd_run(scenario, config, record),
        Commands::Replay { transcript, verify } => cmd_replay(transcript, verify),
    }
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}

/// Serve requests from stdin
fn cmd_run(scenario_path: PathBuf, config_path: Option<PathBuf>, record: Option<PathBuf>) {
    let scenario = Scenario::load(&scenario_path)
        .unwrap_or_else(|e| fail(format!("Failed to load scenario: {e}")));

    let config = match config_path {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .unwrap_or_else(|e| fail(format!("Failed to read {}: {e}", path.display())));
            GatewayConfig::from_ron_str(&text)
                .unwrap_or_else(|e| fail(format!("Failed to parse config: {e}")))
        }
        None => GatewayConfig::default(),
    };

    tracing::info!(scenario = %scenario_path.display(), "Starting headless session");
    let session = Session::recording(scenario, config)
        .unwrap_or_else(|e| fail(format!("Failed to build scenario: {e}")));

    let mut runner = HeadlessRunner::new(session);
    let stdin = io::stdin();
    if let Err(e) = runner.run(stdin.lock(), io::stdout().lock()) {
        fail(format!("Session failed: {e}"));
    }

    if let Some(path) = record {
        if let Some(transcript) = runner.session_mut().finish() {
            match transcript.save(&path) {
                Ok(()) => tracing::info!(
                    path = %path.display(),
                    requests = transcript.len(),
                    "Transcript saved"
                ),
                Err(e) => fail(format!("Failed to save transcript: {e}")),
            }
        }
    }
}

/// Replay a transcript
fn cmd_replay(path: PathBuf, verify: bool) {
    let transcript = Transcript::load(&path)
        .unwrap_or_else(|e| fail(format!("Failed to load transcript: {e}")));

    tracing::info!(
        scenario = %transcript.scenario.name,
        requests = transcript.len(),
        "Replaying transcript"
    );

    let outcome = transcript
        .verify()
        .unwrap_or_else(|e| fail(format!("Replay failed: {e}")));

    println!("Frame: {}", outcome.frame);
    println!("Hash:  {:016x}", outcome.hash);

    if verify {
        if outcome.matches {
            println!("Replay verified: final hash matches");
        } else {
            fail(format!(
                "Replay diverged: expected frame {} hash {:016x}",
                transcript.final_frame, transcript.final_hash
            ));
        }
    }
}
