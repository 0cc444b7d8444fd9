//! Headless script-call runner for CI verification and transcript replay.
//!
//! This crate drives a [`gateway_core::gateway::SyncedGateway`] from JSON
//! requests on stdin, with results on stdout. This enables:
//!
//! - **Scripted testing**: a controller issues verbs as any caller and
//!   checks the results
//! - **CI verification**: automated checks of gateway rules and determinism
//! - **Replay verification**: recorded transcripts must reproduce their
//!   final state hash
//!
//! # Protocol
//!
//! Communication uses JSON lines (one JSON object per line):
//!
//! - **stdin**: requests from the controller (call, tick, hash, quit)
//! - **stdout**: responses (JSON)
//! - **stderr**: logs (human-readable)
//!
//! See [`protocol`] module for the full request/response format.
//!
//! # Example
//!
//! ```bash
//! # Run a scenario and record the session
//! echo '{"op":"tick","count":60}' | \
//!     cargo run -p gateway_headless -- run --scenario scenarios/duel.ron --record duel.json
//!
//! # Verify determinism
//! cargo run -p gateway_headless -- replay --transcript duel.json --verify
//! ```

pub mod protocol;
pub mod runner;
pub mod scenario;
pub mod transcript;

pub use protocol::{Request, Response, PROTOCOL_VERSION};
pub use runner::{HeadlessRunner, RunnerError, Session};
pub use scenario::{Scenario, ScenarioError};
pub use transcript::{ReplayOutcome, Transcript, TranscriptError, TRANSCRIPT_VERSION};
