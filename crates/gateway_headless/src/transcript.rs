//! Recorded sessions for replay verification.
//!
//! A transcript holds the scenario, the gateway configuration and every
//! state-changing request in arrival order. Replaying it on a fresh world
//! must land on the recorded final hash.

use std::path::Path;

use gateway_core::prelude::*;
use std::result::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::Request;
use crate::runner::Session;
use crate::scenario::{Scenario, ScenarioError};

/// Transcript file format version for compatibility.
pub const TRANSCRIPT_VERSION: u32 = 1;

/// Error type for transcript operations.
#[derive(Error, Debug)]
pub enum TranscriptError {
    /// Failed to read or write the file.
    #[error("Transcript I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to encode or decode JSON.
    #[error("Transcript is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// Written by an incompatible version.
    #[error("Transcript version mismatch: expected {expected}, got {found}")]
    VersionMismatch {
        /// Version this build reads.
        expected: u32,
        /// Version in the file.
        found: u32,
    },
    /// The recorded scenario no longer builds.
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
}

/// Outcome of replaying a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayOutcome {
    /// Frame reached.
    pub frame: u64,
    /// State hash reached.
    pub hash: u64,
    /// Whether frame and hash match the recording.
    pub matches: bool,
}

/// A recorded headless session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    /// Format version.
    pub version: u32,
    /// Initial world.
    pub scenario: Scenario,
    /// Gateway configuration in effect.
    pub config: GatewayConfig,
    /// State-changing requests in arrival order.
    pub requests: Vec<Request>,
    /// Frame when recording finished.
    pub final_frame: u64,
    /// State hash when recording finished.
    pub final_hash: u64,
}

impl Transcript {
    /// Start an empty transcript.
    #[must_use]
    pub fn new(scenario: Scenario, config: GatewayConfig) -> Self {
        Self {
            version: TRANSCRIPT_VERSION,
            scenario,
            config,
            requests: Vec::new(),
            final_frame: 0,
            final_hash: 0,
        }
    }

    /// Record a request. Read-only requests are skipped.
    pub fn record(&mut self, request: &Request) {
        if matches!(request, Request::Call { .. } | Request::Tick { .. }) {
            self.requests.push(request.clone());
        }
    }

    /// Finalize with the end state.
    pub fn finalize(&mut self, final_frame: u64, final_hash: u64) {
        self.final_frame = final_frame;
        self.final_hash = final_hash;
    }

    /// Save as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), TranscriptError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }

    /// Load and check the format version.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or was written
    /// by another format version.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TranscriptError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let transcript: Self = serde_json::from_str(&text)?;

        if transcript.version != TRANSCRIPT_VERSION {
            return Err(TranscriptError::VersionMismatch {
                expected: TRANSCRIPT_VERSION,
                found: transcript.version,
            });
        }
        Ok(transcript)
    }

    /// Rebuild the world and apply every recorded request.
    ///
    /// # Errors
    ///
    /// Returns an error if the scenario no longer builds.
    pub fn replay(&self) -> Result<Session, TranscriptError> {
        let gateway = self.scenario.build_gateway(self.config.clone())?;
        let mut session = Session::new(gateway);
        for request in &self.requests {
            session.handle(request.clone());
        }
        Ok(session)
    }

    /// Replay and compare against the recorded end state.
    ///
    /// # Errors
    ///
    /// Returns an error if the scenario no longer builds.
    pub fn verify(&self) -> Result<ReplayOutcome, TranscriptError> {
        let session = self.replay()?;
        let frame = session.gateway().frame();
        let hash = session.gateway().state_hash();
        let matches = frame == self.final_frame && hash == self.final_hash;
        if !matches {
            tracing::warn!(
                expected_frame = self.final_frame,
                expected_hash = self.final_hash,
                frame,
                hash,
                "replay diverged"
            );
        }
        Ok(ReplayOutcome {
            frame,
            hash,
            matches,
        })
    }

    /// Number of recorded requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// True if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
