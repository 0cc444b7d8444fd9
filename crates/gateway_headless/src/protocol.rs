//! JSON protocol for headless gateway sessions.
//!
//! The runner communicates via JSON lines (one JSON object per line):
//!
//! **Input (stdin):** script calls and frame advances from the controller
//! **Output (stdout):** results, fatal script errors and state hashes
//!
//! # Protocol Flow
//!
//! 1. Runner loads its scenario, outputs `{"type":"ready",...}`
//! 2. Controller sends requests as JSON lines
//! 3. Runner answers every request with exactly one response
//! 4. `quit` (or end of input) ends the session with `{"type":"bye",...}`
//!
//! # Example Session
//!
//! ```text
//! <- {"type":"ready","version":"1.0","frame":0,"hash":1234}
//! -> {"op":"call","ctx":{"scope":{"team":0}},"verb":"UseTeamResource","args":[0,"metal",50]}
//! <- {"type":"result","verb":"UseTeamResource","values":[true]}
//! -> {"op":"call","verb":"Explode","args":[]}
//! <- {"type":"error","message":"[SyncedGateway] unknown verb 'Explode'","op":"call"}
//! -> {"op":"tick","count":30}
//! <- {"type":"ticked","frame":30,"reclaimed_ids":0,"expired_commands":0,"expired_projectiles":0}
//! -> {"op":"hash"}
//! <- {"type":"hash","frame":30,"hash":5678}
//! ```
//!
//! A `call` without `ctx` runs with full control.

use gateway_core::prelude::*;
use std::result::Result;
use serde::{Deserialize, Serialize};

/// Protocol version reported in the ready message.
pub const PROTOCOL_VERSION: &str = "1.0";

// ============================================================================
// Input Requests (controller -> runner)
// ============================================================================

/// Requests that can be sent to the headless runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Execute one script call.
    Call {
        /// Caller identity.
        #[serde(default = "CallerContext::full")]
        ctx: CallerContext,
        /// Verb name.
        verb: String,
        /// Positional arguments.
        #[serde(default)]
        args: Vec<ScriptValue>,
    },

    /// Advance the simulation by N frames (default: 1).
    Tick {
        /// Frames to advance.
        #[serde(default = "default_tick_count")]
        count: u32,
    },

    /// Report the current state hash.
    Hash,

    /// End the session.
    Quit,
}

fn default_tick_count() -> u32 {
    1
}

// ============================================================================
// Output Responses (runner -> controller)
// ============================================================================

/// Responses sent by the headless runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Runner is ready to accept requests.
    Ready {
        /// Protocol version.
        version: String,
        /// Current frame.
        frame: u64,
        /// State hash of the loaded scenario.
        hash: u64,
    },

    /// Values returned by a script call.
    Result {
        /// Verb that was called.
        verb: String,
        /// Returned values; empty for a silent no-op.
        values: Vec<ScriptValue>,
    },

    /// A request failed: a fatal script error or an unreadable line.
    Error {
        /// Description.
        message: String,
        /// Request kind, when the line could be parsed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        op: Option<String>,
    },

    /// State hash for determinism verification.
    Hash {
        /// Current frame.
        frame: u64,
        /// State hash.
        hash: u64,
    },

    /// Frames were advanced.
    Ticked {
        /// Frame after advancing.
        frame: u64,
        /// Ids returned to their pools.
        reclaimed_ids: usize,
        /// Timed-out commands dropped.
        expired_commands: usize,
        /// Projectiles that expired.
        expired_projectiles: usize,
    },

    /// Goodbye message before shutdown.
    Bye {
        /// Final frame.
        frame: u64,
        /// Final state hash.
        hash: u64,
    },
}

// ============================================================================
// Helpers
// ============================================================================

impl Response {
    /// Create a ready response.
    #[must_use]
    pub fn ready(frame: u64, hash: u64) -> Self {
        Self::Ready {
            version: PROTOCOL_VERSION.to_string(),
            frame,
            hash,
        }
    }

    /// Create an error response.
    pub fn error(message: impl Into<String>, op: Option<&str>) -> Self {
        Self::Error {
            message: message.into(),
            op: op.map(String::from),
        }
    }

    /// Serialize to JSON line (with newline).
    #[must_use]
    pub fn to_json_line(&self) -> String {
        let mut json = serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","message":"Serialization failed: {e}"}}"#)
        });
        json.push('\n');
        json
    }
}

impl Request {
    /// Parse from a JSON line.
    ///
    /// # Errors
    ///
    /// Returns the parse error for malformed JSON or unknown requests.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Request name for error reports.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Call { .. } => "call",
            Self::Tick { .. } => "tick",
            Self::Hash => "hash",
            Self::Quit => "quit",
        }
    }
}
