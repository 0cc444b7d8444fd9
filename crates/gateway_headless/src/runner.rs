//! Headless session loop.
//!
//! A [`Session`] owns one gateway and answers [`Request`]s with
//! [`Response`]s. [`HeadlessRunner`] drives a session over any line-based
//! reader and writer, so the same loop serves stdin/stdout and tests.

use std::io::{BufRead, Write};

use gateway_core::prelude::*;
use std::result::Result;
use thiserror::Error;

use crate::protocol::{Request, Response};
use crate::scenario::{Scenario, ScenarioError};
use crate::transcript::Transcript;

/// Errors that end a headless run.
#[derive(Error, Debug)]
pub enum RunnerError {
    /// Reading requests or writing responses failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The scenario could not be loaded.
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
}

/// One gateway plus an optional transcript of everything applied to it.
pub struct Session {
    gateway: SyncedGateway,
    transcript: Option<Transcript>,
}

impl Session {
    /// Wrap a gateway without recording.
    #[must_use]
    pub fn new(gateway: SyncedGateway) -> Self {
        Self {
            gateway,
            transcript: None,
        }
    }

    /// Build the scenario's world and record every state-changing request.
    ///
    /// # Errors
    ///
    /// Returns the scenario's error if its world cannot be built.
    pub fn recording(scenario: Scenario, config: GatewayConfig) -> Result<Self, ScenarioError> {
        let gateway = scenario.build_gateway(config.clone())?;
        Ok(Self {
            gateway,
            transcript: Some(Transcript::new(scenario, config)),
        })
    }

    /// The gateway.
    #[must_use]
    pub const fn gateway(&self) -> &SyncedGateway {
        &self.gateway
    }

    /// The transcript so far, if recording.
    #[must_use]
    pub const fn transcript(&self) -> Option<&Transcript> {
        self.transcript.as_ref()
    }

    /// Stop recording and return the finalized transcript.
    pub fn finish(&mut self) -> Option<Transcript> {
        let frame = self.gateway.frame();
        let hash = self.gateway.state_hash();
        self.transcript.take().map(|mut transcript| {
            transcript.finalize(frame, hash);
            transcript
        })
    }

    /// Apply one request and produce its response.
    pub fn handle(&mut self, request: Request) -> Response {
        if let Some(transcript) = &mut self.transcript {
            transcript.record(&request);
        }

        match request {
            Request::Call { ctx, verb, args } => match self.gateway.call(&ctx, &verb, &args) {
                Ok(values) => Response::Result { verb, values },
                Err(err) => {
                    tracing::debug!(%verb, error = %err, "call rejected");
                    Response::error(err.to_string(), Some("call"))
                }
            },
            Request::Tick { count } => {
                let mut total = TickReport::default();
                for _ in 0..count {
                    let report = self.gateway.tick();
                    total.reclaimed_ids += report.reclaimed_ids;
                    total.expired_commands += report.expired_commands;
                    total.expired_projectiles += report.expired_projectiles;
                }
                Response::Ticked {
                    frame: self.gateway.frame(),
                    reclaimed_ids: total.reclaimed_ids,
                    expired_commands: total.expired_commands,
                    expired_projectiles: total.expired_projectiles,
                }
            }
            Request::Hash => Response::Hash {
                frame: self.gateway.frame(),
                hash: self.gateway.state_hash(),
            },
            Request::Quit => self.bye(),
        }
    }

    fn bye(&self) -> Response {
        Response::Bye {
            frame: self.gateway.frame(),
            hash: self.gateway.state_hash(),
        }
    }
}

/// Line-oriented driver for a [`Session`].
pub struct HeadlessRunner {
    session: Session,
}

impl HeadlessRunner {
    /// Create a runner over a session.
    #[must_use]
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// Serve requests until `quit` or end of input.
    ///
    /// Writes `ready` first and `bye` last. Unreadable lines get an error
    /// response and the session continues.
    ///
    /// # Errors
    ///
    /// Returns an error only if reading or writing fails.
    pub fn run<R: BufRead, W: Write>(&mut self, input: R, mut output: W) -> Result<(), RunnerError> {
        let gateway = self.session.gateway();
        let ready = Response::ready(gateway.frame(), gateway.state_hash());
        output.write_all(ready.to_json_line().as_bytes())?;
        output.flush()?;

        for line in input.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let response = match Request::from_json(line) {
                Ok(Request::Quit) => break,
                Ok(request) => self.session.handle(request),
                Err(e) => {
                    tracing::warn!(error = %e, "unreadable request");
                    Response::error(format!("Parse error: {e}"), None)
                }
            };
            output.write_all(response.to_json_line().as_bytes())?;
            output.flush()?;
        }

        output.write_all(self.session.bye().to_json_line().as_bytes())?;
        output.flush()?;
        tracing::info!(frame = self.session.gateway().frame(), "session ended");
        Ok(())
    }

    /// The session, for inspection after a run.
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// The session, mutably.
    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }
}
