//! # Gateway Core
//!
//! Authoritative mutation gateway for a deterministic lockstep simulation.
//!
//! Script code never touches simulation state directly. Every change goes
//! through a verb on [`SyncedGateway`], which:
//! - authorizes the caller against the target's owning team
//! - validates and marshals dynamically typed arguments
//! - bounds callin recursion per category
//! - applies the mutation atomically and notifies the engine
//!
//! This crate contains **only** deterministic logic:
//! - No rendering
//! - No IO
//! - No system randomness
//! - No floating-point simulation state (uses fixed-point)
//!
//! ## Crate Structure
//!
//! - [`gateway`] - The gateway and its typed verbs
//! - [`script`] - Dynamically typed script call surface
//! - [`registry`] - Entity, team and player storage
//! - [`ledger`] - Team and unit resource accounting
//! - [`auth`] - Caller contexts and control checks
//! - [`guard`] - Reentrancy counters
//! - [`rules_params`] - Replicated attributes with visibility masks
//! - [`terrain`] - Height field and edit sessions

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod auth;
pub mod components;
pub mod config;
pub mod defs;
pub mod error;
pub mod gateway;
pub mod guard;
pub mod ledger;
pub mod los;
pub mod marshal;
pub mod math;
pub mod registry;
pub mod rules_params;
pub mod script;
pub mod services;
pub mod sync;
pub mod terrain;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::auth::{CallerContext, ControlScope};
    pub use crate::components::*;
    pub use crate::config::GatewayConfig;
    pub use crate::defs::{DefKey, DefRegistry};
    pub use crate::error::{GatewayError, Result, ScriptOutcome};
    pub use crate::gateway::{Orders, SyncedGateway, TickReport};
    pub use crate::ledger::{ResourceKind, ResourcePack, TeamLedger};
    pub use crate::marshal::{ScriptTable, ScriptValue, TableKey};
    pub use crate::math::{Fixed, Vec3Fixed};
    pub use crate::registry::EntityRegistry;
    pub use crate::services::{EngineServices, EntityRef, SyncedCallins};
    pub use crate::terrain::{HeightLayer, HeightMap, HeightRect};
}
