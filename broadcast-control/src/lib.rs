//! broadcast-control library crate.
//!
//! In-process orchestration core for live channels: source health
//! monitoring with automatic failover, SCTE-35 cue scheduling, and an
//! asynchronous schedule update queue.

pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod failover;
pub mod logging;
pub mod media;
pub mod monitor;
pub mod registry;
pub mod scheduler;
pub mod services;
pub mod updates;

pub use error::{Error, Result};
pub use services::{Orchestrator, OrchestratorStatus};
