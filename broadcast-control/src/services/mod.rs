//! Service layer module.
//!
//! Provides the service container that wires and runs the orchestration
//! services.

pub mod container;

pub use container::{Orchestrator, OrchestratorStatus};
