//! SCTE-35 cue scheduling.
//!
//! Program configs are turned into absolute cue events by [`plan_program`];
//! the [`EventScheduler`] stores them and fires due cues on its tick, with
//! emergency cues always first.

mod marker;
mod service;
mod timeline;

pub use marker::MarkerAllocator;
pub use service::{EventScheduler, SchedulerStatus, TickReport};
pub use timeline::plan_program;
