//! Domain entities shared by the orchestration services.

pub mod cue;
pub mod failover_event;
pub mod program;
pub mod rule;
pub mod source;
pub mod update;

pub use cue::{CueKind, EventStatus, ScheduledEvent};
pub use failover_event::{FailoverEvent, FailoverEventKind};
pub use program::{AdBreakSchedule, ProgramConfig, ProgramConfigPatch};
pub use rule::FailoverRule;
pub use source::{HealthStatus, SourceType, StreamSource};
pub use update::{ScheduleMutation, ScheduleUpdate, UpdateKind, UpdateStatus};
