//! Asynchronous schedule mutation queue.

mod processor;

pub use processor::{ProcessReport, UpdateQueueDeps, UpdateQueueProcessor, UpdateQueueStatus};
