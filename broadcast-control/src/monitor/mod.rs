//! Health monitoring.
//!
//! One timer loop per enabled failover rule probes the rule's primary (and,
//! optionally, its fallbacks), records health in the registry and asks the
//! failover controller to switch when the primary crosses its threshold.

mod probe;
mod service;

pub use probe::{FileProber, ProbeReport, ProbeStrategies, SourceProber, TcpConnectProber};
pub use service::{HealthMonitor, MonitoringStatus};
