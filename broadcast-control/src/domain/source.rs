//! Stream source entity.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transport of a stream source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Rtmp,
    Hls,
    Srt,
    File,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rtmp => "rtmp",
            Self::Hls => "hls",
            Self::Srt => "srt",
            Self::File => "file",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "rtmp" => Some(Self::Rtmp),
            "hls" => Some(Self::Hls),
            "srt" => Some(Self::Srt),
            "file" => Some(Self::File),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("Invalid source type: {}", s))
    }
}

/// Health of a source as last observed by the health monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    /// Never probed, or not yet past the failure threshold.
    #[default]
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// A live input that can feed a channel.
///
/// The health fields (`health_status`, `error_count`, `last_check`,
/// `response_time_ms`) are only written by the health monitor; everything
/// handed out by the registry is a copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSource {
    pub id: String,
    pub name: String,
    pub source_type: SourceType,
    /// URL, `host:port` or file path, depending on `source_type`.
    pub address: String,
    /// Lower value means preferred.
    pub priority: i32,
    #[serde(default)]
    pub health_status: HealthStatus,
    /// Consecutive failed probes since the last success.
    #[serde(default)]
    pub error_count: u32,
    #[serde(default)]
    pub last_check: Option<DateTime<Utc>>,
    #[serde(default)]
    pub response_time_ms: Option<u64>,
}

impl StreamSource {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        source_type: SourceType,
        address: impl Into<String>,
        priority: i32,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            source_type,
            address: address.into(),
            priority,
            health_status: HealthStatus::Unknown,
            error_count: 0,
            last_check: None,
            response_time_ms: None,
        }
    }

    /// Seed the initial health status (e.g. restored from a previous run).
    pub fn with_health(mut self, status: HealthStatus) -> Self {
        self.health_status = status;
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.health_status == HealthStatus::Healthy
    }

    pub fn response_time(&self) -> Option<Duration> {
        self.response_time_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.id.trim().is_empty() {
            return Err(crate::Error::validation("source id must not be empty"));
        }
        if self.address.trim().is_empty() {
            return Err(crate::Error::validation(format!(
                "source {} has an empty address",
                self.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_type_parse() {
        assert_eq!(SourceType::parse("RTMP"), Some(SourceType::Rtmp));
        assert_eq!(SourceType::parse("hls"), Some(SourceType::Hls));
        assert_eq!("srt".parse::<SourceType>(), Ok(SourceType::Srt));
        assert!("udp".parse::<SourceType>().is_err());
    }

    #[test]
    fn test_new_source_is_unknown() {
        let source = StreamSource::new("a", "A", SourceType::File, "/tmp/a.ts", 1);
        assert_eq!(source.health_status, HealthStatus::Unknown);
        assert_eq!(source.error_count, 0);
        assert!(!source.is_healthy());
    }

    #[test]
    fn test_health_serialization() {
        let json = serde_json::to_string(&HealthStatus::Unhealthy).unwrap();
        assert_eq!(json, "\"unhealthy\"");
    }

    #[test]
    fn test_validate_rejects_empty_address() {
        let source = StreamSource::new("a", "A", SourceType::Rtmp, " ", 1);
        assert!(source.validate().is_err());
    }
}
