//! Source probe strategies.
//!
//! A probe answers one question: is this source serving right now, and how
//! fast did it answer. Strategies are registered per [`SourceType`]; a type
//! without a strategy always fails its probe.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::domain::{SourceType, StreamSource};
use crate::media::bounded;
use crate::{Error, Result};

/// Outcome of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub healthy: bool,
    pub response_time: Duration,
    /// Why the source was reported unhealthy.
    pub detail: Option<String>,
}

impl ProbeReport {
    pub fn healthy(response_time: Duration) -> Self {
        Self {
            healthy: true,
            response_time,
            detail: None,
        }
    }

    pub fn unhealthy(response_time: Duration, detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            response_time,
            detail: Some(detail.into()),
        }
    }
}

/// Protocol-specific health check.
#[async_trait]
pub trait SourceProber: Send + Sync + 'static {
    /// Probe the source. Errors count as failed probes.
    async fn probe(&self, source: &StreamSource) -> Result<ProbeReport>;
}

/// Probers keyed by source type, each call bounded by the probe timeout.
#[derive(Clone)]
pub struct ProbeStrategies {
    probers: HashMap<SourceType, Arc<dyn SourceProber>>,
    timeout: Duration,
}

impl ProbeStrategies {
    /// Empty strategy set.
    pub fn new(timeout: Duration) -> Self {
        Self {
            probers: HashMap::new(),
            timeout,
        }
    }

    /// TCP connect for rtmp and hls, file check for file sources.
    pub fn with_defaults(timeout: Duration) -> Self {
        let tcp: Arc<dyn SourceProber> = Arc::new(TcpConnectProber);
        Self::new(timeout)
            .with(SourceType::Rtmp, tcp.clone())
            .with(SourceType::Hls, tcp)
            .with(SourceType::File, Arc::new(FileProber))
    }

    pub fn with(mut self, source_type: SourceType, prober: Arc<dyn SourceProber>) -> Self {
        self.register(source_type, prober);
        self
    }

    pub fn register(&mut self, source_type: SourceType, prober: Arc<dyn SourceProber>) {
        self.probers.insert(source_type, prober);
    }

    pub fn supports(&self, source_type: SourceType) -> bool {
        self.probers.contains_key(&source_type)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe `source`, folding errors, timeouts and unhealthy reports into `Err`.
    ///
    /// Returns the response time of a healthy probe.
    pub async fn probe(&self, source: &StreamSource) -> Result<Duration> {
        let prober = self.probers.get(&source.source_type).ok_or_else(|| {
            Error::external(
                "probe",
                format!("no probe strategy for {} sources", source.source_type),
            )
        })?;

        let report = bounded("probe", self.timeout, prober.probe(source)).await?;
        if report.healthy {
            Ok(report.response_time)
        } else {
            Err(Error::external(
                "probe",
                report
                    .detail
                    .unwrap_or_else(|| "source reported unhealthy".to_string()),
            ))
        }
    }
}

/// Healthy when a TCP connection to the source's host opens.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnectProber;

impl TcpConnectProber {
    /// Resolve `host:port` from a url or bare address, using the scheme's
    /// well-known port when none is given.
    pub fn target(address: &str) -> Option<String> {
        let (scheme, rest) = match address.split_once("://") {
            Some((scheme, rest)) => (Some(scheme.to_ascii_lowercase()), rest),
            None => (None, address),
        };
        let authority = rest.split(['/', '?', '#']).next()?;
        let authority = authority.rsplit('@').next()?;
        if authority.is_empty() {
            return None;
        }

        let has_port = match authority.rfind(':') {
            Some(idx) => !authority.ends_with(']') && authority[idx + 1..].parse::<u16>().is_ok(),
            None => false,
        };
        if has_port {
            return Some(authority.to_string());
        }

        let port = match scheme.as_deref() {
            Some("rtmp") => 1935,
            Some("rtmps") | Some("https") => 443,
            Some("http") => 80,
            _ => return None,
        };
        Some(format!("{}:{}", authority, port))
    }
}

#[async_trait]
impl SourceProber for TcpConnectProber {
    async fn probe(&self, source: &StreamSource) -> Result<ProbeReport> {
        let target = Self::target(&source.address).ok_or_else(|| {
            Error::validation(format!(
                "cannot derive host:port from address {}",
                source.address
            ))
        })?;

        let started = Instant::now();
        match TcpStream::connect(&target).await {
            Ok(_) => Ok(ProbeReport::healthy(started.elapsed())),
            Err(e) => Ok(ProbeReport::unhealthy(
                started.elapsed(),
                format!("connect to {} failed: {}", target, e),
            )),
        }
    }
}

/// Healthy when the source address names an existing, non-empty file.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileProber;

#[async_trait]
impl SourceProber for FileProber {
    async fn probe(&self, source: &StreamSource) -> Result<ProbeReport> {
        let path = source
            .address
            .strip_prefix("file://")
            .unwrap_or(&source.address);

        let started = Instant::now();
        let report = match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {
                ProbeReport::healthy(started.elapsed())
            }
            Ok(_) => ProbeReport::unhealthy(started.elapsed(), format!("{} is empty", path)),
            Err(e) => ProbeReport::unhealthy(started.elapsed(), format!("{}: {}", path, e)),
        };
        Ok(report)
    }
}
