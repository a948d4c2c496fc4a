//! Program ad-break configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One planned ad avail inside a program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdBreakSchedule {
    pub id: String,
    pub name: String,
    /// Offset of the break from program start.
    pub offset_ms: u64,
    pub duration_ms: u64,
    /// How far ahead of the break the cue-out is signalled.
    pub pre_roll_ms: u64,
    /// Splice identifier configured for this break.
    pub marker_id: u64,
    #[serde(default)]
    pub advertiser: Option<String>,
}

impl AdBreakSchedule {
    pub fn offset(&self) -> Duration {
        Duration::from_millis(self.offset_ms)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    pub fn pre_roll(&self) -> Duration {
        Duration::from_millis(self.pre_roll_ms)
    }
}

/// SCTE-35 configuration of a single program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramConfig {
    pub program_id: String,
    pub channel_id: String,
    #[serde(default = "default_true")]
    pub scte35_enabled: bool,
    /// Program length; the post-roll fires at start + duration.
    pub duration_ms: u64,
    #[serde(default)]
    pub ad_breaks: Vec<AdBreakSchedule>,
    #[serde(default)]
    pub pre_roll_enabled: bool,
    #[serde(default)]
    pub post_roll_enabled: bool,
    #[serde(default = "default_ad_duration_ms")]
    pub default_ad_duration_ms: u64,
    #[serde(default = "default_pre_roll_ms")]
    pub default_pre_roll_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_ad_duration_ms() -> u64 {
    30_000
}

fn default_pre_roll_ms() -> u64 {
    5_000
}

impl ProgramConfig {
    pub fn new(program_id: impl Into<String>, channel_id: impl Into<String>, duration: Duration) -> Self {
        Self {
            program_id: program_id.into(),
            channel_id: channel_id.into(),
            scte35_enabled: true,
            duration_ms: duration.as_millis() as u64,
            ad_breaks: Vec::new(),
            pre_roll_enabled: false,
            post_roll_enabled: false,
            default_ad_duration_ms: default_ad_duration_ms(),
            default_pre_roll_ms: default_pre_roll_ms(),
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    pub fn default_ad_duration(&self) -> Duration {
        Duration::from_millis(self.default_ad_duration_ms)
    }

    pub fn default_pre_roll(&self) -> Duration {
        Duration::from_millis(self.default_pre_roll_ms)
    }

    /// Number of events `schedule_program_events` will create for this config.
    pub fn expected_event_count(&self) -> usize {
        if !self.scte35_enabled {
            return 0;
        }
        2 * self.ad_breaks.len()
            + usize::from(self.pre_roll_enabled)
            + usize::from(self.post_roll_enabled)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.program_id.trim().is_empty() {
            return Err(crate::Error::validation("program id must not be empty"));
        }
        if self.channel_id.trim().is_empty() {
            return Err(crate::Error::validation(format!(
                "program {} has an empty channel id",
                self.program_id
            )));
        }
        for ad_break in &self.ad_breaks {
            if ad_break.duration_ms == 0 {
                return Err(crate::Error::validation(format!(
                    "ad break {} in program {} has zero duration",
                    ad_break.id, self.program_id
                )));
            }
        }
        Ok(())
    }
}

/// Partial update for a [`ProgramConfig`]. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramConfigPatch {
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub scte35_enabled: Option<bool>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub ad_breaks: Option<Vec<AdBreakSchedule>>,
    #[serde(default)]
    pub pre_roll_enabled: Option<bool>,
    #[serde(default)]
    pub post_roll_enabled: Option<bool>,
    #[serde(default)]
    pub default_ad_duration_ms: Option<u64>,
    #[serde(default)]
    pub default_pre_roll_ms: Option<u64>,
}

impl ProgramConfigPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Produce the patched config without touching `base`.
    pub fn apply_to(&self, base: &ProgramConfig) -> ProgramConfig {
        let mut patched = base.clone();
        if let Some(channel_id) = &self.channel_id {
            patched.channel_id = channel_id.clone();
        }
        if let Some(enabled) = self.scte35_enabled {
            patched.scte35_enabled = enabled;
        }
        if let Some(duration_ms) = self.duration_ms {
            patched.duration_ms = duration_ms;
        }
        if let Some(ad_breaks) = &self.ad_breaks {
            patched.ad_breaks = ad_breaks.clone();
        }
        if let Some(enabled) = self.pre_roll_enabled {
            patched.pre_roll_enabled = enabled;
        }
        if let Some(enabled) = self.post_roll_enabled {
            patched.post_roll_enabled = enabled;
        }
        if let Some(ms) = self.default_ad_duration_ms {
            patched.default_ad_duration_ms = ms;
        }
        if let Some(ms) = self.default_pre_roll_ms {
            patched.default_pre_roll_ms = ms;
        }
        patched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ad_break(id: &str, offset_ms: u64) -> AdBreakSchedule {
        AdBreakSchedule {
            id: id.to_string(),
            name: format!("Break {}", id),
            offset_ms,
            duration_ms: 60_000,
            pre_roll_ms: 2_000,
            marker_id: 1,
            advertiser: None,
        }
    }

    #[test]
    fn test_expected_event_count() {
        let mut config = ProgramConfig::new("p1", "ch1", Duration::from_secs(3600));
        config.ad_breaks = vec![ad_break("a", 600_000), ad_break("b", 1_200_000)];
        assert_eq!(config.expected_event_count(), 4);

        config.pre_roll_enabled = true;
        config.post_roll_enabled = true;
        assert_eq!(config.expected_event_count(), 6);

        config.scte35_enabled = false;
        assert_eq!(config.expected_event_count(), 0);
    }

    #[test]
    fn test_patch_leaves_unset_fields() {
        let base = ProgramConfig::new("p1", "ch1", Duration::from_secs(1800));
        let patch = ProgramConfigPatch {
            post_roll_enabled: Some(true),
            default_pre_roll_ms: Some(8_000),
            ..Default::default()
        };

        let patched = patch.apply_to(&base);
        assert!(patched.post_roll_enabled);
        assert_eq!(patched.default_pre_roll_ms, 8_000);
        assert_eq!(patched.duration_ms, base.duration_ms);
        assert_eq!(patched.channel_id, "ch1");
        assert!(!patch.is_empty());
        assert!(ProgramConfigPatch::default().is_empty());
    }

    #[test]
    fn test_validate_rejects_zero_length_break() {
        let mut config = ProgramConfig::new("p1", "ch1", Duration::from_secs(1800));
        let mut bad = ad_break("a", 0);
        bad.duration_ms = 0;
        config.ad_breaks.push(bad);
        assert!(config.validate().is_err());
    }
}
