//! Integration tests for the orchestration services.
//!
//! These drive the public API end to end with a scripted prober, a recording
//! media control and a manual clock.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use broadcast_control::clock::{Clock, ManualClock, SharedClock};
use broadcast_control::config::OrchestratorConfig;
use broadcast_control::domain::{
    AdBreakSchedule, CueKind, EventStatus, FailoverEventKind, FailoverRule, ProgramConfig,
    ScheduleMutation, SourceType, StreamSource, UpdateStatus,
};
use broadcast_control::events::OrchestratorEvent;
use broadcast_control::media::{InMemoryScheduleStore, MediaControl};
use broadcast_control::monitor::{ProbeReport, ProbeStrategies, SourceProber};
use broadcast_control::{Orchestrator, Result};
use parking_lot::Mutex;

const START_MS: i64 = 1_700_000_000_000;

/// Prober failing every source listed in `failing`.
#[derive(Default)]
struct ScriptedProber {
    failing: Mutex<HashSet<String>>,
}

#[async_trait]
impl SourceProber for ScriptedProber {
    async fn probe(&self, source: &StreamSource) -> Result<ProbeReport> {
        if self.failing.lock().contains(&source.id) {
            Ok(ProbeReport::unhealthy(Duration::from_millis(2), "no frames"))
        } else {
            Ok(ProbeReport::healthy(Duration::from_millis(4)))
        }
    }
}

#[derive(Default)]
struct RecordingMedia {
    redirects: Mutex<Vec<(String, String)>>,
    markers: Mutex<Vec<(String, CueKind, u64)>>,
    reloads: Mutex<Vec<String>>,
}

#[async_trait]
impl MediaControl for RecordingMedia {
    async fn redirect_channel(&self, channel_id: &str, source: &StreamSource) -> Result<()> {
        self.redirects
            .lock()
            .push((channel_id.to_string(), source.id.clone()));
        Ok(())
    }

    async fn inject_marker(
        &self,
        channel_id: &str,
        kind: CueKind,
        marker_id: u64,
        _duration: Option<Duration>,
    ) -> Result<()> {
        self.markers
            .lock()
            .push((channel_id.to_string(), kind, marker_id));
        Ok(())
    }

    async fn reload_schedule(&self, channel_id: &str) -> Result<()> {
        self.reloads.lock().push(channel_id.to_string());
        Ok(())
    }
}

struct Harness {
    orchestrator: Orchestrator,
    clock: Arc<ManualClock>,
    media: Arc<RecordingMedia>,
    prober: Arc<ScriptedProber>,
    store: Arc<InMemoryScheduleStore>,
}

fn harness() -> Harness {
    let clock = Arc::new(ManualClock::at_ms(START_MS));
    let media = Arc::new(RecordingMedia::default());
    let prober = Arc::new(ScriptedProber::default());
    let store = Arc::new(InMemoryScheduleStore::new());

    let probes = ProbeStrategies::new(Duration::from_secs(2))
        .with(SourceType::Rtmp, prober.clone())
        .with(SourceType::Hls, prober.clone())
        .with(SourceType::Srt, prober.clone());
    let shared_clock: SharedClock = clock.clone();

    let orchestrator = Orchestrator::with_components(
        OrchestratorConfig::default(),
        media.clone(),
        store.clone(),
        shared_clock,
        probes,
    )
    .expect("valid default config");

    Harness {
        orchestrator,
        clock,
        media,
        prober,
        store,
    }
}

mod failover_tests {
    use super::*;

    fn register_sources(h: &Harness) {
        let sources = [
            StreamSource::new("studio", "Studio", SourceType::Rtmp, "rtmp://studio:1935/live", 0),
            StreamSource::new("backup-a", "Backup A", SourceType::Srt, "srt://backup-a:9000", 1),
            StreamSource::new("backup-b", "Backup B", SourceType::Hls, "https://cdn/b.m3u8", 2),
        ];
        for source in sources {
            h.orchestrator.monitor.add_source(source).unwrap();
        }
    }

    fn rule() -> FailoverRule {
        let mut rule = FailoverRule::new(
            "news-rule",
            "news",
            "studio",
            vec!["backup-a".to_string(), "backup-b".to_string()],
        );
        rule.max_errors = 3;
        rule.health_check_interval_ms = 5_000;
        rule
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_failed_probes_switch_once() {
        let h = harness();
        register_sources(&h);
        h.orchestrator.monitor.add_rule(rule()).unwrap();
        {
            let mut failing = h.prober.failing.lock();
            failing.insert("studio".to_string());
            failing.insert("backup-a".to_string());
        }
        let mut events = h.orchestrator.subscribe_events();

        h.orchestrator.start().unwrap();
        tokio::time::sleep(Duration::from_millis(15_500)).await;

        let log = h.orchestrator.monitor.get_failover_events(100);
        let switches: Vec<_> = log
            .iter()
            .filter(|e| e.kind == FailoverEventKind::SwitchedToFallback)
            .collect();
        assert_eq!(switches.len(), 1);
        assert_eq!(switches[0].from_source.as_deref(), Some("studio"));
        assert_eq!(switches[0].to_source.as_deref(), Some("backup-b"));
        assert_eq!(
            log.iter()
                .filter(|e| e.kind == FailoverEventKind::ProbeFailed)
                .count(),
            3
        );
        assert_eq!(
            h.media.redirects.lock().clone(),
            vec![("news".to_string(), "backup-b".to_string())]
        );

        let mut published_switches = 0;
        while let Ok(event) = events.try_recv() {
            if let OrchestratorEvent::Failover(e) = event
                && e.kind == FailoverEventKind::SwitchedToFallback
            {
                published_switches += 1;
            }
        }
        assert_eq!(published_switches, 1);

        // further failures do not switch again
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.media.redirects.lock().len(), 1);

        h.orchestrator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_manual_switch_and_status() {
        let h = harness();
        register_sources(&h);
        h.orchestrator.monitor.add_rule(rule()).unwrap();

        let event = h
            .orchestrator
            .failover
            .switch_to_source("news", "backup-a", "maintenance window")
            .await
            .unwrap();
        assert_eq!(event.kind, FailoverEventKind::ManualSwitch);
        assert_eq!(
            h.orchestrator.failover.active_source("news").as_deref(),
            Some("backup-a")
        );

        let status = h.orchestrator.monitor.get_status();
        assert_eq!(status.source_count, 3);
        assert_eq!(status.rule_count, 1);
        assert!(!status.monitoring);
    }
}

mod scheduling_tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use rstest::rstest;

    fn program(breaks: usize, pre_roll: bool, post_roll: bool) -> ProgramConfig {
        let mut config = ProgramConfig::new("evening-news", "news", Duration::from_secs(3600));
        config.pre_roll_enabled = pre_roll;
        config.post_roll_enabled = post_roll;
        config.ad_breaks = (0..breaks)
            .map(|i| AdBreakSchedule {
                id: format!("break-{}", i),
                name: format!("Break {}", i),
                offset_ms: (i as u64 + 1) * 15 * 60_000,
                duration_ms: 3 * 60_000,
                pre_roll_ms: 5_000,
                marker_id: 100 + i as u64,
                advertiser: None,
            })
            .collect();
        config
    }

    #[rstest]
    #[case(0, false, false, 0)]
    #[case(1, false, false, 2)]
    #[case(2, true, false, 5)]
    #[case(3, true, true, 8)]
    fn test_event_count(
        #[case] breaks: usize,
        #[case] pre_roll: bool,
        #[case] post_roll: bool,
        #[case] expected: usize,
    ) {
        let h = harness();
        let scheduler = &h.orchestrator.scheduler;
        scheduler
            .set_program_config(program(breaks, pre_roll, post_roll))
            .unwrap();
        let ids = scheduler
            .schedule_program_events("evening-news", h.clock.now())
            .unwrap();
        assert_eq!(ids.len(), expected);
    }

    #[tokio::test]
    async fn test_ad_break_cue_times() {
        let h = harness();
        let scheduler = &h.orchestrator.scheduler;
        let mut config = ProgramConfig::new("evening-news", "news", Duration::from_secs(3600));
        config.ad_breaks = vec![AdBreakSchedule {
            id: "mid".to_string(),
            name: "Midroll".to_string(),
            offset_ms: 30 * 60_000,
            duration_ms: 3 * 60_000,
            pre_roll_ms: 5_000,
            marker_id: 7,
            advertiser: Some("Acme".to_string()),
        }];
        scheduler.set_program_config(config).unwrap();

        let start = h.clock.now();
        scheduler
            .schedule_program_events("evening-news", start)
            .unwrap();

        let events = scheduler.get_all_scheduled_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, CueKind::CueOut);
        assert_eq!(
            events[0].scheduled_time,
            start + ChronoDuration::minutes(30) - ChronoDuration::seconds(5)
        );
        assert_eq!(events[1].kind, CueKind::CueIn);
        assert_eq!(events[1].scheduled_time, start + ChronoDuration::minutes(33));

        h.clock
            .advance(Duration::from_secs(30 * 60 - 6));
        assert_eq!(scheduler.process_due().await.executed, 0);
        h.clock.advance(Duration::from_secs(1));
        assert_eq!(scheduler.process_due().await.executed, 1);
        assert_eq!(
            h.media.markers.lock().clone(),
            vec![("news".to_string(), CueKind::CueOut, events[0].marker_id)]
        );

        assert_eq!(scheduler.cancel_program_events("evening-news"), 1);
        let statuses: Vec<EventStatus> = scheduler
            .get_program_events("evening-news")
            .into_iter()
            .map(|e| e.status)
            .collect();
        assert_eq!(statuses, vec![EventStatus::Executed, EventStatus::Cancelled]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_scheduler_purges_finished_cues() {
        let h = harness();
        let scheduler = &h.orchestrator.scheduler;
        let mut config = ProgramConfig::new("promo", "news", Duration::from_secs(60));
        config.pre_roll_enabled = true;
        config.post_roll_enabled = true;
        scheduler.set_program_config(config).unwrap();
        scheduler
            .schedule_program_events("promo", h.clock.now() - ChronoDuration::minutes(2))
            .unwrap();

        h.orchestrator.start().unwrap();
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        let status = scheduler.get_status();
        assert_eq!(status.executed, 2);
        assert_eq!(status.total_events, 2);

        // past the default one hour retention
        h.clock.advance(Duration::from_secs(3_601));
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(scheduler.get_status().total_events, 0);
        assert_eq!(h.media.markers.lock().len(), 2);

        h.orchestrator.shutdown().await.unwrap();
    }
}

mod update_queue_tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_queued_updates_apply_and_emergency_fires() {
        let h = harness();
        h.orchestrator.start().unwrap();

        let insert = h
            .orchestrator
            .updates
            .queue_update(
                "news",
                ScheduleMutation::Insert {
                    item_id: "weather".to_string(),
                    position: None,
                    data: json!({ "title": "Weather", "duration_ms": 120000 }),
                },
            )
            .unwrap();
        let emergency = h
            .orchestrator
            .updates
            .queue_update(
                "news",
                ScheduleMutation::Emergency {
                    cue: CueKind::CueOut,
                    duration_ms: Some(60_000),
                    reason: Some("breaking news".to_string()),
                },
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        let updates = &h.orchestrator.updates;
        assert_eq!(
            updates.get_update(&insert).unwrap().status,
            UpdateStatus::Completed
        );
        assert_eq!(h.store.persist_count("news"), 1);
        assert_eq!(h.media.reloads.lock().clone(), vec!["news".to_string()]);

        let emergency = updates.get_update(&emergency).unwrap();
        assert_eq!(emergency.status, UpdateStatus::Completed);
        let event_id = emergency.emergency_event_id.unwrap();
        let event = h.orchestrator.scheduler.get_event(&event_id).unwrap();
        assert!(event.emergency);
        assert_eq!(event.status, EventStatus::Executed);
        assert_eq!(h.media.markers.lock().len(), 1);

        let status = h.orchestrator.status();
        assert_eq!(status.updates.completed, 2);
        assert_eq!(status.scheduler.executed, 1);

        h.orchestrator.shutdown().await.unwrap();
    }
}
