//! Cue timeline planning.
//!
//! Turns a [`ProgramConfig`] and a program start time into absolute
//! [`ScheduledEvent`]s. Given start `T`:
//!
//! - pre-roll at `T - default_pre_roll`
//! - per ad break (offset `o`, duration `d`, lead `p`): cue-out at `T + o - p`,
//!   cue-in at `T + o + d`
//! - post-roll at `T + duration`

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use super::marker::MarkerAllocator;
use crate::clock::{add_duration, sub_duration};
use crate::domain::{AdBreakSchedule, CueKind, ProgramConfig, ScheduledEvent};

/// Plan every cue of a program. Empty when SCTE-35 is disabled.
///
/// Events come back in planning order (pre-roll, breaks in configured order,
/// post-roll), which is also the order marker ids are handed out.
pub fn plan_program(
    config: &ProgramConfig,
    start: DateTime<Utc>,
    markers: &MarkerAllocator,
    created_at: DateTime<Utc>,
) -> Vec<ScheduledEvent> {
    if !config.scte35_enabled {
        return Vec::new();
    }

    let mut events = Vec::with_capacity(config.expected_event_count());
    let new_event = |kind: CueKind, at: DateTime<Utc>| {
        ScheduledEvent::new(
            &config.channel_id,
            Some(config.program_id.clone()),
            kind,
            markers.allocate(),
            at,
            created_at,
        )
    };

    if config.pre_roll_enabled {
        let mut event = new_event(CueKind::PreRoll, sub_duration(start, config.default_pre_roll()));
        event.duration_ms = Some(config.default_ad_duration_ms);
        event.pre_roll_ms = Some(config.default_pre_roll_ms);
        events.push(event);
    }

    for ad_break in &config.ad_breaks {
        let cue_out_at = sub_duration(add_duration(start, ad_break.offset()), ad_break.pre_roll());
        let cue_in_at = add_duration(add_duration(cue_out_at, ad_break.pre_roll()), ad_break.duration());

        let mut cue_out = new_event(CueKind::CueOut, cue_out_at);
        cue_out.duration_ms = Some(ad_break.duration_ms);
        cue_out.pre_roll_ms = Some(ad_break.pre_roll_ms);
        tag_ad_break(&mut cue_out, ad_break);
        events.push(cue_out);

        let mut cue_in = new_event(CueKind::CueIn, cue_in_at);
        tag_ad_break(&mut cue_in, ad_break);
        events.push(cue_in);
    }

    if config.post_roll_enabled {
        let mut event = new_event(CueKind::PostRoll, add_duration(start, config.duration()));
        event.duration_ms = Some(config.default_ad_duration_ms);
        events.push(event);
    }

    events
}

fn tag_ad_break(event: &mut ScheduledEvent, ad_break: &AdBreakSchedule) {
    event
        .metadata
        .insert("ad_break_id".to_string(), ad_break.id.clone());
    event
        .metadata
        .insert("ad_break_name".to_string(), ad_break.name.clone());
    event
        .metadata
        .insert("ad_break_marker".to_string(), ad_break.marker_id.to_string());
    if let Some(advertiser) = &ad_break.advertiser {
        event
            .metadata
            .insert("advertiser".to_string(), advertiser.clone());
    }
}

/// Execution order of due events: emergencies first, then by time, then by
/// marker id.
pub(crate) fn execution_order(a: &ScheduledEvent, b: &ScheduledEvent) -> Ordering {
    b.emergency
        .cmp(&a.emergency)
        .then_with(|| a.scheduled_time.cmp(&b.scheduled_time))
        .then_with(|| a.marker_id.cmp(&b.marker_id))
}
