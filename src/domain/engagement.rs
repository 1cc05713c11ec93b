//! Session bookkeeping and nudge selection on the retention record.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    errors::DomainError,
    records::{NudgeEvent, RetentionState, SessionFrequency},
    rules::{EngineRules, NudgeRule},
};

const SESSION_WINDOW_DAYS: i64 = 30;
const STREAK_LENGTH_DAYS: u64 = 7;
/// Most recent events kept per nudge log.
pub const MAX_NUDGE_EVENTS: usize = 100;

/// Sessions-in-30-days floor for each frequency band, highest first.
const FREQUENCY_BANDS: [(usize, SessionFrequency); 3] = [
    (20, SessionFrequency::High),
    (8, SessionFrequency::Medium),
    (3, SessionFrequency::Low),
];

pub fn estimate_frequency(sessions_last_30_days: usize) -> SessionFrequency {
    FREQUENCY_BANDS
        .iter()
        .find(|(floor, _)| sessions_last_30_days >= *floor)
        .map(|(_, band)| *band)
        .unwrap_or(SessionFrequency::VeryLow)
}

/// Counts one session at `now` against the engagement metrics.
pub fn record_session(retention: &mut RetentionState, now: DateTime<Utc>) {
    let metrics = &mut retention.engagement_metrics;
    let today = now.date_naive();
    let last_day = metrics.last_session_at.map(|at| at.date_naive());

    match last_day {
        None => {
            metrics.unique_days_active += 1;
            metrics.consecutive_days_active = 1;
        }
        Some(last) if last == today => {}
        Some(last) if last.succ_opt() == Some(today) => {
            metrics.unique_days_active += 1;
            metrics.consecutive_days_active += 1;
            if metrics.consecutive_days_active % STREAK_LENGTH_DAYS == 0 {
                metrics.weekly_streaks += 1;
            }
        }
        Some(last) if last < today => {
            metrics.unique_days_active += 1;
            metrics.consecutive_days_active = 1;
        }
        // Out-of-order stamp: count the session, leave day bookkeeping alone.
        Some(_) => {}
    }

    metrics.total_sessions += 1;
    metrics.last_session_at = Some(metrics.last_session_at.map_or(now, |last| last.max(now)));

    let window_start = now - Duration::days(SESSION_WINDOW_DAYS);
    metrics.recent_sessions.push(now);
    metrics.recent_sessions.retain(|at| *at >= window_start);
    metrics.recent_sessions.sort();
    metrics.estimated_session_frequency = estimate_frequency(metrics.recent_sessions.len());
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NudgeResponse {
    Shown,
    Dismissed,
}

/// First enabled nudge that is off cooldown and not dismissed too often.
pub fn next_nudge<'a>(
    retention: Option<&RetentionState>,
    rules: &'a EngineRules,
    now: DateTime<Utc>,
) -> Option<&'a NudgeRule> {
    rules.nudges.iter().find(|rule| {
        if !rule.enabled {
            return false;
        }
        let Some(retention) = retention else {
            return true;
        };

        let loop_enabled = rule
            .loop_id
            .and_then(|id| retention.habit_loops.get(&id))
            .is_none_or(|state| state.enabled);
        let cooldown = Duration::hours(rule.cooldown_hours);
        let recently_shown = retention
            .nudges
            .shown_nudges
            .iter()
            .any(|event| event.nudge_id == rule.id && now - event.at < cooldown);
        let dismissals = retention
            .nudges
            .dismissed_nudges
            .iter()
            .filter(|event| event.nudge_id == rule.id)
            .count();

        loop_enabled && !recently_shown && dismissals < rule.max_dismissals as usize
    })
}

pub fn record_nudge(
    retention: &mut RetentionState,
    rules: &EngineRules,
    nudge_id: &str,
    response: NudgeResponse,
    now: DateTime<Utc>,
) -> Result<(), DomainError> {
    if rules.nudge(nudge_id).is_none() {
        return Err(DomainError::validation(format!("unknown nudge '{nudge_id}'")));
    }

    let event = NudgeEvent {
        nudge_id: nudge_id.to_string(),
        at: now,
    };
    let log = &mut retention.nudges;
    match response {
        NudgeResponse::Shown => {
            log.shown_nudges.push(event);
            let excess = log.shown_nudges.len().saturating_sub(MAX_NUDGE_EVENTS);
            log.shown_nudges.drain(..excess);
        }
        NudgeResponse::Dismissed => {
            log.dismissed_nudges.push(event);
            prune_dismissals(&mut log.dismissed_nudges, rules);
        }
    }
    Ok(())
}

/// Keeps the newest [`MAX_NUDGE_EVENTS`] dismissals, plus the newest
/// `max_dismissals` of every nudge so a retired nudge stays retired.
fn prune_dismissals(dismissed: &mut Vec<NudgeEvent>, rules: &EngineRules) {
    if dismissed.len() <= MAX_NUDGE_EVENTS {
        return;
    }

    let mut keep = vec![false; dismissed.len()];
    {
        let mut per_nudge: HashMap<&str, usize> = HashMap::new();
        let mut kept = 0;
        for (index, event) in dismissed.iter().enumerate().rev() {
            let cap = rules
                .nudge(&event.nudge_id)
                .map_or(0, |rule| rule.max_dismissals as usize);
            let seen = per_nudge.entry(event.nudge_id.as_str()).or_insert(0);
            if kept < MAX_NUDGE_EVENTS || *seen < cap {
                keep[index] = true;
                kept += 1;
                *seen += 1;
            }
        }
    }

    let mut keep = keep.into_iter();
    dismissed.retain(|_| keep.next().unwrap_or(false));
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::domain::rules::LoopId;

    fn day(n: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, n, 20, 0, 0).unwrap()
    }

    fn rules() -> EngineRules {
        EngineRules::embedded().expect("embedded rules should load")
    }

    #[test]
    fn consecutive_days_build_weekly_streaks() {
        let mut retention = RetentionState::new("ana@example.com", day(1));
        for n in 1..=14 {
            record_session(&mut retention, day(n));
        }
        record_session(&mut retention, day(14) + Duration::minutes(30));

        let metrics = &retention.engagement_metrics;
        assert_eq!(metrics.total_sessions, 15);
        assert_eq!(metrics.unique_days_active, 14);
        assert_eq!(metrics.consecutive_days_active, 14);
        assert_eq!(metrics.weekly_streaks, 2);
        assert_eq!(metrics.estimated_session_frequency, SessionFrequency::Medium);
    }

    #[test]
    fn gap_resets_consecutive_days() {
        let mut retention = RetentionState::new("ana@example.com", day(1));
        record_session(&mut retention, day(1));
        record_session(&mut retention, day(2));
        record_session(&mut retention, day(6));

        let metrics = &retention.engagement_metrics;
        assert_eq!(metrics.consecutive_days_active, 1);
        assert_eq!(metrics.unique_days_active, 3);
        assert_eq!(metrics.last_session_at, Some(day(6)));
    }

    #[test]
    fn old_sessions_leave_the_window() {
        let mut retention = RetentionState::new("ana@example.com", day(1));
        record_session(&mut retention, day(1));
        record_session(&mut retention, day(1) + Duration::days(40));

        assert_eq!(retention.engagement_metrics.recent_sessions.len(), 1);
    }

    #[test]
    fn frequency_bands() {
        assert_eq!(estimate_frequency(0), SessionFrequency::VeryLow);
        assert_eq!(estimate_frequency(3), SessionFrequency::Low);
        assert_eq!(estimate_frequency(8), SessionFrequency::Medium);
        assert_eq!(estimate_frequency(25), SessionFrequency::High);
    }

    #[test]
    fn next_nudge_respects_cooldown_and_dismissal_cap() {
        let rules = rules();
        let now = day(10);
        let mut retention = RetentionState::new("ana@example.com", day(1));

        assert_eq!(
            next_nudge(Some(&retention), &rules, now).map(|rule| rule.id.as_str()),
            Some("save_first_deal")
        );

        record_nudge(&mut retention, &rules, "save_first_deal", NudgeResponse::Shown, now)
            .expect("known nudge");
        assert_eq!(
            next_nudge(Some(&retention), &rules, now).map(|rule| rule.id.as_str()),
            Some("review_goal")
        );
        assert_eq!(
            next_nudge(Some(&retention), &rules, now + Duration::hours(24))
                .map(|rule| rule.id.as_str()),
            Some("save_first_deal")
        );

        for _ in 0..2 {
            record_nudge(&mut retention, &rules, "review_goal", NudgeResponse::Dismissed, now)
                .expect("known nudge");
        }
        if let Some(state) = retention.habit_loops.get_mut(&LoopId::DiscoveryLoop) {
            state.enabled = false;
        }
        assert_eq!(
            next_nudge(Some(&retention), &rules, now).map(|rule| rule.id.as_str()),
            Some("join_circle")
        );
    }

    #[test]
    fn nudge_logs_are_capped_but_keep_retired_nudges_retired() {
        let rules = rules();
        let now = day(10);
        let mut retention = RetentionState::new("ana@example.com", day(1));

        for _ in 0..2 {
            record_nudge(&mut retention, &rules, "review_goal", NudgeResponse::Dismissed, now)
                .expect("known nudge");
        }
        for minute in 0..120 {
            let at = now + Duration::minutes(minute);
            record_nudge(&mut retention, &rules, "save_first_deal", NudgeResponse::Dismissed, at)
                .expect("known nudge");
            record_nudge(&mut retention, &rules, "join_circle", NudgeResponse::Shown, at)
                .expect("known nudge");
        }

        let log = &retention.nudges;
        assert_eq!(log.shown_nudges.len(), MAX_NUDGE_EVENTS);
        assert_eq!(
            log.shown_nudges.last().map(|event| event.at),
            Some(now + Duration::minutes(119))
        );
        assert_eq!(log.dismissed_nudges.len(), MAX_NUDGE_EVENTS + 2);
        assert_eq!(
            log.dismissed_nudges
                .iter()
                .filter(|event| event.nudge_id == "review_goal")
                .count(),
            2
        );

        let later = now + Duration::days(5);
        let offered = next_nudge(Some(&retention), &rules, later).map(|rule| rule.id.as_str());
        assert_eq!(offered, Some("join_circle"));
    }

    #[test]
    fn unknown_nudge_is_rejected() {
        let mut retention = RetentionState::new("ana@example.com", day(1));
        let err = record_nudge(&mut retention, &rules(), "spam", NudgeResponse::Shown, day(2))
            .expect_err("unknown nudge must be rejected");

        assert!(matches!(err, DomainError::Validation(_)));
        assert!(retention.nudges.shown_nudges.is_empty());
    }
}
