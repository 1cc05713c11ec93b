//! Signal aggregation.
//!
//! Reduces the raw activation, retention and power-user records into one
//! normalized [`EngagementSignals`] snapshot. Absent records contribute zero
//! and the reduction never fails.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    records::{ActivationState, PowerUserState, RetentionState},
    rules::EngineRules,
};

const WEEK_DAYS: i64 = 7;
const MONTH_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionTrend {
    Declining,
    #[default]
    Stable,
    Increasing,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngagementSignals {
    pub sessions_last_7_days: u32,
    pub sessions_last_30_days: u32,
    pub session_frequency_trend: SessionTrend,
    pub completed_actions_last_7_days: u64,
    pub nudges_dismissed_last_30_days: u32,
    pub habit_loops_activated_last_30_days: u32,
    pub flow_abandonment_count: u32,
}

/// The three source records read for one user. Any of them may be missing.
#[derive(Debug, Clone, Default)]
pub struct SourceRecords {
    pub activation: Option<ActivationState>,
    pub retention: Option<RetentionState>,
    pub power_user: Option<PowerUserState>,
}

impl SourceRecords {
    pub fn is_activated(&self) -> bool {
        self.activation.as_ref().is_some_and(|state| state.activated)
    }
}

/// A source that could not be read. The value built without it is still usable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFailure {
    pub source: String,
    pub reason: String,
}

/// Outcome of a best-effort collection: either every source answered, or
/// some failed and the value carries neutral defaults in their place.
#[derive(Debug, Clone, PartialEq)]
pub enum Collected<T> {
    Complete(T),
    Degraded {
        value: T,
        failures: Vec<SourceFailure>,
    },
}

impl<T> Collected<T> {
    pub fn from_parts(value: T, failures: Vec<SourceFailure>) -> Self {
        if failures.is_empty() {
            Self::Complete(value)
        } else {
            Self::Degraded { value, failures }
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    pub fn failures(&self) -> &[SourceFailure] {
        match self {
            Self::Complete(_) => &[],
            Self::Degraded { failures, .. } => failures,
        }
    }

    pub fn into_parts(self) -> (T, Vec<SourceFailure>) {
        match self {
            Self::Complete(value) => (value, Vec::new()),
            Self::Degraded { value, failures } => (value, failures),
        }
    }
}

pub fn aggregate(
    sources: &SourceRecords,
    rules: &EngineRules,
    now: DateTime<Utc>,
) -> EngagementSignals {
    let week_ago = now - Duration::days(WEEK_DAYS);
    let month_ago = now - Duration::days(MONTH_DAYS);

    let mut signals = EngagementSignals {
        session_frequency_trend: session_trend(sources.retention.as_ref(), rules),
        flow_abandonment_count: flow_abandonment(sources.activation.as_ref(), rules, now),
        ..EngagementSignals::default()
    };

    let Some(retention) = sources.retention.as_ref() else {
        return signals;
    };

    let sessions = &retention.engagement_metrics.recent_sessions;
    signals.sessions_last_7_days = count_since(sessions.iter().copied(), week_ago);
    signals.sessions_last_30_days = count_since(sessions.iter().copied(), month_ago);

    signals.completed_actions_last_7_days = retention
        .habit_loops
        .values()
        .filter(|state| state.last_triggered_at.is_some_and(|at| at >= week_ago))
        .map(|state| state.completed_actions)
        .sum();

    signals.habit_loops_activated_last_30_days = count_since(
        retention
            .habit_loops
            .values()
            .filter_map(|state| state.last_triggered_at),
        month_ago,
    );

    signals.nudges_dismissed_last_30_days = count_since(
        retention.nudges.dismissed_nudges.iter().map(|event| event.at),
        month_ago,
    );

    signals
}

// Point-in-time heuristic: only the latest streak counter is inspected, so the
// thresholds are provisional until per-week session history is kept.
fn session_trend(retention: Option<&RetentionState>, rules: &EngineRules) -> SessionTrend {
    let Some(metrics) = retention.map(|state| &state.engagement_metrics) else {
        return SessionTrend::Declining;
    };

    if metrics.weekly_streaks > rules.lifecycle.increasing_weekly_streaks {
        SessionTrend::Increasing
    } else if metrics.total_sessions == 0 && metrics.last_session_at.is_none() {
        SessionTrend::Declining
    } else {
        SessionTrend::Stable
    }
}

fn flow_abandonment(
    activation: Option<&ActivationState>,
    rules: &EngineRules,
    now: DateTime<Utc>,
) -> u32 {
    let Some(activation) = activation else {
        return 0;
    };
    let window = Duration::hours(rules.activation.abandonment_window_hours);

    match activation.started_at {
        Some(started_at) if !activation.activated && now - started_at > window => 1,
        _ => 0,
    }
}

fn count_since(stamps: impl Iterator<Item = DateTime<Utc>>, since: DateTime<Utc>) -> u32 {
    let count = stamps.filter(|at| *at >= since).count();
    u32::try_from(count).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::domain::{
        records::{LoopState, NudgeEvent},
        rules::LoopId,
    };

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 20, 12, 0, 0).unwrap()
    }

    fn rules() -> EngineRules {
        EngineRules::embedded().expect("embedded rules should load")
    }

    #[test]
    fn missing_sources_yield_neutral_snapshot_with_declining_trend() {
        let signals = aggregate(&SourceRecords::default(), &rules(), now());

        assert_eq!(signals.sessions_last_7_days, 0);
        assert_eq!(signals.habit_loops_activated_last_30_days, 0);
        assert_eq!(signals.session_frequency_trend, SessionTrend::Declining);
        assert_eq!(signals.flow_abandonment_count, 0);
    }

    #[test]
    fn windows_count_sessions_loops_and_dismissals() {
        let now = now();
        let mut retention = RetentionState::new("ana@example.com", now - Duration::days(60));
        retention.engagement_metrics.total_sessions = 5;
        retention.engagement_metrics.last_session_at = Some(now - Duration::hours(3));
        retention.engagement_metrics.recent_sessions = vec![
            now - Duration::days(20),
            now - Duration::days(6),
            now - Duration::hours(3),
        ];
        retention.habit_loops.insert(
            LoopId::DiscoveryLoop,
            LoopState {
                completed_actions: 4,
                last_triggered_at: Some(now - Duration::days(2)),
                ..LoopState::default()
            },
        );
        retention.habit_loops.insert(
            LoopId::InsightLoop,
            LoopState {
                completed_actions: 9,
                last_triggered_at: Some(now - Duration::days(12)),
                ..LoopState::default()
            },
        );
        retention.nudges.dismissed_nudges = vec![
            NudgeEvent {
                nudge_id: "save_first_deal".to_string(),
                at: now - Duration::days(45),
            },
            NudgeEvent {
                nudge_id: "review_goal".to_string(),
                at: now - Duration::days(1),
            },
        ];

        let signals = aggregate(
            &SourceRecords {
                retention: Some(retention),
                ..SourceRecords::default()
            },
            &rules(),
            now,
        );

        assert_eq!(signals.sessions_last_7_days, 2);
        assert_eq!(signals.sessions_last_30_days, 3);
        assert_eq!(signals.completed_actions_last_7_days, 4);
        assert_eq!(signals.habit_loops_activated_last_30_days, 2);
        assert_eq!(signals.nudges_dismissed_last_30_days, 1);
        assert_eq!(signals.session_frequency_trend, SessionTrend::Stable);
    }

    #[test]
    fn weekly_streaks_above_threshold_read_as_increasing() {
        let mut retention = RetentionState::new("ana@example.com", now());
        retention.engagement_metrics.weekly_streaks = 3;
        retention.engagement_metrics.total_sessions = 30;

        let signals = aggregate(
            &SourceRecords {
                retention: Some(retention),
                ..SourceRecords::default()
            },
            &rules(),
            now(),
        );

        assert_eq!(signals.session_frequency_trend, SessionTrend::Increasing);
    }

    #[test]
    fn stalled_activation_counts_as_abandoned_flow() {
        let activation = ActivationState {
            user_email: "ana@example.com".to_string(),
            activation_path: Some("deal_first".to_string()),
            activated: false,
            activated_at: None,
            started_at: Some(now() - Duration::hours(30)),
            completed_milestones: vec![],
        };

        let signals = aggregate(
            &SourceRecords {
                activation: Some(activation),
                ..SourceRecords::default()
            },
            &rules(),
            now(),
        );

        assert_eq!(signals.flow_abandonment_count, 1);
    }

    #[test]
    fn collected_reports_degradation() {
        let complete = Collected::from_parts(3, vec![]);
        assert!(!complete.is_degraded());

        let degraded = Collected::from_parts(
            0,
            vec![SourceFailure {
                source: "deal_bookmarks".to_string(),
                reason: "timeout".to_string(),
            }],
        );
        assert!(degraded.is_degraded());
        assert_eq!(degraded.failures().len(), 1);
        let (value, failures) = degraded.into_parts();
        assert_eq!(value, 0);
        assert_eq!(failures.len(), 1);
    }
}
