//! Habit-loop engine.
//!
//! Three identically shaped loops (discovery, insight, social proof), each a
//! gated counter with a timed re-arm. A qualifying action either fires its
//! loop and yields loop content, or is suppressed without touching state.
//! This module also holds the read-side helpers behind the retention
//! progress report: active-loop determination and the display churn label.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::{
    clock::whole_days_between,
    domain::{
        records::{ActivationState, EngagementMetrics, LoopState, RetentionState, SessionFrequency},
        rules::{EngineRules, LoopDefinition, LoopId, LoopStep},
    },
};

const MAX_CONFIDENCE: f64 = 1.0;
const RETAINED_WITHIN_DAYS: i64 = 7;
const RETAINED_MIN_DAYS_ACTIVE: u64 = 2;
const MAX_RECOMMENDED_ACTIONS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    Cooldown,
    UnrecognizedAction,
    LoopDisabled,
}

impl SuppressionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cooldown => "cooldown",
            Self::UnrecognizedAction => "unrecognized_action",
            Self::LoopDisabled => "loop_disabled",
        }
    }
}

/// Content emitted when a loop fires.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopContent {
    pub loop_id: LoopId,
    pub message: String,
    pub steps: Vec<LoopStep>,
    pub personalization_boost: f64,
    pub surface: String,
    pub trigger_count: u64,
    pub completed_actions: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    Triggered(LoopContent),
    Suppressed {
        loop_id: Option<LoopId>,
        reason: SuppressionReason,
        retry_after: Option<DateTime<Utc>>,
    },
}

/// Routes `action` to its loop and fires it unless the loop is cooling down.
pub fn trigger(
    retention: &mut RetentionState,
    action: &str,
    metadata: &Map<String, Value>,
    rules: &EngineRules,
    now: DateTime<Utc>,
) -> TriggerOutcome {
    let Some(route) = rules.habit_loops.route(action) else {
        return TriggerOutcome::Suppressed {
            loop_id: None,
            reason: SuppressionReason::UnrecognizedAction,
            retry_after: None,
        };
    };
    let Some(definition) = rules.habit_loops.definition(route.loop_id) else {
        return TriggerOutcome::Suppressed {
            loop_id: Some(route.loop_id),
            reason: SuppressionReason::UnrecognizedAction,
            retry_after: None,
        };
    };

    let state = retention.habit_loops.entry(route.loop_id).or_default();
    if !state.enabled {
        return TriggerOutcome::Suppressed {
            loop_id: Some(route.loop_id),
            reason: SuppressionReason::LoopDisabled,
            retry_after: None,
        };
    }

    if let Some(rearm_at) = cooling_until(state, definition, now) {
        debug!(loop_id = route.loop_id.as_str(), %rearm_at, "habit loop suppressed by cooldown");
        return TriggerOutcome::Suppressed {
            loop_id: Some(route.loop_id),
            reason: SuppressionReason::Cooldown,
            retry_after: Some(rearm_at),
        };
    }

    state.trigger_count += 1;
    state.last_triggered_at = Some(now);
    *state.counters.entry(route.counter.clone()).or_insert(0) += 1;
    if route.completes {
        state.completed_actions += 1;
    }
    let trigger_count = state.trigger_count;
    let completed_actions = state.completed_actions;

    let confidence = &mut retention.personalization.preference_confidence;
    *confidence = (*confidence + definition.personalization_boost).min(MAX_CONFIDENCE);

    TriggerOutcome::Triggered(LoopContent {
        loop_id: route.loop_id,
        message: render_message(&definition.message, trigger_count, metadata),
        steps: definition.steps.clone(),
        personalization_boost: definition.personalization_boost,
        surface: definition.surface.clone(),
        trigger_count,
        completed_actions,
    })
}

/// When the loop re-arms, if it is still inside its cooldown window.
fn cooling_until(
    state: &LoopState,
    definition: &LoopDefinition,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let last = state.last_triggered_at?;
    let rearm_at = last + Duration::hours(definition.cooldown_hours);
    (now < rearm_at).then_some(rearm_at)
}

/// Fills `{trigger_count}` and any scalar metadata placeholders in a single
/// pass, so substituted values are never expanded again. Unknown
/// placeholders are kept verbatim.
pub fn render_message(template: &str, trigger_count: u64, metadata: &Map<String, Value>) -> String {
    let mut message = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open + 1..].find('}').map(|offset| open + 1 + offset) else {
            break;
        };
        let key = &rest[open + 1..close];
        if key.contains('{') {
            message.push_str(&rest[..=open]);
            rest = &rest[open + 1..];
            continue;
        }

        message.push_str(&rest[..open]);
        match placeholder_value(key, trigger_count, metadata) {
            Some(rendered) => message.push_str(&rendered),
            None => message.push_str(&rest[open..=close]),
        }
        rest = &rest[close + 1..];
    }

    message.push_str(rest);
    message
}

fn placeholder_value(key: &str, trigger_count: u64, metadata: &Map<String, Value>) -> Option<String> {
    if key == "trigger_count" {
        return Some(trigger_count.to_string());
    }
    match metadata.get(key)? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// Loops that count as active: (path affinity OR momentum) AND the user was
/// seen within the loop's recency window.
pub fn active_loops(
    retention: &RetentionState,
    activation: Option<&ActivationState>,
    rules: &EngineRules,
    now: DateTime<Utc>,
) -> Vec<LoopId> {
    let chosen_path = activation.and_then(|state| state.activation_path.as_deref());
    let last_seen = retention.engagement_metrics.last_session_at;

    rules
        .habit_loops
        .loops
        .iter()
        .filter(|definition| {
            let path_affinity = chosen_path == Some(definition.activation_path.as_str());
            let momentum = retention
                .habit_loops
                .get(&definition.id)
                .is_some_and(|state| state.trigger_count > 0);
            let recently_seen = last_seen
                .is_some_and(|seen| whole_days_between(seen, now) <= definition.recency_days);

            (path_affinity || momentum) && recently_seen
        })
        .map(|definition| definition.id)
        .collect()
}

/// Display-only churn label for the retention report. Not the scored model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayChurnRisk {
    VeryLow,
    Low,
    Medium,
    High,
}

pub fn display_churn_risk(metrics: &EngagementMetrics, now: DateTime<Utc>) -> DisplayChurnRisk {
    let days_silent = metrics
        .last_session_at
        .map(|seen| whole_days_between(seen, now));

    match days_silent {
        Some(days) if days > 14 => DisplayChurnRisk::High,
        Some(days) if days > 10 => DisplayChurnRisk::Medium,
        Some(days) if days > 7 => DisplayChurnRisk::Low,
        _ => match metrics.estimated_session_frequency {
            SessionFrequency::VeryLow => DisplayChurnRisk::Medium,
            SessionFrequency::High => DisplayChurnRisk::VeryLow,
            SessionFrequency::Low | SessionFrequency::Medium => DisplayChurnRisk::Low,
        },
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetentionProgress {
    pub retained: bool,
    pub retention_day: i64,
    pub churn_risk: DisplayChurnRisk,
    pub engagement_metrics: EngagementMetrics,
    pub active_habit_loops: Vec<LoopId>,
    pub weekly_engagement_streak: u32,
    pub personalization_confidence: f64,
    pub next_recommended_actions: Vec<String>,
}

pub fn progress(
    retention: &RetentionState,
    activation: Option<&ActivationState>,
    rules: &EngineRules,
    now: DateTime<Utc>,
) -> RetentionProgress {
    let metrics = &retention.engagement_metrics;
    let retained = metrics
        .last_session_at
        .is_some_and(|seen| whole_days_between(seen, now) <= RETAINED_WITHIN_DAYS)
        && metrics.unique_days_active >= RETAINED_MIN_DAYS_ACTIVE;

    let origin = activation
        .and_then(|state| state.activated_at)
        .unwrap_or(retention.tracking_started_at);

    let active = active_loops(retention, activation, rules, now);
    let next_recommended_actions = rules
        .habit_loops
        .loops
        .iter()
        .filter(|definition| !active.contains(&definition.id))
        .filter(|definition| {
            retention
                .habit_loops
                .get(&definition.id)
                .is_none_or(|state| state.enabled)
        })
        .filter_map(|definition| definition.steps.first())
        .map(|step| step.action.clone())
        .take(MAX_RECOMMENDED_ACTIONS)
        .collect();

    RetentionProgress {
        retained,
        retention_day: whole_days_between(origin, now),
        churn_risk: display_churn_risk(metrics, now),
        engagement_metrics: metrics.clone(),
        active_habit_loops: active,
        weekly_engagement_streak: metrics.weekly_streaks,
        personalization_confidence: retention.personalization.preference_confidence,
        next_recommended_actions,
    }
}
