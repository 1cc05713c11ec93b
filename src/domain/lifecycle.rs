//! Lifecycle state machine.
//!
//! Classification runs through [`TRANSITION_RULES`], an ordered table of
//! `(name, predicate, target)` entries where the first match wins. The order
//! is the tie-break policy between overlapping rules, so it is part of the
//! contract and is pinned by tests.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::{
    clock::whole_days_between,
    domain::{
        records::{
            ActivationState, IntentSignals, LifecyclePhase, LifecycleState, PowerUserStatus,
            StateContext, StateTransition,
        },
        rules::{EngineRules, LifecycleRules},
        signals::{EngagementSignals, SessionTrend, SourceRecords},
    },
};

const MIXED_INTENT: &str = "mixed";

/// Everything a transition predicate may look at.
#[derive(Debug, Clone, Copy)]
pub struct TransitionInput<'a> {
    pub current: LifecyclePhase,
    pub signals: &'a EngagementSignals,
    pub activated: bool,
    pub power_status: PowerUserStatus,
    pub rules: &'a LifecycleRules,
}

pub struct TransitionRule {
    pub name: &'static str,
    pub target: LifecyclePhase,
    pub applies: fn(&TransitionInput<'_>) -> bool,
}

pub const TRANSITION_RULES: &[TransitionRule] = &[
    TransitionRule {
        name: "power_user_status",
        target: LifecyclePhase::PowerUser,
        applies: reports_power_user,
    },
    TransitionRule {
        name: "dismissals_outpace_loops",
        target: LifecyclePhase::Dormant,
        applies: dismissals_outpace_loops,
    },
    TransitionRule {
        name: "engaged_declining",
        target: LifecyclePhase::AtRisk,
        applies: engaged_but_declining,
    },
    TransitionRule {
        name: "dormant_reactivated",
        target: LifecyclePhase::Returning,
        applies: dormant_with_recent_actions,
    },
    TransitionRule {
        name: "activated_with_habits",
        target: LifecyclePhase::Engaged,
        applies: activated_with_habits,
    },
    TransitionRule {
        name: "activated",
        target: LifecyclePhase::Activated,
        applies: is_activated,
    },
    TransitionRule {
        name: "fallback_new",
        target: LifecyclePhase::New,
        applies: always,
    },
];

fn reports_power_user(input: &TransitionInput<'_>) -> bool {
    input.power_status != PowerUserStatus::Prospect
}

fn dismissals_outpace_loops(input: &TransitionInput<'_>) -> bool {
    let signals = input.signals;
    let allowance = u64::from(input.rules.dormant_dismissal_multiplier)
        * u64::from(signals.habit_loops_activated_last_30_days);

    signals.session_frequency_trend == SessionTrend::Declining
        && u64::from(signals.nudges_dismissed_last_30_days) > allowance
}

fn engaged_but_declining(input: &TransitionInput<'_>) -> bool {
    input.current == LifecyclePhase::Engaged
        && input.signals.session_frequency_trend == SessionTrend::Declining
}

fn dormant_with_recent_actions(input: &TransitionInput<'_>) -> bool {
    input.current == LifecyclePhase::Dormant && input.signals.completed_actions_last_7_days > 0
}

fn activated_with_habits(input: &TransitionInput<'_>) -> bool {
    input.activated
        && input.signals.sessions_last_7_days >= input.rules.engaged_min_sessions_7d
        && input.signals.habit_loops_activated_last_30_days > 0
}

fn is_activated(input: &TransitionInput<'_>) -> bool {
    input.activated
}

fn always(_: &TransitionInput<'_>) -> bool {
    true
}

/// First rule whose predicate holds. The table ends in a catch-all.
pub fn classify(input: &TransitionInput<'_>) -> &'static TransitionRule {
    TRANSITION_RULES
        .iter()
        .find(|rule| (rule.applies)(input))
        .unwrap_or(&TRANSITION_RULES[TRANSITION_RULES.len() - 1])
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifecycleOutcome {
    pub state_changed: bool,
    pub previous_state: LifecyclePhase,
    pub new_state: LifecyclePhase,
    pub matched_rule: &'static str,
    pub intent: IntentSignals,
}

/// Re-evaluates `state` in place from fresh signals.
pub fn evaluate(
    state: &mut LifecycleState,
    sources: &SourceRecords,
    signals: EngagementSignals,
    rules: &EngineRules,
    now: DateTime<Utc>,
) -> LifecycleOutcome {
    let input = TransitionInput {
        current: state.current_state,
        signals: &signals,
        activated: sources.is_activated(),
        power_status: sources
            .power_user
            .as_ref()
            .map(|power| power.power_user_status)
            .unwrap_or_default(),
        rules: &rules.lifecycle,
    };
    let rule = classify(&input);
    let previous_state = state.current_state;
    let state_changed = transition(state, rule.target, now);

    if state_changed {
        info!(
            user_email = %state.user_email,
            from = previous_state.as_str(),
            to = rule.target.as_str(),
            rule = rule.name,
            "lifecycle transition"
        );
    }

    let intent = detect_intent(
        sources.activation.as_ref(),
        &signals,
        &state.intent_signals,
        rules,
        now,
    );
    state.intent_signals = intent.clone();
    state.engagement_signals = signals;

    LifecycleOutcome {
        state_changed,
        previous_state,
        new_state: state.current_state,
        matched_rule: rule.name,
        intent,
    }
}

/// Moves `state` to `next`, archiving the outgoing phase. Returns whether
/// anything changed; a same-state transition leaves history untouched.
pub fn transition(state: &mut LifecycleState, next: LifecyclePhase, now: DateTime<Utc>) -> bool {
    if state.current_state == next {
        return false;
    }

    state.previous_states.push(StateTransition {
        state: state.current_state,
        entered_at: state.state_entered_at,
        exited_at: now,
        duration_days: whole_days_between(state.state_entered_at, now),
    });
    state.current_state = next;
    state.state_entered_at = now;
    state.state_context = StateContext {
        lifecycle_stage: next.stage(),
        evaluated_at: now,
    };
    true
}

pub fn detect_intent(
    activation: Option<&ActivationState>,
    signals: &EngagementSignals,
    previous: &IntentSignals,
    rules: &EngineRules,
    now: DateTime<Utc>,
) -> IntentSignals {
    let detected_intent = activation
        .and_then(|state| state.activation_path.as_deref())
        .and_then(|path| rules.activation_path(path))
        .map(|path| path.intent.clone())
        .unwrap_or_else(|| MIXED_INTENT.to_string());

    let saturation = rules.lifecycle.intent_confidence_actions.max(1.0);
    let intent_confidence = (signals.completed_actions_last_7_days as f64 / saturation).min(1.0);

    let intent_shift_at = if detected_intent != previous.detected_intent {
        Some(now)
    } else {
        previous.intent_shift_at
    };

    IntentSignals {
        detected_intent,
        intent_confidence,
        intent_shift_at,
    }
}
