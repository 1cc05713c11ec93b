//! Churn risk scoring.
//!
//! A weighted linear scorer over five independent factors. Each factor is a
//! step function: below its trigger it contributes nothing, above it it
//! contributes its normalized magnitude times the configured weight.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    clock::whole_days_between,
    domain::{
        records::{ChurnRisk, ChurnTrend, LifecycleState, RetentionState},
        rules::{ChurnFactor, EngineRules},
        signals::{EngagementSignals, SessionTrend},
    },
};

pub const MAX_SCORE: u32 = 100;

const DECLINE_TRIGGER: f64 = -0.4;
const ABANDONMENT_TRIGGER: f64 = 0.6;
const DISMISSAL_TRIGGER: f64 = 0.7;
const LOOP_INACTIVITY_TRIGGER_DAYS: f64 = 14.0;
const SESSION_GAP_TRIGGER_DAYS: f64 = 7.0;
const DAY_NORMALIZER: f64 = 30.0;
const WEEK_OVER_MONTH: f64 = 7.0 / 30.0;
const NO_RISK_SIGNAL: &str = "none";

/// Evaluation order of the factors.
pub const FACTORS: [ChurnFactor; 5] = [
    ChurnFactor::SessionFrequencyDecline,
    ChurnFactor::ActionAbandonment,
    ChurnFactor::NudgeDismissalRate,
    ChurnFactor::HabitLoopInactivity,
    ChurnFactor::TimeSinceLastSession,
];

/// Raw factor magnitudes before thresholds and weights.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ChurnInputs {
    /// Relative change of last week's sessions against the 30-day weekly mean.
    pub session_decline_ratio: f64,
    pub dismissed_to_shown_ratio: f64,
    pub dismissed_to_activation_ratio: f64,
    pub days_since_loop_activity: f64,
    pub days_since_last_session: f64,
    pub declining_engagement: bool,
}

impl ChurnInputs {
    pub fn collect(
        signals: &EngagementSignals,
        retention: Option<&RetentionState>,
        now: DateTime<Utc>,
    ) -> Self {
        let expected_weekly = f64::from(signals.sessions_last_30_days) * WEEK_OVER_MONTH;
        let session_decline_ratio = if expected_weekly > 0.0 {
            (f64::from(signals.sessions_last_7_days) - expected_weekly) / expected_weekly
        } else {
            0.0
        };

        let activations = f64::from(signals.habit_loops_activated_last_30_days.max(1));
        let dismissed_to_activation_ratio =
            f64::from(signals.nudges_dismissed_last_30_days) / activations;

        let mut inputs = Self {
            session_decline_ratio,
            dismissed_to_activation_ratio,
            declining_engagement: signals.session_frequency_trend == SessionTrend::Declining,
            ..Self::default()
        };

        let Some(retention) = retention else {
            return inputs;
        };

        let shown = retention.nudges.shown_nudges.len();
        if shown > 0 {
            inputs.dismissed_to_shown_ratio =
                retention.nudges.dismissed_nudges.len() as f64 / shown as f64;
        }

        let origin = retention.tracking_started_at;
        let last_loop = retention.last_loop_trigger().unwrap_or(origin);
        let last_session = retention
            .engagement_metrics
            .last_session_at
            .unwrap_or(origin);
        inputs.days_since_loop_activity = whole_days_between(last_loop, now) as f64;
        inputs.days_since_last_session = whole_days_between(last_session, now) as f64;

        inputs
    }

    fn value(&self, factor: ChurnFactor) -> f64 {
        match factor {
            ChurnFactor::SessionFrequencyDecline => self.session_decline_ratio,
            ChurnFactor::ActionAbandonment => self.dismissed_to_shown_ratio,
            ChurnFactor::NudgeDismissalRate => self.dismissed_to_activation_ratio,
            ChurnFactor::HabitLoopInactivity => self.days_since_loop_activity,
            ChurnFactor::TimeSinceLastSession => self.days_since_last_session,
        }
    }
}

/// Contribution of one factor, zero below its trigger.
pub fn factor_contribution(factor: ChurnFactor, value: f64, weight: f64) -> f64 {
    let normalized = match factor {
        ChurnFactor::SessionFrequencyDecline if value < DECLINE_TRIGGER => value / DECLINE_TRIGGER,
        ChurnFactor::ActionAbandonment if value > ABANDONMENT_TRIGGER => value,
        ChurnFactor::NudgeDismissalRate if value > DISMISSAL_TRIGGER => value,
        ChurnFactor::HabitLoopInactivity if value > LOOP_INACTIVITY_TRIGGER_DAYS => {
            value / DAY_NORMALIZER
        }
        ChurnFactor::TimeSinceLastSession if value > SESSION_GAP_TRIGGER_DAYS => {
            value / DAY_NORMALIZER
        }
        _ => return 0.0,
    };
    normalized * 100.0 * weight
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FactorContribution {
    pub factor: ChurnFactor,
    pub value: f64,
    pub contribution: f64,
}

/// Sum of weighted contributions, capped and rounded. Factors without a
/// configured weight are skipped.
pub fn score(inputs: &ChurnInputs, rules: &EngineRules) -> (u32, Vec<FactorContribution>) {
    let contributions = FACTORS
        .into_iter()
        .filter_map(|factor| {
            let weight = rules.churn.weight_for(factor)?;
            let value = inputs.value(factor);
            Some(FactorContribution {
                factor,
                value,
                contribution: factor_contribution(factor, value, weight),
            })
        })
        .collect::<Vec<_>>();

    let total = contributions
        .iter()
        .map(|entry| entry.contribution)
        .sum::<f64>()
        .clamp(0.0, f64::from(MAX_SCORE));

    (total.round() as u32, contributions)
}

pub fn trend(previous: Option<u32>, current: u32, delta: i64) -> ChurnTrend {
    let Some(previous) = previous else {
        return ChurnTrend::Stable;
    };
    let change = i64::from(current) - i64::from(previous);

    if change > delta {
        ChurnTrend::Declining
    } else if change < -delta {
        ChurnTrend::Improving
    } else {
        ChurnTrend::Stable
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    LowRisk,
    MediumRisk,
    HighRisk,
    CriticalRisk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intervention {
    None,
    ValueReminder,
    RelevanceReset,
    WinBackSequence,
}

const CATEGORY_BANDS: [(u32, RiskCategory); 3] = [
    (30, RiskCategory::LowRisk),
    (60, RiskCategory::MediumRisk),
    (85, RiskCategory::HighRisk),
];

impl RiskCategory {
    pub fn from_score(score: u32) -> Self {
        CATEGORY_BANDS
            .iter()
            .find(|(upper, _)| score < *upper)
            .map(|(_, category)| *category)
            .unwrap_or(Self::CriticalRisk)
    }

    pub fn intervention(self) -> Intervention {
        match self {
            Self::LowRisk => Intervention::None,
            Self::MediumRisk => Intervention::ValueReminder,
            Self::HighRisk => Intervention::RelevanceReset,
            Self::CriticalRisk => Intervention::WinBackSequence,
        }
    }
}

/// Human-facing risk flags in detection order.
pub fn risk_factors(inputs: &ChurnInputs) -> Vec<String> {
    let checks = [
        (
            inputs.days_since_last_session > SESSION_GAP_TRIGGER_DAYS,
            "low_session_frequency",
        ),
        (
            inputs.dismissed_to_activation_ratio > DISMISSAL_TRIGGER,
            "high_nudge_dismissal",
        ),
        (
            inputs.days_since_loop_activity > LOOP_INACTIVITY_TRIGGER_DAYS,
            "habit_loop_inactivity",
        ),
        (inputs.declining_engagement, "declining_engagement"),
    ];

    checks
        .into_iter()
        .filter(|(flagged, _)| *flagged)
        .map(|(_, name)| name.to_string())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChurnAssessment {
    pub score: u32,
    pub trend: ChurnTrend,
    pub category: RiskCategory,
    pub intervention: Intervention,
    pub primary_risk_signal: String,
    pub risk_factors: Vec<String>,
    pub contributions: Vec<FactorContribution>,
}

pub fn assess(
    signals: &EngagementSignals,
    retention: Option<&RetentionState>,
    previous: Option<&ChurnRisk>,
    rules: &EngineRules,
    now: DateTime<Utc>,
) -> ChurnAssessment {
    let inputs = ChurnInputs::collect(signals, retention, now);
    let (score, contributions) = score(&inputs, rules);
    let trend = trend(previous.map(|risk| risk.score), score, rules.churn.trend_delta);
    let category = RiskCategory::from_score(score);
    let risk_factors = risk_factors(&inputs);
    let primary_risk_signal = risk_factors
        .first()
        .cloned()
        .unwrap_or_else(|| NO_RISK_SIGNAL.to_string());

    ChurnAssessment {
        score,
        trend,
        category,
        intervention: category.intervention(),
        primary_risk_signal,
        risk_factors,
        contributions,
    }
}

/// Writes the assessment onto the lifecycle record. Nothing else is touched.
pub fn record(state: &mut LifecycleState, assessment: &ChurnAssessment, now: DateTime<Utc>) {
    state.churn_risk = Some(ChurnRisk {
        score: assessment.score,
        trend: assessment.trend,
        primary_risk_signal: assessment.primary_risk_signal.clone(),
        risk_factors: assessment.risk_factors.clone(),
        last_calculated_at: now,
    });
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::domain::records::NudgeEvent;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 4, 10, 0, 0).unwrap()
    }

    fn rules() -> EngineRules {
        EngineRules::embedded().expect("embedded rules should load")
    }

    fn nudge(id: &str, at: DateTime<Utc>) -> NudgeEvent {
        NudgeEvent {
            nudge_id: id.to_string(),
            at,
        }
    }

    #[test]
    fn factors_below_trigger_contribute_nothing() {
        assert_eq!(
            factor_contribution(ChurnFactor::SessionFrequencyDecline, -0.4, 0.25),
            0.0
        );
        assert_eq!(factor_contribution(ChurnFactor::ActionAbandonment, 0.6, 0.15), 0.0);
        assert_eq!(factor_contribution(ChurnFactor::NudgeDismissalRate, 0.7, 0.2), 0.0);
        assert_eq!(factor_contribution(ChurnFactor::HabitLoopInactivity, 14.0, 0.2), 0.0);
        assert_eq!(factor_contribution(ChurnFactor::TimeSinceLastSession, 7.0, 0.2), 0.0);
    }

    #[test]
    fn factors_above_trigger_use_their_normalization() {
        let decline = factor_contribution(ChurnFactor::SessionFrequencyDecline, -0.8, 0.25);
        assert!((decline - 50.0).abs() < 1e-9);

        let abandonment = factor_contribution(ChurnFactor::ActionAbandonment, 0.8, 0.15);
        assert!((abandonment - 12.0).abs() < 1e-9);

        let silence = factor_contribution(ChurnFactor::TimeSinceLastSession, 15.0, 0.2);
        assert!((silence - 10.0).abs() < 1e-9);
    }

    #[test]
    fn score_is_bounded_and_monotonic_per_factor() {
        let rules = rules();
        for factor in FACTORS {
            let mut previous = 0;
            for step in 0..60 {
                let mut inputs = ChurnInputs::default();
                let magnitude = f64::from(step);
                match factor {
                    ChurnFactor::SessionFrequencyDecline => {
                        inputs.session_decline_ratio = -magnitude / 10.0
                    }
                    ChurnFactor::ActionAbandonment => {
                        inputs.dismissed_to_shown_ratio = magnitude / 10.0
                    }
                    ChurnFactor::NudgeDismissalRate => {
                        inputs.dismissed_to_activation_ratio = magnitude / 10.0
                    }
                    ChurnFactor::HabitLoopInactivity => inputs.days_since_loop_activity = magnitude,
                    ChurnFactor::TimeSinceLastSession => inputs.days_since_last_session = magnitude,
                }
                let (current, _) = score(&inputs, &rules);
                assert!(current <= MAX_SCORE);
                assert!(current >= previous, "{factor:?} decreased at step {step}");
                previous = current;
            }
        }

        let saturated = ChurnInputs {
            session_decline_ratio: -1.0,
            dismissed_to_shown_ratio: 5.0,
            dismissed_to_activation_ratio: 9.0,
            days_since_loop_activity: 300.0,
            days_since_last_session: 300.0,
            declining_engagement: true,
        };
        assert_eq!(score(&saturated, &rules).0, MAX_SCORE);
    }

    #[test]
    fn unweighted_factor_is_skipped() {
        let mut rules = rules();
        rules
            .churn
            .factors
            .retain(|entry| entry.factor != ChurnFactor::TimeSinceLastSession);
        let inputs = ChurnInputs {
            days_since_last_session: 30.0,
            ..ChurnInputs::default()
        };

        let (value, contributions) = score(&inputs, &rules);
        assert_eq!(value, 0);
        assert_eq!(contributions.len(), 4);
    }

    #[test]
    fn trend_needs_more_than_ten_points() {
        assert_eq!(trend(None, 80, 10), ChurnTrend::Stable);
        assert_eq!(trend(Some(40), 50, 10), ChurnTrend::Stable);
        assert_eq!(trend(Some(40), 51, 10), ChurnTrend::Declining);
        assert_eq!(trend(Some(40), 29, 10), ChurnTrend::Improving);
    }

    #[test]
    fn categories_map_to_single_interventions() {
        assert_eq!(RiskCategory::from_score(0), RiskCategory::LowRisk);
        assert_eq!(RiskCategory::from_score(29), RiskCategory::LowRisk);
        assert_eq!(RiskCategory::from_score(30), RiskCategory::MediumRisk);
        assert_eq!(RiskCategory::from_score(84), RiskCategory::HighRisk);
        assert_eq!(RiskCategory::from_score(85), RiskCategory::CriticalRisk);
        assert_eq!(
            RiskCategory::from_score(100).intervention(),
            Intervention::WinBackSequence
        );
        assert_eq!(RiskCategory::LowRisk.intervention(), Intervention::None);
    }

    #[test]
    fn silent_user_collects_ordered_risk_factors() {
        let now = now();
        let mut retention = RetentionState::new("ana@example.com", now - Duration::days(40));
        retention.engagement_metrics.last_session_at = Some(now - Duration::days(20));
        retention.nudges.shown_nudges = vec![
            nudge("save_first_deal", now - Duration::days(5)),
            nudge("review_goal", now - Duration::days(4)),
        ];
        retention.nudges.dismissed_nudges = vec![
            nudge("save_first_deal", now - Duration::days(5)),
            nudge("review_goal", now - Duration::days(4)),
        ];
        let signals = EngagementSignals {
            nudges_dismissed_last_30_days: 2,
            session_frequency_trend: SessionTrend::Declining,
            ..EngagementSignals::default()
        };

        let assessment = assess(&signals, Some(&retention), None, &rules(), now);

        assert_eq!(
            assessment.risk_factors,
            vec![
                "low_session_frequency",
                "high_nudge_dismissal",
                "habit_loop_inactivity",
                "declining_engagement"
            ]
        );
        assert_eq!(assessment.primary_risk_signal, "low_session_frequency");
        // 1.0*15 + 2.0*20 + 40/30*20 + 20/30*20 = 95
        assert_eq!(assessment.score, 95);
        assert_eq!(assessment.category, RiskCategory::CriticalRisk);
        assert_eq!(assessment.trend, ChurnTrend::Stable);
    }

    #[test]
    fn repeated_assessment_is_idempotent() {
        let now = now();
        let rules = rules();
        let mut retention = RetentionState::new("ana@example.com", now - Duration::days(20));
        retention.engagement_metrics.last_session_at = Some(now - Duration::days(9));
        let signals = EngagementSignals::default();
        let mut lifecycle = LifecycleState::new("ana@example.com", now);

        let first = assess(&signals, Some(&retention), None, &rules, now);
        record(&mut lifecycle, &first, now);
        let second = assess(
            &signals,
            Some(&retention),
            lifecycle.churn_risk.as_ref(),
            &rules,
            now,
        );

        assert_eq!(first.score, second.score);
        assert_eq!(second.trend, ChurnTrend::Stable);
    }

    #[test]
    fn quiet_new_user_scores_zero() {
        let assessment = assess(&EngagementSignals::default(), None, None, &rules(), now());

        assert_eq!(assessment.score, 0);
        assert_eq!(assessment.primary_risk_signal, "none");
        assert_eq!(assessment.intervention, Intervention::None);
    }
}
