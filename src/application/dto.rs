use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{
    churn::{ChurnAssessment, FactorContribution, Intervention, RiskCategory},
    engagement::NudgeResponse,
    errors::DomainError,
    habit_loops::{LoopContent, RetentionProgress, SuppressionReason, TriggerOutcome},
    lifecycle::LifecycleOutcome,
    power_user::{MonetizationMoment, PowerUserOutcome},
    records::{
        ActivationState, ChurnTrend, EngagementMetrics, IntentSignals, LifecyclePhase,
        LifecycleState, PowerUserState, PowerUserStatus,
    },
    rules::{CapabilityTier, LoopId, NudgeRule},
    signals::{EngagementSignals, SourceFailure},
};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct TriggerHabitLoopRequest {
    pub trigger_action: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl TriggerHabitLoopRequest {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.trigger_action.trim().is_empty() {
            return Err(DomainError::validation("trigger_action must not be blank"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct StartActivationRequest {
    pub activation_path: String,
}

impl StartActivationRequest {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.activation_path.trim().is_empty() {
            return Err(DomainError::validation("activation_path must not be blank"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct CompleteMilestoneRequest {
    pub milestone: String,
}

impl CompleteMilestoneRequest {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.milestone.trim().is_empty() {
            return Err(DomainError::validation("milestone must not be blank"));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct LifecycleEvaluationResponse {
    pub success: bool,
    pub lifecycle_state: LifecycleState,
    pub state_changed: bool,
    pub previous_state: LifecyclePhase,
    pub new_state: LifecyclePhase,
    pub matched_rule: &'static str,
    pub signals: EngagementSignals,
    pub intent: IntentSignals,
    /// Sources that could not be read. A degraded evaluation is not stored.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub degraded_sources: Vec<SourceFailure>,
}

impl LifecycleEvaluationResponse {
    pub fn new(
        state: LifecycleState,
        outcome: LifecycleOutcome,
        degraded_sources: Vec<SourceFailure>,
    ) -> Self {
        Self {
            success: true,
            signals: state.engagement_signals.clone(),
            lifecycle_state: state,
            state_changed: outcome.state_changed,
            previous_state: outcome.previous_state,
            new_state: outcome.new_state,
            matched_rule: outcome.matched_rule,
            intent: outcome.intent,
            degraded_sources,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChurnDetectionResponse {
    pub success: bool,
    pub churn_score: u32,
    pub risk_category: RiskCategory,
    pub trend: ChurnTrend,
    pub primary_risk_signal: String,
    pub risk_factors: Vec<String>,
    pub recommended_intervention: Intervention,
    pub factor_contributions: Vec<FactorContribution>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub degraded_sources: Vec<SourceFailure>,
}

impl ChurnDetectionResponse {
    pub fn new(assessment: ChurnAssessment, degraded_sources: Vec<SourceFailure>) -> Self {
        Self {
            success: true,
            churn_score: assessment.score,
            risk_category: assessment.category,
            trend: assessment.trend,
            primary_risk_signal: assessment.primary_risk_signal,
            risk_factors: assessment.risk_factors,
            recommended_intervention: assessment.intervention,
            factor_contributions: assessment.contributions,
            degraded_sources,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RetentionProgressResponse {
    pub success: bool,
    #[serde(flatten)]
    pub progress: RetentionProgress,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub degraded_sources: Vec<SourceFailure>,
}

impl RetentionProgressResponse {
    pub fn new(progress: RetentionProgress, degraded_sources: Vec<SourceFailure>) -> Self {
        Self {
            success: true,
            progress,
            degraded_sources,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PowerUserEvaluationResponse {
    pub success: bool,
    pub power_user_state: PowerUserState,
    pub signal_score: u32,
    pub status_changed: bool,
    pub new_status: PowerUserStatus,
    pub tier_unlocks: Vec<CapabilityTier>,
    pub eligible_monetization_moments: Vec<MonetizationMoment>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub degraded_sources: Vec<SourceFailure>,
}

impl PowerUserEvaluationResponse {
    pub fn new(
        state: PowerUserState,
        outcome: PowerUserOutcome,
        degraded_sources: Vec<SourceFailure>,
    ) -> Self {
        Self {
            success: true,
            power_user_state: state,
            signal_score: outcome.signal_score,
            status_changed: outcome.status_changed,
            new_status: outcome.new_status,
            tier_unlocks: outcome.tier_unlocks,
            eligible_monetization_moments: outcome.eligible_monetization_moments,
            degraded_sources,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HabitLoopTriggerResponse {
    pub success: bool,
    pub triggered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triggered_loop: Option<LoopContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SuppressionReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_id: Option<LoopId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<DateTime<Utc>>,
}

impl From<TriggerOutcome> for HabitLoopTriggerResponse {
    fn from(value: TriggerOutcome) -> Self {
        match value {
            TriggerOutcome::Triggered(content) => Self {
                success: true,
                triggered: true,
                triggered_loop: Some(content),
                reason: None,
                loop_id: None,
                retry_after: None,
            },
            TriggerOutcome::Suppressed {
                loop_id,
                reason,
                retry_after,
            } => Self {
                success: true,
                triggered: false,
                triggered_loop: None,
                reason: Some(reason),
                loop_id,
                retry_after,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionRecordedResponse {
    pub success: bool,
    pub engagement_metrics: EngagementMetrics,
}

#[derive(Debug, Serialize)]
pub struct NudgeView {
    pub id: String,
    pub loop_id: Option<LoopId>,
    pub message: String,
}

impl From<&NudgeRule> for NudgeView {
    fn from(value: &NudgeRule) -> Self {
        Self {
            id: value.id.clone(),
            loop_id: value.loop_id,
            message: value.message.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NextNudgeResponse {
    pub success: bool,
    pub nudge: Option<NudgeView>,
}

#[derive(Debug, Serialize)]
pub struct NudgeRecordedResponse {
    pub success: bool,
    pub nudge_id: String,
    pub response: NudgeResponse,
}

#[derive(Debug, Serialize)]
pub struct ActivationResponse {
    pub success: bool,
    pub activation: ActivationState,
    pub remaining_milestones: Vec<String>,
}
