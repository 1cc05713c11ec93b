//! Per-user state records.
//!
//! Each record is one JSON document per user in its own collection. Fields
//! default when absent so documents written by other producers (or older
//! versions) still load as neutral values.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::domain::{
    rules::{CapabilityTier, LoopId, PowerSignal},
    signals::EngagementSignals,
};

/// A record stored once per user in a named collection.
pub trait UserRecord: Serialize + DeserializeOwned + Send + Sync + 'static {
    const COLLECTION: &'static str;

    fn user_email(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    New,
    Activated,
    Engaged,
    PowerUser,
    AtRisk,
    Dormant,
    Returning,
}

impl LifecyclePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Activated => "activated",
            Self::Engaged => "engaged",
            Self::PowerUser => "power_user",
            Self::AtRisk => "at_risk",
            Self::Dormant => "dormant",
            Self::Returning => "returning",
        }
    }

    pub fn stage(self) -> LifecycleStage {
        match self {
            Self::New | Self::Activated => LifecycleStage::Early,
            Self::Engaged | Self::Returning => LifecycleStage::Growth,
            Self::PowerUser => LifecycleStage::Mature,
            Self::AtRisk | Self::Dormant => LifecycleStage::ChurnRisk,
        }
    }
}

/// Coarse grouping of lifecycle phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStage {
    Early,
    Growth,
    Mature,
    ChurnRisk,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub state: LifecyclePhase,
    pub entered_at: DateTime<Utc>,
    pub exited_at: DateTime<Utc>,
    pub duration_days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateContext {
    pub lifecycle_stage: LifecycleStage,
    pub evaluated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentSignals {
    pub detected_intent: String,
    pub intent_confidence: f64,
    #[serde(default)]
    pub intent_shift_at: Option<DateTime<Utc>>,
}

impl Default for IntentSignals {
    fn default() -> Self {
        Self {
            detected_intent: "mixed".to_string(),
            intent_confidence: 0.0,
            intent_shift_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChurnTrend {
    Declining,
    Improving,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChurnRisk {
    pub score: u32,
    pub trend: ChurnTrend,
    pub primary_risk_signal: String,
    #[serde(default)]
    pub risk_factors: Vec<String>,
    pub last_calculated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleState {
    pub user_email: String,
    pub current_state: LifecyclePhase,
    pub state_entered_at: DateTime<Utc>,
    #[serde(default)]
    pub previous_states: Vec<StateTransition>,
    pub state_context: StateContext,
    #[serde(default)]
    pub engagement_signals: EngagementSignals,
    #[serde(default)]
    pub intent_signals: IntentSignals,
    #[serde(default)]
    pub churn_risk: Option<ChurnRisk>,
}

impl LifecycleState {
    pub fn new(user_email: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_email: user_email.into(),
            current_state: LifecyclePhase::New,
            state_entered_at: now,
            previous_states: Vec::new(),
            state_context: StateContext {
                lifecycle_stage: LifecyclePhase::New.stage(),
                evaluated_at: now,
            },
            engagement_signals: EngagementSignals::default(),
            intent_signals: IntentSignals::default(),
            churn_risk: None,
        }
    }
}

impl UserRecord for LifecycleState {
    const COLLECTION: &'static str = "lifecycle_states";

    fn user_email(&self) -> &str {
        &self.user_email
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionFrequency {
    #[default]
    VeryLow,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngagementMetrics {
    pub total_sessions: u64,
    pub unique_days_active: u64,
    pub consecutive_days_active: u64,
    pub last_session_at: Option<DateTime<Utc>>,
    pub weekly_streaks: u32,
    pub estimated_session_frequency: SessionFrequency,
    /// Session timestamps inside the trailing 30-day window.
    pub recent_sessions: Vec<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopState {
    pub enabled: bool,
    pub trigger_count: u64,
    pub completed_actions: u64,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub counters: BTreeMap<String, u64>,
}

impl Default for LoopState {
    fn default() -> Self {
        Self {
            enabled: true,
            trigger_count: 0,
            completed_actions: 0,
            last_triggered_at: None,
            counters: BTreeMap::new(),
        }
    }
}

impl LoopState {
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NudgeEvent {
    pub nudge_id: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NudgeLog {
    pub shown_nudges: Vec<NudgeEvent>,
    pub dismissed_nudges: Vec<NudgeEvent>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Personalization {
    pub preference_confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionState {
    pub user_email: String,
    pub tracking_started_at: DateTime<Utc>,
    #[serde(default)]
    pub engagement_metrics: EngagementMetrics,
    #[serde(default)]
    pub habit_loops: BTreeMap<LoopId, LoopState>,
    #[serde(default)]
    pub nudges: NudgeLog,
    #[serde(default)]
    pub personalization: Personalization,
}

impl RetentionState {
    pub fn new(user_email: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_email: user_email.into(),
            tracking_started_at: now,
            engagement_metrics: EngagementMetrics::default(),
            habit_loops: LoopId::ALL
                .into_iter()
                .map(|id| (id, LoopState::default()))
                .collect(),
            nudges: NudgeLog::default(),
            personalization: Personalization::default(),
        }
    }

    /// Most recent trigger across all loops.
    pub fn last_loop_trigger(&self) -> Option<DateTime<Utc>> {
        self.habit_loops
            .values()
            .filter_map(|state| state.last_triggered_at)
            .max()
    }
}

impl UserRecord for RetentionState {
    const COLLECTION: &'static str = "retention_states";

    fn user_email(&self) -> &str {
        &self.user_email
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerUserStatus {
    #[default]
    Prospect,
    PowerUser,
    PremiumUser,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerUserSignals {
    pub deals_saved: u64,
    pub deals_compared: u64,
    pub portfolio_goals_reviewed: u64,
    pub community_interactions: u64,
    pub weekly_engagement_streak: u64,
    pub time_spent_hours: f64,
}

impl PowerUserSignals {
    pub fn value(&self, signal: PowerSignal) -> f64 {
        let raw = match signal {
            PowerSignal::DealsSaved => self.deals_saved,
            PowerSignal::DealsCompared => self.deals_compared,
            PowerSignal::PortfolioGoalsReviewed => self.portfolio_goals_reviewed,
            PowerSignal::CommunityInteractions => self.community_interactions,
            PowerSignal::WeeklyEngagementStreak => self.weekly_engagement_streak,
        };
        raw as f64
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TierUnlock {
    pub unlocked: bool,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub triggered_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerUserState {
    pub user_email: String,
    #[serde(default)]
    pub power_user_status: PowerUserStatus,
    #[serde(default)]
    pub power_user_signals: PowerUserSignals,
    #[serde(default)]
    pub signal_score: u32,
    #[serde(default)]
    pub capability_tiers: BTreeMap<CapabilityTier, TierUnlock>,
    #[serde(default)]
    pub unlocked_capabilities: Vec<String>,
    #[serde(default)]
    pub power_user_since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_evaluated_at: Option<DateTime<Utc>>,
}

impl PowerUserState {
    pub fn new(user_email: impl Into<String>) -> Self {
        Self {
            user_email: user_email.into(),
            power_user_status: PowerUserStatus::Prospect,
            power_user_signals: PowerUserSignals::default(),
            signal_score: 0,
            capability_tiers: BTreeMap::new(),
            unlocked_capabilities: Vec::new(),
            power_user_since: None,
            last_evaluated_at: None,
        }
    }

    pub fn tier_unlocked(&self, tier: CapabilityTier) -> bool {
        self.capability_tiers
            .get(&tier)
            .is_some_and(|unlock| unlock.unlocked)
    }
}

impl UserRecord for PowerUserState {
    const COLLECTION: &'static str = "power_user_states";

    fn user_email(&self) -> &str {
        &self.user_email
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationState {
    pub user_email: String,
    #[serde(default)]
    pub activation_path: Option<String>,
    #[serde(default)]
    pub activated: bool,
    #[serde(default)]
    pub activated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_milestones: Vec<String>,
}

impl UserRecord for ActivationState {
    const COLLECTION: &'static str = "activation_states";

    fn user_email(&self) -> &str {
        &self.user_email
    }
}
