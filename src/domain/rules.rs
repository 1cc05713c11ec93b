//! Declarative rule tables for the engine.
//!
//! Everything tunable lives here: activation milestones and paths, lifecycle
//! thresholds, churn factor weights, habit-loop definitions and routing,
//! nudge rules, and the power-user scoring tables. The rules are loaded once
//! at process start, validated, and then handed to every evaluator as an
//! explicit immutable parameter.

use std::{collections::HashSet, fs, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const EMBEDDED_RULES: &str = include_str!("../../config/engine_rules.json");

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;
const MIN_LOOP_BOOST: f64 = 0.10;
const MAX_LOOP_BOOST: f64 = 0.15;
const LOOP_STEP_COUNT: usize = 3;
/// Upper bound for every configured window, in hours. One year.
pub const MAX_WINDOW_HOURS: i64 = 24 * 365;
const MAX_WINDOW_DAYS: i64 = MAX_WINDOW_HOURS / 24;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read rules file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("rules document is malformed: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid rules: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopId {
    DiscoveryLoop,
    InsightLoop,
    SocialProofLoop,
}

impl LoopId {
    pub const ALL: [LoopId; 3] = [
        LoopId::DiscoveryLoop,
        LoopId::InsightLoop,
        LoopId::SocialProofLoop,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DiscoveryLoop => "discovery_loop",
            Self::InsightLoop => "insight_loop",
            Self::SocialProofLoop => "social_proof_loop",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChurnFactor {
    SessionFrequencyDecline,
    ActionAbandonment,
    NudgeDismissalRate,
    HabitLoopInactivity,
    TimeSinceLastSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerSignal {
    DealsSaved,
    DealsCompared,
    PortfolioGoalsReviewed,
    CommunityInteractions,
    WeeklyEngagementStreak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityTier {
    AdvancedDiscovery,
    PortfolioIntelligence,
    NetworkAmplification,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineRules {
    pub activation: ActivationRules,
    pub lifecycle: LifecycleRules,
    pub churn: ChurnRules,
    pub habit_loops: HabitLoopRules,
    pub nudges: Vec<NudgeRule>,
    pub power_user: PowerUserRules,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationRules {
    pub abandonment_window_hours: i64,
    pub milestones: Vec<Milestone>,
    pub paths: Vec<ActivationPath>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationPath {
    pub id: String,
    pub label: String,
    pub intent: String,
    pub required_milestones: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleRules {
    /// Weekly streak count above which session frequency counts as increasing.
    pub increasing_weekly_streaks: u32,
    pub engaged_min_sessions_7d: u32,
    pub dormant_dismissal_multiplier: u32,
    /// Completed actions in 7 days that saturate intent confidence.
    pub intent_confidence_actions: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChurnRules {
    pub trend_delta: i64,
    pub factors: Vec<ChurnFactorWeight>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChurnFactorWeight {
    pub factor: ChurnFactor,
    pub weight: f64,
}

impl ChurnRules {
    pub fn weight_for(&self, factor: ChurnFactor) -> Option<f64> {
        self.factors
            .iter()
            .find(|entry| entry.factor == factor)
            .map(|entry| entry.weight)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HabitLoopRules {
    pub loops: Vec<LoopDefinition>,
    pub actions: Vec<ActionRoute>,
}

impl HabitLoopRules {
    pub fn definition(&self, id: LoopId) -> Option<&LoopDefinition> {
        self.loops.iter().find(|definition| definition.id == id)
    }

    pub fn route(&self, action: &str) -> Option<&ActionRoute> {
        self.actions.iter().find(|route| route.action == action)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopDefinition {
    pub id: LoopId,
    pub activation_path: String,
    pub cooldown_hours: i64,
    pub recency_days: i64,
    pub personalization_boost: f64,
    pub surface: String,
    pub message: String,
    pub steps: Vec<LoopStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopStep {
    pub step: u32,
    pub action: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRoute {
    pub action: String,
    pub loop_id: LoopId,
    pub counter: String,
    pub completes: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NudgeRule {
    pub id: String,
    pub loop_id: Option<LoopId>,
    pub message: String,
    pub cooldown_hours: i64,
    pub max_dismissals: u32,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerUserRules {
    pub power_user_score: u32,
    pub premium_score: u32,
    pub minutes_per_session: f64,
    pub signals: Vec<SignalWeight>,
    pub tiers: Vec<TierRule>,
    pub monetization: MonetizationRules,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalWeight {
    pub signal: PowerSignal,
    pub threshold: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierRule {
    pub tier: CapabilityTier,
    pub signal: PowerSignal,
    pub min_value: f64,
    pub requires_power_status: bool,
    pub triggered_by: String,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonetizationRules {
    pub comparison_limit: u64,
    pub hours_saved_min: f64,
}

impl EngineRules {
    /// Rules compiled into the binary.
    pub fn embedded() -> Result<Self, ConfigError> {
        Self::from_json(EMBEDDED_RULES)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let rules: Self = serde_json::from_str(raw)?;
        rules.validate()?;
        Ok(rules)
    }

    pub fn activation_path(&self, id: &str) -> Option<&ActivationPath> {
        self.activation.paths.iter().find(|path| path.id == id)
    }

    pub fn nudge(&self, id: &str) -> Option<&NudgeRule> {
        self.nudges.iter().find(|rule| rule.id == id)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_window(
            "activation abandonment window",
            self.activation.abandonment_window_hours,
            MAX_WINDOW_HOURS,
        )?;

        let milestone_ids = self
            .activation
            .milestones
            .iter()
            .map(|milestone| milestone.id.as_str())
            .collect::<HashSet<_>>();

        for path in &self.activation.paths {
            if path.required_milestones.is_empty() {
                return invalid(format!("activation path '{}' has no milestones", path.id));
            }
            if let Some(unknown) = path
                .required_milestones
                .iter()
                .find(|id| !milestone_ids.contains(id.as_str()))
            {
                return invalid(format!(
                    "activation path '{}' references unknown milestone '{unknown}'",
                    path.id
                ));
            }
        }

        for id in LoopId::ALL {
            let Some(definition) = self.habit_loops.definition(id) else {
                return invalid(format!("habit loop '{}' is not defined", id.as_str()));
            };
            if definition.steps.len() != LOOP_STEP_COUNT {
                return invalid(format!(
                    "habit loop '{}' must define exactly {LOOP_STEP_COUNT} steps",
                    id.as_str()
                ));
            }
            if !(MIN_LOOP_BOOST..=MAX_LOOP_BOOST).contains(&definition.personalization_boost) {
                return invalid(format!(
                    "habit loop '{}' boost must lie in [{MIN_LOOP_BOOST}, {MAX_LOOP_BOOST}]",
                    id.as_str()
                ));
            }
            check_window(
                &format!("habit loop '{}' cooldown", id.as_str()),
                definition.cooldown_hours,
                MAX_WINDOW_HOURS,
            )?;
            check_window(
                &format!("habit loop '{}' recency", id.as_str()),
                definition.recency_days,
                MAX_WINDOW_DAYS,
            )?;
        }

        for nudge in &self.nudges {
            check_window(
                &format!("nudge '{}' cooldown", nudge.id),
                nudge.cooldown_hours,
                MAX_WINDOW_HOURS,
            )?;
        }

        let mut seen_actions = HashSet::new();
        for route in &self.habit_loops.actions {
            if !seen_actions.insert(route.action.as_str()) {
                return invalid(format!("action '{}' is routed twice", route.action));
            }
        }

        for factor in &self.churn.factors {
            if factor.weight < 0.0 {
                return invalid(format!("churn factor {:?} has a negative weight", factor.factor));
            }
        }

        let power = &self.power_user;
        if power.signals.iter().any(|signal| signal.threshold <= 0.0) {
            return invalid("power-user signal thresholds must be positive");
        }
        let weight_sum = power.signals.iter().map(|signal| signal.weight).sum::<f64>();
        if (weight_sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return invalid(format!(
                "power-user signal weights must sum to 1.0, got {weight_sum}"
            ));
        }
        if power.power_user_score > power.premium_score || power.premium_score > 100 {
            return invalid("power-user status scores must satisfy power <= premium <= 100");
        }

        Ok(())
    }
}

fn check_window(name: &str, value: i64, max: i64) -> Result<(), ConfigError> {
    if (0..=max).contains(&value) {
        Ok(())
    } else {
        invalid(format!("{name} must lie in [0, {max}], got {value}"))
    }
}

fn invalid<T>(message: impl Into<String>) -> Result<T, ConfigError> {
    Err(ConfigError::Invalid(message.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_rules_are_valid() {
        let rules = EngineRules::embedded().expect("embedded rules should load");

        assert_eq!(rules.habit_loops.loops.len(), 3);
        assert_eq!(
            rules
                .habit_loops
                .definition(LoopId::DiscoveryLoop)
                .map(|loop_def| loop_def.cooldown_hours),
            Some(24)
        );
        assert_eq!(
            rules
                .habit_loops
                .route("expert_followed")
                .map(|route| route.loop_id),
            Some(LoopId::SocialProofLoop)
        );
        assert_eq!(rules.churn.weight_for(ChurnFactor::ActionAbandonment), Some(0.15));
    }

    #[test]
    fn weights_must_sum_to_one() {
        let mut rules = EngineRules::embedded().expect("embedded rules should load");
        rules.power_user.signals[0].weight = 0.5;

        let err = rules.validate().expect_err("weights no longer sum to 1");
        assert!(err.to_string().contains("sum to 1.0"));
    }

    #[test]
    fn loops_need_three_steps() {
        let mut rules = EngineRules::embedded().expect("embedded rules should load");
        rules.habit_loops.loops[1].steps.pop();

        assert!(matches!(rules.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn unknown_milestone_is_rejected() {
        let mut rules = EngineRules::embedded().expect("embedded rules should load");
        rules.activation.paths[0]
            .required_milestones
            .push("teleport".to_string());

        let err = rules.validate().expect_err("unknown milestone must fail");
        assert!(err.to_string().contains("teleport"));
    }

    #[test]
    fn windows_are_bounded() {
        let mut rules = EngineRules::embedded().expect("embedded rules should load");
        rules.habit_loops.loops[0].cooldown_hours = i64::MAX;
        let err = rules.validate().expect_err("huge cooldown must fail");
        assert!(err.to_string().contains("cooldown"));

        let mut rules = EngineRules::embedded().expect("embedded rules should load");
        rules.habit_loops.loops[0].recency_days = MAX_WINDOW_DAYS + 1;
        assert!(matches!(rules.validate(), Err(ConfigError::Invalid(_))));

        let mut rules = EngineRules::embedded().expect("embedded rules should load");
        rules.nudges[0].cooldown_hours = -1;
        assert!(matches!(rules.validate(), Err(ConfigError::Invalid(_))));

        let mut rules = EngineRules::embedded().expect("embedded rules should load");
        rules.activation.abandonment_window_hours = MAX_WINDOW_HOURS + 1;
        let err = rules.validate().expect_err("huge abandonment window must fail");
        assert!(err.to_string().contains("abandonment"));

        let mut rules = EngineRules::embedded().expect("embedded rules should load");
        rules.habit_loops.loops[0].cooldown_hours = MAX_WINDOW_HOURS;
        assert!(rules.validate().is_ok());
    }

    #[test]
    fn malformed_document_is_a_parse_error() {
        assert!(matches!(
            EngineRules::from_json("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
