//! Power-user scoring and capability tiers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::domain::{
    records::{PowerUserSignals, PowerUserState, PowerUserStatus, RetentionState, TierUnlock},
    rules::{CapabilityTier, EngineRules, LoopId, PowerSignal},
};

const GOALS_ADJUSTED_COUNTER: &str = "goals_adjusted_in_loop";
const COMMUNITY_VIEWS_COUNTER: &str = "community_views_in_loop";
const EXPERTS_FOLLOWED_COUNTER: &str = "experts_followed_in_loop";
const MINUTES_PER_HOUR: f64 = 60.0;

/// Raw counts read from the collaborator collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct UsageCounts {
    pub bookmarks: u64,
    pub analytics_views: u64,
    pub portfolio_goals: u64,
    pub community_memberships: u64,
}

/// Folds collaborator counts and retention activity into power-user signals.
///
/// Goal and membership collections only prove presence, so they count as at
/// most one; the habit-loop counters carry the actual interaction volume.
pub fn derive_signals(
    usage: &UsageCounts,
    retention: Option<&RetentionState>,
    rules: &EngineRules,
) -> PowerUserSignals {
    let loop_counter = |id: LoopId, name: &str| {
        retention
            .and_then(|state| state.habit_loops.get(&id))
            .map(|state| state.counter(name))
            .unwrap_or(0)
    };

    let goals_adjusted = loop_counter(LoopId::InsightLoop, GOALS_ADJUSTED_COUNTER);
    let community_activity = loop_counter(LoopId::SocialProofLoop, COMMUNITY_VIEWS_COUNTER)
        + loop_counter(LoopId::SocialProofLoop, EXPERTS_FOLLOWED_COUNTER);
    let metrics = retention.map(|state| &state.engagement_metrics);

    PowerUserSignals {
        deals_saved: usage.bookmarks,
        deals_compared: usage.analytics_views / 2,
        portfolio_goals_reviewed: usage.portfolio_goals.min(1).max(goals_adjusted),
        community_interactions: usage.community_memberships.min(1).max(community_activity),
        weekly_engagement_streak: metrics.map_or(0, |metrics| u64::from(metrics.weekly_streaks)),
        time_spent_hours: metrics.map_or(0.0, |metrics| {
            metrics.total_sessions as f64 * rules.power_user.minutes_per_session / MINUTES_PER_HOUR
        }),
    }
}

/// Weighted, saturating score in 0..=100.
pub fn signal_score(signals: &PowerUserSignals, rules: &EngineRules) -> u32 {
    let total = rules
        .power_user
        .signals
        .iter()
        .map(|entry| (signals.value(entry.signal) / entry.threshold).min(1.0) * entry.weight)
        .sum::<f64>();

    (total * 100.0).round().clamp(0.0, 100.0) as u32
}

pub fn status_for(score: u32, rules: &EngineRules) -> PowerUserStatus {
    if score >= rules.power_user.premium_score {
        PowerUserStatus::PremiumUser
    } else if score >= rules.power_user.power_user_score {
        PowerUserStatus::PowerUser
    } else {
        PowerUserStatus::Prospect
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonetizationMoment {
    ComparisonLimitNudge,
    ScenarioModelingUnlock,
    ExpertNetworkUnlock,
    CelebratoryMoment,
    HoursSavedMoment,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PowerUserOutcome {
    pub signal_score: u32,
    pub status_changed: bool,
    pub previous_status: PowerUserStatus,
    pub new_status: PowerUserStatus,
    pub tier_unlocks: Vec<CapabilityTier>,
    pub eligible_monetization_moments: Vec<MonetizationMoment>,
}

/// Re-scores `state` from fresh signals. Tiers only ever unlock, and
/// `power_user_since` is stamped on the first promotion only.
pub fn evaluate(
    state: &mut PowerUserState,
    signals: PowerUserSignals,
    rules: &EngineRules,
    now: DateTime<Utc>,
) -> PowerUserOutcome {
    let score = signal_score(&signals, rules);
    let previous_status = state.power_user_status;
    let new_status = status_for(score, rules);

    if new_status != PowerUserStatus::Prospect && state.power_user_since.is_none() {
        state.power_user_since = Some(now);
    }

    let mut tier_unlocks = Vec::new();
    for tier in &rules.power_user.tiers {
        if state.tier_unlocked(tier.tier) {
            continue;
        }
        let meets_signal = signals.value(tier.signal) >= tier.min_value;
        let meets_status = !tier.requires_power_status || new_status != PowerUserStatus::Prospect;
        if meets_signal && meets_status {
            state.capability_tiers.insert(
                tier.tier,
                TierUnlock {
                    unlocked: true,
                    unlocked_at: Some(now),
                    triggered_by: Some(tier.triggered_by.clone()),
                },
            );
            tier_unlocks.push(tier.tier);
        }
    }

    if previous_status != new_status || !tier_unlocks.is_empty() {
        info!(
            user_email = %state.user_email,
            score,
            from = ?previous_status,
            to = ?new_status,
            unlocked = ?tier_unlocks,
            "power-user evaluation changed state"
        );
    }

    let promoted = status_rank(new_status) > status_rank(previous_status);
    let eligible_monetization_moments = monetization_moments(&signals, new_status, promoted, rules);

    state.power_user_status = new_status;
    state.signal_score = score;
    state.power_user_signals = signals;
    state.unlocked_capabilities = unlocked_capabilities(state, rules);
    state.last_evaluated_at = Some(now);

    PowerUserOutcome {
        signal_score: score,
        status_changed: previous_status != new_status,
        previous_status,
        new_status,
        tier_unlocks,
        eligible_monetization_moments,
    }
}

fn status_rank(status: PowerUserStatus) -> u8 {
    match status {
        PowerUserStatus::Prospect => 0,
        PowerUserStatus::PowerUser => 1,
        PowerUserStatus::PremiumUser => 2,
    }
}

/// Capability ids of every unlocked tier, in rule order, without duplicates.
pub fn unlocked_capabilities(state: &PowerUserState, rules: &EngineRules) -> Vec<String> {
    let mut capabilities = Vec::new();
    for tier in rules
        .power_user
        .tiers
        .iter()
        .filter(|tier| state.tier_unlocked(tier.tier))
    {
        for capability in &tier.capabilities {
            if !capabilities.contains(capability) {
                capabilities.push(capability.clone());
            }
        }
    }
    capabilities
}

pub fn monetization_moments(
    signals: &PowerUserSignals,
    status: PowerUserStatus,
    promoted: bool,
    rules: &EngineRules,
) -> Vec<MonetizationMoment> {
    let tier_threshold = |tier: CapabilityTier, signal: PowerSignal| {
        rules
            .power_user
            .tiers
            .iter()
            .find(|rule| rule.tier == tier)
            .is_some_and(|rule| signals.value(signal) >= rule.min_value)
    };
    let monetization = &rules.power_user.monetization;

    let checks = [
        (
            signals.deals_compared >= monetization.comparison_limit
                && status != PowerUserStatus::PremiumUser,
            MonetizationMoment::ComparisonLimitNudge,
        ),
        (
            tier_threshold(
                CapabilityTier::PortfolioIntelligence,
                PowerSignal::PortfolioGoalsReviewed,
            ),
            MonetizationMoment::ScenarioModelingUnlock,
        ),
        (
            tier_threshold(
                CapabilityTier::NetworkAmplification,
                PowerSignal::CommunityInteractions,
            ),
            MonetizationMoment::ExpertNetworkUnlock,
        ),
        (promoted, MonetizationMoment::CelebratoryMoment),
        (
            signals.time_spent_hours >= monetization.hours_saved_min,
            MonetizationMoment::HoursSavedMoment,
        ),
    ];

    checks
        .into_iter()
        .filter(|(eligible, _)| *eligible)
        .map(|(_, moment)| moment)
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 2, 15, 0, 0).unwrap()
    }

    fn rules() -> EngineRules {
        EngineRules::embedded().expect("embedded rules should load")
    }

    fn strong_signals() -> PowerUserSignals {
        PowerUserSignals {
            deals_saved: 8,
            deals_compared: 4,
            portfolio_goals_reviewed: 3,
            community_interactions: 5,
            weekly_engagement_streak: 4,
            time_spent_hours: 6.0,
        }
    }

    #[test]
    fn saver_without_other_activity_is_a_prospect_with_discovery_tier() {
        let rules = rules();
        let mut state = PowerUserState::new("ana@example.com");
        let signals = PowerUserSignals {
            deals_saved: 6,
            ..PowerUserSignals::default()
        };

        let outcome = evaluate(&mut state, signals, &rules, now());

        assert_eq!(outcome.signal_score, 25);
        assert_eq!(outcome.new_status, PowerUserStatus::Prospect);
        assert!(!outcome.status_changed);
        assert_eq!(outcome.tier_unlocks, vec![CapabilityTier::AdvancedDiscovery]);
        assert_eq!(
            state.unlocked_capabilities,
            vec!["deal_comparison", "saved_collections", "strategy_explanation"]
        );
        assert_eq!(state.power_user_since, None);
    }

    #[test]
    fn status_bands() {
        let rules = rules();
        assert_eq!(status_for(49, &rules), PowerUserStatus::Prospect);
        assert_eq!(status_for(50, &rules), PowerUserStatus::PowerUser);
        assert_eq!(status_for(75, &rules), PowerUserStatus::PremiumUser);
    }

    #[test]
    fn status_gated_tiers_wait_for_promotion() {
        let rules = rules();
        let mut state = PowerUserState::new("ana@example.com");
        let signals = PowerUserSignals {
            portfolio_goals_reviewed: 2,
            community_interactions: 3,
            ..PowerUserSignals::default()
        };

        let outcome = evaluate(&mut state, signals, &rules, now());
        // 0.20*100 + 0.15*100 = 35
        assert_eq!(outcome.signal_score, 35);
        assert!(outcome.tier_unlocks.is_empty());
        assert!(
            outcome
                .eligible_monetization_moments
                .contains(&MonetizationMoment::ScenarioModelingUnlock)
        );
    }

    #[test]
    fn full_engagement_promotes_to_premium_and_unlocks_every_tier() {
        let rules = rules();
        let mut state = PowerUserState::new("ana@example.com");

        let outcome = evaluate(&mut state, strong_signals(), &rules, now());

        assert_eq!(outcome.signal_score, 100);
        assert_eq!(outcome.new_status, PowerUserStatus::PremiumUser);
        assert!(outcome.status_changed);
        assert_eq!(outcome.tier_unlocks.len(), 3);
        assert_eq!(state.unlocked_capabilities.len(), 9);
        assert_eq!(state.power_user_since, Some(now()));
        assert_eq!(
            outcome.eligible_monetization_moments,
            vec![
                MonetizationMoment::ScenarioModelingUnlock,
                MonetizationMoment::ExpertNetworkUnlock,
                MonetizationMoment::CelebratoryMoment,
                MonetizationMoment::HoursSavedMoment,
            ]
        );
    }

    #[test]
    fn tiers_and_power_user_since_survive_a_relapse() {
        let rules = rules();
        let mut state = PowerUserState::new("ana@example.com");
        evaluate(&mut state, strong_signals(), &rules, now());
        let first_unlock = state.capability_tiers[&CapabilityTier::NetworkAmplification].clone();

        let later = now() + Duration::days(30);
        let outcome = evaluate(&mut state, PowerUserSignals::default(), &rules, later);

        assert_eq!(outcome.new_status, PowerUserStatus::Prospect);
        assert!(outcome.tier_unlocks.is_empty());
        assert_eq!(state.power_user_since, Some(now()));
        assert!(state.tier_unlocked(CapabilityTier::AdvancedDiscovery));
        assert!(state.tier_unlocked(CapabilityTier::PortfolioIntelligence));
        assert_eq!(
            state.capability_tiers[&CapabilityTier::NetworkAmplification],
            first_unlock
        );
        assert_eq!(state.unlocked_capabilities.len(), 9);
    }

    #[test]
    fn signals_blend_presence_proxies_with_loop_counters() {
        let rules = rules();
        let mut retention = RetentionState::new("ana@example.com", now());
        retention.engagement_metrics.total_sessions = 15;
        retention.engagement_metrics.weekly_streaks = 2;
        if let Some(insight) = retention.habit_loops.get_mut(&LoopId::InsightLoop) {
            insight.counters.insert(GOALS_ADJUSTED_COUNTER.to_string(), 3);
        }
        if let Some(social) = retention.habit_loops.get_mut(&LoopId::SocialProofLoop) {
            social.counters.insert(COMMUNITY_VIEWS_COUNTER.to_string(), 1);
            social.counters.insert(EXPERTS_FOLLOWED_COUNTER.to_string(), 1);
        }
        let usage = UsageCounts {
            bookmarks: 4,
            analytics_views: 7,
            portfolio_goals: 5,
            community_memberships: 2,
        };

        let signals = derive_signals(&usage, Some(&retention), &rules);

        assert_eq!(signals.deals_saved, 4);
        assert_eq!(signals.deals_compared, 3);
        assert_eq!(signals.portfolio_goals_reviewed, 3);
        assert_eq!(signals.community_interactions, 2);
        assert_eq!(signals.weekly_engagement_streak, 2);
        assert!((signals.time_spent_hours - 2.0).abs() < 1e-9);

        let bare = derive_signals(&usage, None, &rules);
        assert_eq!(bare.portfolio_goals_reviewed, 1);
        assert_eq!(bare.community_interactions, 1);
        assert_eq!(bare.time_spent_hours, 0.0);
    }
}
