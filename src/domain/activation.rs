//! Activation tracking: path choice and milestone completion.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::domain::{errors::DomainError, records::ActivationState, rules::EngineRules};

impl ActivationState {
    pub fn new(user_email: impl Into<String>) -> Self {
        Self {
            user_email: user_email.into(),
            activation_path: None,
            activated: false,
            activated_at: None,
            started_at: None,
            completed_milestones: Vec::new(),
        }
    }
}

/// Chooses (or switches) the activation path.
///
/// Completed milestones carry over, so switching to a path whose
/// requirements are already met activates immediately. An activated user
/// stays activated with the original `activated_at`.
pub fn start(
    state: &mut ActivationState,
    path_id: &str,
    rules: &EngineRules,
    now: DateTime<Utc>,
) -> Result<(), DomainError> {
    if rules.activation_path(path_id).is_none() {
        return Err(DomainError::validation(format!(
            "unknown activation path '{path_id}'"
        )));
    }

    state.activation_path = Some(path_id.to_string());
    if !state.activated {
        state.started_at = Some(now);
    }
    settle(state, rules, now);
    Ok(())
}

/// Records a milestone. Repeats are accepted and change nothing.
pub fn complete_milestone(
    state: &mut ActivationState,
    milestone_id: &str,
    rules: &EngineRules,
    now: DateTime<Utc>,
) -> Result<(), DomainError> {
    if !rules
        .activation
        .milestones
        .iter()
        .any(|milestone| milestone.id == milestone_id)
    {
        return Err(DomainError::validation(format!(
            "unknown milestone '{milestone_id}'"
        )));
    }

    if !state
        .completed_milestones
        .iter()
        .any(|done| done == milestone_id)
    {
        state.completed_milestones.push(milestone_id.to_string());
    }
    settle(state, rules, now);
    Ok(())
}

/// Milestones of the chosen path that are still open.
pub fn remaining_milestones<'a>(state: &ActivationState, rules: &'a EngineRules) -> Vec<&'a str> {
    state
        .activation_path
        .as_deref()
        .and_then(|id| rules.activation_path(id))
        .map(|path| {
            path.required_milestones
                .iter()
                .filter(|required| !state.completed_milestones.contains(required))
                .map(String::as_str)
                .collect()
        })
        .unwrap_or_default()
}

fn settle(state: &mut ActivationState, rules: &EngineRules, now: DateTime<Utc>) {
    if state.activated || state.activation_path.is_none() {
        return;
    }
    if remaining_milestones(state, rules).is_empty() {
        state.activated = true;
        state.activated_at = Some(now);
        info!(
            user_email = %state.user_email,
            path = state.activation_path.as_deref().unwrap_or_default(),
            "user activated"
        );
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()
    }

    fn rules() -> EngineRules {
        EngineRules::embedded().expect("embedded rules should load")
    }

    #[test]
    fn completing_required_milestones_activates_once() {
        let rules = rules();
        let mut state = ActivationState::new("ana@example.com");
        start(&mut state, "deal_first", &rules, now()).expect("known path");

        complete_milestone(&mut state, "first_deal_viewed", &rules, now()).expect("known");
        assert!(!state.activated);
        assert_eq!(remaining_milestones(&state, &rules), vec!["first_deal_saved"]);

        let activated_at = now() + Duration::hours(2);
        complete_milestone(&mut state, "first_deal_saved", &rules, activated_at).expect("known");
        assert!(state.activated);
        assert_eq!(state.activated_at, Some(activated_at));

        complete_milestone(&mut state, "goal_created", &rules, now() + Duration::days(1))
            .expect("known");
        start(&mut state, "portfolio_first", &rules, now() + Duration::days(2)).expect("known");
        assert_eq!(state.activated_at, Some(activated_at));
        assert_eq!(state.started_at, Some(now()));
    }

    #[test]
    fn milestones_done_before_choosing_a_path_count() {
        let rules = rules();
        let mut state = ActivationState::new("ana@example.com");
        complete_milestone(&mut state, "community_joined", &rules, now()).expect("known");
        complete_milestone(&mut state, "expert_followed", &rules, now()).expect("known");
        complete_milestone(&mut state, "expert_followed", &rules, now()).expect("repeat is fine");
        assert!(!state.activated);
        assert_eq!(state.completed_milestones.len(), 2);

        start(&mut state, "community_first", &rules, now()).expect("known path");
        assert!(state.activated);
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let rules = rules();
        let mut state = ActivationState::new("ana@example.com");

        let err = start(&mut state, "shortcut", &rules, now()).expect_err("unknown path");
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(state.activation_path, None);

        let err =
            complete_milestone(&mut state, "won_lottery", &rules, now()).expect_err("unknown id");
        assert!(err.to_string().contains("won_lottery"));
        assert!(state.completed_milestones.is_empty());
    }
}
