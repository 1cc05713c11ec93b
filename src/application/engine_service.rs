use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    application::dto::{
        ActivationResponse, ChurnDetectionResponse, CompleteMilestoneRequest,
        HabitLoopTriggerResponse, LifecycleEvaluationResponse, NextNudgeResponse, NudgeRecordedResponse,
        NudgeView, PowerUserEvaluationResponse, RetentionProgressResponse, SessionRecordedResponse,
        StartActivationRequest, TriggerHabitLoopRequest,
    },
    clock::Clock,
    domain::{
        activation, churn,
        engagement::{self, NudgeResponse},
        errors::DomainError,
        habit_loops::{self, TriggerOutcome},
        lifecycle,
        power_user::{self, UsageCounts},
        records::{ActivationState, LifecycleState, PowerUserState, RetentionState, UserRecord},
        rules::EngineRules,
        signals::{self, Collected, SourceFailure, SourceRecords},
    },
    infrastructure::{StateRepository, collections},
};

/// Entry point for every engine operation. Each call reads what it needs
/// concurrently, evaluates in memory and ends with at most one upsert per
/// record it owns.
#[derive(Clone)]
pub struct EngineService {
    repository: StateRepository,
    rules: Arc<EngineRules>,
    clock: Arc<dyn Clock>,
}

impl EngineService {
    pub fn new(repository: StateRepository, rules: Arc<EngineRules>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repository,
            rules,
            clock,
        }
    }

    pub async fn evaluate_lifecycle(
        &self,
        user_email: &str,
    ) -> Result<LifecycleEvaluationResponse, DomainError> {
        let now = self.clock.now();
        let (current, sources) = futures::join!(
            self.repository.load::<LifecycleState>(user_email),
            self.load_sources(user_email),
        );
        let mut state = current?.unwrap_or_else(|| LifecycleState::new(user_email, now));
        let (sources, degraded_sources) = sources.into_parts();

        let signals = signals::aggregate(&sources, &self.rules, now);
        let outcome = lifecycle::evaluate(&mut state, &sources, signals, &self.rules, now);
        self.persist_unless_degraded(&state, &degraded_sources).await?;

        Ok(LifecycleEvaluationResponse::new(state, outcome, degraded_sources))
    }

    pub async fn detect_churn(&self, user_email: &str) -> Result<ChurnDetectionResponse, DomainError> {
        let now = self.clock.now();
        let (current, sources) = futures::join!(
            self.repository.load::<LifecycleState>(user_email),
            self.load_sources(user_email),
        );
        let mut state = current?.unwrap_or_else(|| LifecycleState::new(user_email, now));
        let (sources, degraded_sources) = sources.into_parts();

        let signals = signals::aggregate(&sources, &self.rules, now);
        let assessment = churn::assess(
            &signals,
            sources.retention.as_ref(),
            state.churn_risk.as_ref(),
            &self.rules,
            now,
        );
        churn::record(&mut state, &assessment, now);
        self.persist_unless_degraded(&state, &degraded_sources).await?;

        debug!(
            user_email,
            score = assessment.score,
            trend = ?assessment.trend,
            "churn risk recorded"
        );
        Ok(ChurnDetectionResponse::new(assessment, degraded_sources))
    }

    pub async fn retention_progress(
        &self,
        user_email: &str,
    ) -> Result<RetentionProgressResponse, DomainError> {
        let now = self.clock.now();
        let (retention, activation) = futures::join!(
            self.repository.load::<RetentionState>(user_email),
            self.repository.load::<ActivationState>(user_email),
        );
        let Some(retention) = retention? else {
            return Err(DomainError::not_found(format!(
                "no retention record for {user_email}"
            )));
        };
        let mut degraded_sources = Vec::new();
        let activation = degrade(
            user_email,
            ActivationState::COLLECTION,
            activation,
            &mut degraded_sources,
        );

        let progress = habit_loops::progress(&retention, activation.as_ref(), &self.rules, now);
        Ok(RetentionProgressResponse::new(progress, degraded_sources))
    }

    pub async fn evaluate_power_user(
        &self,
        user_email: &str,
    ) -> Result<PowerUserEvaluationResponse, DomainError> {
        let now = self.clock.now();
        let (current, usage) = futures::join!(
            self.repository.load::<PowerUserState>(user_email),
            self.collect_usage(user_email),
        );
        let mut state = current?.unwrap_or_else(|| PowerUserState::new(user_email));
        let ((usage, retention), degraded_sources) = usage.into_parts();

        let signals = power_user::derive_signals(&usage, retention.as_ref(), &self.rules);
        let outcome = power_user::evaluate(&mut state, signals, &self.rules, now);
        self.persist_unless_degraded(&state, &degraded_sources).await?;

        Ok(PowerUserEvaluationResponse::new(state, outcome, degraded_sources))
    }

    pub async fn trigger_habit_loop(
        &self,
        user_email: &str,
        request: TriggerHabitLoopRequest,
    ) -> Result<HabitLoopTriggerResponse, DomainError> {
        request.validate()?;
        let now = self.clock.now();

        let mut retention = self
            .repository
            .load::<RetentionState>(user_email)
            .await?
            .unwrap_or_else(|| RetentionState::new(user_email, now));

        let outcome = habit_loops::trigger(
            &mut retention,
            request.trigger_action.trim(),
            &request.metadata,
            &self.rules,
            now,
        );
        if let TriggerOutcome::Triggered(content) = &outcome {
            self.repository.upsert(&retention).await?;
            debug!(
                user_email,
                loop_id = content.loop_id.as_str(),
                trigger_count = content.trigger_count,
                "habit loop triggered"
            );
        }

        Ok(HabitLoopTriggerResponse::from(outcome))
    }

    pub async fn record_session(&self, user_email: &str) -> Result<SessionRecordedResponse, DomainError> {
        let now = self.clock.now();
        let mut retention = self
            .repository
            .load::<RetentionState>(user_email)
            .await?
            .unwrap_or_else(|| RetentionState::new(user_email, now));

        engagement::record_session(&mut retention, now);
        self.repository.upsert(&retention).await?;

        Ok(SessionRecordedResponse {
            success: true,
            engagement_metrics: retention.engagement_metrics,
        })
    }

    pub async fn next_nudge(&self, user_email: &str) -> Result<NextNudgeResponse, DomainError> {
        let now = self.clock.now();
        let retention = self.repository.load::<RetentionState>(user_email).await?;

        let nudge = engagement::next_nudge(retention.as_ref(), &self.rules, now).map(NudgeView::from);
        Ok(NextNudgeResponse {
            success: true,
            nudge,
        })
    }

    pub async fn record_nudge(
        &self,
        user_email: &str,
        nudge_id: &str,
        response: NudgeResponse,
    ) -> Result<NudgeRecordedResponse, DomainError> {
        let now = self.clock.now();
        let mut retention = self
            .repository
            .load::<RetentionState>(user_email)
            .await?
            .unwrap_or_else(|| RetentionState::new(user_email, now));

        engagement::record_nudge(&mut retention, &self.rules, nudge_id, response, now)?;
        self.repository.upsert(&retention).await?;

        Ok(NudgeRecordedResponse {
            success: true,
            nudge_id: nudge_id.to_string(),
            response,
        })
    }

    pub async fn start_activation(
        &self,
        user_email: &str,
        request: StartActivationRequest,
    ) -> Result<ActivationResponse, DomainError> {
        request.validate()?;
        let now = self.clock.now();
        let mut state = self.load_activation(user_email).await?;

        activation::start(&mut state, request.activation_path.trim(), &self.rules, now)?;
        self.repository.upsert(&state).await?;

        Ok(self.activation_response(state))
    }

    pub async fn complete_milestone(
        &self,
        user_email: &str,
        request: CompleteMilestoneRequest,
    ) -> Result<ActivationResponse, DomainError> {
        request.validate()?;
        let now = self.clock.now();
        let mut state = self.load_activation(user_email).await?;

        activation::complete_milestone(&mut state, request.milestone.trim(), &self.rules, now)?;
        self.repository.upsert(&state).await?;

        Ok(self.activation_response(state))
    }

    async fn load_activation(&self, user_email: &str) -> Result<ActivationState, DomainError> {
        Ok(self
            .repository
            .load::<ActivationState>(user_email)
            .await?
            .unwrap_or_else(|| ActivationState::new(user_email)))
    }

    fn activation_response(&self, state: ActivationState) -> ActivationResponse {
        let remaining_milestones = activation::remaining_milestones(&state, &self.rules)
            .into_iter()
            .map(str::to_string)
            .collect();
        ActivationResponse {
            success: true,
            activation: state,
            remaining_milestones,
        }
    }

    /// An evaluation built on a partial read is returned but not stored, so
    /// a transient read failure never leaves a transition in the history.
    async fn persist_unless_degraded<R: UserRecord>(
        &self,
        record: &R,
        degraded_sources: &[SourceFailure],
    ) -> Result<(), DomainError> {
        if degraded_sources.is_empty() {
            return self.repository.upsert(record).await;
        }
        warn!(
            user_email = record.user_email(),
            collection = R::COLLECTION,
            degraded = degraded_sources.len(),
            "degraded evaluation not persisted"
        );
        Ok(())
    }

    /// The three raw records behind the engagement signals. A failed read
    /// counts as an absent record.
    async fn load_sources(&self, user_email: &str) -> Collected<SourceRecords> {
        let (activation, retention, power_user) = futures::join!(
            self.repository.load::<ActivationState>(user_email),
            self.repository.load::<RetentionState>(user_email),
            self.repository.load::<PowerUserState>(user_email),
        );

        let mut failures = Vec::new();
        let records = SourceRecords {
            activation: degrade(user_email, ActivationState::COLLECTION, activation, &mut failures),
            retention: degrade(user_email, RetentionState::COLLECTION, retention, &mut failures),
            power_user: degrade(user_email, PowerUserState::COLLECTION, power_user, &mut failures),
        };
        Collected::from_parts(records, failures)
    }

    /// Collaborator counts plus the retention record. Failed counts read as 0.
    async fn collect_usage(
        &self,
        user_email: &str,
    ) -> Collected<(UsageCounts, Option<RetentionState>)> {
        let (bookmarks, analytics_views, portfolio_goals, community_memberships, retention) = futures::join!(
            self.repository.count(collections::DEAL_BOOKMARKS, user_email),
            self.repository.count(collections::ANALYTICS_EVENTS, user_email),
            self.repository.count(collections::PORTFOLIO_GOALS, user_email),
            self.repository.count(collections::COMMUNITY_MEMBERSHIPS, user_email),
            self.repository.load::<RetentionState>(user_email),
        );

        let mut failures = Vec::new();
        let usage = UsageCounts {
            bookmarks: degrade(user_email, collections::DEAL_BOOKMARKS, bookmarks, &mut failures),
            analytics_views: degrade(
                user_email,
                collections::ANALYTICS_EVENTS,
                analytics_views,
                &mut failures,
            ),
            portfolio_goals: degrade(
                user_email,
                collections::PORTFOLIO_GOALS,
                portfolio_goals,
                &mut failures,
            ),
            community_memberships: degrade(
                user_email,
                collections::COMMUNITY_MEMBERSHIPS,
                community_memberships,
                &mut failures,
            ),
        };
        let retention = degrade(user_email, RetentionState::COLLECTION, retention, &mut failures);

        Collected::from_parts((usage, retention), failures)
    }
}

fn degrade<T: Default>(
    user_email: &str,
    source: &str,
    result: Result<T, DomainError>,
    failures: &mut Vec<SourceFailure>,
) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            warn!(user_email, source, error = %err, "source read failed, using neutral default");
            failures.push(SourceFailure {
                source: source.to_string(),
                reason: err.to_string(),
            });
            T::default()
        }
    }
}
