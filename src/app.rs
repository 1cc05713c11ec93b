use axum::{
    Router,
    http::{HeaderName, Method},
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::{
    interface::http::handlers::{
        complete_milestone, detect_churn, evaluate_lifecycle, evaluate_power_user, healthcheck,
        next_nudge, nudge_dismissed, nudge_shown, record_session, retention_progress,
        start_activation, trigger_habit_loop,
    },
    state::AppState,
};

pub fn build_router(state: AppState) -> Router {
    let request_id_header = HeaderName::from_static("x-request-id");

    Router::new()
        .route("/health", get(healthcheck))
        .route("/api/v1/lifecycle/evaluate", post(evaluate_lifecycle))
        .route("/api/v1/churn/detect", post(detect_churn))
        .route("/api/v1/retention/progress", get(retention_progress))
        .route("/api/v1/retention/sessions", post(record_session))
        .route("/api/v1/retention/nudges/next", get(next_nudge))
        .route("/api/v1/retention/nudges/{id}/shown", post(nudge_shown))
        .route("/api/v1/retention/nudges/{id}/dismissed", post(nudge_dismissed))
        .route("/api/v1/power-user/evaluate", post(evaluate_power_user))
        .route("/api/v1/habit-loops/trigger", post(trigger_habit_loop))
        .route("/api/v1/activation/start", post(start_activation))
        .route("/api/v1/activation/milestones", post(complete_milestone))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS]),
        )
        .with_state(state)
}
