use axum::{extract::FromRequestParts, http::request::Parts};

use crate::{domain::errors::DomainError, interface::http::problem::ApiProblem, state::AppState};

/// Caller identity asserted by the upstream gateway in the configured header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub email: String,
}

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = ApiProblem;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = &state.identity_header;
        let email = parts
            .headers
            .get(header)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_lowercase())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                ApiProblem::from_domain(DomainError::unauthorized(format!(
                    "missing or blank {header} header"
                )))
            })?;

        Ok(Self { email })
    }
}
