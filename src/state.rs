use axum::http::HeaderName;

use crate::application::engine_service::EngineService;

#[derive(Clone)]
pub struct AppState {
    pub engine: EngineService,
    pub identity_header: HeaderName,
}

impl AppState {
    pub fn new(engine: EngineService, identity_header: HeaderName) -> Self {
        Self {
            engine,
            identity_header,
        }
    }
}
