use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::dispatch::EventDispatcher;
use crate::error::Result;
use crate::platform::RepositoryResolver;
use crate::webhook::EventNormalizer;

pub struct AppState {
    pub config: AppConfig,
    pub normalizer: EventNormalizer,
    pub dispatcher: EventDispatcher,
    pub resolver: Arc<dyn RepositoryResolver>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        dispatcher: EventDispatcher,
        resolver: Arc<dyn RepositoryResolver>,
    ) -> Result<Self> {
        let normalizer = EventNormalizer::new(&config.github)?;
        Ok(Self {
            config,
            normalizer,
            dispatcher,
            resolver,
        })
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhooks/github", post(crate::webhook::handler::handle_webhook))
        .route("/api/review", post(crate::api::handle_review))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}
