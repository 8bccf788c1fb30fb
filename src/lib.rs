use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use tower_http::catch_panic::CatchPanicLayer;

pub mod auth;
pub mod config;
pub mod errors;
pub mod http;
pub mod journal;
pub mod logging;
pub mod services;

use auth::Credentials;
use journal::JournalSettings;
use services::ServiceCatalog;

#[derive(Clone)]
pub struct AppState {
    pub credentials: Option<Arc<Credentials>>,
    pub catalog: Arc<dyn ServiceCatalog>,
    pub journal: Arc<JournalSettings>,
}

impl AppState {
    pub fn new(
        credentials: Option<Credentials>,
        catalog: Arc<dyn ServiceCatalog>,
        journal: JournalSettings,
    ) -> Self {
        Self {
            credentials: credentials.map(Arc::new),
            catalog,
            journal: Arc::new(journal),
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/", get(http::handlers::index))
        .route("/index.html", get(http::handlers::index))
        .route("/list-services", get(http::handlers::list_services))
        .route("/ws", get(http::handlers::stream_logs))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_basic_auth,
        ));

    Router::new()
        .route("/health", get(http::handlers::health))
        .merge(protected)
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .layer(CatchPanicLayer::new())
        .with_state(state)
}
