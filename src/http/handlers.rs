//! Axum handlers for the web server

use axum::{
    extract::{
        rejection::QueryRejection,
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        Query, State,
    },
    http::header,
    response::{Html, IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    errors::AppError,
    journal::{
        query::{build_filter_args, ScopeMode, StreamRequest},
        session,
    },
    services::{list_services as enumerate_services, render_service_list},
    AppState,
};

pub const WS_WRITE_BUFFER_SIZE: usize = 8192;

const INDEX_HTML: &str = include_str!("../../assets/index.html");

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamParams {
    pub services: Option<String>,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn list_services(State(state): State<AppState>) -> Response {
    let services = enumerate_services(
        state.catalog.as_ref(),
        state.journal.user_scope,
        state.journal.container_mode,
    )
    .await;

    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        render_service_list(&services),
    )
        .into_response()
}

pub async fn stream_logs(
    State(state): State<AppState>,
    params: Result<Query<StreamParams>, QueryRejection>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, AppError> {
    let upgrade = upgrade.map_err(|rejection| {
        debug!(error = %rejection, "rejected websocket upgrade");
        AppError::UpgradeRequired
    })?;

    let params = params.map(|Query(params)| params).unwrap_or_default();
    let request = StreamRequest::from_query(
        params.services.as_deref(),
        ScopeMode::from_user_flag(state.journal.user_scope),
        state.journal.container_mode,
    );
    let args = build_filter_args(&request);
    let settings = state.journal.clone();

    Ok(upgrade
        .write_buffer_size(WS_WRITE_BUFFER_SIZE)
        .on_upgrade(move |socket| async move {
            let (sender, receiver) = socket.split();
            session::run(sender, receiver, args, &settings).await;
        }))
}
