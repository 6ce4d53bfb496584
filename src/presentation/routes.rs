// Router for the panel API
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    change_time_window, get_panel, health_check, panel_events, refresh_panel, select_topic,
};
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/panel", get(get_panel))
        .route("/panel/events", get(panel_events))
        .route("/panel/topic", post(select_topic))
        .route("/panel/window", post(change_time_window))
        .route("/panel/refresh", post(refresh_panel))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
