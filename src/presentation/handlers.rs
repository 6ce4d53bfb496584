// HTTP request handlers
use crate::application::panel_handle::PanelError;
use crate::domain::panel_view::PanelView;
use crate::presentation::app_state::AppState;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse, Response, Sse,
        sse::{Event, KeepAlive},
    },
};
use serde::Deserialize;
use std::sync::Arc;
use tokio_stream::{Stream, StreamExt, wrappers::WatchStream};

#[derive(Deserialize)]
pub struct TopicSelection {
    pub topic: Option<String>,
}

#[derive(Deserialize)]
pub struct WindowSelection {
    pub minutes: u32,
}

impl IntoResponse for PanelError {
    fn into_response(self) -> Response {
        let status = match self {
            PanelError::Detached => StatusCode::SERVICE_UNAVAILABLE,
            PanelError::InvalidTimeWindow(_) => StatusCode::BAD_REQUEST,
        };
        (status, self.to_string()).into_response()
    }
}

/// Health check endpoint, unavailable once the controller has detached
pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, &'static str) {
    if state.panel.is_detached() {
        (StatusCode::SERVICE_UNAVAILABLE, "detached")
    } else {
        (StatusCode::OK, "ok")
    }
}

/// Current panel projection
pub async fn get_panel(State(state): State<Arc<AppState>>) -> Json<PanelView> {
    Json(state.panel.view())
}

/// Stream the projection on every change, starting with the current value.
pub async fn panel_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let stream = WatchStream::new(state.panel.subscribe())
        .map(|view| Event::default().event("panel").json_data(&view));

    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub async fn select_topic(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TopicSelection>,
) -> Result<StatusCode, PanelError> {
    state.panel.select_topic(body.topic).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn change_time_window(
    State(state): State<Arc<AppState>>,
    Json(body): Json<WindowSelection>,
) -> Result<StatusCode, PanelError> {
    state.panel.change_time_window(body.minutes).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn refresh_panel(State(state): State<Arc<AppState>>) -> Result<StatusCode, PanelError> {
    state.panel.refresh().await?;
    Ok(StatusCode::ACCEPTED)
}
