//! HTTP surface of the overlay server.
//!
//! | Path | Description |
//! |------|-------------|
//! | `GET /` | Overlay page for a browser source |
//! | `GET /events` | SSE feed: `on` / `off` |
//! | `GET /api/state` | Current playback session |
//! | `GET /api/ping` | Liveness |
//! | `POST /api/ended` | Renderer reports natural end |
//! | `POST /api/command` | Process-facing command boundary |

use std::convert::Infallible;
use std::sync::Arc;

use async_stream::stream;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::Stream;
use raidclip_common::models::PlaybackSession;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::{page, OverlayCommand, OverlayServer, PingReply};
use crate::commands::{CommandHandler, CommandResponse, EngineCommand};

#[derive(Clone)]
pub struct OverlayRoutesState {
    overlay: OverlayServer,
    commands: Option<Arc<dyn CommandHandler>>,
    cancel: CancellationToken,
}

pub fn router(
    overlay: OverlayServer,
    commands: Option<Arc<dyn CommandHandler>>,
    cancel: CancellationToken,
) -> Router {
    let state = OverlayRoutesState { overlay, commands, cancel };
    Router::new()
        .route("/", get(overlay_page))
        .route("/events", get(overlay_events))
        .route("/api/state", get(playback_state))
        .route("/api/ping", get(ping))
        .route("/api/ended", post(clip_ended))
        .route("/api/command", post(command))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Payload of an `on` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StartPayload {
    pub session: u64,
    pub src: String,
    pub width: u32,
    pub height: u32,
    pub duration: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StateReply {
    pub playing: bool,
    pub session: Option<PlaybackSession>,
}

#[derive(Debug, Deserialize)]
pub struct EndedRequest {
    pub src: String,
    #[serde(default)]
    pub session: Option<u64>,
}

async fn overlay_page(State(state): State<OverlayRoutesState>) -> Html<String> {
    let cfg = state.overlay.config().current();
    Html(page::render(cfg.clip_player_width, cfg.clip_player_height))
}

async fn overlay_events(
    State(state): State<OverlayRoutesState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let overlay = state.overlay.clone();
    let cancel = state.cancel.clone();

    let stream = stream! {
        let _guard = overlay.register_renderer();
        let (snapshot, mut rx) = overlay.subscribe();
        if let Some(cmd) = snapshot {
            yield Ok(to_event(&overlay, &cmd));
        }

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = rx.recv() => next,
            };
            match next {
                Ok(cmd) => yield Ok(to_event(&overlay, &cmd)),
                Err(RecvError::Lagged(n)) => {
                    warn!("[Overlay] Renderer lagged by {} commands, resyncing", n);
                    let (snapshot, fresh) = overlay.subscribe();
                    rx = fresh;
                    yield Ok(Event::default().event("off").data("{}"));
                    if let Some(cmd) = snapshot {
                        yield Ok(to_event(&overlay, &cmd));
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_event(overlay: &OverlayServer, cmd: &OverlayCommand) -> Event {
    match cmd {
        OverlayCommand::Start { id, session } => {
            let cfg = overlay.config().current();
            let payload = StartPayload {
                session: *id,
                src: session.url.clone(),
                width: cfg.clip_player_width,
                height: cfg.clip_player_height,
                duration: session.duration_cap,
            };
            let data = serde_json::to_string(&payload).unwrap_or_else(|_| "{}".to_string());
            Event::default().event("on").data(data)
        }
        OverlayCommand::Stop { id } => Event::default().event("off").data(format!("{{\"session\":{}}}", id)),
    }
}

async fn playback_state(State(state): State<OverlayRoutesState>) -> Json<StateReply> {
    let session = state.overlay.current();
    Json(StateReply {
        playing: session.is_some(),
        session,
    })
}

async fn ping(State(state): State<OverlayRoutesState>) -> Json<PingReply> {
    Json(state.overlay.ping())
}

async fn clip_ended(State(state): State<OverlayRoutesState>, Json(req): Json<EndedRequest>) -> StatusCode {
    state.overlay.renderer_ended(&req.src, req.session);
    StatusCode::NO_CONTENT
}

async fn command(State(state): State<OverlayRoutesState>, Json(cmd): Json<EngineCommand>) -> Response {
    let Some(handler) = state.commands.clone() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(CommandResponse::error("engine", "no command handler attached")),
        )
            .into_response();
    };

    info!("[Overlay] Command: {}", cmd.name());
    match handler.handle(cmd).await {
        Ok(reply) => (StatusCode::OK, Json(CommandResponse::Ok { reply })).into_response(),
        Err(e) => {
            warn!("[Overlay] Command failed: {}", e);
            let status = match e.kind() {
                "unsupported" => StatusCode::NOT_IMPLEMENTED,
                "playback" | "config" => StatusCode::BAD_REQUEST,
                _ => StatusCode::UNPROCESSABLE_ENTITY,
            };
            (status, Json(CommandResponse::from_error(&e))).into_response()
        }
    }
}
