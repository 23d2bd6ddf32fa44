//! HTTP handlers for the tether server.
//!
//! One router serves the WebSocket upgrade, a health probe, and the polling
//! reads and voice moderation routes for clients that are not on a socket.

use crate::auth::{bearer_token, AuthUser, JwtAuthenticator};
use crate::config::Config;
use crate::metrics;
use crate::session::{self, SessionSettings};
use anyhow::{Context, Result};
use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{
    Authenticator, Backends, Clock, CollaboratorError, Collaborators, MemoryDirectory, Realtime,
    SystemClock, UserId, VoiceError,
};
use tether_transport::WebSocketConnection;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The realtime core.
    pub core: Arc<Realtime>,
    /// Server configuration.
    pub config: Config,
    pub authenticator: Arc<dyn Authenticator>,
    session: SessionSettings,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config, core: Arc<Realtime>, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            core,
            session: SessionSettings::from_config(&config),
            config,
            authenticator,
        }
    }
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let ws_path = state.config.transport.websocket_path.clone();

    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/presence/:user_id", get(presence_handler))
        .route("/channels/:channel_id/typing", get(typing_handler))
        .route("/voice/me", get(my_voice_handler))
        .route("/voice/channels/:channel_id/states", get(voice_states_handler))
        .route(
            "/voice/channels/:channel_id/mute/:user_id",
            post(server_mute_handler),
        )
        .with_state(state)
}

/// Run the HTTP/WebSocket server until Ctrl-C.
///
/// Runs single-node: in-memory shared backends and an open directory.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let core = Arc::new(
        Realtime::start(
            config.hub_config(),
            Backends::in_memory(clock.clone()),
            Collaborators::from_directory(Arc::new(MemoryDirectory::open())),
            clock,
        )
        .await,
    );
    let authenticator = Arc::new(JwtAuthenticator::new(&config.auth.jwt_secret));
    let state = Arc::new(AppState::new(config.clone(), Arc::clone(&core), authenticator));

    let background = CancellationToken::new();
    if config.metrics.enabled {
        match metrics::start_metrics_server(config.metrics.port) {
            Ok(()) => {
                tokio::spawn(metrics::sample_hub(
                    core.hub().clone(),
                    Duration::from_secs(5),
                    background.clone(),
                ));
            }
            Err(e) => error!("Failed to start metrics server: {}", e),
        }
    }

    let app = build_router(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("tether listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    background.cancel();
    core.shutdown().await;
    info!("tether stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.core.hub().stats();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "instance": state.core.instance_id().to_string(),
        "connections": stats.connections,
        "users": stats.users,
        "channels": stats.channels,
        "subscriptions": stats.subscriptions,
        "droppedMessages": stats.dropped_messages,
    }))
}

/// WebSocket upgrade handler. The token comes from `?token=` or the
/// `Authorization` header.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let token = params
        .get("token")
        .map(String::as_str)
        .filter(|token| !token.is_empty())
        .or_else(|| bearer_token(&headers))
        .unwrap_or_default();

    let user_id = match state.authenticator.authenticate(token) {
        Ok(user_id) => user_id,
        Err(e) => {
            debug!(error = %e, "Rejected upgrade");
            metrics::record_error("auth");
            return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        }
    };

    let core = Arc::clone(&state.core);
    let settings = state.session.clone();
    // Oversized frames are refused while reading rather than after buffering
    ws.max_message_size(settings.max_frame_size)
        .max_frame_size(settings.max_frame_size)
        .on_upgrade(move |socket| {
            let conn = WebSocketConnection::new(socket, settings.max_frame_size);
            session::run(conn, user_id, core, settings)
        })
}

fn parse_user_id(raw: &str) -> Result<UserId, Response> {
    raw.parse()
        .map_err(|_| (StatusCode::BAD_REQUEST, "Invalid user ID").into_response())
}

fn voice_error_response(e: VoiceError) -> Response {
    let status = match &e {
        VoiceError::NotVoiceChannel => StatusCode::BAD_REQUEST,
        VoiceError::Forbidden => StatusCode::FORBIDDEN,
        VoiceError::NotInChannel | VoiceError::Collaborator(CollaboratorError::NotFound(_)) => {
            StatusCode::NOT_FOUND
        }
        _ => {
            error!(error = %e, "Voice request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(json!({ "error": e.to_string() }))).into_response()
}

async fn presence_handler(
    _caller: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Response {
    let user_id = match parse_user_id(&user_id) {
        Ok(user_id) => user_id,
        Err(response) => return response,
    };

    let status = state.core.presence().get_presence(user_id).await;
    Json(json!({
        "userId": user_id.to_string(),
        "status": status,
        "online": state.core.hub().is_online(user_id),
    }))
    .into_response()
}

async fn typing_handler(
    _caller: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<String>,
) -> impl IntoResponse {
    let users: Vec<String> = state
        .core
        .presence()
        .get_typing_users(&channel_id)
        .await
        .iter()
        .map(ToString::to_string)
        .collect();
    Json(json!({
        "channelId": channel_id,
        "users": users,
    }))
}

async fn my_voice_handler(AuthUser(user_id): AuthUser, State(state): State<Arc<AppState>>) -> Response {
    match state.core.voice().current_session(user_id).await {
        Ok(session) => Json(session).into_response(),
        Err(e) => voice_error_response(e),
    }
}

async fn voice_states_handler(
    AuthUser(user_id): AuthUser,
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<String>,
) -> Response {
    match state.core.access().can_access_channel(&channel_id, user_id).await {
        Ok(true) => {}
        Ok(false) => return voice_error_response(VoiceError::Forbidden),
        Err(e) => return voice_error_response(e.into()),
    }

    match state.core.voice().channel_participants(&channel_id).await {
        Ok(participants) => Json(participants).into_response(),
        Err(e) => voice_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct MuteRequest {
    muted: bool,
}

async fn server_mute_handler(
    AuthUser(actor): AuthUser,
    State(state): State<Arc<AppState>>,
    Path((channel_id, target)): Path<(String, String)>,
    Json(body): Json<MuteRequest>,
) -> Response {
    let target = match parse_user_id(&target) {
        Ok(target) => target,
        Err(response) => return response,
    };

    match state
        .core
        .voice()
        .server_mute(actor, target, &channel_id, body.muted)
        .await
    {
        Ok(session) => Json(session).into_response(),
        Err(e) => {
            warn!(actor = %actor, target = %target, channel = %channel_id, error = %e, "Server mute rejected");
            voice_error_response(e)
        }
    }
}
