use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use panel_core::{
    manage::{self, summarize},
    presentation::PanelLayout,
    InMemorySelectionStore, PanelError, SelectionStore,
};
use serde::{Deserialize, Serialize};
use shared::{
    domain::{ChannelId, GuildId, MessageId, PanelConfig, PanelId, RoleId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{InteractionEvent, PanelSummary, ServerEvent},
};
use storage::Storage;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;

use app_state::AppState;
use config::{load_settings, prepare_database_url};

const SYSTEM_USERNAME: &str = "role-panels";

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

#[derive(Debug, Deserialize)]
struct UserQuery {
    user_id: i64,
}

#[derive(Debug, Deserialize)]
struct CreatePanelRequest {
    panel_id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct SetTextRequest {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SetElevatedRequest {
    required: bool,
}

#[derive(Debug, Deserialize)]
struct SetLogChannelRequest {
    #[serde(default)]
    channel_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PostPanelRequest {
    channel_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct AllowRoleResponse {
    panel: PanelConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PostPanelResponse {
    message_id: MessageId,
    layout: PanelLayout,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = load_settings()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter)),
        )
        .init();

    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let system_user_id = match settings.system_user_id {
        Some(id) => UserId(id),
        None => storage.create_user(SYSTEM_USERNAME).await?,
    };
    info!(system_user = %system_user_id, "panel service account ready");

    let selections = Arc::new(InMemorySelectionStore::new(settings.selection_ttl()));
    if settings.selection_ttl().is_some() {
        spawn_selection_sweeper(selections.clone(), settings.sweep_interval());
    }

    let state = AppState::new(storage, selections, system_user_id);
    let app = build_router(Arc::new(state), settings.max_body_bytes);

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn spawn_selection_sweeper(selections: Arc<InMemorySelectionStore>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match selections.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => debug!(purged, "expired panel selections dropped"),
                Err(error) => warn!(%error, "selection sweep failed"),
            }
        }
    });
}

fn build_router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    let panel = "/guilds/:guild_id/panels/:panel_id";
    Router::new()
        .route("/healthz", get(healthz))
        .route("/interactions", post(http_interaction))
        .route(
            "/guilds/:guild_id/panels",
            get(http_list_panels).post(http_create_panel),
        )
        .route(panel, get(http_panel_info).delete(http_delete_panel))
        .route(&format!("{panel}/text"), put(http_set_text))
        .route(&format!("{panel}/elevated"), put(http_set_elevated))
        .route(&format!("{panel}/log_channel"), put(http_set_log_channel))
        .route(&format!("{panel}/allowed_roles"), delete(http_clear_roles))
        .route(
            &format!("{panel}/allowed_roles/:role_id"),
            put(http_allow_role).delete(http_disallow_role),
        )
        .route(&format!("{panel}/staff_roles"), delete(http_clear_staff))
        .route(
            &format!("{panel}/staff_roles/:role_id"),
            put(http_allow_staff).delete(http_disallow_staff),
        )
        .route(&format!("{panel}/post"), post(http_post_panel))
        .route("/ws", get(ws_handler))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> Response {
    match state.storage.health_check().await {
        Ok(()) => "ok".into_response(),
        Err(error) => {
            error!(%error, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable").into_response()
        }
    }
}

async fn http_interaction(
    State(state): State<Arc<AppState>>,
    Json(event): Json<InteractionEvent>,
) -> Response {
    let Some(dispatched) = state.dispatcher.dispatch(&event).await else {
        return StatusCode::NO_CONTENT.into_response();
    };
    if let Some(event) = dispatched.event {
        state.publish(event);
    }
    Json(dispatched.reply).into_response()
}

async fn http_list_panels(
    State(state): State<Arc<AppState>>,
    Path(guild_id): Path<i64>,
    Query(q): Query<UserQuery>,
) -> ApiResult<Json<Vec<PanelSummary>>> {
    let panels = manage::list_panels(state.panels(), UserId(q.user_id), GuildId(guild_id))
        .await
        .map_err(reject)?;
    Ok(Json(panels))
}

async fn http_create_panel(
    State(state): State<Arc<AppState>>,
    Path(guild_id): Path<i64>,
    Query(q): Query<UserQuery>,
    Json(req): Json<CreatePanelRequest>,
) -> ApiResult<(StatusCode, Json<PanelConfig>)> {
    let panel = manage::create_panel(
        state.panels(),
        UserId(q.user_id),
        GuildId(guild_id),
        &req.panel_id,
        &req.name,
    )
    .await
    .map_err(reject)?;
    announce_update(&state, &panel);
    Ok((StatusCode::CREATED, Json(panel)))
}

async fn http_panel_info(
    State(state): State<Arc<AppState>>,
    Path((guild_id, panel_id)): Path<(i64, String)>,
    Query(q): Query<UserQuery>,
) -> ApiResult<Json<PanelConfig>> {
    let panel_id = parse_panel_id(&panel_id)?;
    let panel = manage::panel_info(
        state.panels(),
        UserId(q.user_id),
        GuildId(guild_id),
        &panel_id,
    )
    .await
    .map_err(reject)?;
    Ok(Json(panel))
}

async fn http_delete_panel(
    State(state): State<Arc<AppState>>,
    Path((guild_id, panel_id)): Path<(i64, String)>,
    Query(q): Query<UserQuery>,
) -> ApiResult<StatusCode> {
    let panel_id = parse_panel_id(&panel_id)?;
    let guild_id = GuildId(guild_id);
    manage::delete_panel(state.panels(), UserId(q.user_id), guild_id, &panel_id)
        .await
        .map_err(reject)?;
    state.publish(ServerEvent::PanelDeleted { guild_id, panel_id });
    Ok(StatusCode::NO_CONTENT)
}

async fn http_set_text(
    State(state): State<Arc<AppState>>,
    Path((guild_id, panel_id)): Path<(i64, String)>,
    Query(q): Query<UserQuery>,
    Json(req): Json<SetTextRequest>,
) -> ApiResult<Json<PanelConfig>> {
    let panel_id = parse_panel_id(&panel_id)?;
    let panel = manage::set_text(
        state.panels(),
        UserId(q.user_id),
        GuildId(guild_id),
        &panel_id,
        req.title.as_deref(),
        req.body.as_deref(),
    )
    .await
    .map_err(reject)?;
    announce_update(&state, &panel);
    Ok(Json(panel))
}

async fn http_set_elevated(
    State(state): State<Arc<AppState>>,
    Path((guild_id, panel_id)): Path<(i64, String)>,
    Query(q): Query<UserQuery>,
    Json(req): Json<SetElevatedRequest>,
) -> ApiResult<Json<PanelConfig>> {
    let panel_id = parse_panel_id(&panel_id)?;
    let panel = manage::set_elevated(
        state.panels(),
        UserId(q.user_id),
        GuildId(guild_id),
        &panel_id,
        req.required,
    )
    .await
    .map_err(reject)?;
    announce_update(&state, &panel);
    Ok(Json(panel))
}

async fn http_set_log_channel(
    State(state): State<Arc<AppState>>,
    Path((guild_id, panel_id)): Path<(i64, String)>,
    Query(q): Query<UserQuery>,
    Json(req): Json<SetLogChannelRequest>,
) -> ApiResult<Json<PanelConfig>> {
    let panel_id = parse_panel_id(&panel_id)?;
    let panel = manage::set_log_channel(
        state.panels(),
        UserId(q.user_id),
        GuildId(guild_id),
        &panel_id,
        req.channel_id.map(ChannelId),
    )
    .await
    .map_err(reject)?;
    announce_update(&state, &panel);
    Ok(Json(panel))
}

async fn http_allow_role(
    State(state): State<Arc<AppState>>,
    Path((guild_id, panel_id, role_id)): Path<(i64, String, i64)>,
    Query(q): Query<UserQuery>,
) -> ApiResult<Json<AllowRoleResponse>> {
    let panel_id = parse_panel_id(&panel_id)?;
    let update = manage::allow_role(
        state.panels(),
        UserId(q.user_id),
        GuildId(guild_id),
        &panel_id,
        RoleId(role_id),
    )
    .await
    .map_err(reject)?;
    announce_update(&state, &update.panel);
    Ok(Json(AllowRoleResponse {
        panel: update.panel,
        warning: update.warning,
    }))
}

async fn http_disallow_role(
    State(state): State<Arc<AppState>>,
    Path((guild_id, panel_id, role_id)): Path<(i64, String, i64)>,
    Query(q): Query<UserQuery>,
) -> ApiResult<Json<PanelConfig>> {
    let panel_id = parse_panel_id(&panel_id)?;
    let panel = manage::disallow_role(
        state.panels(),
        UserId(q.user_id),
        GuildId(guild_id),
        &panel_id,
        RoleId(role_id),
    )
    .await
    .map_err(reject)?;
    announce_update(&state, &panel);
    Ok(Json(panel))
}

async fn http_clear_roles(
    State(state): State<Arc<AppState>>,
    Path((guild_id, panel_id)): Path<(i64, String)>,
    Query(q): Query<UserQuery>,
) -> ApiResult<Json<PanelConfig>> {
    let panel_id = parse_panel_id(&panel_id)?;
    let panel = manage::clear_roles(
        state.panels(),
        UserId(q.user_id),
        GuildId(guild_id),
        &panel_id,
    )
    .await
    .map_err(reject)?;
    announce_update(&state, &panel);
    Ok(Json(panel))
}

async fn http_allow_staff(
    State(state): State<Arc<AppState>>,
    Path((guild_id, panel_id, role_id)): Path<(i64, String, i64)>,
    Query(q): Query<UserQuery>,
) -> ApiResult<Json<PanelConfig>> {
    let panel_id = parse_panel_id(&panel_id)?;
    let panel = manage::allow_staff(
        state.panels(),
        UserId(q.user_id),
        GuildId(guild_id),
        &panel_id,
        RoleId(role_id),
    )
    .await
    .map_err(reject)?;
    announce_update(&state, &panel);
    Ok(Json(panel))
}

async fn http_disallow_staff(
    State(state): State<Arc<AppState>>,
    Path((guild_id, panel_id, role_id)): Path<(i64, String, i64)>,
    Query(q): Query<UserQuery>,
) -> ApiResult<Json<PanelConfig>> {
    let panel_id = parse_panel_id(&panel_id)?;
    let panel = manage::disallow_staff(
        state.panels(),
        UserId(q.user_id),
        GuildId(guild_id),
        &panel_id,
        RoleId(role_id),
    )
    .await
    .map_err(reject)?;
    announce_update(&state, &panel);
    Ok(Json(panel))
}

async fn http_clear_staff(
    State(state): State<Arc<AppState>>,
    Path((guild_id, panel_id)): Path<(i64, String)>,
    Query(q): Query<UserQuery>,
) -> ApiResult<Json<PanelConfig>> {
    let panel_id = parse_panel_id(&panel_id)?;
    let panel = manage::clear_staff(
        state.panels(),
        UserId(q.user_id),
        GuildId(guild_id),
        &panel_id,
    )
    .await
    .map_err(reject)?;
    announce_update(&state, &panel);
    Ok(Json(panel))
}

async fn http_post_panel(
    State(state): State<Arc<AppState>>,
    Path((guild_id, panel_id)): Path<(i64, String)>,
    Query(q): Query<UserQuery>,
    Json(req): Json<PostPanelRequest>,
) -> ApiResult<Json<PostPanelResponse>> {
    let panel_id = parse_panel_id(&panel_id)?;
    let guild_id = GuildId(guild_id);
    let channel_id = ChannelId(req.channel_id);
    let posted = manage::post_panel(
        state.panels(),
        UserId(q.user_id),
        guild_id,
        &panel_id,
        channel_id,
    )
    .await
    .map_err(reject)?;
    state.publish(ServerEvent::MessagePosted {
        guild_id,
        channel_id,
        message_id: posted.message_id,
    });
    Ok(Json(PostPanelResponse {
        message_id: posted.message_id,
        layout: posted.layout,
    }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

async fn ws_connection(state: Arc<AppState>, socket: axum::extract::ws::WebSocket) {
    use axum::extract::ws::Message;
    use futures::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    let mut events_rx = state.events.subscribe();

    let send_task = tokio::spawn(async move {
        while let Ok(event) = events_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(_msg)) = receiver.next().await {}

    send_task.abort();
}

fn announce_update(state: &AppState, panel: &PanelConfig) {
    state.publish(ServerEvent::PanelUpdated {
        guild_id: panel.guild_id,
        panel: summarize(panel),
    });
}

// Ids outside the accepted alphabet can never have been stored.
fn parse_panel_id(raw: &str) -> ApiResult<PanelId> {
    PanelId::parse(raw.trim()).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ApiError::new(ErrorCode::NotFound, "Panel not found.")),
        )
    })
}

fn reject(err: PanelError) -> (StatusCode, Json<ApiError>) {
    if let PanelError::Internal(cause) = &err {
        error!(error = ?cause, "panel management request failed");
    }
    let status = match err.code() {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::AccessDenied | ErrorCode::HierarchyViolation => StatusCode::FORBIDDEN,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Conflict | ErrorCode::IncompleteSelection => StatusCode::CONFLICT,
        ErrorCode::Platform => StatusCode::BAD_GATEWAY,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ApiError::from(err)))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
