use crate::alerts::notify::{LogSink, NotifySink, WebhookSink};
use crate::alerts::schedule::ReleaseScheduler;
use crate::alerts::Alerts;
use crate::catalog::{CatalogApi, CatalogClient};
use crate::favorites::Favorites;
use crate::media::{Alert, MediaKind};
use crate::pager::DiscoverFeed;
use crate::session::SessionStore;
use crate::store::{FileStore, KvStore};
use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::TypedHeader;
use constant_time_eq::constant_time_eq;
use headers::authorization::Bearer;
use headers::Authorization;
use serde::Deserialize;
use serde_json::json;
use std::{env, net::SocketAddr, sync::Arc};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const MAX_BODY_BYTES: usize = 64 * 1024; // request payloads are small JSON
const DEFAULT_PORT: u16 = 4117;

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<dyn CatalogApi>,
    pub session: Arc<SessionStore>,
    pub favorites: Arc<Favorites>,
    pub alerts: Arc<Alerts>,
    pub discover: Arc<DiscoverFeed>,
    pub scheduler: Arc<ReleaseScheduler>,
    pub api_token: String,
}

pub async fn run_server() -> Result<()> {
    let catalog: Arc<dyn CatalogApi> = Arc::new(CatalogClient::from_env()?);
    let session = Arc::new(SessionStore::from_env()?);
    let api_token = env::var("MARQUEE_API_TOKEN")
        .ok()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow::anyhow!("MARQUEE_API_TOKEN must be set"))?;

    let state_file =
        env::var("MARQUEE_STATE_FILE").unwrap_or_else(|_| "marquee-state.json".to_string());
    let store: Arc<dyn KvStore> = Arc::new(FileStore::open(&state_file)?);

    let notify_url = env::var("MARQUEE_NOTIFY_URL").ok().filter(|s| !s.is_empty());
    let notify_secret = env::var("MARQUEE_NOTIFY_SECRET")
        .ok()
        .filter(|s| !s.is_empty());
    let sink: Arc<dyn NotifySink> = match (notify_url, notify_secret) {
        (Some(url), Some(secret)) => {
            info!("Release notices will be POSTed to {}", url);
            Arc::new(WebhookSink::new(url, secret)?)
        }
        (Some(_), None) => {
            warn!("MARQUEE_NOTIFY_URL set without MARQUEE_NOTIFY_SECRET; using the log sink");
            Arc::new(LogSink)
        }
        _ => {
            info!("No webhook configured; release notices go to the log");
            Arc::new(LogSink)
        }
    };

    let scheduler = Arc::new(ReleaseScheduler::new(sink));
    let favorites = Arc::new(Favorites::new(Arc::clone(&catalog), Arc::clone(&session)));
    let alerts = Arc::new(Alerts::new(
        Arc::clone(&catalog),
        Arc::clone(&session),
        store,
        Arc::clone(&scheduler),
    ));
    let discover = Arc::new(DiscoverFeed::new(Arc::clone(&catalog)));

    resolve_account(&catalog, &session).await;

    let state = AppState {
        catalog,
        session,
        favorites,
        alerts,
        discover,
        scheduler,
        api_token,
    };

    bootstrap(&state);

    let app = build_router(state);

    let port = env::var("MARQUEE_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Fill in the account id from the catalog when only the session id was
/// configured. Failure is not fatal; account-scoped calls stay local until a
/// restart resolves it.
async fn resolve_account(catalog: &Arc<dyn CatalogApi>, session: &Arc<SessionStore>) {
    if session.current().is_some() {
        return;
    }
    let token = session.unresolved();
    if token.session_id.is_empty() || !token.account_id.is_empty() {
        return;
    }
    match catalog.account(&token).await {
        Ok(account) => session.set_account_id(account.id.to_string()),
        Err(e) => warn!("Account lookup failed: {}", e),
    }
}

/// One startup pass: mirror both favorite kinds and re-arm alert triggers
/// from the remote list. The server comes up regardless.
fn bootstrap(state: &AppState) {
    let session = Arc::clone(&state.session);
    let favorites = Arc::clone(&state.favorites);
    let alerts = Arc::clone(&state.alerts);
    tokio::spawn(async move {
        if session.current().is_none() {
            info!("No resolved session; skipping the startup sync");
            return;
        }
        let _ = favorites.refresh(MediaKind::Movie).await;
        let _ = favorites.refresh(MediaKind::Tv).await;
        match alerts.sync_with_theatre().await {
            Ok(summary) => info!(
                "Startup alert sync re-armed {} trigger(s) ({} already local)",
                summary.added,
                summary.total - summary.added
            ),
            Err(e) => warn!("Startup alert sync failed: {}", e),
        }
    });
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/favorites", get(favorites_snapshot))
        .route("/favorites/refresh", post(favorites_refresh))
        .route("/favorites/add", post(favorites_add))
        .route("/favorites/remove", post(favorites_remove))
        .route("/media/:kind/:id", get(media_detail))
        .route("/alerts", get(alerts_snapshot))
        .route("/alerts/add", post(alerts_add))
        .route("/alerts/remove", post(alerts_remove))
        .route("/alerts/sync", post(alerts_sync))
        .route("/discover", get(discover_snapshot))
        .route("/discover/load", post(discover_load))
        .route("/discover/more", post(discover_more))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

type AuthHeader = Option<TypedHeader<Authorization<Bearer>>>;

fn check_bearer(state: &AppState, auth: &AuthHeader) -> bool {
    let ok = match auth {
        Some(TypedHeader(header)) => {
            let given = header.token().as_bytes();
            let expected = state.api_token.as_bytes();
            given.len() == expected.len() && constant_time_eq(given, expected)
        }
        None => false,
    };
    if !ok {
        warn!("Rejected request without a valid bearer token");
    }
    ok
}

#[derive(Deserialize)]
struct KindPayload {
    kind: MediaKind,
}

#[derive(Deserialize)]
struct FavoritePayload {
    media_id: i32,
    kind: MediaKind,
}

#[derive(Deserialize)]
struct AlertPayload {
    media_id: i32,
    title: String,
    release_date: String,
    #[serde(default)]
    poster: String,
    kind: MediaKind,
}

#[derive(Deserialize)]
struct MediaIdPayload {
    media_id: i32,
}

#[derive(Deserialize)]
struct GenrePayload {
    genre_id: i32,
}

async fn favorites_snapshot(State(state): State<AppState>, auth: AuthHeader) -> Response {
    if !check_bearer(&state, &auth) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let (set, error) = state.favorites.snapshot().await;
    Json(json!({ "movie": set.movie, "tv": set.tv, "error": error })).into_response()
}

async fn favorites_refresh(
    State(state): State<AppState>,
    auth: AuthHeader,
    Json(payload): Json<KindPayload>,
) -> Response {
    if !check_bearer(&state, &auth) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let favorites = Arc::clone(&state.favorites);
    tokio::spawn(async move {
        let _ = favorites.refresh(payload.kind).await;
    });
    StatusCode::ACCEPTED.into_response()
}

async fn favorites_add(
    State(state): State<AppState>,
    auth: AuthHeader,
    Json(payload): Json<FavoritePayload>,
) -> Response {
    if !check_bearer(&state, &auth) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state.favorites.add(payload.media_id, payload.kind).await;
    StatusCode::ACCEPTED.into_response()
}

async fn favorites_remove(
    State(state): State<AppState>,
    auth: AuthHeader,
    Json(payload): Json<FavoritePayload>,
) -> Response {
    if !check_bearer(&state, &auth) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state.favorites.remove(payload.media_id, payload.kind).await;
    StatusCode::ACCEPTED.into_response()
}

async fn media_detail(
    State(state): State<AppState>,
    auth: AuthHeader,
    Path((kind, id)): Path<(String, i32)>,
) -> Response {
    if !check_bearer(&state, &auth) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let kind: MediaKind = match kind.parse() {
        Ok(k) => k,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    match state.catalog.media_detail(kind, id).await {
        Ok(item) => {
            state.favorites.note_viewed(item.clone()).await;
            Json(item).into_response()
        }
        Err(e) => {
            warn!("Detail fetch for {} {} failed: {}", kind, id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn alerts_snapshot(State(state): State<AppState>, auth: AuthHeader) -> Response {
    if !check_bearer(&state, &auth) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let (alerts, error) = state.alerts.snapshot().await;
    let active = state.scheduler.active_ids().await;
    Json(json!({ "alerts": alerts, "active_triggers": active, "error": error })).into_response()
}

async fn alerts_add(
    State(state): State<AppState>,
    auth: AuthHeader,
    Json(payload): Json<AlertPayload>,
) -> Response {
    if !check_bearer(&state, &auth) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state
        .alerts
        .add(Alert {
            media_id: payload.media_id,
            title: payload.title,
            release_date: payload.release_date,
            poster: payload.poster,
            kind: payload.kind,
        })
        .await;
    StatusCode::ACCEPTED.into_response()
}

async fn alerts_remove(
    State(state): State<AppState>,
    auth: AuthHeader,
    Json(payload): Json<MediaIdPayload>,
) -> Response {
    if !check_bearer(&state, &auth) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state.alerts.remove(payload.media_id).await;
    StatusCode::ACCEPTED.into_response()
}

async fn alerts_sync(State(state): State<AppState>, auth: AuthHeader) -> Response {
    if !check_bearer(&state, &auth) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match state.alerts.sync_with_theatre().await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn discover_snapshot(State(state): State<AppState>, auth: AuthHeader) -> Response {
    if !check_bearer(&state, &auth) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let feed = state.discover.snapshot().await;
    Json(json!({ "rows": feed.rows, "has_more": feed.has_more, "error": feed.error }))
        .into_response()
}

async fn discover_load(
    State(state): State<AppState>,
    auth: AuthHeader,
    Json(payload): Json<GenrePayload>,
) -> Response {
    if !check_bearer(&state, &auth) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match state.discover.load(payload.genre_id).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn discover_more(State(state): State<AppState>, auth: AuthHeader) -> Response {
    if !check_bearer(&state, &auth) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match state.discover.more().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        term.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Shutdown signal received (Ctrl+C)");
        }
        _ = terminate => {
            info!("Shutdown signal received (SIGTERM)");
        }
    }
}
