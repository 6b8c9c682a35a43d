//! HTTP route definitions

use axum::{
    extract::{Extension, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::app::AppState;
use crate::http::middleware::{require_auth, AuthenticatedPeer};
use crate::lobby::error::LobbyError;
use crate::lobby::room::{GameMode, Room};
use crate::lobby::service::QueueRequest;
use crate::matchmaking::PlayerStats;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;
use crate::ws::protocol::MatchPreferences;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(state.config.client_origin.as_deref());

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/rooms", get(rooms_handler))
        .route("/ws", get(ws_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/matchmaking/join", post(matchmaking_join_handler))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Comma-separated origins from `CLIENT_ORIGIN`. Unset or `*` allows any
/// origin, without credentials.
fn cors_layer(client_origin: Option<&str>) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let origins: Vec<&str> = client_origin
        .map(|list| list.split(',').map(str::trim).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    if origins.is_empty() || origins.contains(&"*") {
        return base.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|s| s.parse::<HeaderValue>().ok())
        .collect();
    base.allow_origin(allowed).allow_credentials(true)
}

// ============================================================================
// Health and room list
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    rooms: usize,
    players_in_rooms: usize,
    connected_peers: usize,
    queue_size: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    // A stopped lobby reports an empty queue rather than failing the health check.
    let queue_size = state.lobby.queue_size().await.unwrap_or(0);

    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        rooms: state.directory.room_count(),
        players_in_rooms: state.directory.player_count(),
        connected_peers: state.hub.len(),
        queue_size,
    })
}

#[derive(Serialize)]
struct RoomsResponse {
    rooms: Vec<Room>,
}

async fn rooms_handler(State(state): State<AppState>) -> Json<RoomsResponse> {
    Json(RoomsResponse {
        rooms: state.directory.list(),
    })
}

// ============================================================================
// Matchmaking endpoints
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinMatchRequest {
    mode: GameMode,
    #[serde(default)]
    preferences: MatchPreferences,
    #[serde(default)]
    stats: PlayerStats,
    #[serde(default)]
    region: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinMatchResponse {
    status: &'static str,
    ticket_id: Uuid,
}

async fn matchmaking_join_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedPeer>,
    Json(req): Json<JoinMatchRequest>,
) -> Result<Json<JoinMatchResponse>, AppError> {
    if !state.hub.is_connected(&auth.peer_id) {
        return Err(AppError::BadRequest(
            "Open a WebSocket connection before queueing".to_string(),
        ));
    }

    let request = QueueRequest {
        mode: req.mode,
        preferences: req.preferences,
        stats: req.stats,
        region: req.region,
    };
    let ticket_id = state.lobby.join_queue(auth.peer_id, request).await?;

    Ok(Json(JoinMatchResponse {
        status: "queued",
        ticket_id,
    }))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service unavailable")]
    Unavailable,
}

impl From<LobbyError> for AppError {
    fn from(e: LobbyError) -> Self {
        match e {
            LobbyError::Unavailable => AppError::Unavailable,
            LobbyError::AlreadyInRoom => AppError::Conflict(e.to_string()),
            other => AppError::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        };

        let body = serde_json::json!({
            "error": self.to_string()
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> (Router, AppState) {
        app_with(Config::default())
    }

    fn app_with(config: Config) -> (Router, AppState) {
        let (state, service) = AppState::new(config);
        tokio::spawn(service.run());
        (build_router(state.clone()), state)
    }

    fn join_request(bearer: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/matchmaking/join")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {bearer}"))
            .body(Body::from(r#"{"mode":"free_for_all"}"#))
            .unwrap()
    }

    fn preflight(origin: &str) -> Request<Body> {
        Request::builder()
            .method("OPTIONS")
            .uri("/rooms")
            .header(header::ORIGIN, origin)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (router, _) = app();
        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["rooms"], 0);
        assert_eq!(body["queue_size"], 0);
    }

    #[tokio::test]
    async fn rooms_lists_directory() {
        let (router, _) = app();
        let response = router
            .oneshot(Request::builder().uri("/rooms").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert!(body["rooms"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn matchmaking_requires_bearer() {
        let (router, _) = app();
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/matchmaking/join")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"mode":"free_for_all"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn matchmaking_queues_connected_guest() {
        let (router, state) = app();
        let (peer, token) = state.guest_sessions.issue();
        let _rx = state.hub.register(peer);

        let response = router.oneshot(join_request(&token)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "queued");
        assert_eq!(state.lobby.queue_size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn guest_peer_id_is_not_a_bearer_credential() {
        let (router, state) = app();
        let (peer, _token) = state.guest_sessions.issue();
        let _rx = state.hub.register(peer);

        let response = router.oneshot(join_request(&peer.to_string())).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(state.lobby.queue_size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn wildcard_origin_allows_any_without_credentials() {
        let config = Config {
            client_origin: Some(" * ".to_string()),
            ..Config::default()
        };
        let (router, _) = app_with(config);

        let response = router.oneshot(preflight("https://play.example")).await.unwrap();

        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert!(!headers.contains_key(header::ACCESS_CONTROL_ALLOW_CREDENTIALS));
    }

    #[tokio::test]
    async fn listed_origins_are_echoed_with_credentials() {
        let config = Config {
            client_origin: Some("https://a.example, https://b.example".to_string()),
            ..Config::default()
        };
        let (router, _) = app_with(config);

        let response = router.oneshot(preflight("https://b.example")).await.unwrap();

        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://b.example");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    }
}
