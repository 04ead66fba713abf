//! HTTP facade over the emitted artifacts
//!
//! A thin axum router: group URI lists, generated client configs, status
//! and health endpoints, a transparent GitHub raw proxy, and fixed
//! shortcut redirects. Every response carries permissive CORS headers.

mod common;

pub use common::{ApiError, ApiResult};

use crate::config::Config;
use crate::status::SyncStatus;
use crate::VERSION;
use axum::{
    extract::{Path as AxumPath, State},
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Fixed shortcut table: short path -> hosted group artifact
pub const SHORTCUTS: &[(&str, &str)] = &[
    ("HK", "https://raw.githubusercontent.com/subhub-run/artifacts/main/groups/HK.txt"),
    ("US", "https://raw.githubusercontent.com/subhub-run/artifacts/main/groups/US.txt"),
    ("SG", "https://raw.githubusercontent.com/subhub-run/artifacts/main/groups/SG.txt"),
    ("TW", "https://raw.githubusercontent.com/subhub-run/artifacts/main/groups/TW.txt"),
    ("JP", "https://raw.githubusercontent.com/subhub-run/artifacts/main/groups/JP.txt"),
    ("Others", "https://raw.githubusercontent.com/subhub-run/artifacts/main/groups/Others.txt"),
];

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Arc<Config>) -> Self {
        AppState {
            config,
            started_at: Instant::now(),
        }
    }
}

/// Create the router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut router = Router::new()
        .route("/groups/:name", get(get_group))
        .route("/mihomo", get(|state: State<AppState>| client_config(state, "mihomo.yaml", "text/yaml")))
        .route("/clash", get(|state: State<AppState>| client_config(state, "mihomo.yaml", "text/yaml")))
        .route("/surge", get(|state: State<AppState>| client_config(state, "surge.conf", "text/plain")))
        .route("/singbox", get(|state: State<AppState>| client_config(state, "singbox.json", "application/json")))
        .route("/v2ray", get(|state: State<AppState>| client_config(state, "v2ray.json", "application/json")))
        .route("/api/status", get(api_status))
        .route("/api/health", get(api_health))
        .route("/gh-proxy/*path", get(gh_proxy));

    for (shortcut, target) in SHORTCUTS {
        router = router.route(
            &format!("/{}", shortcut),
            get(move || async move { Redirect::temporary(target) }),
        );
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the facade
pub async fn start_server(state: AppState, addr: SocketAddr) -> crate::Result<()> {
    let router = create_router(state);
    info!("starting HTTP facade on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .await
        .map_err(|e| crate::Error::system(e.to_string()))?;
    Ok(())
}

/// `GET /groups/:name` — a per-group URI list as an attachment
async fn get_group(
    State(state): State<AppState>,
    AxumPath(name): AxumPath<String>,
) -> Response {
    // No traversal through the artifact directory
    if name.contains("..") || name.contains('/') || name.contains('\\') {
        return ApiError::bad_request("invalid group name").into_response();
    }
    let stem = name.trim_end_matches(".txt");
    let path = state
        .config
        .output_dir
        .join("groups")
        .join(format!("{}.txt", stem));

    match tokio::fs::read_to_string(&path).await {
        Ok(content) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}.txt\"", stem),
                ),
            ],
            content,
        )
            .into_response(),
        Err(_) => ApiError::not_found("group").into_response(),
    }
}

/// A generated client config from the output directory
async fn client_config(
    State(state): State<AppState>,
    file_name: &'static str,
    content_type: &'static str,
) -> Response {
    let path = state.config.output_dir.join(file_name);
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, content_type)],
            content,
        )
            .into_response(),
        Err(_) => ApiError::not_found("config").into_response(),
    }
}

/// `GET /api/status`
async fn api_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "version": VERSION,
        "uptime": state.started_at.elapsed().as_secs(),
        "environment": if cfg!(debug_assertions) { "development" } else { "production" },
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// `GET /api/health` — 503 when any sub-check is down
async fn api_health(State(state): State<AppState>) -> Response {
    let output_up = state.config.output_dir.join("groups").is_dir();

    let sync_up = SyncStatus::load(state.config.sync_status_path())
        .map(|status| {
            let age = Utc::now().signed_duration_since(status.last_run_at);
            age < chrono::Duration::hours(48)
        })
        .unwrap_or(false);

    let cache_up = state.config.data_dir.is_dir();

    let all_up = output_up && sync_up && cache_up;
    let verdict = |up: bool| if up { "up" } else { "down" };
    let body = json!({
        "status": verdict(all_up),
        "checks": {
            "output": verdict(output_up),
            "syncStatus": verdict(sync_up),
            "dataDir": verdict(cache_up),
        },
        "timestamp": Utc::now().to_rfc3339(),
    });

    let status = if all_up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

/// `GET /gh-proxy/*path` — transparent GET proxy to raw.githubusercontent.com
async fn gh_proxy(AxumPath(path): AxumPath<String>) -> Response {
    let target = format!("https://raw.githubusercontent.com/{}", path);
    match reqwest::get(&target).await {
        Ok(upstream) => {
            let status =
                StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
            let content_type = upstream
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("application/octet-stream")
                .to_string();
            match upstream.bytes().await {
                Ok(body) => {
                    (status, [(header::CONTENT_TYPE, content_type)], body).into_response()
                }
                Err(e) => ApiError::bad_gateway(e.to_string()).into_response(),
            }
        }
        Err(e) => ApiError::bad_gateway(e.to_string()).into_response(),
    }
}
