use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use dialin_core::export::{suggested_export_file_name, ExportFormat};
use dialin_core::sync::{PullResponse, PushRequest, PushResponse};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{extract_bearer_token, user_fingerprint, AuthenticatedUser, JwtVerifier};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::rate_limit::{QuotaSnapshot, SyncQuota};
use crate::store::{BackingStore, SqliteBackingStore};
use crate::sync::SyncService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    jwt_verifier: Arc<JwtVerifier>,
    quota: Arc<SyncQuota>,
    sync: SyncService,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, store: Arc<dyn BackingStore>) -> Self {
        Self {
            jwt_verifier: Arc::new(JwtVerifier::from_config(&config)),
            quota: Arc::new(SyncQuota::from_config(config.as_ref())),
            sync: SyncService::new(store),
            config,
        }
    }

    /// Open the configured `SQLite` database and build the state around it.
    pub fn from_config(config: Arc<AppConfig>) -> Result<Self, AppError> {
        let store = SqliteBackingStore::open(&config.database_path).map_err(|error| {
            AppError::Config(format!(
                "Failed to open database {}: {error}",
                config.database_path.display()
            ))
        })?;
        Ok(Self::new(config, Arc::new(store)))
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/sync/pull", get(pull).head(auth_probe))
        .route("/sync/push", post(push))
        .route("/export", get(export))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    quota: QuotaSnapshot,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        quota: state.quota.snapshot().await,
    })
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    let user = state.jwt_verifier.verify_access_token(token)?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// `HEAD /sync/pull`: reaching the handler means the token was accepted.
async fn auth_probe() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
struct PullQuery {
    since: Option<String>,
}

async fn pull(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<PullQuery>,
) -> Result<Json<PullResponse>, AppError> {
    state.quota.charge_pull(&user.user_id).await?;

    let since = parse_since(query.since.as_deref())?;
    let response = state.sync.pull(&user.user_id, since).await?;
    Ok(Json(response))
}

/// The body is decoded in full before anything is written, so a malformed
/// batch is rejected without partial application. The quota is charged per
/// decoded record.
async fn push(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    body: Bytes,
) -> Result<Json<PushResponse>, AppError> {
    let request: PushRequest = serde_json::from_slice(&body).map_err(|error| {
        tracing::warn!(
            user = user_fingerprint(&user.user_id),
            %error,
            "Rejected malformed push payload"
        );
        AppError::bad_request(format!("Malformed push payload: {error}"))
    })?;

    state.quota.charge_push(&user.user_id, request.len()).await?;

    let response = state.sync.push(&user.user_id, request).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct ExportQuery {
    format: Option<String>,
}

async fn export(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, AppError> {
    state.quota.charge_pull(&user.user_id).await?;

    let format = parse_export_format(query.format.as_deref())?;
    let body = state.sync.export(&user.user_id, format).await?;
    let file_name = suggested_export_file_name(format, Utc::now().timestamp_millis());

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(format.content_type()),
    );
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{file_name}\""))
        .map_err(|error| AppError::internal(format!("Invalid export file name: {error}")))?;
    headers.insert(header::CONTENT_DISPOSITION, disposition);

    tracing::info!(
        endpoint = "export",
        user = user_fingerprint(&user.user_id),
        format = format.extension(),
        bytes = body.len(),
        "Served export"
    );
    Ok((headers, body).into_response())
}

fn parse_since(raw: Option<&str>) -> Result<Option<i64>, AppError> {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    let since = raw
        .parse::<i64>()
        .map_err(|_| AppError::bad_request("`since` must be milliseconds since the epoch"))?;
    if since < 0 {
        return Err(AppError::bad_request("`since` must not be negative"));
    }
    Ok(Some(since))
}

fn parse_export_format(raw: Option<&str>) -> Result<ExportFormat, AppError> {
    match raw.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
        None | Some("" | "json") => Ok(ExportFormat::Json),
        Some("markdown" | "md") => Ok(ExportFormat::Markdown),
        Some(other) => Err(AppError::bad_request(format!(
            "Unsupported export format `{other}`; expected json or markdown"
        ))),
    }
}
