use crate::admin;
use crate::config::{Config, RateLimitPolicy};
use crate::error::AppError;
use crate::notify::{LogNotifier, Notifier, SlackNotifier};
use crate::rate_limit::{MemoryLimiter, StoreLimiter, SubmissionLimiter};
use crate::store::{self, RecordStore};
use crate::validate::{validate_submission, SubmissionPayload};
use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, MethodRouter},
    Json, Router,
};
use axum_extra::TypedHeader;
use chrono::Utc;
use headers::UserAgent;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

const MAX_BODY_BYTES: usize = 64 * 1024;
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub limiter: Arc<dyn SubmissionLimiter>,
    pub notifier: Arc<dyn Notifier>,
    pub admin_token: String,
    pub allowed_origins: Arc<Vec<String>>,
}

impl AppState {
    /// Wire the configured backend, limiter policy and notifier.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store = store::connect(&config.backend).await?;
        info!("Using {} record store", config.backend.name());

        let limiter: Arc<dyn SubmissionLimiter> = match config.rate_limit_policy {
            RateLimitPolicy::Store => Arc::new(StoreLimiter::new(config.rate_limit, store.clone())),
            RateLimitPolicy::Memory => Arc::new(MemoryLimiter::new(config.rate_limit)),
        };

        let notifier: Arc<dyn Notifier> = match &config.webhook_url {
            Some(url) => Arc::new(SlackNotifier::new(url.clone())?),
            None => {
                info!("SLACK_WEBHOOK_URL not set, submissions will only be logged");
                Arc::new(LogNotifier)
            }
        };

        Ok(Self {
            store,
            limiter,
            notifier,
            admin_token: config.admin_token.clone(),
            allowed_origins: Arc::new(config.allowed_origins.clone()),
        })
    }
}

pub async fn run_server(config: Config) -> Result<()> {
    let state = AppState::from_config(&config).await?;
    let app = build_router(state);

    info!("Listening on {}", config.listen);
    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.allowed_origins);

    let submit = endpoint(post(handle_submission));
    let list = endpoint(get(admin::list_submissions));
    let update = endpoint(post(admin::update_submission));

    Router::new()
        .route("/submissions", submit.clone())
        .route("/admin/submissions", list.clone())
        .route("/admin/submissions/update", update.clone())
        // Paths used by the existing browser client.
        .route("/api/submit", submit)
        .route("/api/admin_list", list)
        .route("/api/admin_update", update)
        .route("/health", get(health))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors)
        .layer(middleware::from_fn(no_content_preflight))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn endpoint(route: MethodRouter<AppState>) -> MethodRouter<AppState> {
    route.options(preflight).fallback(method_not_allowed)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origin = if allowed_origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            allowed_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };
    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(ADMIN_TOKEN_HEADER),
        ])
}

/// `CorsLayer` answers browser preflights itself with 200; clients expect 204.
async fn no_content_preflight(req: Request, next: Next) -> Response {
    let is_options = req.method() == Method::OPTIONS;
    let mut res = next.run(req).await;
    if is_options && res.status() == StatusCode::OK {
        *res.status_mut() = StatusCode::NO_CONTENT;
    }
    res
}

async fn health() -> &'static str {
    "OK"
}

async fn preflight() -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        [
            (header::ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, OPTIONS"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "content-type, x-admin-token"),
        ],
    )
}

async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}

async fn handle_submission(
    State(state): State<AppState>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    user_agent: Option<TypedHeader<UserAgent>>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    if !origin_allowed(&headers, &state.allowed_origins) {
        warn!(
            "Rejecting submission from origin {:?}",
            headers.get(header::ORIGIN)
        );
        return Err(AppError::ForbiddenOrigin);
    }

    let payload: SubmissionPayload = parse_object(&body)?;
    let draft = validate_submission(payload)?;

    let ip = extract_ip(&headers, peer.map(|ConnectInfo(addr)| addr));
    if !state.limiter.check(&ip).await {
        warn!("Rate limit exceeded for {}", ip);
        return Err(AppError::RateLimited);
    }

    let user_agent = user_agent
        .map(|TypedHeader(ua)| ua.as_str().to_string())
        .unwrap_or_default();
    let record = draft.into_submission(Uuid::new_v4().to_string(), ip, user_agent, Utc::now());

    if let Err(e) = state.store.insert(&record).await {
        return Err(AppError::Internal(format!(
            "insert of submission {} failed: {}",
            record.id, e
        )));
    }
    info!(id = %record.id, name = %record.name, "Stored submission");

    state.notifier.notify(&record).await;

    Ok(Json(json!({ "ok": true, "id": record.id })))
}

/// Decode a JSON object body; anything else is reported as invalid JSON.
pub(crate) fn parse_object<T: DeserializeOwned>(body: &[u8]) -> Result<T, AppError> {
    let value: Value = serde_json::from_slice(body).map_err(|_| AppError::InvalidJson)?;
    if !value.is_object() {
        return Err(AppError::InvalidJson);
    }
    serde_json::from_value(value).map_err(|_| AppError::InvalidJson)
}

fn origin_allowed(headers: &HeaderMap, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    allowed.iter().any(|o| o == origin)
}

fn extract_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("cf-connecting-ip")
        .or_else(|| headers.get("x-real-ip"))
        .or_else(|| headers.get("x-forwarded-for"))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
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
