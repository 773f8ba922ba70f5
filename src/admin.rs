//! Moderation endpoints, gated by the shared `x-admin-token` secret.

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{FromRequestParts, Query, State},
    http::request::Parts,
    Json,
};
use constant_time_eq::constant_time_eq;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::app::{parse_object, AppState, ADMIN_TOKEN_HEADER};
use crate::error::AppError;
use crate::models::SubmissionStatus;
use crate::store::{Cursor, ListQuery, Page, DEFAULT_PAGE_SIZE};

/// Proof that the request carried the admin secret.
#[derive(Debug)]
pub struct AdminAuth;

#[async_trait]
impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let provided = parts
            .headers
            .get(ADMIN_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if token_matches(&state.admin_token, provided) {
            Ok(AdminAuth)
        } else {
            warn!("Rejected admin request to {}", parts.uri.path());
            Err(AppError::Unauthorized)
        }
    }
}

/// Compare digests so timing does not depend on where the strings differ or
/// on their lengths. An unset secret never matches.
pub fn token_matches(expected: &str, provided: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    let expected = Sha256::digest(expected.as_bytes());
    let provided = Sha256::digest(provided.as_bytes());
    constant_time_eq(expected.as_slice(), provided.as_slice())
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<String>,
    pub cursor: Option<String>,
    pub q: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub page: Page,
}

/// Absent → default page size; leading digits are honoured (`"10abc"` → 10);
/// no digits at all → 1. Always clamped to the allowed range.
pub fn parse_limit(raw: Option<&str>) -> usize {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return DEFAULT_PAGE_SIZE;
    };
    let (sign, digits) = match raw.strip_prefix('-') {
        Some(rest) => (-1i64, rest),
        None => (1i64, raw.strip_prefix('+').unwrap_or(raw)),
    };
    let leading: String = digits.chars().take_while(|c| c.is_ascii_digit()).collect();
    if leading.is_empty() {
        return 1;
    }
    let n = leading
        .parse::<i64>()
        .unwrap_or(i64::MAX)
        .saturating_mul(sign);
    n.clamp(1, crate::store::MAX_PAGE_SIZE as i64) as usize
}

/// GET /admin/submissions
pub async fn list_submissions(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse>, AppError> {
    let limit = parse_limit(params.limit.as_deref());
    let cursor = match params.cursor.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => Some(Cursor::decode(raw).map_err(|e| {
            debug!("Bad cursor {:?}: {}", raw, e);
            AppError::BadRequest {
                code: "invalid_cursor",
                message: "Invalid cursor",
            }
        })?),
        _ => None,
    };

    let query = ListQuery::new(params.q, cursor, limit);
    let items = state.store.list(&query).await?;
    let page = Page::from_items(items, query.limit);
    debug!(
        count = page.items.len(),
        complete = page.complete,
        "Listed submissions"
    );
    Ok(Json(ListResponse { ok: true, page }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UpdateRequest {
    id: Option<String>,
    status: Option<String>,
    note: Option<String>,
}

/// POST /admin/submissions/update
pub async fn update_submission(
    State(state): State<AppState>,
    _auth: AdminAuth,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let req: UpdateRequest = parse_object(&body)?;

    let id = req
        .id
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(AppError::BadRequest {
            code: "missing_id",
            message: "Missing id",
        })?;
    let status = req
        .status
        .as_deref()
        .and_then(|s| s.parse::<SubmissionStatus>().ok())
        .ok_or(AppError::BadRequest {
            code: "invalid_status",
            message: "Invalid status",
        })?;
    let note = req.note.unwrap_or_default();

    let updated = state.store.update(&id, status, &note).await?;
    info!(id = %updated.id, status = %updated.status, "Submission moderated");

    Ok(Json(json!({ "ok": true, "id": updated.id, "status": updated.status })))
}
