//! HTTP surface: a single `/api` endpoint dispatching on the `action` query
//! parameter, mirroring the contract the presentation layer was written
//! against. Handlers stay thin; the domain modules do the work.

use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, FromRequest, Multipart, Query, Request, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Form, Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::config::shed_enabled;
use crate::errors::AppError;
use crate::ideas::categories::load_categories;
use crate::ideas::ledger::{self, NewPledge};
use crate::ideas::models::{
    GdprIdeaRow, GdprPledgeRow, IdeaDetailRow, IdeaSummaryRow, PledgeKind, PledgeRow,
};
use crate::ideas::submit;
use crate::ideas::{is_valid_email, normalize_email};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ActionQuery {
    #[serde(default)]
    pub action: String,
    pub id: Option<i64>,
    pub idea_id: Option<i64>,
    pub category: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /api?action=...  — read-only surface, unaffected by load shed.
pub async fn dispatch_get(
    State(state): State<AppState>,
    Query(q): Query<ActionQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    match q.action.as_str() {
        "status" => Ok(status(&headers)),
        "list_ideas" => list_ideas(&state, &q).await,
        "get_idea" => get_idea(&state, q.id.unwrap_or(0)).await,
        "get_interests" => get_interests(&state, q.idea_id.unwrap_or(0)).await,
        "categories" => {
            let cats = load_categories(&state.config.categories_path).await;
            Ok(Json(cats).into_response())
        }
        "turnstile_status" => Ok(turnstile_status(&state, &headers)),
        _ => Err(AppError::UnknownAction),
    }
}

/// POST /api?action=...  — all mutating actions pass the load-shed valve
/// first, before any body parsing.
pub async fn dispatch_post(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    Query(q): Query<ActionQuery>,
    headers: HeaderMap,
    request: Request,
) -> Result<Response, AppError> {
    if shed_enabled() {
        return Err(AppError::Busy);
    }

    let ip = client_ip(&headers, connect.map(|c| c.0));
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match q.action.as_str() {
        "create_idea" => {
            let multipart = Multipart::from_request(request, &state)
                .await
                .map_err(|e| AppError::Validation(format!("Expected multipart form: {e}")))?;
            let form = submit::parse_multipart(multipart).await?;
            let admitted = submit::admit_idea(&state, ip, form).await?;
            Ok(Json(json!({
                "ok": true,
                "id": admitted.id,
                "idea_url": format!("/idea/{}", admitted.slug),
                "user_url": format!("/user/{}", admitted.username),
            }))
            .into_response())
        }
        "express_interest" => {
            let Form(form) = Form::<InterestForm>::from_request(request, &state)
                .await
                .map_err(|e| AppError::Validation(format!("Malformed form body: {e}")))?;
            express_interest(&state, ip, user_agent.as_deref(), form).await
        }
        "add_like" => add_like(&state, q.id.unwrap_or(0), ip).await,
        "add_token" => add_token(&state, q.id.unwrap_or(0), ip, user_agent.as_deref()).await,
        "gdpr_data_request" => {
            let Form(form) = Form::<GdprForm>::from_request(request, &state)
                .await
                .map_err(|e| AppError::Validation(format!("Malformed form body: {e}")))?;
            gdpr_data_request(&state, form).await
        }
        _ => Err(AppError::UnknownAction),
    }
}

fn status(headers: &HeaderMap) -> Response {
    Json(json!({
        "overload": shed_enabled(),
        "host": host_header(headers),
    }))
    .into_response()
}

fn turnstile_status(state: &AppState, headers: &HeaderMap) -> Response {
    Json(json!({
        "site_key_present": state.config.turnstile_site_key.is_some(),
        "secret_present": state.config.turnstile_secret.is_some(),
        "host": host_header(headers),
    }))
    .into_response()
}

async fn list_ideas(state: &AppState, q: &ActionQuery) -> Result<Response, AppError> {
    let limit = q.limit.unwrap_or(24).clamp(1, 100);
    let offset = q.offset.unwrap_or(0).max(0);
    let category = q.category.as_deref().unwrap_or("").trim();

    if !category.is_empty() {
        let allowed = load_categories(&state.config.categories_path).await;
        if !allowed.iter().any(|a| a == category) {
            // Unknown filter: empty result, not an error.
            return Ok(Json(json!([])).into_response());
        }
        let rows: Vec<IdeaSummaryRow> = sqlx::query_as(
            "SELECT id, title, summary, tokens, likes, url, video_url, file_path, category, tags \
             FROM ideas WHERE category = $1 \
             ORDER BY tokens DESC, id ASC LIMIT $2 OFFSET $3",
        )
        .bind(category)
        .bind(limit)
        .bind(offset)
        .fetch_all(&state.db)
        .await?;
        return Ok(Json(rows).into_response());
    }

    let rows: Vec<IdeaSummaryRow> = sqlx::query_as(
        "SELECT id, title, summary, tokens, likes, url, video_url, file_path, category, tags \
         FROM ideas ORDER BY tokens DESC, id ASC LIMIT $1 OFFSET $2",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(rows).into_response())
}

async fn get_idea(state: &AppState, id: i64) -> Result<Response, AppError> {
    if id <= 0 {
        return Err(AppError::Validation("Invalid id".to_string()));
    }
    let idea: Option<IdeaDetailRow> = sqlx::query_as(
        "SELECT id, title, summary, tokens, likes, url, video_url, file_path, file_mime, \
                file_size, created_at, category, tags \
         FROM ideas WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&state.db)
    .await?;
    match idea {
        Some(idea) => Ok(Json(idea).into_response()),
        None => Err(AppError::NotFound),
    }
}

async fn get_interests(state: &AppState, idea_id: i64) -> Result<Response, AppError> {
    if idea_id <= 0 {
        return Err(AppError::Validation("Invalid idea_id".to_string()));
    }
    let pledges: Vec<PledgeRow> = sqlx::query_as(
        "SELECT supporter_name, supporter_email, pledge_type, pledge_details, tokens_amount \
         FROM idea_interest WHERE idea_id = $1 ORDER BY id ASC",
    )
    .bind(idea_id)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(pledges).into_response())
}

#[derive(Debug, Deserialize)]
pub struct InterestForm {
    #[serde(default)]
    pub idea_id: i64,
    #[serde(default)]
    pub supporter_name: String,
    #[serde(default)]
    pub supporter_email: String,
    #[serde(default)]
    pub pledge_type: String,
    #[serde(default)]
    pub pledge_details: String,
    #[serde(default)]
    pub tokens: i64,
    #[serde(rename = "cf-turnstile-response")]
    pub turnstile_token: Option<String>,
}

async fn express_interest(
    state: &AppState,
    ip: Option<IpAddr>,
    user_agent: Option<&str>,
    form: InterestForm,
) -> Result<Response, AppError> {
    let email = normalize_email(&form.supporter_email);
    if !is_valid_email(&email) {
        return Err(AppError::Validation("Invalid email".to_string()));
    }

    crate::ideas::spam::require_human(state, form.turnstile_token.as_deref(), ip).await?;

    let supporter_name = form.supporter_name.trim();
    let Some(kind) = PledgeKind::parse(form.pledge_type.trim()) else {
        return Err(AppError::Validation("Missing fields".to_string()));
    };
    if form.idea_id <= 0 || supporter_name.is_empty() {
        return Err(AppError::Validation("Missing fields".to_string()));
    }

    ledger::record_pledge(
        &state.db,
        NewPledge {
            idea_id: form.idea_id,
            supporter_name,
            supporter_email: &email,
            kind,
            details: form.pledge_details.trim(),
            tokens_amount: form.tokens,
        },
        ip,
        user_agent,
    )
    .await?;

    Ok(Json(json!({ "ok": true })).into_response())
}

async fn add_like(state: &AppState, id: i64, ip: Option<IpAddr>) -> Result<Response, AppError> {
    if id <= 0 {
        return Err(AppError::Validation("Invalid id".to_string()));
    }
    ledger::record_like(&state.db, id, ip, state.config.like_daily_limit).await?;
    Ok(Json(json!({ "ok": true })).into_response())
}

async fn add_token(
    state: &AppState,
    id: i64,
    ip: Option<IpAddr>,
    user_agent: Option<&str>,
) -> Result<Response, AppError> {
    if id <= 0 {
        return Err(AppError::Validation("Invalid id".to_string()));
    }
    ledger::record_tap(&state.db, id, ip, user_agent, state.config.token_daily_limit).await?;
    Ok(Json(json!({ "ok": true })).into_response())
}

#[derive(Debug, Deserialize)]
pub struct GdprForm {
    #[serde(default)]
    pub email: String,
}

/// Data-portability export: everything stored under the subject's email.
async fn gdpr_data_request(state: &AppState, form: GdprForm) -> Result<Response, AppError> {
    let email = form.email.trim();
    if !is_valid_email(email) {
        return Err(AppError::Validation("Invalid email address".to_string()));
    }

    let ideas: Vec<GdprIdeaRow> = sqlx::query_as(
        "SELECT id, title, summary, category, tags, tokens, likes, created_at \
         FROM ideas WHERE submitter_email = $1",
    )
    .bind(email)
    .fetch_all(&state.db)
    .await?;

    let pledges: Vec<GdprPledgeRow> = sqlx::query_as(
        "SELECT id AS pledge_id, idea_id, pledge_type, pledge_details, tokens_amount \
         FROM idea_interest WHERE supporter_email = $1",
    )
    .bind(email)
    .fetch_all(&state.db)
    .await?;

    info!("GDPR export served ({} ideas, {} pledges)", ideas.len(), pledges.len());

    Ok(Json(json!({
        "email": email,
        "data_exported_at": Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        "ideas_submitted": ideas,
        "pledges_made": pledges,
        "total_ideas": ideas.len(),
        "total_pledges": pledges.len(),
    }))
    .into_response())
}

fn host_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::HOST).and_then(|v| v.to_str().ok())
}

/// Actor address: first entry of X-Forwarded-For when present (the service
/// sits behind a proxy in production), else the socket peer. None when
/// neither resolves — those actors are exempt from rate limiting.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
    if let Some(xff) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = xff.split(',').next() {
            if let Ok(ip) = first.trim().parse::<IpAddr>() {
                return Some(ip);
            }
        }
    }
    peer.map(|a| a.ip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_client_ip_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        let peer: SocketAddr = "192.0.2.1:4444".parse().unwrap();
        assert_eq!(
            client_ip(&headers, Some(peer)),
            Some("203.0.113.7".parse().unwrap())
        );
    }

    #[test]
    fn test_client_ip_falls_back_to_peer() {
        let headers = HeaderMap::new();
        let peer: SocketAddr = "192.0.2.1:4444".parse().unwrap();
        assert_eq!(client_ip(&headers, Some(peer)), Some("192.0.2.1".parse().unwrap()));
    }

    #[test]
    fn test_client_ip_garbage_header_falls_back() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("not-an-ip"));
        let peer: SocketAddr = "[2001:db8::1]:80".parse().unwrap();
        assert_eq!(client_ip(&headers, Some(peer)), Some("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn test_client_ip_none_when_unresolvable() {
        assert_eq!(client_ip(&HeaderMap::new(), None), None);
    }
}
