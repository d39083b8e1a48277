//! Publisher management API
//!
//! Stream keys are only ever returned by `create_publisher`; every other
//! endpoint answers with [`PublisherSummary`](crate::models::PublisherSummary).

use super::AppState;
use crate::error::{AppError, Result};
use crate::models::{BindChannelRequest, CreatePublisherResponse};
use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

/// Management endpoints are open when no admin token is configured.
fn has_admin_access(req: &HttpRequest, state: &AppState) -> bool {
    match state.admin_token.as_deref() {
        Some(token) if !token.is_empty() => req
            .headers()
            .get("x-admin-token")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == token)
            .unwrap_or(false),
        _ => true,
    }
}

fn authorize(req: &HttpRequest, state: &AppState) -> Result<()> {
    if has_admin_access(req, state) {
        Ok(())
    } else {
        Err(AppError::Unauthorized)
    }
}

fn parse_publisher_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| AppError::Validation(format!("invalid publisher id: {raw}")))
}

/// Channel logins are case-insensitive; store them lowercased
fn normalize_channel(mut request: BindChannelRequest) -> Result<BindChannelRequest> {
    request.channel = request.channel.trim().to_ascii_lowercase();
    request.validate()?;
    Ok(request)
}

pub async fn create_publisher(state: web::Data<AppState>, req: HttpRequest) -> Result<HttpResponse> {
    authorize(&req, &state)?;
    let publisher = state.auth.create_publisher().await?;
    Ok(HttpResponse::Ok().json(CreatePublisherResponse {
        id: publisher.id,
        stream_key: publisher.stream_key,
        created_at: publisher.created_at,
        server_url: state.rtmp_server_url.clone(),
    }))
}

pub async fn list_publishers(state: web::Data<AppState>, req: HttpRequest) -> Result<HttpResponse> {
    authorize(&req, &state)?;
    let publishers = state.auth.list_publishers().await?;
    Ok(HttpResponse::Ok().json(publishers))
}

pub async fn get_publisher(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    authorize(&req, &state)?;
    let id = parse_publisher_id(&path)?;
    let publisher = state.auth.publisher(id).await?;
    Ok(HttpResponse::Ok().json(publisher))
}

pub async fn revoke_publisher(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    authorize(&req, &state)?;
    let id = parse_publisher_id(&path)?;
    state.auth.revoke_publisher(id).await?;
    Ok(HttpResponse::Ok().json(json!({ "id": id, "revoked": true })))
}

pub async fn bind_channel(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<BindChannelRequest>,
) -> Result<HttpResponse> {
    authorize(&req, &state)?;
    let id = parse_publisher_id(&path)?;
    let request = normalize_channel(body.into_inner())?;
    let publisher = state.auth.bind_channel(id, &request.channel).await?;
    Ok(HttpResponse::Ok().json(publisher))
}

pub async fn unbind_channel(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    authorize(&req, &state)?;
    let id = parse_publisher_id(&path)?;
    let publisher = state.auth.unbind_channel(id).await?;
    Ok(HttpResponse::Ok().json(publisher))
}
