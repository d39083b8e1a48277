//! Media server webhooks
//!
//! nginx-rtmp style callbacks: a 2xx response lets the session proceed,
//! anything else makes the media server drop it. The stream key arrives as
//! the `name` field, form-encoded in the body or in the query string.

use super::AppState;
use crate::error::{AppError, Result};
use crate::metrics;
use crate::services::{DenyReason, PlayDecision, PublishDecision};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use tracing::{debug, error};
use validator::Validate;

#[derive(Debug, Default, Clone, Deserialize, Validate)]
pub struct RtmpCallback {
    pub call: Option<String>,
    pub app: Option<String>,
    /// Stream key
    #[validate(
        length(max = 256),
        custom(function = "crate::validators::validate_stream_key_shape")
    )]
    pub name: Option<String>,
    pub addr: Option<String>,
    pub clientid: Option<String>,
}

impl RtmpCallback {
    /// Body fields win over query-string fields
    fn merge(query: RtmpCallback, form: Option<RtmpCallback>) -> RtmpCallback {
        let Some(form) = form else {
            return query;
        };
        RtmpCallback {
            call: form.call.or(query.call),
            app: form.app.or(query.app),
            name: form.name.or(query.name),
            addr: form.addr.or(query.addr),
            clientid: form.clientid.or(query.clientid),
        }
    }

    pub fn stream_key(&self) -> Result<&str> {
        self.validate()?;
        let key = self.name.as_deref().map(str::trim).unwrap_or_default();
        if key.is_empty() {
            return Err(AppError::Validation("stream key (name) is required".into()));
        }
        Ok(key)
    }
}

fn callback(query: web::Query<RtmpCallback>, form: Option<web::Form<RtmpCallback>>) -> RtmpCallback {
    RtmpCallback::merge(query.into_inner(), form.map(web::Form::into_inner))
}

pub async fn on_publish(
    state: web::Data<AppState>,
    query: web::Query<RtmpCallback>,
    form: Option<web::Form<RtmpCallback>>,
) -> Result<HttpResponse> {
    let callback = callback(query, form);
    let stream_key = callback.stream_key().map_err(|e| {
        metrics::record_webhook("on_publish", "invalid");
        e
    })?;
    debug!(addr = ?callback.addr, app = ?callback.app, "on_publish received");

    match state.auth.validate_publish(stream_key).await? {
        PublishDecision::Allow => {
            metrics::record_webhook("on_publish", "allow");
            Ok(HttpResponse::Ok().finish())
        }
        PublishDecision::Deny(DenyReason::UnknownKey) => {
            metrics::record_webhook("on_publish", "unknown_key");
            Err(AppError::Forbidden("unknown stream key".into()))
        }
        PublishDecision::Deny(DenyReason::AlreadyLive) => {
            metrics::record_webhook("on_publish", "already_live");
            Err(AppError::Conflict("stream key is already live".into()))
        }
    }
}

/// Always 200; the media server does not act on the response.
pub async fn on_publish_done(
    state: web::Data<AppState>,
    query: web::Query<RtmpCallback>,
    form: Option<web::Form<RtmpCallback>>,
) -> HttpResponse {
    let callback = callback(query, form);
    match callback.stream_key() {
        Ok(stream_key) => {
            if let Err(e) = state.auth.end_publish(stream_key).await {
                error!(error = %e, "Failed to record end of publish");
                metrics::record_webhook("on_publish_done", "error");
            } else {
                metrics::record_webhook("on_publish_done", "ok");
            }
        }
        Err(e) => {
            debug!(error = %e, "on_publish_done without usable stream key");
            metrics::record_webhook("on_publish_done", "invalid");
        }
    }
    HttpResponse::Ok().finish()
}

pub async fn on_play(
    state: web::Data<AppState>,
    query: web::Query<RtmpCallback>,
    form: Option<web::Form<RtmpCallback>>,
) -> Result<HttpResponse> {
    let callback = callback(query, form);
    let stream_key = callback.stream_key().map_err(|e| {
        metrics::record_webhook("on_play", "invalid");
        e
    })?;

    match state.auth.validate_play(stream_key) {
        PlayDecision::Allow => {
            metrics::record_webhook("on_play", "allow");
            Ok(HttpResponse::Ok().finish())
        }
    }
}

pub async fn on_play_done(
    query: web::Query<RtmpCallback>,
    form: Option<web::Form<RtmpCallback>>,
) -> HttpResponse {
    let callback = callback(query, form);
    debug!(addr = ?callback.addr, clientid = ?callback.clientid, "on_play_done received");
    metrics::record_webhook("on_play_done", "ok");
    HttpResponse::Ok().finish()
}
