//! HTTP handlers
//!
//! - Media server webhooks: `on_publish`, `on_publish_done`, `on_play`, `on_play_done`
//! - Publisher management API under `/api/publisher`
//! - Health and metrics probes

pub mod publishers;
pub mod webhook;

use crate::config::Config;
use crate::metrics;
use crate::services::AuthValidator;
use crate::store::PublisherStore;
use actix_web::{web, HttpResponse};

#[derive(Clone)]
pub struct AppState {
    pub auth: AuthValidator,
    pub admin_token: Option<String>,
    pub rtmp_server_url: Option<String>,
}

impl AppState {
    pub fn new(store: PublisherStore, config: &Config) -> Self {
        Self {
            auth: AuthValidator::new(store),
            admin_token: config.admin_token.clone(),
            rtmp_server_url: config.rtmp_server_url.clone(),
        }
    }
}

/// Register every route of the service
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index))
        .route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics::serve_metrics))
        .route("/on_publish", web::route().to(webhook::on_publish))
        .route("/on_publish_done", web::route().to(webhook::on_publish_done))
        .route("/on_play", web::route().to(webhook::on_play))
        .route("/on_play_done", web::route().to(webhook::on_play_done))
        .service(
            web::scope("/api/publisher")
                .route("", web::get().to(publishers::list_publishers))
                .route("", web::post().to(publishers::create_publisher))
                .route("/{id}", web::get().to(publishers::get_publisher))
                .route("/{id}", web::delete().to(publishers::revoke_publisher))
                .route("/{id}/channel", web::put().to(publishers::bind_channel))
                .route("/{id}/channel", web::delete().to(publishers::unbind_channel)),
        );
}

async fn index() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body("rtmpauthbot: RTMP webhook authentication service\n")
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}
