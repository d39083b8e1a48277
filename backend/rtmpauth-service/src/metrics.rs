use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, Opts, TextEncoder};

static WEBHOOK_DECISIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "rtmpauth_webhook_decisions_total",
            "Media server webhook calls by endpoint and outcome",
        ),
        &["endpoint", "outcome"],
    )
    .expect("failed to create rtmpauth_webhook_decisions_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register rtmpauth_webhook_decisions_total");
    counter
});

static STATUS_POLLS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "rtmpauth_status_polls_total",
            "External live-status queries by outcome",
        ),
        &["outcome"],
    )
    .expect("failed to create rtmpauth_status_polls_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register rtmpauth_status_polls_total");
    counter
});

static NOTIFICATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "rtmpauth_notifications_total",
            "Live-state notifications by sink and outcome",
        ),
        &["sink", "outcome"],
    )
    .expect("failed to create rtmpauth_notifications_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register rtmpauth_notifications_total");
    counter
});

pub fn record_webhook(endpoint: &str, outcome: &str) {
    WEBHOOK_DECISIONS_TOTAL
        .with_label_values(&[endpoint, outcome])
        .inc();
}

pub fn record_poll(outcome: &str) {
    STATUS_POLLS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_notification(sink: &str, outcome: &str) {
    NOTIFICATIONS_TOTAL.with_label_values(&[sink, outcome]).inc();
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
