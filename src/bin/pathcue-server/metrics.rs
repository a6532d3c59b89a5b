use std::sync::OnceLock;
use std::time::Instant;

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::Request;
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts as PromOpts,
    Registry, TextEncoder,
};

use pathcue::Direction;

struct Metrics {
    registry: Registry,
    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
    frames_streamed_total: IntCounter,
    announcements_total: IntCounterVec,
    active_viewers: IntGauge,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn build() -> prometheus::Result<Metrics> {
    let registry = Registry::new();

    let http_requests_total = IntCounterVec::new(
        PromOpts::new(
            "pathcue_http_requests_total",
            "Total HTTP requests served by pathcue-server.",
        ),
        &["status"],
    )?;

    let http_request_duration_seconds = HistogramVec::new(
        HistogramOpts::new(
            "pathcue_http_request_duration_seconds",
            "Time to first response byte, in seconds.",
        ),
        &["status"],
    )?;

    let frames_streamed_total = IntCounter::new(
        "pathcue_frames_streamed_total",
        "Annotated frames written to viewers.",
    )?;

    let announcements_total = IntCounterVec::new(
        PromOpts::new(
            "pathcue_announcements_total",
            "Directions handed to the speech worker.",
        ),
        &["direction"],
    )?;

    let active_viewers = IntGauge::new(
        "pathcue_active_viewers",
        "Viewers currently streaming /video_feed.",
    )?;

    registry.register(Box::new(http_requests_total.clone()))?;
    registry.register(Box::new(http_request_duration_seconds.clone()))?;
    registry.register(Box::new(frames_streamed_total.clone()))?;
    registry.register(Box::new(announcements_total.clone()))?;
    registry.register(Box::new(active_viewers.clone()))?;

    Ok(Metrics {
        registry,
        http_requests_total,
        http_request_duration_seconds,
        frames_streamed_total,
        announcements_total,
        active_viewers,
    })
}

/// Register the collectors. Until this succeeds every recording call is a no-op.
pub fn init() -> anyhow::Result<()> {
    if METRICS.get().is_none() {
        let _ = METRICS.set(build()?);
    }
    Ok(())
}

fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

pub fn record_frame() {
    if let Some(m) = metrics() {
        m.frames_streamed_total.inc();
    }
}

pub fn record_announcement(direction: Direction) {
    if let Some(m) = metrics() {
        m.announcements_total
            .with_label_values(&[direction.key()])
            .inc();
    }
}

pub fn viewer_started() {
    if let Some(m) = metrics() {
        m.active_viewers.inc();
    }
}

pub fn viewer_finished() {
    if let Some(m) = metrics() {
        m.active_viewers.dec();
    }
}

pub async fn prometheus_metrics() -> Response {
    let Some(m) = metrics() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "metrics disabled").into_response();
    };

    let families = m.registry.gather();
    let mut buf = Vec::new();
    if TextEncoder::new().encode(&families, &mut buf).is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to encode metrics",
        )
            .into_response();
    }

    (
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
        )],
        buf,
    )
        .into_response()
}

pub async fn track_http_metrics(req: Request<Body>, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str())
        .unwrap_or_else(|| req.uri().path())
        .to_owned();

    if route == "/metrics" || route == "/healthz" {
        return next.run(req).await;
    }

    let start = Instant::now();
    let response = next.run(req).await;

    if let Some(m) = metrics() {
        let status = response.status().as_u16().to_string();
        m.http_requests_total.with_label_values(&[&status]).inc();
        m.http_request_duration_seconds
            .with_label_values(&[&status])
            .observe(start.elapsed().as_secs_f64());
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collectors_register_and_record() -> anyhow::Result<()> {
        init()?;
        init()?;

        record_frame();
        record_announcement(Direction::Stop);

        let m = metrics().expect("metrics initialized");
        assert!(m.frames_streamed_total.get() >= 1);
        assert!(m.announcements_total.with_label_values(&["stop"]).get() >= 1);
        Ok(())
    }
}
