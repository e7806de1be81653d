//! Access-log middleware.
//!
//! One [`AccessLogRecord`] is written per completed request. Handlers that
//! know the authenticated user attach a [`UserId`] to their response.
//!
//! The record is written when the response body is finished (or dropped by a
//! client that went away), so the byte count is what was actually sent and
//! the duration includes streaming the body.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;

use crate::observability::access_log::{AccessLogRecord, AccessLogSink};

/// Authenticated user for the access log; anonymous requests log 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserId(pub u64);

/// Wrap `router` so every response is recorded in `sink`.
pub fn with_access_log(router: Router, sink: AccessLogSink) -> Router {
    router.layer(middleware::from_fn_with_state(sink, record_access))
}

/// `X-Real-Ip`, then the first `X-Forwarded-For` hop, then the peer address.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(ip) = header_value("x-real-ip") {
        return ip.to_string();
    }
    if let Some(first) = header_value("x-forwarded-for").and_then(|v| v.split(',').next()) {
        let first = first.trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }
    peer.map(|addr| addr.ip().to_string()).unwrap_or_default()
}

/// A record waiting for its response body to finish.
struct PendingRecord {
    sink: AccessLogSink,
    record: AccessLogRecord,
    started: Instant,
}

impl Drop for PendingRecord {
    fn drop(&mut self) {
        self.record.timestamp = chrono::Utc::now().timestamp();
        self.record.duration = self.started.elapsed();
        self.sink.write(&self.record);
    }
}

async fn record_access(State(sink): State<AccessLogSink>, request: Request, next: Next) -> Response {
    let started = Instant::now();
    let uri = request
        .uri()
        .path_and_query()
        .map_or_else(|| request.uri().path().to_string(), |p| p.to_string());
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client_ip = client_ip(request.headers(), peer);
    let referer = request
        .headers()
        .get(header::REFERER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let response = next.run(request).await;

    let mut pending = PendingRecord {
        record: AccessLogRecord {
            timestamp: 0,
            uri,
            client_ip,
            referer,
            status: response.status().as_u16(),
            bytes_written: 0,
            user_id: response.extensions().get::<UserId>().map_or(0, |id| id.0),
            duration: Duration::ZERO,
        },
        sink,
        started,
    };

    let (parts, body) = response.into_parts();
    let body = body.map_frame(move |frame| {
        if let Some(data) = frame.data_ref() {
            pending.record.bytes_written += data.len() as u64;
        }
        frame
    });
    Response::from_parts(parts, Body::new(body))
}
