//! Request handler assembly.
//!
//! The application router is wrapped once at startup; the result is served
//! by every listener.

use axum::Router;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use super::access_log::with_access_log;
use crate::observability::access_log::AccessLogSink;

/// Add request ids, request tracing and (optionally) the access log.
pub fn build_handler(app: Router, access_log: Option<AccessLogSink>) -> Router {
    let router = match access_log {
        Some(sink) => with_access_log(app, sink),
        None => app,
    };

    router
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}
