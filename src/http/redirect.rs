//! Plain-HTTP handler that sends every request to its HTTPS equivalent.

use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;

/// Router answering any method and path with a permanent redirect.
pub fn redirect_router() -> Router {
    Router::new().fallback(redirect_to_https)
}

async fn redirect_to_https(headers: HeaderMap, uri: Uri) -> Response {
    let authority = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.authority().map(|a| a.as_str()));

    let Some(authority) = authority.filter(|a| !a.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing host").into_response();
    };

    let path = uri.path_and_query().map_or("/", |p| p.as_str());
    let location = format!("https://{}{}", strip_port(authority), path);
    tracing::trace!(location = %location, "Redirecting to HTTPS");

    (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response()
}

/// Host part of `host[:port]`, keeping IPv6 brackets.
fn strip_port(authority: &str) -> &str {
    if authority.starts_with('[') {
        return match authority.find(']') {
            Some(end) => &authority[..=end],
            None => authority,
        };
    }
    match authority.rsplit_once(':') {
        Some((host, _)) => host,
        None => authority,
    }
}
