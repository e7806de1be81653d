//! HTTP-01 challenge answering on the plain listener.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use crate::acme::{ChallengeManager, ACME_CHALLENGE_ROUTE};

/// Serve challenge tokens from `challenges`; every other request goes to `inner`.
pub fn with_challenges(inner: Router, challenges: ChallengeManager) -> Router {
    Router::new()
        .route(ACME_CHALLENGE_ROUTE, get(serve_challenge))
        .with_state(challenges)
        .fallback_service(inner)
}

async fn serve_challenge(
    State(challenges): State<ChallengeManager>,
    Path(token): Path<String>,
) -> Response {
    match challenges.get_response(&token) {
        Some(key_authorization) => {
            tracing::info!(token = %token, "Answered ACME challenge");
            (
                [(header::CONTENT_TYPE, "application/octet-stream")],
                key_authorization,
            )
                .into_response()
        }
        None => {
            tracing::debug!(token = %token, "Unknown ACME challenge token");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}
