use super::types::CertsAppState;
use crate::challenges::ChallengeError;
use autossl_core::error_builder::{bad_gateway, bad_request, not_found, ErrorBuilder};
use autossl_core::problemdetails::Problem;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::sync::Arc;
use tracing::debug;
use utoipa::OpenApi;

impl From<ChallengeError> for Problem {
    fn from(error: ChallengeError) -> Self {
        match error {
            ChallengeError::ZoneNotFound(domain) => bad_request()
                .title("DNS Zone Not Found")
                .detail(format!("No DNS zone in the credential's account matches {}", domain))
                .build(),
            ChallengeError::Provider(e) => bad_gateway()
                .title("DNS Provider Error")
                .detail(e.to_string())
                .build(),
            ChallengeError::LocalVerification(msg) => ErrorBuilder::new(StatusCode::BAD_GATEWAY)
                .title("Challenge Not Reachable")
                .detail(msg)
                .build(),
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(serve_http_challenge),
    tags((name = "ACME Challenges", description = "HTTP-01 challenge responder"))
)]
pub struct ChallengeApiDoc;

/// Serve an HTTP-01 key authorization
///
/// The CA fetches this path on port 80 while validating an order.
#[utoipa::path(
    get,
    path = "/.well-known/acme-challenge/{token}",
    responses(
        (status = 200, description = "Key authorization", body = String, content_type = "text/plain"),
        (status = 404, description = "Unknown token")
    ),
    params(("token" = String, Path, description = "Challenge token")),
    tag = "ACME Challenges"
)]
async fn serve_http_challenge(
    State(app_state): State<Arc<CertsAppState>>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, Problem> {
    match app_state.coordinator.get_http_challenge(&token).await {
        Some(key_authorization) => {
            debug!("Answered HTTP-01 challenge {}", token);
            Ok((
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/plain")],
                key_authorization,
            ))
        }
        None => Err(not_found()
            .detail(format!("No pending challenge for token {}", token))
            .build()),
    }
}

pub fn configure_routes() -> Router<Arc<CertsAppState>> {
    Router::new().route(
        "/.well-known/acme-challenge/{token}",
        get(serve_http_challenge),
    )
}
