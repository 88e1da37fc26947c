//! Middleware for authentication and other cross-cutting concerns

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, Method},
    middleware::Next,
    response::Response,
};
use courier_auth::{bearer_token, AuthError};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{debug, Level};

use crate::error::GatewayError;
use crate::state::GatewayState;

/// Caller identity, inserted into request extensions by [`auth_middleware`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

impl AuthenticatedUser {
    pub fn id(&self) -> &str {
        &self.0
    }
}

/// Token from an `Authorization: Bearer` header, if present and well formed
pub fn header_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_string)
}

/// Authentication middleware that validates bearer tokens
pub async fn auth_middleware(
    State(state): State<Arc<GatewayState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let token = header_token(request.headers()).ok_or(AuthError::MissingToken)?;

    let user_id = state.validator.validate_token(&token).map_err(|error| {
        debug!(%error, path = %request.uri().path(), "rejected request");
        GatewayError::from(error)
    })?;

    request.extensions_mut().insert(AuthenticatedUser(user_id));
    Ok(next.run(request).await)
}

/// Create tracing middleware
pub fn create_trace_middleware(
) -> TraceLayer<tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>> {
    TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG))
}

/// Logging middleware for request/response logging
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let start = std::time::Instant::now();
    let response = next.run(request).await;
    let duration = start.elapsed();

    tracing::info!(
        method = %method,
        uri = %uri.path(),
        status = %response.status(),
        duration_ms = duration.as_millis(),
        "Request completed"
    );

    response
}

/// CORS middleware for cross-origin requests
pub fn create_cors_middleware() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::ACCEPT, header::CONTENT_TYPE])
}
