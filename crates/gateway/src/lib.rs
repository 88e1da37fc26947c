//! # Courier Gateway Crate
//!
//! HTTP and realtime edge of Courier. REST calls and websocket frames are
//! authenticated here and handed to the chat services; events those services
//! publish come back through the [`DeliveryHub`] to every open connection.
//!
//! ## Architecture
//!
//! - **REST**: chat, participant and history endpoints with OpenAPI documentation
//! - **WebSocket**: per-connection sessions with bounded outbound queues
//! - **Registry**: live connections and the chat participant directory
//! - **Hub**: fan-out of published events, evicting slow consumers
//! - **Middleware**: authentication, CORS and request logging
//!
//! ## Usage
//!
//! ```rust,ignore
//! use courier_gateway::{create_router, GatewayState};
//!
//! let state = GatewayState::new(pool, validator, config.realtime, &config.messages);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, create_router(std::sync::Arc::new(state))).await?;
//! ```

pub mod error;
pub mod hub;
pub mod middleware;
pub mod registry;
pub mod rest;
pub mod state;
pub mod websocket;

// Re-export main types for convenience
pub use error::{ErrorResponse, GatewayError, GatewayResult};
pub use hub::{DeliveryHub, DeliveryReport};
pub use middleware::{auth_middleware, AuthenticatedUser};
pub use registry::{ChatScope, CloseReason, ConnectionHandle, ConnectionRegistry, RegistryError};
pub use state::GatewayState;

use axum::{middleware as axum_middleware, routing::get, Router};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        rest::health::health_check,
        rest::chats::list_chats,
        rest::chats::create_chat,
        rest::chats::get_chat,
        rest::chats::hide_chat,
        rest::participants::list_participants,
        rest::participants::add_participant,
        rest::participants::remove_participant,
        rest::messages::list_messages,
    ),
    components(
        schemas(
            error::ErrorResponse,
            rest::health::HealthResponse,
            rest::chats::ChatResponse,
            rest::chats::CreateChatRequest,
            rest::participants::ParticipantResponse,
            rest::participants::AddParticipantRequest,
            rest::participants::RemoveParticipantResponse,
            rest::messages::MessageResponse,
            rest::messages::MessagePageResponse,
        )
    ),
    tags(
        (name = "Health", description = "Liveness"),
        (name = "Chats", description = "Chat management"),
        (name = "Participants", description = "Chat membership"),
        (name = "Messages", description = "Message history"),
    )
)]
pub struct ApiDoc;

/// Create the main application router with all routes
pub fn create_router(state: Arc<GatewayState>) -> Router {
    let rest = rest::create_rest_routes().route_layer(axum_middleware::from_fn_with_state(
        state.clone(),
        middleware::auth_middleware,
    ));

    let api = Router::new()
        .merge(rest)
        .merge(websocket::create_websocket_routes());

    let mut router = Router::new()
        .nest("/api", api)
        .route("/health", get(rest::health::health_check))
        .with_state(state)
        .layer(middleware::create_cors_middleware())
        .layer(middleware::create_trace_middleware())
        .layer(axum_middleware::from_fn(middleware::logging_middleware));

    // Add Swagger UI if in debug mode
    #[cfg(debug_assertions)]
    {
        router = router.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));
    }

    router
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_rest_paths() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();

        assert!(paths.iter().any(|p| p.as_str() == "/api/chats"));
        assert!(paths.iter().any(|p| p.as_str() == "/api/chats/{chat_id}/messages"));
        assert!(paths.iter().any(|p| p.as_str() == "/health"));
    }
}
