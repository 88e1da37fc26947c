//! REST API endpoints for the gateway

pub mod chats;
pub mod health;
pub mod messages;
pub mod participants;

use axum::Router;
use crate::state::GatewayState;
use std::sync::Arc;

/// Create all REST API routes; callers add authentication
pub fn create_rest_routes() -> Router<Arc<GatewayState>> {
    Router::new()
        // Chat routes
        .merge(chats::create_chat_routes())
        // Participant routes
        .merge(participants::create_participant_routes())
        // Message history
        .merge(messages::create_message_routes())
}

// Re-export for convenience
pub use chats::*;
pub use health::*;
pub use messages::*;
pub use participants::*;
