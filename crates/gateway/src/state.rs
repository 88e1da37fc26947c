//! Shared application state for the gateway

use std::sync::Arc;

use courier_auth::TokenValidator;
use courier_chats::{ChatService, EventPublisher, MessagePipeline, PipelineSettings};
use courier_config::{MessageConfig, RealtimeConfig};
use courier_database::ParticipantRepository;
use sqlx::SqlitePool;

use crate::hub::DeliveryHub;
use crate::registry::ConnectionRegistry;

/// Shared application state containing all services
#[derive(Clone)]
pub struct GatewayState {
    /// Database connection pool
    pub pool: SqlitePool,
    /// Resolves bearer tokens to user ids
    pub validator: Arc<dyn TokenValidator>,
    /// Live realtime connections
    pub registry: Arc<ConnectionRegistry>,
    pub hub: Arc<DeliveryHub>,
    pub pipeline: Arc<MessagePipeline>,
    pub chat_service: Arc<ChatService>,
    pub participants: ParticipantRepository,
    pub realtime: RealtimeConfig,
}

impl GatewayState {
    /// Wire the registry, hub and services together over one pool
    pub fn new(
        pool: SqlitePool,
        validator: Arc<dyn TokenValidator>,
        realtime: RealtimeConfig,
        messages: &MessageConfig,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(realtime.max_connections_per_user));
        let hub = Arc::new(DeliveryHub::new(registry.clone()));
        let publisher: Arc<dyn EventPublisher> = hub.clone();

        let pipeline = Arc::new(MessagePipeline::new(
            pool.clone(),
            publisher.clone(),
            PipelineSettings::from_config(&realtime, messages),
        ));
        let chat_service = Arc::new(ChatService::new(pool.clone(), publisher));

        Self {
            participants: ParticipantRepository::new(pool.clone()),
            pool,
            validator,
            registry,
            hub,
            pipeline,
            chat_service,
            realtime,
        }
    }
}
