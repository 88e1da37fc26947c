//! # Courier Chats
//!
//! Chat domain logic for Courier: chat and participant management plus the
//! message pipeline that persists every mutation and announces it to
//! connected clients.
//!
//! ## Architecture
//!
//! - **Services**: [`MessagePipeline`] for messages, [`ChatService`] for chats and membership
//! - **Types**: errors, server events, client frames and client-facing views
//! - **Publisher**: the [`EventPublisher`] seam the realtime gateway implements
//! - **Utils**: permission checks
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use courier_chats::{EventPublisher, MessagePipeline, PipelineSettings, SendMessage};
//!
//! async fn example(pool: sqlx::SqlitePool, publisher: Arc<dyn EventPublisher>) {
//!     let pipeline = MessagePipeline::new(pool, publisher, PipelineSettings::default());
//!     let message = pipeline
//!         .send(SendMessage {
//!             chat_id: "chat".into(),
//!             sender_id: "alice".into(),
//!             content: Some("hello".into()),
//!             ..Default::default()
//!         })
//!         .await;
//! }
//! ```

pub mod publisher;
pub mod services;
pub mod types;
pub mod utils;

pub use publisher::{EventPublisher, MembershipChange};
pub use services::{
    ChatService, CreateChat, CreatedChat, MessagePipeline, Outcome, PageRequest, PipelineSettings,
    RetryPolicy, SendMessage,
};
pub use types::{
    ChatError, ChatResult, ChatView, ClientFrame, DeleteScope, ErrorKind, MessagePage, MessageView,
    ParticipantView, ServerEvent,
};
