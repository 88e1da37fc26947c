pub mod chat_service;
pub mod pipeline;
pub mod retry;
pub mod sequencer;

pub use chat_service::{ChatService, CreateChat, CreatedChat};
pub use pipeline::{MessagePipeline, Outcome, PageRequest, PipelineSettings, SendMessage};
pub use retry::RetryPolicy;
pub use sequencer::ChatSequencer;
