//! Durable entities owned by the message store

pub mod chat;
pub mod message;
pub mod participant;
pub mod receipt;

pub use chat::{Chat, ChatKind, NewChat};
pub use message::{Message, MessageCursor, NewMessage};
pub use participant::{ChatParticipant, ParticipantRemoval};
pub use receipt::ReadReceipt;
