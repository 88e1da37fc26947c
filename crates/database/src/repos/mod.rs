//! Repository implementations over the SQLite pool

pub mod chat_repository;
pub mod message_repository;
pub mod participant_repository;
pub mod receipt_repository;

pub use chat_repository::ChatRepository;
pub use message_repository::MessageRepository;
pub use participant_repository::ParticipantRepository;
pub use receipt_repository::ReceiptRepository;
