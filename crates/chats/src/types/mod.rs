pub mod errors;
pub mod events;
pub mod frames;
pub mod views;

pub use errors::{ChatError, ChatResult, ErrorKind};
pub use events::{DeleteScope, ServerEvent};
pub use frames::ClientFrame;
pub use views::{ChatView, MessagePage, MessageView, ParticipantView};
