//! Versioned API handlers.

mod chat;
mod sessions;

pub use chat::{chat, chat_stream};
pub use sessions::{delete_session, get_turns, list_sessions};
