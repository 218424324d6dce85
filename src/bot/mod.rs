/// Inline button router
pub(crate) mod callbacks;
/// Outbound messaging seam and its Telegram implementation
pub mod gateway;
/// Command definitions and the update engine
pub mod handlers;
/// Per-user session table
pub mod sessions;
/// Conversation state and deletion grants
pub mod state;
/// Texts and keyboards
pub mod views;

#[cfg(test)]
mod testing;

pub use gateway::{Gateway, TelegramGateway};
pub use handlers::{Command, Engine, EngineOptions, Inbound};
