pub mod callbacks;
pub mod engine;
pub mod error;
pub mod history;
pub mod processor;

pub use callbacks::{AgentMessageCallback, EngineCallback, EngineEvent, NotificationCallback};
pub use engine::ConversationEngine;
pub use error::EngineError;
