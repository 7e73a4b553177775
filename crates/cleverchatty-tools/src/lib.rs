pub mod a2a_client;
pub mod error;
pub mod host;
pub mod internal;
pub mod mcp;
pub mod reverse;

pub use error::ToolsError;
pub use host::{NotificationCallback, ToolsHost};
pub use reverse::ReverseCapability;
