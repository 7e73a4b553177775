pub mod client;
pub mod transport;

pub use client::{McpClient, NotificationHandler};
pub use transport::TransportConfig;
