pub mod config;
pub mod error;
pub mod filecache;
pub mod placeholders;
pub mod types;
