pub mod manager;

pub use manager::{Session, SessionHooks, SessionManager};
