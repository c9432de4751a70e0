pub mod connection;
pub mod migrations;
pub mod session_store;

pub use connection::{connect_with_settings, DbPool};
pub use session_store::SqliteSessionStore;
