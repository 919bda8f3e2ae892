//! Persistence layer: libSQL-backed storage for rules and message history.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use traits::{Direction, MessageStore, StoredMessage};
