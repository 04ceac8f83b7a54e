// SQLite storage layer with sqlx
//
// This crate owns the connection pool and the event table:
// - Database: pool handle, schema creation at boot, insert/read operations

pub mod models;
pub mod repositories;

pub use models::*;
pub use repositories::Database;
