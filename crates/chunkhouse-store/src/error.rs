//! Part Store Error Types
//!
//! ## Error Categories
//!
//! ### Record Errors
//! - `PartAlreadyExists`: A part with the same `(device_id, chunk_idx, part_index)`
//!   was already stored
//! - `PartNotFound`: The addressed part does not exist
//! - `InvalidArgument`: A key field cannot be represented in the store
//!
//! ### Database Errors
//! - `DatabaseError`: SQLite operation failed (connection, busy, query, etc.)
//! - `MigrationError`: Schema migration failed on startup
//!
//! ### Data Errors
//! - `SerializationError`: Payload JSON could not be encoded or decoded
//! - `Core`: A stored row no longer satisfies the core model (unknown status, etc.)
//!
//! ## Usage
//!
//! ```ignore
//! use chunkhouse_store::{PartStore, StoreError};
//!
//! match store.insert_part(&part).await {
//!     Ok(()) => {}
//!     Err(StoreError::PartAlreadyExists(key)) => {
//!         tracing::warn!(%key, "Duplicate part ignored");
//!     }
//!     Err(e) => return Err(e),
//! }
//! ```

use chunkhouse_core::CoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Part already exists: {0}")]
    PartAlreadyExists(String),

    #[error("Part not found: {0}")]
    PartNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        StoreError::MigrationError(e.to_string())
    }
}
