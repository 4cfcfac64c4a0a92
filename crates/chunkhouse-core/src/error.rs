//! Error Types for ChunkHouse Core
//!
//! ## Error Categories
//!
//! ### Data Errors
//! - `InvalidPart`: A part record violates its field constraints (empty device id,
//!   part index out of range, non-positive sampling rate)
//! - `InvalidShape`: A chunk message does not have the fixed expected layout
//! - `UnknownStatus`: A persisted part status string is not recognised
//!
//! ### Encoding Errors
//! - `Serialization`: JSON encode/decode failure
//!
//! ## Usage
//! All functions in this crate return `Result<T>` which is aliased to
//! `Result<T, CoreError>`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid part: {0}")]
    InvalidPart(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    InvalidShape { expected: usize, actual: usize },

    #[error("Unknown part status: {0}")]
    UnknownStatus(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
