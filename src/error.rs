//! Error types for CaskKV
//!
//! Provides a unified error type for all operations.

use std::path::PathBuf;

use thiserror::Error;

use crate::file::FileId;

/// Result type alias using CaskError
pub type Result<T> = std::result::Result<T, CaskError>;

/// Unified error type for CaskKV operations
#[derive(Debug, Error)]
pub enum CaskError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A data file referenced by the index is no longer on disk
    #[error("Data file {0} not found")]
    FileNotFound(FileId),

    // -------------------------------------------------------------------------
    // Lookup Errors
    // -------------------------------------------------------------------------
    #[error("Key not found")]
    KeyNotFound,

    // -------------------------------------------------------------------------
    // Integrity Errors
    // -------------------------------------------------------------------------
    #[error("Checksum mismatch: expected {expected:#010x}, computed {actual:#010x}")]
    Checksum { expected: u32, actual: u32 },

    #[error("Malformed data: {0}")]
    Format(String),

    // -------------------------------------------------------------------------
    // Directory Ownership
    // -------------------------------------------------------------------------
    #[error("Directory is locked by another instance: {0}")]
    LockHeld(PathBuf),

    // -------------------------------------------------------------------------
    // Caller Errors
    // -------------------------------------------------------------------------
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CaskError {
    /// True for corruption signals (bad checksum or malformed layout)
    pub fn is_corruption(&self) -> bool {
        matches!(self, CaskError::Checksum { .. } | CaskError::Format(_))
    }
}
