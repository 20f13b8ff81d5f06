//! # CaskKV
//!
//! A log-structured, append-only key-value store with:
//! - Append-only data files, never mutated in place
//! - An in-memory key index rebuilt from compact hint files on startup
//! - File rotation once the active file outgrows its size limit
//! - Background compaction that rewrites live data while the store stays online
//! - Single-writer/multi-reader concurrency model
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                              │
//! │              (Single Writer / Multi Reader)                  │
//! └──────┬──────────────────────┬───────────────────────┬───────┘
//!        │ put/delete           │ get                   │ merge
//!        ▼                      ▼                       ▼
//! ┌─────────────┐        ┌─────────────┐        ┌─────────────┐
//! │ Active File │        │   KeyDir    │◀───────│  Compactor  │
//! │ (.data +    │        │  (RwLock)   │        │  (thread)   │
//! │  .hint)     │        └──────┬──────┘        └──────┬──────┘
//! └──────┬──────┘               │                      │
//!        │ rotate               ▼                      ▼
//!        │               ┌─────────────┐        retire old files
//!        └──────────────▶│FileRegistry │◀──────────────┘
//!                        │  (frozen)   │
//!                        └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod codec;
pub mod file;
pub mod keydir;
pub mod lock;
pub mod merge;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{CaskError, Result};
pub use config::{Config, SyncStrategy};
pub use engine::Engine;
pub use merge::{MergePhase, MergeStats};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of CaskKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
