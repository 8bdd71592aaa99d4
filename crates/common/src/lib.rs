//! PaperDuel Common Library
//!
//! Core of the paper comparison service:
//! - ELO rating engine, rotation and pool refresh policies
//! - Paper store interface with PostgreSQL and in-memory backends
//! - Paper source abstraction (arXiv, static)
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod arena;
pub mod config;
pub mod db;
pub mod errors;
pub mod metrics;
pub mod source;

// Re-export commonly used types
pub use arena::{Arena, MatchOutcome, RefreshReport, VoteResult};
pub use config::AppConfig;
pub use db::{InMemoryPaperStore, PaperStore, Repository};
pub use errors::{AppError, Result};
pub use source::{create_source, PaperSource};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
