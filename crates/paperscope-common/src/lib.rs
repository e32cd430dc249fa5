//! paperscope-common — Shared configuration, errors, and entity types used across Paperscope crates.

pub mod config;
pub mod entities;
pub mod error;

// Re-export commonly used types
pub use config::OllamaConfig;
pub use entities::Paper;
pub use error::{ConfigError, Result};
