// Core modules
pub mod api;
pub mod config;
pub mod error;
pub mod execution;
pub mod models;
pub mod persistence;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use execution::BasketEngine;
pub use models::*;
