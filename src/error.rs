use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the execution engine and its adapters
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad strategy configuration, rejected before any order is placed
    #[error("invalid configuration: {0}")]
    Validation(String),

    /// Order gateway refused or failed a call
    #[error("gateway error: {0}")]
    Gateway(String),

    #[error("market data unavailable: {0}")]
    MarketData(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Redis(#[from] redis::RedisError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn gateway(msg: impl Into<String>) -> Self {
        Self::Gateway(msg.into())
    }

    pub fn basket_not_found(id: Uuid) -> Self {
        Self::NotFound { kind: "basket", id }
    }

    pub fn entry_not_found(id: Uuid) -> Self {
        Self::NotFound { kind: "entry", id }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
