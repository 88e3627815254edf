use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::{timeout, Duration};

use super::{RegistrySnapshot, SnapshotStore};
use crate::error::EngineError;
use crate::Result;

const DEFAULT_KEY: &str = "basketbot:registry";

/// Redis persistence for the registry snapshot
///
/// The whole snapshot is stored as one JSON string under a single key.
pub struct RedisStore {
    conn: ConnectionManager,
    key: String,
}

impl RedisStore {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub async fn new(redis_url: &str) -> Result<Self> {
        Self::with_key(redis_url, DEFAULT_KEY).await
    }

    pub async fn with_key(redis_url: &str, key: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        // Add 5 second timeout to connection attempt
        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| {
                EngineError::Persistence("Redis connection timeout after 5 seconds".to_string())
            })??;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self {
            conn,
            key: key.to_string(),
        })
    }

    /// Remove the stored snapshot
    pub async fn clear(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(&self.key).await?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for RedisStore {
    async fn save_snapshot(&self, snapshot: &RegistrySnapshot) -> Result<()> {
        let value = serde_json::to_string(snapshot)?;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(&self.key, value).await?;

        tracing::debug!(key = %self.key, "Saved registry snapshot to Redis");
        Ok(())
    }

    async fn load_snapshot(&self) -> Result<Option<RegistrySnapshot>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(&self.key).await?;

        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}
