//! # Redis
//!
//! The only persistence layer: a durable string-to-string mapping with no
//! transactions across keys.
//!
//! ## Requirements
//!
//! - Get/put by string key, JSON-serialized values
//! - Absent key reads as "no value", callers substitute their default
//! - No locking and no cross-key atomicity; every mutation is a full
//!   read-modify-write and the last writer wins
//!
//! ## Implementation
//!
//! - One `ConnectionManager` shared across handlers, cloned per command
//! - Values are whole JSON documents (a comment log, a country map, a
//!   timestamp window), rewritten in full on every update
//! - Individual visit logs land under their own `visit_*` keys and are
//!   never read back

use std::time::Duration;

use async_trait::async_trait;
use redis::{
    AsyncCommands, Client,
    aio::{ConnectionManager, ConnectionManagerConfig},
};

use crate::error::StoreError;

/// Get/put seam over the key-value namespace. The production backend is
/// Redis; tests swap in [`MemoryStore`].
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn put(&self, key: &str, value: String) -> Result<(), StoreError>;
}

/// Decode the JSON document stored under `key`, or `None` when the key has
/// never been written. Undecodable data is a [`StoreError::Corrupt`], not a
/// silent default.
pub async fn load_json<T: serde::de::DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

pub async fn init_redis(redis_url: &str) -> RedisStore {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(100));

    let client = Client::open(redis_url).unwrap();
    let connection_manager = client
        .get_connection_manager_with_config(config)
        .await
        .unwrap();

    RedisStore {
        connection: connection_manager,
    }
}

pub struct RedisStore {
    connection: ConnectionManager,
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut connection = self.connection.clone();
        let value: Option<String> = connection.get(key).await?;

        Ok(value)
    }

    async fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let _: () = connection.set(key, value).await?;

        Ok(())
    }
}
