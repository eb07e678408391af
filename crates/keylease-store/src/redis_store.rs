//! Redis lock store
//!
//! `SET NX PX` creates the lease; compare-and-delete, compare-and-extend and
//! the health tuple run as Lua scripts so each is one atomic round trip. The
//! connection is a `ConnectionManager`, which reconnects transparently and is
//! cheap to clone per call.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{RedisError, Script};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::scripts;
use crate::{LockStore, StoreError, StoreHealth, StoreResult};

/// Redis connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Full connection URL; takes precedence over the discrete fields
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            db: 0,
        }
    }
}

impl RedisConfig {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// `redis://[:password@]host:port/db` unless `url` is set
    pub fn connection_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        match &self.password {
            Some(password) if !password.is_empty() => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.db
            ),
            _ => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

fn command_error(op: &'static str, err: RedisError) -> StoreError {
    if err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() {
        StoreError::Unavailable(format!("{}: {}", op, err))
    } else {
        StoreError::command(op, err.to_string())
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    // PX 0 is rejected by Redis
    (ttl.as_millis() as u64).max(1)
}

/// Lock store backed by a single Redis primary
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    compare_and_delete: Script,
    compare_and_extend: Script,
    health: Script,
}

impl RedisStore {
    /// Connect using the given settings
    pub async fn connect(config: &RedisConfig) -> StoreResult<Self> {
        let url = config.connection_url();
        let client = redis::Client::open(url.as_str())
            .map_err(|e| StoreError::command("open client", e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        info!(host = %config.host, port = config.port, db = config.db, "Connected to Redis lock store");
        Ok(Self::from_connection(conn))
    }

    /// Wrap an existing connection manager
    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self {
            conn,
            compare_and_delete: Script::new(scripts::COMPARE_AND_DELETE),
            compare_and_extend: Script::new(scripts::COMPARE_AND_EXTEND),
            health: Script::new(scripts::HEALTH),
        }
    }
}

#[async_trait]
impl LockStore for RedisStore {
    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("PING", e))?;
        debug!(reply = %pong, "Redis ping");
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("SET NX", e))?;
        Ok(reply.is_some())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .compare_and_delete
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| command_error("compare-and-delete script", e))?;
        Ok(deleted == 1)
    }

    async fn compare_and_extend(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let extended: i64 = self
            .compare_and_extend
            .key(key)
            .arg(expected)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| command_error("compare-and-extend script", e))?;
        Ok(extended == 1)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let count: i64 = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("EXISTS", e))?;
        Ok(count == 1)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("GET", e))?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("DEL", e))?;
        Ok(())
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let mut conn = self.conn.clone();
        // -2: missing key, -1: no expiry
        let millis: i64 = redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("PTTL", e))?;
        Ok((millis > 0).then(|| Duration::from_millis(millis as u64)))
    }

    async fn health(&self, key: &str, expected: &str) -> StoreResult<StoreHealth> {
        let mut conn = self.conn.clone();
        let reply: Vec<i64> = self
            .health
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| command_error("health script", e))?;

        match reply.as_slice() {
            [exists, ttl_ms, is_owner] => Ok(StoreHealth {
                exists: *exists == 1,
                ttl_ms: *ttl_ms,
                is_owner: *is_owner == 1,
            }),
            other => Err(StoreError::InvalidResponse(format!(
                "health script returned {} values, expected 3",
                other.len()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_url_from_parts() {
        let config = RedisConfig {
            host: "cache.internal".to_string(),
            port: 6380,
            db: 2,
            ..Default::default()
        };
        assert_eq!(config.connection_url(), "redis://cache.internal:6380/2");
    }

    #[test]
    fn test_connection_url_with_password() {
        let config = RedisConfig {
            password: Some("s3cret".to_string()),
            ..Default::default()
        };
        assert_eq!(
            config.connection_url(),
            "redis://:s3cret@127.0.0.1:6379/0"
        );
    }

    #[test]
    fn test_explicit_url_wins() {
        let config = RedisConfig {
            host: "ignored".to_string(),
            ..RedisConfig::from_url("redis://example:7000/1")
        };
        assert_eq!(config.connection_url(), "redis://example:7000/1");
    }

    #[test]
    fn test_ttl_millis_never_zero() {
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
        assert_eq!(ttl_millis(Duration::from_secs(2)), 2000);
    }
}
