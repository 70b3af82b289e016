//! Redis binding of the candela broker seam.
//!
//! Queues use the LPUSH/BRPOP discipline (push to head, pop from tail), so
//! FIFO order is preserved per queue. Pub/sub rides Redis PSUBSCRIBE; the
//! windowed-reconciler lock is a plain `SET NX EX`.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use candela_core::broker::{Broker, TopicMessage};
use candela_core::error::CandelaError;

/// Connection settings for the broker, deserialized from the `broker`
/// section of the service configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Redis host.
    pub host: String,
    /// Redis port.
    pub port: u16,
    /// Optional AUTH password.
    pub password: Option<String>,
    /// Logical database index.
    pub db: i64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 6379,
            password: None,
            db: 0,
        }
    }
}

impl BrokerConfig {
    fn url(&self) -> String {
        match &self.password {
            Some(password) => format!("redis://:{password}@{}:{}/{}", self.host, self.port, self.db),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

/// A [`Broker`] backed by a single Redis instance.
///
/// Cheap to clone; all clones share one multiplexed connection. Pattern
/// subscriptions open their own pub/sub connection because Redis dedicates
/// a connection to subscriber mode.
#[derive(Clone)]
pub struct RedisBroker {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisBroker {
    /// Connect and verify the instance answers PING.
    ///
    /// # Errors
    /// Fails if the URL is malformed or the instance is unreachable.
    pub async fn connect(config: &BrokerConfig) -> Result<Self, CandelaError> {
        let client = redis::Client::open(config.url())
            .map_err(|e| CandelaError::broker("connect", e))?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| CandelaError::broker("connect", e))?;
        let broker = Self { client, conn };
        broker.ping().await?;
        debug!(host = %config.host, port = config.port, db = config.db, "broker connected");
        Ok(broker)
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn push(&self, queue: &str, payload: &str) -> Result<(), CandelaError> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(queue, payload)
            .await
            .map_err(|e| CandelaError::broker("lpush", e))
    }

    async fn pop_blocking(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<String>, CandelaError> {
        let mut conn = self.conn.clone();
        let popped: Option<(String, String)> = conn
            .brpop(queue, timeout.as_secs_f64())
            .await
            .map_err(|e| CandelaError::broker("brpop", e))?;
        Ok(popped.map(|(_, payload)| payload))
    }

    async fn pop_nonblocking(&self, queue: &str) -> Result<Option<String>, CandelaError> {
        let mut conn = self.conn.clone();
        conn.rpop(queue, None)
            .await
            .map_err(|e| CandelaError::broker("rpop", e))
    }

    async fn queue_len(&self, queue: &str) -> Result<u64, CandelaError> {
        let mut conn = self.conn.clone();
        conn.llen(queue)
            .await
            .map_err(|e| CandelaError::broker("llen", e))
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), CandelaError> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(topic, payload)
            .await
            .map_err(|e| CandelaError::broker("publish", e))
    }

    async fn pattern_subscribe(
        &self,
        pattern: &str,
    ) -> Result<mpsc::Receiver<TopicMessage>, CandelaError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| CandelaError::broker("psubscribe", e))?;
        pubsub
            .psubscribe(pattern)
            .await
            .map_err(|e| CandelaError::broker("psubscribe", e))?;

        let (tx, rx) = mpsc::channel(64);
        let pattern = pattern.to_owned();
        tokio::spawn(async move {
            let mut messages = pubsub.on_message();
            while let Some(msg) = messages.next().await {
                let topic = msg.get_channel_name().to_owned();
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(%topic, error = %e, "dropping non-utf8 pub/sub payload");
                        continue;
                    }
                };
                if tx.send(TopicMessage { topic, payload }).await.is_err() {
                    // subscriber gone; dropping the pubsub connection
                    // unsubscribes
                    break;
                }
            }
            debug!(%pattern, "pattern subscription ended");
        });
        Ok(rx)
    }

    async fn set_kv(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CandelaError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await
            .map_err(|e| CandelaError::broker("setex", e))
    }

    async fn get_kv(&self, key: &str) -> Result<Option<String>, CandelaError> {
        let mut conn = self.conn.clone();
        conn.get(key)
            .await
            .map_err(|e| CandelaError::broker("get", e))
    }

    async fn delete_kv(&self, key: &str) -> Result<bool, CandelaError> {
        let mut conn = self.conn.clone();
        let deleted: u64 = conn
            .del(key)
            .await
            .map_err(|e| CandelaError::broker("del", e))?;
        Ok(deleted > 0)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CandelaError> {
        let mut conn = self.conn.clone();
        conn.keys(pattern)
            .await
            .map_err(|e| CandelaError::broker("keys", e))
    }

    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<bool, CandelaError> {
        let mut conn = self.conn.clone();
        let acquired: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("held")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| CandelaError::broker("set-nx", e))?;
        Ok(acquired.is_some())
    }

    async fn ping(&self) -> Result<(), CandelaError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| CandelaError::broker("ping", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_includes_password_and_db_when_set() {
        let cfg = BrokerConfig {
            host: "broker.internal".into(),
            port: 6380,
            password: Some("hunter2".into()),
            db: 3,
        };
        assert_eq!(cfg.url(), "redis://:hunter2@broker.internal:6380/3");

        let plain = BrokerConfig::default();
        assert_eq!(plain.url(), "redis://localhost:6379/0");
    }
}
