//! Redis list used as the primary anomaly queue.

use std::time::Duration;

use anyhow::{Context, Result};

use super::{QueueStore, SinkError};
use crate::config::QueueConfig;

pub type QueuePool = r2d2::Pool<redis::Client>;

/// Anomalies are pushed to the head of a Redis list; consumers pop from
/// the tail.
pub struct RedisQueue {
    pool: QueuePool,
    queue_key: String,
}

impl RedisQueue {
    /// Build the connection pool and verify the server answers PING.
    pub fn connect(cfg: &QueueConfig) -> Result<Self> {
        let client = redis::Client::open(cfg.url.as_str())
            .with_context(|| format!("invalid queue url {}", cfg.url))?;

        let pool = r2d2::Pool::builder()
            .max_size(cfg.pool_size)
            .min_idle(Some(1))
            .connection_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .build(client)
            .with_context(|| format!("failed to connect to {}", cfg.url))?;

        let queue = Self {
            pool,
            queue_key: cfg.queue_key.clone(),
        };
        queue.ping().context("queue did not answer PING")?;
        Ok(queue)
    }

    pub fn queue_key(&self) -> &str {
        &self.queue_key
    }
}

impl QueueStore for RedisQueue {
    fn push(&self, payload: &str) -> Result<(), SinkError> {
        let mut conn = self.pool.get()?;
        redis::cmd("LPUSH")
            .arg(&self.queue_key)
            .arg(payload)
            .query::<i64>(&mut *conn)?;
        Ok(())
    }

    fn backlog(&self) -> Result<u64, SinkError> {
        let mut conn = self.pool.get()?;
        let n = redis::cmd("LLEN").arg(&self.queue_key).query::<u64>(&mut *conn)?;
        Ok(n)
    }

    fn ping(&self) -> Result<(), SinkError> {
        let mut conn = self.pool.get()?;
        redis::cmd("PING").query::<String>(&mut *conn)?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("redis list {}", self.queue_key)
    }
}
