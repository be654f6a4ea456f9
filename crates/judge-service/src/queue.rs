//! The downstream alert queue: pushes triggered/recovered events onto a
//! Redis list keyed by priority via `LPUSH`, through a pooled connection.

use deadpool_redis::{Config, Pool, Runtime};
use judge_core::Event;
use redis::AsyncCommands;

use crate::error::ServiceError;

pub struct AlertQueue {
    pool: Pool,
    queue_pattern: String,
}

impl AlertQueue {
    pub fn new(redis_url: &str, queue_pattern: String) -> Result<Self, ServiceError> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(ServiceError::QueueConfig)?;
        Ok(Self { pool, queue_pattern })
    }

    /// Pushes one event's JSON encoding onto the queue selected by its
    /// priority. Failures are logged by the caller and otherwise
    /// swallowed — a dropped alert never blocks ingestion.
    pub async fn push(&self, event: &Event) -> Result<(), ServiceError> {
        let key = queue_key(&self.queue_pattern, event.priority());
        let payload = serde_json::to_string(event).map_err(ServiceError::EventEncode)?;

        let mut conn = self.pool.get().await.map_err(ServiceError::QueueConnection)?;
        conn.lpush::<_, _, ()>(key, payload)
            .await
            .map_err(ServiceError::QueuePush)
    }
}

fn queue_key(pattern: &str, priority: u8) -> String {
    pattern.replacen("{}", &priority.to_string(), 1)
}
