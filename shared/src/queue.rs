//! Work queue on a Redis stream with a consumer group.
//!
//! Jobs are acknowledged only after they were processed, so a crashed or
//! failing worker leaves them pending for redelivery. Jobs that keep failing
//! are moved to `<stream>:dlq`.

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::RedisResult;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

// Pending entries trimmed from the stream come back with nil fields.
type StreamReply = Vec<(String, Vec<(String, Option<Vec<(String, String)>>)>)>;

const PAYLOAD_FIELD: &str = "job";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("failed to encode job: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A job as read from the stream, not yet decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawJob {
    pub id: String,
    pub payload: String,
    /// How many times the group has handed this job out, this time included.
    pub deliveries: u64,
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn ensure_group(&self) -> Result<(), QueueError>;

    /// Jobs delivered to this consumer earlier but never acknowledged.
    async fn read_pending(&self, count: usize) -> Result<Vec<RawJob>, QueueError>;

    /// Waits up to the configured block time for new jobs.
    async fn read_new(&self, count: usize) -> Result<Vec<RawJob>, QueueError>;

    async fn ack(&self, id: &str) -> Result<(), QueueError>;

    /// Copies the job to the dead-letter stream and acknowledges it.
    async fn dead_letter(&self, job: &RawJob, reason: &str) -> Result<(), QueueError>;
}

#[derive(Clone)]
pub struct RedisQueue {
    redis: ConnectionManager,
    stream: String,
    group: String,
    consumer: String,
    max_length: usize,
    block_ms: usize,
}

impl RedisQueue {
    pub async fn connect(redis_url: &str, stream: impl Into<String>) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;
        info!(redis_url, "connected to redis");
        Ok(Self {
            redis,
            stream: stream.into(),
            group: "workers".to_string(),
            consumer: format!("worker-{}", std::process::id()),
            max_length: 100_000,
            block_ms: 5_000,
        })
    }

    pub fn with_group(mut self, group: impl Into<String>, consumer: impl Into<String>) -> Self {
        self.group = group.into();
        self.consumer = consumer.into();
        self
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn dead_letter_stream(&self) -> String {
        format!("{}:dlq", self.stream)
    }

    /// Appends a job and returns its stream id.
    pub async fn push<J: Serialize + Sync>(&self, job: &J) -> Result<String, QueueError> {
        let payload = serde_json::to_string(job)?;
        let mut conn = self.redis.clone();
        let id: String = redis::cmd("XADD")
            .arg(&self.stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_length)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(&payload)
            .query_async(&mut conn)
            .await?;
        debug!(stream = %self.stream, id = %id, "job queued");
        Ok(id)
    }

    async fn delivery_counts(&self, count: usize) -> Result<HashMap<String, u64>, QueueError> {
        let mut conn = self.redis.clone();
        let pending: RedisResult<Vec<(String, String, i64, i64)>> = redis::cmd("XPENDING")
            .arg(&self.stream)
            .arg(&self.group)
            .arg("-")
            .arg("+")
            .arg(count)
            .arg(&self.consumer)
            .query_async(&mut conn)
            .await;
        match pending {
            Ok(entries) => Ok(entries
                .into_iter()
                .map(|(id, _, _, deliveries)| (id, deliveries.max(0) as u64))
                .collect()),
            Err(e) if e.to_string().contains("NOGROUP") => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

fn jobs_from(reply: StreamReply) -> impl Iterator<Item = (String, Option<String>)> {
    reply.into_iter().flat_map(|(_, entries)| {
        entries.into_iter().map(|(id, fields)| {
            let payload = fields
                .unwrap_or_default()
                .into_iter()
                .find(|(name, _)| name == PAYLOAD_FIELD)
                .map(|(_, value)| value);
            (id, payload)
        })
    })
}

#[async_trait]
impl WorkQueue for RedisQueue {
    async fn ensure_group(&self) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match result {
            Ok(()) => {
                info!(stream = %self.stream, group = %self.group, "created consumer group");
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_pending(&self, count: usize) -> Result<Vec<RawJob>, QueueError> {
        let mut conn = self.redis.clone();
        let reply: RedisResult<StreamReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(count)
            .arg("STREAMS")
            .arg(&self.stream)
            .arg("0")
            .query_async(&mut conn)
            .await;
        let reply = match reply {
            Ok(reply) => reply,
            Err(e) if e.to_string().contains("NOGROUP") => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        let entries: Vec<_> = jobs_from(reply).collect();
        if entries.is_empty() {
            return Ok(vec![]);
        }
        let counts = self.delivery_counts(count.max(entries.len())).await?;
        Ok(entries
            .into_iter()
            .map(|(id, payload)| RawJob {
                deliveries: counts.get(&id).copied().unwrap_or(1),
                payload: payload.unwrap_or_default(),
                id,
            })
            .collect())
    }

    async fn read_new(&self, count: usize) -> Result<Vec<RawJob>, QueueError> {
        let mut conn = self.redis.clone();
        let reply: RedisResult<Option<StreamReply>> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("BLOCK")
            .arg(self.block_ms)
            .arg("COUNT")
            .arg(count)
            .arg("STREAMS")
            .arg(&self.stream)
            .arg(">")
            .query_async(&mut conn)
            .await;
        match reply {
            Ok(Some(reply)) => Ok(jobs_from(reply)
                .map(|(id, payload)| RawJob {
                    id,
                    payload: payload.unwrap_or_default(),
                    deliveries: 1,
                })
                .collect()),
            Ok(None) => Ok(vec![]),
            Err(e) if e.to_string().contains("NOGROUP") => Ok(vec![]),
            Err(e) => Err(e.into()),
        }
    }

    async fn ack(&self, id: &str) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let _: i64 = redis::cmd("XACK")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(id)
            .query_async(&mut conn)
            .await?;
        debug!(stream = %self.stream, id, "job acknowledged");
        Ok(())
    }

    async fn dead_letter(&self, job: &RawJob, reason: &str) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let failed_at = Utc::now().to_rfc3339();
        let _: String = redis::cmd("XADD")
            .arg(self.dead_letter_stream())
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_length)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(&job.payload)
            .arg("error")
            .arg(reason)
            .arg("original_id")
            .arg(&job.id)
            .arg("deliveries")
            .arg(job.deliveries)
            .arg("failed_at")
            .arg(&failed_at)
            .query_async(&mut conn)
            .await?;
        self.ack(&job.id).await?;
        info!(stream = %self.stream, id = %job.id, reason, "job moved to dead-letter stream");
        Ok(())
    }
}
