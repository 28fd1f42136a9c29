//! Kafka plumbing shared by every service: client construction, JSON
//! publishing and a per-message consumer loop with retry and dead-lettering.

use anyhow::anyhow;
use async_trait::async_trait;
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::message::{BorrowedMessage, Header, Headers, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::Message;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::retry::Backoff;
use crate::{Envelope, SCHEMA_VERSION};

pub fn producer(brokers: &str) -> KafkaResult<FutureProducer> {
    ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .set("message.timeout.ms", "5000")
        .create()
}

/// Offsets are committed by [`ConsumerLoop`] once a message was handled.
pub fn consumer(brokers: &str, group_id: &str, topics: &[&str]) -> KafkaResult<StreamConsumer> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("group.id", group_id)
        .set("bootstrap.servers", brokers)
        .set("enable.partition.eof", "false")
        .set("session.timeout.ms", "6000")
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "latest")
        .create()?;
    consumer.subscribe(topics)?;
    Ok(consumer)
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to deliver to '{topic}': {source}")]
    Delivery {
        topic: String,
        #[source]
        source: KafkaError,
    },
}

#[derive(Clone)]
pub struct KafkaPublisher {
    producer: FutureProducer,
    timeout: Duration,
}

impl KafkaPublisher {
    pub fn new(producer: FutureProducer) -> Self {
        Self {
            producer,
            timeout: Duration::from_secs(5),
        }
    }

    /// Publishes `event` as JSON with an `event-id` header.
    pub async fn publish<T>(&self, topic: &str, key: &str, event: &T) -> Result<(), PublishError>
    where
        T: Serialize + Envelope + Sync,
    {
        let json = serde_json::to_string(event)?;
        let event_id = event.event_id().to_string();
        let headers = OwnedHeaders::new().insert(Header {
            key: "event-id",
            value: Some(&event_id),
        });
        let record = FutureRecord::to(topic)
            .payload(&json)
            .key(key)
            .headers(headers);

        self.producer
            .send(record, self.timeout)
            .await
            .map_err(|(source, _)| PublishError::Delivery {
                topic: topic.to_string(),
                source,
            })?;

        debug!(topic, key, event_id = %event_id, "event published");
        Ok(())
    }

    async fn forward_dead_letter(
        &self,
        topic: &str,
        message: &BorrowedMessage<'_>,
        reason: &str,
    ) -> Result<(), PublishError> {
        let mut headers = OwnedHeaders::new();
        if let Some(original) = message.headers() {
            for header in original.iter() {
                headers = headers.insert(Header {
                    key: header.key,
                    value: header.value,
                });
            }
        }
        let headers = headers
            .insert(Header {
                key: "error",
                value: Some(reason),
            })
            .insert(Header {
                key: "source-topic",
                value: Some(message.topic()),
            });
        let mut record = FutureRecord::<[u8], [u8]>::to(topic)
            .payload(message.payload().unwrap_or_default())
            .headers(headers);
        if let Some(key) = message.key() {
            record = record.key(key);
        }

        self.producer
            .send(record, self.timeout)
            .await
            .map_err(|(source, _)| PublishError::Delivery {
                topic: topic.to_string(),
                source,
            })?;
        Ok(())
    }
}

/// Why a handler could not process a message.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Worth another attempt: a collaborator or the database was unavailable.
    #[error("{0}")]
    Retryable(anyhow::Error),
    /// The message itself is unusable; retrying cannot help.
    #[error("{0}")]
    Permanent(anyhow::Error),
}

impl HandlerError {
    pub fn retryable(e: impl Into<anyhow::Error>) -> Self {
        HandlerError::Retryable(e.into())
    }

    pub fn permanent(e: impl Into<anyhow::Error>) -> Self {
        HandlerError::Permanent(e.into())
    }
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    type Message: DeserializeOwned + Envelope + Clone + Send + Sync;

    fn name(&self) -> &'static str;

    async fn handle(&self, message: Self::Message) -> Result<(), HandlerError>;
}

#[derive(Debug, PartialEq, Eq)]
pub enum Delivery {
    Handled,
    Rejected(String),
}

pub fn decode<M: DeserializeOwned + Envelope>(payload: Option<&[u8]>) -> Result<M, HandlerError> {
    let bytes = payload.ok_or_else(|| HandlerError::permanent(anyhow!("empty payload")))?;
    let message: M = serde_json::from_slice(bytes)
        .map_err(|e| HandlerError::permanent(anyhow!("invalid payload: {e}")))?;
    if message.schema_version() > SCHEMA_VERSION {
        return Err(HandlerError::permanent(anyhow!(
            "unsupported schema version {} (max {})",
            message.schema_version(),
            SCHEMA_VERSION
        )));
    }
    Ok(message)
}

/// Decodes and hands one payload to `handler`, retrying retryable failures.
pub async fn deliver<H: MessageHandler>(
    handler: &H,
    payload: Option<&[u8]>,
    retry: &Backoff,
) -> Delivery {
    let message = match decode::<H::Message>(payload) {
        Ok(message) => message,
        Err(e) => return Delivery::Rejected(e.to_string()),
    };
    let event_id = message.event_id();

    let mut attempt = 1;
    loop {
        match handler.handle(message.clone()).await {
            Ok(()) => return Delivery::Handled,
            Err(HandlerError::Permanent(e)) => return Delivery::Rejected(e.to_string()),
            Err(HandlerError::Retryable(e)) if attempt >= retry.max_attempts => {
                return Delivery::Rejected(format!("gave up after {attempt} attempts: {e}"));
            }
            Err(HandlerError::Retryable(e)) => {
                let delay = retry.delay(attempt);
                warn!(
                    handler = handler.name(),
                    %event_id,
                    attempt,
                    error = %e,
                    "handler failed, retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

struct DeadLetters {
    publisher: KafkaPublisher,
    topic: String,
}

pub struct ConsumerLoop<H> {
    consumer: StreamConsumer,
    handler: H,
    dead_letters: Option<DeadLetters>,
    retry: Backoff,
    reconnect: Backoff,
}

impl<H: MessageHandler> ConsumerLoop<H> {
    pub fn new(consumer: StreamConsumer, handler: H) -> Self {
        Self {
            consumer,
            handler,
            dead_letters: None,
            retry: Backoff::default(),
            reconnect: Backoff::reconnect(),
        }
    }

    /// Without a dead-letter topic rejected messages are logged and skipped.
    pub fn with_dead_letters(mut self, publisher: KafkaPublisher, topic: impl Into<String>) -> Self {
        self.dead_letters = Some(DeadLetters {
            publisher,
            topic: topic.into(),
        });
        self
    }

    pub fn with_retry(mut self, retry: Backoff) -> Self {
        self.retry = retry;
        self
    }

    pub async fn run(self) {
        let name = self.handler.name();
        let mut message_stream = self.consumer.stream();
        let mut receive_failures = 0u32;
        info!(handler = name, "consumer started");

        while let Some(message) = message_stream.next().await {
            let m = match message {
                Ok(m) => {
                    receive_failures = 0;
                    m
                }
                Err(e) => {
                    receive_failures = receive_failures.saturating_add(1);
                    let delay = self.reconnect.delay(receive_failures);
                    error!(handler = name, error = %e, "error receiving message, backing off {:?}", delay);
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            let delivery = deliver(&self.handler, m.payload(), &self.retry).await;
            let forward = self.dead_letters.as_ref().map(|dlq| {
                let m = &m;
                move |reason: String| async move {
                    dlq.publisher.forward_dead_letter(&dlq.topic, m, &reason).await
                }
            });
            match dispose(delivery, forward, &self.reconnect).await {
                Disposal::Handled => {}
                Disposal::Skipped(reason) => warn!(
                    handler = name,
                    topic = m.topic(),
                    offset = m.offset(),
                    reason,
                    "message skipped"
                ),
                Disposal::DeadLettered(reason) => warn!(
                    handler = name,
                    topic = m.topic(),
                    partition = m.partition(),
                    offset = m.offset(),
                    reason,
                    "message dead-lettered"
                ),
                Disposal::Stuck(e) => {
                    // Committing now would drop the message, and so would any later commit.
                    error!(
                        handler = name,
                        topic = m.topic(),
                        offset = m.offset(),
                        error = %e,
                        "failed to dead-letter message, stopping consumer"
                    );
                    return;
                }
            }

            if let Err(e) = self.consumer.commit_message(&m, CommitMode::Async) {
                error!(handler = name, error = %e, "error committing message");
            }
        }

        warn!(handler = name, "consumer stream ended");
    }
}

/// What became of a consumed message. Only `Stuck` forbids committing it.
#[derive(Debug)]
pub enum Disposal {
    Handled,
    /// Rejected with no dead-letter topic configured.
    Skipped(String),
    DeadLettered(String),
    Stuck(PublishError),
}

/// Settles a delivery, forwarding rejected messages with `forward` until the
/// dead-letter topic accepts them or `retry` gives up.
pub async fn dispose<F, Fut>(delivery: Delivery, forward: Option<F>, retry: &Backoff) -> Disposal
where
    F: Fn(String) -> Fut,
    Fut: std::future::Future<Output = Result<(), PublishError>>,
{
    let reason = match delivery {
        Delivery::Handled => return Disposal::Handled,
        Delivery::Rejected(reason) => reason,
    };
    let Some(forward) = forward else {
        return Disposal::Skipped(reason);
    };
    match retry.retry("dead-letter message", || forward(reason.clone())).await {
        Ok(()) => Disposal::DeadLettered(reason),
        Err(e) => Disposal::Stuck(e),
    }
}

/// Dead-letter topic name for `topic`.
pub fn dead_letter_topic(topic: &str) -> String {
    format!("{topic}.dlq")
}
