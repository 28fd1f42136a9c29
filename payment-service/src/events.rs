//! Outbound messages of the payment service.

use async_trait::async_trait;
use shared::kafka::{KafkaPublisher, PublishError};
use shared::queue::{QueueError, RedisQueue};
use shared::{PaymentConfirmed, PaymentResult};

#[async_trait]
pub trait ResultPublisher: Send + Sync {
    async fn publish_result(&self, result: &PaymentResult) -> Result<(), PublishError>;
}

/// Customer notifications for approved payments.
#[async_trait]
pub trait NotificationQueue: Send + Sync {
    async fn enqueue(&self, event: &PaymentConfirmed) -> Result<(), QueueError>;
}

pub struct KafkaResultPublisher {
    publisher: KafkaPublisher,
    topic: String,
}

impl KafkaResultPublisher {
    pub fn new(publisher: KafkaPublisher, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl ResultPublisher for KafkaResultPublisher {
    async fn publish_result(&self, result: &PaymentResult) -> Result<(), PublishError> {
        let key = result.order_id.to_string();
        self.publisher.publish(&self.topic, &key, result).await
    }
}

#[async_trait]
impl NotificationQueue for RedisQueue {
    async fn enqueue(&self, event: &PaymentConfirmed) -> Result<(), QueueError> {
        self.push(event).await.map(|_| ())
    }
}
