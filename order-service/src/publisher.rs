use async_trait::async_trait;
use shared::kafka::{KafkaPublisher, PublishError};
use shared::PaymentRequested;

#[async_trait]
pub trait PaymentRequestPublisher: Send + Sync {
    async fn publish(&self, event: &PaymentRequested) -> Result<(), PublishError>;
}

pub struct KafkaPaymentRequests {
    publisher: KafkaPublisher,
    topic: String,
}

impl KafkaPaymentRequests {
    pub fn new(publisher: KafkaPublisher, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl PaymentRequestPublisher for KafkaPaymentRequests {
    async fn publish(&self, event: &PaymentRequested) -> Result<(), PublishError> {
        let key = event.order.id.to_string();
        self.publisher.publish(&self.topic, &key, event).await
    }
}
