use async_trait::async_trait;
use shared::kafka::{HandlerError, MessageHandler};
use shared::PaymentRequested;
use tracing::info;

/// Logs every payment request the order service publishes.
pub struct PaymentRequestObserver;

#[async_trait]
impl MessageHandler for PaymentRequestObserver {
    type Message = PaymentRequested;

    fn name(&self) -> &'static str {
        "payment-request-observer"
    }

    async fn handle(&self, event: PaymentRequested) -> Result<(), HandlerError> {
        info!(
            event_id = %event.event_id,
            order_id = %event.order.id,
            user_id = event.order.user_id,
            total = event.order.total,
            "notification received"
        );
        Ok(())
    }
}
