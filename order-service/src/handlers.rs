use async_trait::async_trait;
use shared::kafka::{HandlerError, MessageHandler};
use shared::PaymentResult;
use std::sync::Arc;

use crate::saga::OrderSaga;

/// Applies payment outcomes from the payment service to orders.
pub struct PaymentResultHandler {
    saga: Arc<OrderSaga>,
}

impl PaymentResultHandler {
    pub fn new(saga: Arc<OrderSaga>) -> Self {
        Self { saga }
    }
}

#[async_trait]
impl MessageHandler for PaymentResultHandler {
    type Message = PaymentResult;

    fn name(&self) -> &'static str {
        "payment-result"
    }

    async fn handle(&self, result: PaymentResult) -> Result<(), HandlerError> {
        self.saga
            .handle_payment_result(&result)
            .await
            .map_err(|e| {
                if e.is_transient() {
                    HandlerError::retryable(e)
                } else {
                    HandlerError::permanent(e)
                }
            })
    }
}
