use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use super::{ClientError, ServiceClient};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentLine {
    pub method: String,
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationEmail {
    pub to: String,
    pub order_id: Uuid,
    pub amount: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub payments: Vec<PaymentLine>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellationEmail {
    pub to: String,
    pub order_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LowStockEmail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub product_id: i64,
    pub product_name: String,
    pub current_stock: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<i64>,
}

#[async_trait]
pub trait EmailNotifier: Send + Sync {
    async fn payment_confirmed(&self, email: &ConfirmationEmail) -> Result<(), ClientError>;
    async fn payment_cancelled(&self, email: &CancellationEmail) -> Result<(), ClientError>;
    async fn low_stock(&self, email: &LowStockEmail) -> Result<(), ClientError>;
}

pub struct HttpEmailNotifier {
    client: ServiceClient,
}

impl HttpEmailNotifier {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            client: ServiceClient::new("email-service", base_url, timeout)?,
        })
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<(), ClientError> {
        self.client
            .post_json::<B, serde_json::Value>(path, body)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl EmailNotifier for HttpEmailNotifier {
    async fn payment_confirmed(&self, email: &ConfirmationEmail) -> Result<(), ClientError> {
        self.post("/emails/payment/confirmation", email).await
    }

    async fn payment_cancelled(&self, email: &CancellationEmail) -> Result<(), ClientError> {
        self.post("/emails/payment/cancellation", email).await
    }

    async fn low_stock(&self, email: &LowStockEmail) -> Result<(), ClientError> {
        self.post("/emails/stock/low", email).await
    }
}

/// Fire-and-forget: failures are logged, never reported to the caller.
pub fn spawn_notification<F>(what: &'static str, notification: F)
where
    F: Future<Output = Result<(), ClientError>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = notification.await {
            warn!(what, error = %e, "email notification failed");
        }
    });
}
