use async_trait::async_trait;
use serde_json::json;
use shared::clients::ServiceClient;
use shared::{ClientError, OrderStatus, OrderView};
use std::time::Duration;
use uuid::Uuid;

/// The order service as seen from payments.
#[async_trait]
pub trait OrderDirectory: Send + Sync {
    async fn find_order(&self, id: Uuid) -> Result<Option<OrderView>, ClientError>;

    async fn update_status(&self, id: Uuid, status: OrderStatus) -> Result<(), ClientError>;
}

pub struct HttpOrderDirectory {
    client: ServiceClient,
}

impl HttpOrderDirectory {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            client: ServiceClient::new("order-service", base_url, timeout)?,
        })
    }
}

#[async_trait]
impl OrderDirectory for HttpOrderDirectory {
    async fn find_order(&self, id: Uuid) -> Result<Option<OrderView>, ClientError> {
        match self.client.get_json::<OrderView>(&format!("/orders/{id}")).await {
            Ok(order) => Ok(Some(order)),
            Err(ClientError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn update_status(&self, id: Uuid, status: OrderStatus) -> Result<(), ClientError> {
        self.client
            .patch_json::<_, serde_json::Value>(
                &format!("/orders/{id}/status"),
                &json!({ "status": status }),
            )
            .await
            .map(|_| ())
    }
}
