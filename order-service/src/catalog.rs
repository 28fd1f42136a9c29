use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::clients::ServiceClient;
use shared::ClientError;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price: f64,
    pub stock: i64,
}

/// Stock operations of the products service.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn product(&self, id: i64) -> Result<Option<Product>, ClientError>;

    /// Returns the product with its remaining stock.
    async fn decrement_stock(&self, id: i64, quantity: i32) -> Result<Product, ClientError>;

    async fn increment_stock(&self, id: i64, quantity: i32) -> Result<(), ClientError>;
}

#[derive(Serialize)]
struct StockAdjustment {
    quantity: i32,
}

pub struct HttpProductCatalog {
    client: ServiceClient,
}

impl HttpProductCatalog {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            client: ServiceClient::new("products-service", base_url, timeout)?,
        })
    }
}

#[async_trait]
impl ProductCatalog for HttpProductCatalog {
    async fn product(&self, id: i64) -> Result<Option<Product>, ClientError> {
        match self.client.get_json::<Option<Product>>(&format!("/products/{id}")).await {
            Ok(product) => Ok(product),
            Err(ClientError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn decrement_stock(&self, id: i64, quantity: i32) -> Result<Product, ClientError> {
        self.client
            .patch_json(&format!("/products/{id}/decrement-stock"), &StockAdjustment { quantity })
            .await
    }

    async fn increment_stock(&self, id: i64, quantity: i32) -> Result<(), ClientError> {
        self.client
            .patch_json::<_, serde_json::Value>(
                &format!("/products/{id}/increment-stock"),
                &StockAdjustment { quantity },
            )
            .await
            .map(|_| ())
    }
}
