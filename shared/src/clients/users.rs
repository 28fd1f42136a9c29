use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::{ClientError, ServiceClient};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, id: i64) -> Result<Option<User>, ClientError>;
}

pub struct HttpUserDirectory {
    client: ServiceClient,
}

impl HttpUserDirectory {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            client: ServiceClient::new("users-service", base_url, timeout)?,
        })
    }
}

#[async_trait]
impl UserDirectory for HttpUserDirectory {
    async fn find_user(&self, id: i64) -> Result<Option<User>, ClientError> {
        // The users service answers 404 or a null body for unknown ids.
        match self.client.get_json::<Option<User>>(&format!("/users/{id}")).await {
            Ok(user) => Ok(user),
            Err(ClientError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
