//! HTTP clients for collaborator services.

mod email;
mod users;

pub use email::{
    spawn_notification, CancellationEmail, ConfirmationEmail, EmailNotifier, HttpEmailNotifier,
    LowStockEmail, PaymentLine,
};
pub use users::{HttpUserDirectory, User, UserDirectory};

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{service}: resource not found")]
    NotFound { service: &'static str },

    #[error("{service} rejected the request ({status}): {message}")]
    Rejected {
        service: &'static str,
        status: u16,
        message: String,
    },

    #[error("{service} is unreachable: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} sent an unreadable response: {source}")]
    Decode {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

impl ClientError {
    /// HTTP status the collaborator answered with, if it answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::NotFound { .. } => Some(404),
            ClientError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Thin JSON client bound to one collaborator's base URL.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    service: &'static str,
    base_url: String,
    http: Client,
}

impl ServiceClient {
    pub fn new(
        service: &'static str,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| ClientError::Transport { service, source })?;
        Ok(Self {
            service,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.send(self.http.get(self.url(path))).await
    }

    pub async fn patch_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        self.send(self.http.patch(self.url(path)).json(body)).await
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        self.send(self.http.post(self.url(path)).json(body)).await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        let service = self.service;
        let response = request
            .send()
            .await
            .map_err(|source| ClientError::Transport { service, source })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound { service });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Rejected {
                service,
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|source| ClientError::Decode { service, source })
    }
}

/// Collaborators answer errors as `{"message": …}`; fall back to the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_prefers_the_message_field() {
        assert_eq!(
            error_message(r#"{"message":"Estoque insuficiente.","extra":1}"#),
            "Estoque insuficiente."
        );
        assert_eq!(error_message("  bad gateway \n"), "bad gateway");
    }

    #[test]
    fn base_url_trailing_slash_is_ignored() {
        let client =
            ServiceClient::new("products", "http://products:3000/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.url("/products/1"), "http://products:3000/products/1");
    }

    #[test]
    fn status_reflects_collaborator_answer() {
        assert_eq!(ClientError::NotFound { service: "users" }.status(), Some(404));
        let rejected = ClientError::Rejected {
            service: "products",
            status: 400,
            message: "no".into(),
        };
        assert_eq!(rejected.status(), Some(400));
    }
}
