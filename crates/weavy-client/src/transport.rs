//! Server endpoints the widget core talks to.
//!
//! Two narrow traits, [`IdentityApi`] and [`BubbleApi`], so the state
//! machines can be driven by test doubles. [`HttpTransport`] implements both
//! over reqwest with a cookie store, which is what carries the session.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use weavy_types::{Bubble, BubbleId, User};

use crate::config::WidgetConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A failed server call. Cloneable so it can settle a shared deferred.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("server returned HTTP {0}")]
    Status(u16),
    #[error("network error: {0}")]
    Network(String),
    #[error("could not decode response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            TransportError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            TransportError::Status(status.as_u16())
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

#[async_trait]
pub trait IdentityApi: Send + Sync {
    /// `POST /user`: who does the server think we are.
    async fn fetch_user(&self) -> Result<User, TransportError>;

    /// `GET /sign-in` with `Authorization: Bearer <jwt>`.
    async fn sign_in_jwt(&self, jwt: &str) -> Result<User, TransportError>;

    /// `GET /sign-out`.
    async fn sign_out(&self) -> Result<(), TransportError>;
}

#[async_trait]
pub trait BubbleApi: Send + Sync {
    async fn list_bubbles(&self) -> Result<Vec<Bubble>, TransportError>;

    async fn remove_bubble(&self, bubble_id: BubbleId) -> Result<(), TransportError>;
}

// ============================================================================
// HttpTransport
// ============================================================================

pub struct HttpTransport {
    client: Client,
    base_url: String,
    bubbles_endpoint: String,
}

impl HttpTransport {
    pub fn new(config: &WidgetConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .cookie_store(true)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim().trim_end_matches('/').to_string(),
            bubbles_endpoint: config.bubbles_endpoint.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, TransportError> {
        let response = request.send().await?;
        let status = response.status();
        trace!(%status, url = %response.url(), "response");
        match status {
            StatusCode::UNAUTHORIZED => Err(TransportError::Unauthorized),
            s if !s.is_success() => Err(TransportError::Status(s.as_u16())),
            _ => Ok(response),
        }
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, TransportError> {
        let response = self.send(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[async_trait]
impl IdentityApi for HttpTransport {
    async fn fetch_user(&self) -> Result<User, TransportError> {
        debug!("checking identity");
        self.json(self.client.post(self.url("/user"))).await
    }

    async fn sign_in_jwt(&self, jwt: &str) -> Result<User, TransportError> {
        debug!("signing in with JWT");
        self.json(self.client.get(self.url("/sign-in")).bearer_auth(jwt))
            .await
    }

    async fn sign_out(&self) -> Result<(), TransportError> {
        self.send(self.client.get(self.url("/sign-out"))).await?;
        Ok(())
    }
}

#[async_trait]
impl BubbleApi for HttpTransport {
    async fn list_bubbles(&self) -> Result<Vec<Bubble>, TransportError> {
        self.json(self.client.get(self.url(&self.bubbles_endpoint)))
            .await
    }

    async fn remove_bubble(&self, bubble_id: BubbleId) -> Result<(), TransportError> {
        let path = format!("{}/{}", self.bubbles_endpoint.trim_end_matches('/'), bubble_id);
        self.send(self.client.delete(self.url(&path))).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let config = WidgetConfig {
            url: "https://acme.weavy.io/".into(),
            ..WidgetConfig::default()
        };
        let http = HttpTransport::new(&config).unwrap();
        assert_eq!(http.url("/user"), "https://acme.weavy.io/user");
        assert_eq!(http.url("api/bubbles"), "https://acme.weavy.io/api/bubbles");
    }

    #[test]
    fn test_transport_error_display() {
        assert_eq!(TransportError::Status(503).to_string(), "server returned HTTP 503");
        assert_eq!(TransportError::Unauthorized.to_string(), "unauthorized");
    }
}
