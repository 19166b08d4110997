//! Hub REST API client.
//!
//! Service calls (toggling entities from the local control API) go over the
//! hub's HTTP endpoint rather than the WebSocket, so they work regardless of
//! the subscription's state.

use serde::Serialize;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum RestError {
    #[error("hub request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("hub rejected request: {status}")]
    Status { status: reqwest::StatusCode },
}

#[derive(Serialize)]
struct ServiceTarget<'a> {
    entity_id: &'a str,
}

/// Thin client for the hub's `/api/services` endpoint.
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl RestClient {
    pub fn new(base_url: &str, access_token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        }
    }

    /// Toggle an entity between on and off
    pub async fn toggle(&self, entity_id: &str) -> Result<(), RestError> {
        self.call_service("toggle", entity_id).await
    }

    pub async fn turn_on(&self, entity_id: &str) -> Result<(), RestError> {
        self.call_service("turn_on", entity_id).await
    }

    pub async fn turn_off(&self, entity_id: &str) -> Result<(), RestError> {
        self.call_service("turn_off", entity_id).await
    }

    async fn call_service(&self, service: &str, entity_id: &str) -> Result<(), RestError> {
        let url = format!(
            "{}/api/services/homeassistant/{}",
            self.base_url, service
        );
        debug!("Calling hub service {} for {}", service, entity_id);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&ServiceTarget { entity_id })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RestError::Status {
                status: response.status(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalization() {
        let client = RestClient::new("http://ha.local:8123/", "token");
        assert_eq!(client.base_url, "http://ha.local:8123");
    }
}
