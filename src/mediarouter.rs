//! Media-router HTTP client (C15) — a thin read-only wrapper over the remote streaming
//! server's control API, consumed by the stall detector (C9). Grounded in the teacher's
//! `UpdateService` (`reqwest::Client` + env-overridable base URL).

use serde::Deserialize;

use crate::config::MediaRouterConfig;
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct PathInfo {
    pub name: String,
    pub ready: bool,
    #[serde(rename = "bytesReceived")]
    pub bytes_received: i64,
    #[serde(rename = "bytesSent", default)]
    pub bytes_sent: i64,
}

#[derive(Debug, Clone, Deserialize)]
struct PathsListResponse {
    items: Vec<PathInfo>,
}

/// Client for the media router's read-only path-status API.
pub struct MediaRouterClient {
    client: reqwest::Client,
    base_url: String,
}

impl MediaRouterClient {
    pub fn new(config: &MediaRouterConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// `GET /v3/paths/list`. Non-2xx and transport errors are mapped to
    /// `AppError::RemoteUnreachable`, which the stall detector treats as non-fatal.
    pub async fn list_paths(&self) -> Result<Vec<PathInfo>> {
        let url = format!("{}/v3/paths/list", self.base_url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::RemoteUnreachable(e.to_string()))?;
        let response = response
            .error_for_status()
            .map_err(|e| AppError::RemoteUnreachable(e.to_string()))?;
        let body: PathsListResponse = response
            .json()
            .await
            .map_err(|e| AppError::RemoteUnreachable(e.to_string()))?;
        Ok(body.items)
    }

    /// `GET /v3/paths/get/{name}`. A 404 is surfaced as `Ok(None)`; any other non-2xx
    /// status or transport error is mapped to `AppError::RemoteUnreachable`.
    pub async fn get_path(&self, name: &str) -> Result<Option<PathInfo>> {
        let url = format!("{}/v3/paths/get/{}", self.base_url, name);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::RemoteUnreachable(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .map_err(|e| AppError::RemoteUnreachable(e.to_string()))?;
        let info: PathInfo = response
            .json()
            .await
            .map_err(|e| AppError::RemoteUnreachable(e.to_string()))?;
        Ok(Some(info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_builds_with_default_config() {
        let config = MediaRouterConfig::default();
        let client = MediaRouterClient::new(&config);
        assert!(client.is_ok());
    }

    #[test]
    fn base_url_trailing_slash_is_stripped() {
        let config = MediaRouterConfig {
            base_url: "http://localhost:9997/".to_string(),
            timeout_ms: 5000,
        };
        let client = MediaRouterClient::new(&config).unwrap();
        assert_eq!(client.base_url, "http://localhost:9997");
    }
}
