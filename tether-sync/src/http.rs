//! HTTP client for the remote data service.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tether_core::{
    ConfigError, FileRecord, GroupAggregate, KeywordRecord, RemoteConfig, RemoteError,
    RemoteKeyword, RemoteResult, RemoteService, TetherResult,
};

/// Body returned by every mutation endpoint.
#[derive(Debug, Deserialize)]
struct MutationResponse {
    success: bool,
}

/// [`RemoteService`] over JSON/HTTP.
///
/// Every request is bounded by `tokio::time::timeout`; a timeout surfaces as
/// the transient [`RemoteError::Timeout`]. 5xx answers are transient, 4xx
/// answers are [`RemoteError::Rejected`].
#[derive(Debug, Clone)]
pub struct HttpRemoteService {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpRemoteService {
    pub fn new(config: &RemoteConfig) -> TetherResult<Self> {
        config.validate()?;

        let base_url = Url::parse(&config.base_url).map_err(|e| ConfigError::InvalidValue {
            field: "remote.base_url".to_string(),
            value: config.base_url.clone(),
            reason: e.to_string(),
        })?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "remote".to_string(),
                value: config.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url,
            timeout: config.request_timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build `{base}/{segments...}`, percent-encoding each segment.
    fn endpoint(&self, segments: &[&str]) -> RemoteResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::Decode {
                reason: format!("base URL cannot carry a path: {}", self.base_url),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> RemoteResult<reqwest::Response> {
        let response = match tokio::time::timeout(self.timeout, request.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) if e.is_timeout() => return Err(self.timeout_error(operation)),
            Ok(Err(e)) => {
                return Err(RemoteError::Network {
                    reason: e.to_string(),
                })
            }
            Err(_) => return Err(self.timeout_error(operation)),
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        Err(classify_status(operation, status, text))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> RemoteResult<T> {
        let response = self.send(operation, request).await?;
        response.json::<T>().await.map_err(|e| RemoteError::Decode {
            reason: format!("{operation}: {e}"),
        })
    }

    async fn mutate(&self, operation: &str, request: RequestBuilder) -> RemoteResult<bool> {
        let body: MutationResponse = self.send_json(operation, request).await?;
        if !body.success {
            tracing::debug!(operation, "Remote refused mutation");
        }
        Ok(body.success)
    }

    fn timeout_error(&self, operation: &str) -> RemoteError {
        RemoteError::Timeout {
            operation: operation.to_string(),
            after_ms: self.timeout.as_millis() as u64,
        }
    }
}

fn classify_status(operation: &str, status: StatusCode, body: String) -> RemoteError {
    if status.is_server_error() {
        RemoteError::Server {
            status: status.as_u16(),
            message: body,
        }
    } else {
        RemoteError::Rejected {
            operation: operation.to_string(),
            reason: format!("HTTP {}: {}", status.as_u16(), body),
        }
    }
}

#[async_trait]
impl RemoteService for HttpRemoteService {
    async fn fetch_groups(&self) -> RemoteResult<Vec<GroupAggregate>> {
        let url = self.endpoint(&["groups"])?;
        self.send_json("fetch_groups", self.client.get(url)).await
    }

    async fn fetch_keywords(&self) -> RemoteResult<Vec<RemoteKeyword>> {
        let url = self.endpoint(&["keywords"])?;
        self.send_json("fetch_keywords", self.client.get(url)).await
    }

    async fn fetch_files(&self) -> RemoteResult<Vec<FileRecord>> {
        let url = self.endpoint(&["files"])?;
        self.send_json("fetch_files", self.client.get(url)).await
    }

    async fn create_keywords(&self, records: &[KeywordRecord]) -> RemoteResult<bool> {
        let url = self.endpoint(&["keywords"])?;
        self.mutate("create_keywords", self.client.post(url).json(records))
            .await
    }

    async fn update_keyword(&self, record: &KeywordRecord) -> RemoteResult<bool> {
        let url = self.endpoint(&["keywords", record.id.as_str()])?;
        self.mutate("update_keyword", self.client.put(url).json(record))
            .await
    }

    async fn remove_keyword(&self, keyword_id: &str, group_name: &str) -> RemoteResult<bool> {
        let url = self.endpoint(&["groups", group_name, "keywords", keyword_id])?;
        self.mutate("remove_keyword", self.client.delete(url)).await
    }

    async fn remove_group(&self, group_name: &str) -> RemoteResult<bool> {
        let url = self.endpoint(&["groups", group_name])?;
        self.mutate("remove_group", self.client.delete(url)).await
    }

    async fn remove_file(&self, filename: &str) -> RemoteResult<bool> {
        let url = self.endpoint(&["files", filename])?;
        self.mutate("remove_file", self.client.delete(url)).await
    }

    async fn health_check(&self) -> RemoteResult<bool> {
        let url = self.endpoint(&["health"])?;
        match self.send("health_check", self.client.get(url)).await {
            Ok(_) => Ok(true),
            Err(RemoteError::Server { .. }) | Err(RemoteError::Rejected { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(base_url: &str) -> HttpRemoteService {
        let config = RemoteConfig {
            base_url: base_url.to_string(),
            ..RemoteConfig::default()
        };
        HttpRemoteService::new(&config).expect("client should build")
    }

    #[test]
    fn test_endpoint_joins_segments() {
        let remote = service("http://localhost:8000/api");
        let url = remote.endpoint(&["groups", "tools"]).expect("url");
        assert_eq!(url.as_str(), "http://localhost:8000/api/groups/tools");
    }

    #[test]
    fn test_endpoint_handles_trailing_slash() {
        let remote = service("http://localhost:8000/api/");
        let url = remote.endpoint(&["files"]).expect("url");
        assert_eq!(url.as_str(), "http://localhost:8000/api/files");
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let remote = service("http://localhost:8000/api");
        let url = remote
            .endpoint(&["groups", "technical seo/audit", "keywords", "abc"])
            .expect("url");
        assert_eq!(
            url.as_str(),
            "http://localhost:8000/api/groups/technical%20seo%2Faudit/keywords/abc"
        );
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let config = RemoteConfig {
            base_url: "not a url".to_string(),
            ..RemoteConfig::default()
        };
        assert!(HttpRemoteService::new(&config).is_err());
    }

    #[test]
    fn test_status_classification() {
        let server = classify_status("op", StatusCode::BAD_GATEWAY, "down".to_string());
        assert!(server.is_transient());

        let client = classify_status("op", StatusCode::NOT_FOUND, "gone".to_string());
        assert!(!client.is_transient());
        assert!(matches!(client, RemoteError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transient() {
        let config = RemoteConfig {
            base_url: "http://127.0.0.1:9/api".to_string(),
            request_timeout: Duration::from_millis(500),
        };
        let remote = HttpRemoteService::new(&config).expect("client should build");
        let err = remote
            .fetch_groups()
            .await
            .expect_err("nothing listens on the discard port");
        assert!(err.is_transient());
    }
}
