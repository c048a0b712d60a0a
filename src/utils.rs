use crate::config::SiteConfig;
use crate::error::{MirrorError, Result};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, Response};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_USER_AGENT: &str = "MangaMirror/0.1 (Series Mirroring Tool)";

/// Shared transport for every site collaborator. Responses are requested
/// gzip-compressed and bounded by the site's timeout.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl HttpClient {
    pub fn new(config: &SiteConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .gzip(true)
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(config.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT));

        if let Some(headers) = &config.headers {
            let mut map = reqwest::header::HeaderMap::new();
            for (key, value) in headers {
                let name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
                    .map_err(|e| MirrorError::InvalidHeader(format!("{key}: {e}")))?;
                let value = reqwest::header::HeaderValue::from_str(value)
                    .map_err(|e| MirrorError::InvalidHeader(format!("{key}: {e}")))?;
                map.insert(name, value);
            }
            builder = builder.default_headers(map);
        }

        let limiter = Quota::with_period(Duration::from_millis(config.rate_limit_ms))
            .map(|quota| Arc::new(RateLimiter::direct(quota)));

        Ok(Self {
            client: builder.build()?,
            limiter,
        })
    }

    async fn send(&self, url: &str) -> Result<Response> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        debug!(url = url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(|e| log_failure(url, e))?;
        Ok(response)
    }

    pub async fn get(&self, url: &str) -> Result<String> {
        let response = self.send(url).await?;
        Ok(response.text().await.map_err(|e| log_failure(url, e))?)
    }

    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.send(url).await?;
        Ok(response.bytes().await.map_err(|e| log_failure(url, e))?.to_vec())
    }

    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let body = self.get(url).await?;
        Ok(serde_json::from_str(&body)?)
    }
}

fn log_failure(url: &str, error: reqwest::Error) -> reqwest::Error {
    warn!(url = url, kind = %failure_kind(&error), error = %error, "Request failed");
    error
}

/// Coarse failure class for logs: `[<status> | Connection]` when no
/// connection was made, `[<status> | Read]` when it dropped or timed out.
fn failure_kind(error: &reqwest::Error) -> String {
    let status = error
        .status()
        .map(|status| status.as_u16().to_string())
        .unwrap_or_else(|| "-".to_string());
    let phase = if error.is_connect() {
        "Connection"
    } else if error.is_timeout() || error.is_body() || error.is_decode() {
        "Read"
    } else if error.is_status() {
        "Status"
    } else {
        "Request"
    };
    format!("[{status} | {phase}]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_rate_limit_disables_limiter() {
        let client = HttpClient::new(&SiteConfig::default()).unwrap();
        assert!(client.limiter.is_none());

        let config = SiteConfig {
            rate_limit_ms: 200,
            ..SiteConfig::default()
        };
        assert!(HttpClient::new(&config).unwrap().limiter.is_some());
    }

    #[test]
    fn invalid_header_is_rejected() {
        let mut headers = std::collections::HashMap::new();
        headers.insert("bad header".to_string(), "x".to_string());
        let config = SiteConfig {
            headers: Some(headers),
            ..SiteConfig::default()
        };
        assert!(HttpClient::new(&config).is_err());
    }

    #[tokio::test]
    async fn refused_connection_is_classified_as_connection() {
        let client = reqwest::Client::new();
        let err = client.get("http://127.0.0.1:1/").send().await.unwrap_err();
        assert_eq!(failure_kind(&err), "[- | Connection]");
    }

    #[tokio::test]
    async fn error_status_keeps_its_code() {
        let mut server = mockito::Server::new_async().await;
        let _missing = server.mock("GET", "/gone").with_status(404).create_async().await;

        let client = HttpClient::new(&SiteConfig::default()).unwrap();
        let err = client.send(&format!("{}/gone", server.url())).await.unwrap_err();
        let err = match err {
            MirrorError::Http(err) => err,
            other => panic!("unexpected error {other:?}"),
        };
        assert_eq!(failure_kind(&err), "[404 | Status]");
    }
}
