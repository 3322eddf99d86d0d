use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use url::Url;

/// Default cap on response body size (bytes).
const MAX_CONTENT_SIZE: usize = 16 * 1024 * 1024;

/// A fetched HTTP response with a fully materialized body.
///
/// The crawler passes responses to handlers by reference and drops the value
/// once the handler chain returns, so the body is released exactly once on
/// every path.
#[derive(Debug, Clone)]
pub struct Response {
    /// The request URL. Redirects are not followed by [`HttpClient`], so
    /// relative `Location` headers resolve against this.
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    /// The `Content-Type` header, if present and readable.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}

/// Capability for retrieving remote URLs. The crawler core makes no
/// assumptions about transport, TLS, cookies, or timeouts.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Response, FetchError>;
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("connection refused")]
    ConnectionRefused,

    #[error("DNS resolution failed")]
    Dns,

    #[error("TLS error")]
    Tls,

    #[error("request timeout")]
    Timeout,

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("content too large: {0} bytes (max {1})")]
    ContentTooLarge(usize, usize),

    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),
}

impl FetchError {
    fn from_reqwest_error(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return FetchError::Timeout;
        }

        let message = error.to_string().to_lowercase();

        if error.is_connect() {
            if message.contains("connection refused") {
                return FetchError::ConnectionRefused;
            }
            if message.contains("dns")
                || message.contains("name resolution")
                || message.contains("no such host")
            {
                return FetchError::Dns;
            }
        }

        if message.contains("certificate") || message.contains("ssl") || message.contains("tls") {
            return FetchError::Tls;
        }

        FetchError::Network(error.to_string())
    }
}

/// Default [`Fetcher`] over reqwest.
///
/// Redirects are disabled so the handler pipeline decides how to follow them.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    max_content_size: usize,
}

impl HttpClient {
    pub fn new(user_agent: String, timeout_secs: u64) -> Result<Self, FetchError> {
        Self::with_content_limit(user_agent, timeout_secs, MAX_CONTENT_SIZE)
    }

    pub fn with_content_limit(
        user_agent: String,
        timeout_secs: u64,
        max_content: usize,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(&user_agent)
            .timeout(Duration::from_secs(timeout_secs))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| FetchError::ClientBuild(e.to_string()))?;

        Ok(Self {
            client,
            max_content_size: max_content,
        })
    }
}

#[async_trait]
impl Fetcher for HttpClient {
    async fn fetch(&self, url: &str) -> Result<Response, FetchError> {
        let response = self
            .client
            .get(url)
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .send()
            .await
            .map_err(FetchError::from_reqwest_error)?;

        if let Some(content_length) = response.content_length() {
            if content_length as usize > self.max_content_size {
                return Err(FetchError::ContentTooLarge(
                    content_length as usize,
                    self.max_content_size,
                ));
            }
        }

        let request_url = response.url().clone();
        let status = response.status();
        let headers = response.headers().clone();

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Body(e.to_string()))?;

        if body.len() > self.max_content_size {
            return Err(FetchError::ContentTooLarge(
                body.len(),
                self.max_content_size,
            ));
        }

        Ok(Response {
            url: request_url,
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_accessor() {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            "text/html; charset=utf-8".parse().unwrap(),
        );
        let resp = Response {
            url: Url::parse("http://test.local/").unwrap(),
            status: StatusCode::OK,
            headers,
            body: Bytes::new(),
        };
        assert_eq!(resp.content_type(), Some("text/html; charset=utf-8"));
    }

    #[test]
    fn test_client_builds() {
        assert!(HttpClient::new("trawl-test/0.1".to_string(), 10).is_ok());
    }
}
