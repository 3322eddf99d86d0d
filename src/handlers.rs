//! Composable response handlers.
//!
//! Every fetched response is threaded through a handler chain. A handler
//! returns `Ok` to acknowledge the URL, [`HandlerError::Retry`] to have the
//! frontier re-deliver it later, or any other error to abort the crawl:
//! unexpected handler errors are programming mistakes, not transient
//! conditions.

use crate::crawler::Crawler;
use crate::fetcher::{FetchError, Response};
use crate::models::Outlink;
use async_trait::async_trait;
use reqwest::header;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandlerError {
    /// Transient failure; the frontier entry is re-queued after a delay.
    #[error("retry requested")]
    Retry,

    /// Anything else. Fatal to the crawl.
    #[error("{0}")]
    Fatal(Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    pub fn fatal<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Fatal(err.into())
    }
}

/// Processes one crawled URL. Exactly one of `response` / `error` is `Some`.
///
/// Handlers receive a reference back to the crawler so they can enqueue
/// discovered links.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(
        &self,
        crawler: &Crawler,
        url: &str,
        depth: u32,
        response: Option<&Response>,
        error: Option<&FetchError>,
    ) -> Result<(), HandlerError>;
}

/// Wrap `inner` so that HTTP redirects are followed by enqueueing the
/// `Location` target at depth+1. The inner handler runs first, on every
/// request.
pub fn follow_redirects(inner: Box<dyn Handler>) -> Box<dyn Handler> {
    Box::new(FollowRedirects { inner })
}

/// Wrap `inner` so it only sees successful responses (fetch succeeded and
/// status < 400). Forwarded calls always carry `error = None`.
pub fn filter_errors(inner: Box<dyn Handler>) -> Box<dyn Handler> {
    Box::new(FilterErrors { inner })
}

/// Wrap `inner` so transient failures become retries: any fetch error,
/// HTTP 429, or status >= 500.
pub fn handle_retries(inner: Box<dyn Handler>) -> Box<dyn Handler> {
    Box::new(HandleRetries { inner })
}

struct FollowRedirects {
    inner: Box<dyn Handler>,
}

#[async_trait]
impl Handler for FollowRedirects {
    async fn handle(
        &self,
        crawler: &Crawler,
        url: &str,
        depth: u32,
        response: Option<&Response>,
        error: Option<&FetchError>,
    ) -> Result<(), HandlerError> {
        self.inner
            .handle(crawler, url, depth, response, error)
            .await?;

        if error.is_some() {
            return Ok(());
        }
        let Some(response) = response else {
            return Ok(());
        };

        if response.status.is_redirection() {
            if let Some(location) = response
                .headers
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok())
            {
                match response.url.join(location) {
                    Ok(target) => {
                        return crawler
                            .enqueue(Outlink::primary(target), depth + 1)
                            .await
                            .map_err(HandlerError::fatal);
                    }
                    Err(e) => {
                        tracing::info!(url, location, "ignoring malformed Location header: {e}");
                    }
                }
            }
        }

        Ok(())
    }
}

struct FilterErrors {
    inner: Box<dyn Handler>,
}

#[async_trait]
impl Handler for FilterErrors {
    async fn handle(
        &self,
        crawler: &Crawler,
        url: &str,
        depth: u32,
        response: Option<&Response>,
        error: Option<&FetchError>,
    ) -> Result<(), HandlerError> {
        if error.is_some() {
            return Ok(());
        }
        let Some(response) = response else {
            return Ok(());
        };
        if response.status.as_u16() >= 400 {
            return Ok(());
        }
        self.inner
            .handle(crawler, url, depth, Some(response), None)
            .await
    }
}

struct HandleRetries {
    inner: Box<dyn Handler>,
}

#[async_trait]
impl Handler for HandleRetries {
    async fn handle(
        &self,
        crawler: &Crawler,
        url: &str,
        depth: u32,
        response: Option<&Response>,
        error: Option<&FetchError>,
    ) -> Result<(), HandlerError> {
        if error.is_some() {
            return Err(HandlerError::Retry);
        }
        let Some(response) = response else {
            return Err(HandlerError::Retry);
        };
        let status = response.status.as_u16();
        if status == 429 || status >= 500 {
            return Err(HandlerError::Retry);
        }
        self.inner
            .handle(crawler, url, depth, Some(response), None)
            .await
    }
}
