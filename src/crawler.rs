//! The crawler engine: seed loading, deduplicating enqueue, and the worker
//! pool that drains the frontier.

use crate::canonical::canonicalize;
use crate::fetcher::Fetcher;
use crate::frontier::{Frontier, FrontierConfig, Lease, Outcome, QueueError};
use crate::handlers::{Handler, HandlerError};
use crate::models::{url_key, Outlink, QueueItem, UrlInfo};
use crate::scope::Scope;
use crate::store::{self, ObjDb, StoreError};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// A restartable crawler over a persistent state database.
///
/// The crawler owns the database and the frontier for the duration of a run.
/// Handlers get a shared reference back to it, which is how discovered links
/// re-enter via [`Crawler::enqueue`].
pub struct Crawler {
    db: ObjDb,
    frontier: Frontier,
    seeds: Vec<Url>,
    scope: Box<dyn Scope>,
    fetcher: Box<dyn Fetcher>,
    handler: Box<dyn Handler>,
    cancel: CancellationToken,
    /// Serializes the read-check-write sequence in `enqueue` across workers.
    enqueue_mx: tokio::sync::Mutex<()>,
}

impl Crawler {
    /// Open the crawl database at `path` and build the frontier on it.
    /// Seeds are not enqueued until [`Crawler::run`].
    pub fn new<P: AsRef<Path>>(
        path: P,
        seeds: Vec<Url>,
        scope: Box<dyn Scope>,
        fetcher: Box<dyn Fetcher>,
        handler: Box<dyn Handler>,
    ) -> Result<Self, CrawlError> {
        Self::with_config(path, seeds, scope, fetcher, handler, FrontierConfig::default())
    }

    pub fn with_config<P: AsRef<Path>>(
        path: P,
        seeds: Vec<Url>,
        scope: Box<dyn Scope>,
        fetcher: Box<dyn Fetcher>,
        handler: Box<dyn Handler>,
        config: FrontierConfig,
    ) -> Result<Self, CrawlError> {
        let db = ObjDb::open(path)?;
        let frontier = Frontier::open(db.sled(), config)?;

        Ok(Self {
            db,
            frontier,
            seeds,
            scope,
            fetcher,
            handler,
            cancel: CancellationToken::new(),
            enqueue_mx: tokio::sync::Mutex::new(()),
        })
    }

    /// Enqueue a (possibly new) URL for crawling.
    ///
    /// The URL is canonicalized first so the scope sees the canonical form.
    /// Out-of-scope URLs and URLs already known to this database are silently
    /// accepted with no side effects.
    pub async fn enqueue(&self, link: Outlink, depth: u32) -> Result<(), CrawlError> {
        let link = Outlink {
            url: canonicalize(&link.url),
            tag: link.tag,
        };

        if !self.scope.check(&link, depth) {
            return Ok(());
        }

        // The lookup, the queue add and the sentinel write must be atomic
        // with respect to concurrent enqueues.
        let _guard = self.enqueue_mx.lock().await;

        let key = url_key(link.url.as_str());
        match self.db.get_obj::<UrlInfo>(&key) {
            Ok(_) => return Ok(()),
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        let item = QueueItem {
            url: link.url.to_string(),
            depth,
        };
        let payload = store::encode(&item)?;
        let tag = link.url.host_str().unwrap_or_default().to_string();
        self.frontier.add(&tag, &payload).await?;

        self.db.put_obj(&key, &UrlInfo::default())?;
        Ok(())
    }

    /// Run the crawl with `concurrency` workers. Returns when the frontier is
    /// permanently drained or [`Crawler::stop`] is called. A seed that fails
    /// to enqueue aborts the run before any worker starts.
    pub async fn run(self: &Arc<Self>, concurrency: usize) -> Result<(), CrawlError> {
        for seed in self.seeds.clone() {
            self.enqueue(Outlink::primary(seed), 0).await?;
        }

        let mut workers = JoinSet::new();
        for _ in 0..concurrency {
            let crawler = Arc::clone(self);
            workers.spawn(async move { crawler.worker().await });
        }
        while workers.join_next().await.is_some() {}
        Ok(())
    }

    /// Cancel the workers. A running [`Crawler::run`] returns once in-flight
    /// handlers complete.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Flush the state database.
    pub fn close(&self) -> Result<(), CrawlError> {
        self.db.flush()?;
        Ok(())
    }

    /// The crawl record for a URL, if it was ever enqueued.
    pub fn url_info(&self, url: &Url) -> Result<Option<UrlInfo>, CrawlError> {
        let canonical = canonicalize(url);
        match self.db.get_obj(&url_key(canonical.as_str())) {
            Ok(info) => Ok(Some(info)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All crawl records in the database.
    pub fn iter_url_info(&self) -> impl Iterator<Item = Result<UrlInfo, CrawlError>> + '_ {
        self.db
            .iter_prefix::<UrlInfo>(b"url/")
            .map(|r| r.map(|(_, info)| info).map_err(Into::into))
    }

    async fn worker(&self) {
        loop {
            let lease = match self.frontier.next(&self.cancel).await {
                Ok(lease) => lease,
                Err(QueueError::Drained) | Err(QueueError::Cancelled) => return,
                Err(e) => {
                    tracing::warn!("frontier error, stopping worker: {e}");
                    return;
                }
            };

            let outcome = self.handle_job(&lease).await;
            if let Err(e) = self.frontier.done(lease, outcome).await {
                tracing::warn!("failed to settle queue entry: {e}");
            }
        }
    }

    async fn handle_job(&self, lease: &Lease) -> Outcome {
        let item: QueueItem = match store::decode(lease.payload()) {
            Ok(item) => item,
            Err(e) => {
                // Permanent: a payload we cannot decode will never decode.
                tracing::warn!("dropping undecodable queue payload: {e}");
                return Outcome::Done;
            }
        };
        self.handle_url(&item).await
    }

    async fn handle_url(&self, item: &QueueItem) -> Outcome {
        // Work with an empty record if the sentinel read fails.
        let key = url_key(&item.url);
        let mut info: UrlInfo = self.db.get_obj(&key).unwrap_or_default();
        info.url = item.url.clone();
        info.mark_crawled();

        tracing::info!(url = %item.url, depth = item.depth, "fetching");

        let (response, fetch_error) = match self.fetcher.fetch(&item.url).await {
            Ok(response) => {
                info.status_code = Some(response.status.as_u16());
                (Some(response), None)
            }
            Err(e) => {
                info.error = Some(e.to_string());
                (None, Some(e))
            }
        };

        // The handler runs even when the fetch failed.
        let result = self
            .handler
            .handle(
                self,
                &item.url,
                item.depth,
                response.as_ref(),
                fetch_error.as_ref(),
            )
            .await;

        match result {
            Ok(()) => match self.db.put_obj(&key, &info) {
                Ok(()) => Outcome::Done,
                Err(e) => {
                    tracing::warn!(url = %item.url, "failed to write crawl record, retrying: {e}");
                    Outcome::Retry
                }
            },
            Err(HandlerError::Retry) => Outcome::Retry,
            Err(HandlerError::Fatal(e)) => {
                tracing::error!(url = %item.url, "fatal error in handler: {e}");
                std::process::exit(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::{FetchError, Response};
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct AllowAll;

    impl Scope for AllowAll {
        fn check(&self, _link: &Outlink, _depth: u32) -> bool {
            true
        }
    }

    struct DenyAll;

    impl Scope for DenyAll {
        fn check(&self, _link: &Outlink, _depth: u32) -> bool {
            false
        }
    }

    struct NeverFetch;

    #[async_trait]
    impl Fetcher for NeverFetch {
        async fn fetch(&self, _url: &str) -> Result<Response, FetchError> {
            Err(FetchError::Network("unexpected fetch".to_string()))
        }
    }

    struct Noop;

    #[async_trait]
    impl Handler for Noop {
        async fn handle(
            &self,
            _crawler: &Crawler,
            _url: &str,
            _depth: u32,
            _response: Option<&Response>,
            _error: Option<&FetchError>,
        ) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    fn crawler_with_scope(dir: &TempDir, scope: Box<dyn Scope>) -> Crawler {
        Crawler::new(
            dir.path(),
            Vec::new(),
            scope,
            Box::new(NeverFetch),
            Box::new(Noop),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_creates_sentinel_and_entry() {
        let dir = TempDir::new().unwrap();
        let crawler = crawler_with_scope(&dir, Box::new(AllowAll));

        let url = Url::parse("http://test.local/page").unwrap();
        crawler.enqueue(Outlink::primary(url.clone()), 0).await.unwrap();

        assert_eq!(crawler.frontier.pending(), 1);
        let info = crawler.url_info(&url).unwrap().unwrap();
        assert_eq!(info, UrlInfo::default());
    }

    #[tokio::test]
    async fn test_enqueue_dedupes_surface_forms() {
        let dir = TempDir::new().unwrap();
        let crawler = crawler_with_scope(&dir, Box::new(AllowAll));

        for raw in [
            "http://Test.Local//a/%7Euser?b=2&a=1",
            "http://test.local/a/~user?a=1&b=2",
            "http://test.local/a/%7euser?b=2&a=1#frag",
        ] {
            let url = Url::parse(raw).unwrap();
            crawler.enqueue(Outlink::primary(url), 1).await.unwrap();
        }

        assert_eq!(crawler.frontier.pending(), 1);
        assert_eq!(crawler.iter_url_info().count(), 1);
    }

    #[tokio::test]
    async fn test_out_of_scope_has_no_side_effects() {
        let dir = TempDir::new().unwrap();
        let crawler = crawler_with_scope(&dir, Box::new(DenyAll));

        let url = Url::parse("http://test.local/page").unwrap();
        crawler.enqueue(Outlink::primary(url.clone()), 0).await.unwrap();

        assert_eq!(crawler.frontier.pending(), 0);
        assert!(crawler.url_info(&url).unwrap().is_none());
        assert_eq!(crawler.iter_url_info().count(), 0);
    }

    #[tokio::test]
    async fn test_dedupe_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let url = Url::parse("http://test.local/page").unwrap();

        {
            let crawler = crawler_with_scope(&dir, Box::new(AllowAll));
            crawler.enqueue(Outlink::primary(url.clone()), 0).await.unwrap();
            crawler.close().unwrap();
        }

        let crawler = crawler_with_scope(&dir, Box::new(AllowAll));
        crawler.enqueue(Outlink::primary(url), 0).await.unwrap();
        assert_eq!(crawler.frontier.pending(), 1);
    }
}
