use async_trait::async_trait;
use clap::Parser;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use trawl::cli::Cli;
use trawl::export::export_jsonl;
use trawl::extract;
use trawl::handlers::{filter_errors, follow_redirects, handle_retries, Handler, HandlerError};
use trawl::scope::{AndScope, DepthScope, RegexIgnoreScope, SchemeScope, SeedScope};
use trawl::{parse_urls, Crawler, FetchError, Fetcher, HttpClient, Response};

/// Status-code histogram and byte counter, reported every few seconds.
struct CrawlStats {
    statuses: parking_lot::Mutex<HashMap<u16, u64>>,
    bytes: AtomicU64,
    start: Instant,
}

impl CrawlStats {
    fn new() -> Self {
        Self {
            statuses: parking_lot::Mutex::new(HashMap::new()),
            bytes: AtomicU64::new(0),
            start: Instant::now(),
        }
    }

    fn update(&self, response: &Response) {
        *self
            .statuses
            .lock()
            .entry(response.status.as_u16())
            .or_default() += 1;
        self.bytes
            .fetch_add(response.body.len() as u64, Ordering::Relaxed);
    }

    fn dump(&self) {
        let statuses = self.statuses.lock().clone();
        let bytes = self.bytes.load(Ordering::Relaxed);
        let rate = bytes as f64 / self.start.elapsed().as_secs_f64() / 1000.0;
        tracing::info!("downloaded {bytes} bytes ({rate:.4} KB/s), status: {statuses:?}");
    }
}

/// Fetcher wrapper feeding the stats counters.
struct StatsFetcher {
    inner: HttpClient,
    stats: Arc<CrawlStats>,
}

#[async_trait]
impl Fetcher for StatsFetcher {
    async fn fetch(&self, url: &str) -> Result<Response, FetchError> {
        let result = self.inner.fetch(url).await;
        if let Ok(response) = &result {
            self.stats.update(response);
        }
        result
    }
}

/// Innermost handler: extract outlinks from the page and feed them back into
/// the crawler.
struct ExtractHandler;

#[async_trait]
impl Handler for ExtractHandler {
    async fn handle(
        &self,
        crawler: &Crawler,
        _url: &str,
        depth: u32,
        response: Option<&Response>,
        _error: Option<&FetchError>,
    ) -> Result<(), HandlerError> {
        let Some(response) = response else {
            return Ok(());
        };
        for link in extract::outlinks(response) {
            crawler
                .enqueue(link, depth + 1)
                .await
                .map_err(HandlerError::fatal)?;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    trawl::logging::init_logging("logs")?;

    let seeds = parse_urls(&cli.seeds)?;
    let schemes: Vec<String> = cli
        .schemes
        .split(',')
        .map(|s| s.trim().to_string())
        .collect();

    let scope = AndScope::new(vec![
        Box::new(SchemeScope::new(&schemes)),
        Box::new(DepthScope::new(cli.depth)),
        Box::new(SeedScope::new(&seeds)),
        Box::new(RegexIgnoreScope::new(&cli.ignore_patterns)?),
    ]);

    let stats = Arc::new(CrawlStats::new());
    let fetcher = StatsFetcher {
        inner: HttpClient::new(cli.user_agent.clone(), cli.timeout)?,
        stats: stats.clone(),
    };

    let handler = handle_retries(follow_redirects(filter_errors(Box::new(ExtractHandler))));

    let crawler = Arc::new(Crawler::new(
        &cli.state,
        seeds,
        Box::new(scope),
        Box::new(fetcher),
        handler,
    )?);

    {
        let crawler = crawler.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, stopping crawl");
                crawler.stop();
            }
        });
    }

    {
        let stats = stats.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(10));
            tick.tick().await;
            loop {
                tick.tick().await;
                stats.dump();
            }
        });
    }

    tracing::info!(
        state = %cli.state,
        concurrency = cli.concurrency,
        depth = cli.depth,
        "starting crawl"
    );

    crawler.run(cli.concurrency).await?;
    stats.dump();

    if let Some(output) = &cli.output {
        let count = export_jsonl(&crawler, output)?;
        tracing::info!("exported {count} records to {output}");
    }

    crawler.close()?;
    if !cli.keep_db {
        std::fs::remove_dir_all(&cli.state)?;
    }

    Ok(())
}
