//! A restartable, persistent web crawler.
//!
//! Given a set of seed URLs and a scope predicate, the crawler retrieves
//! resources over HTTP(S), hands every response to a user handler, and
//! enqueues in-scope discoveries for further crawling. All crawl state lives
//! in an embedded database, so a crawl can stop and resume without losing or
//! duplicating work.

pub mod canonical;
pub mod cli;
pub mod crawler;
pub mod export;
pub mod extract;
pub mod fetcher;
pub mod frontier;
pub mod handlers;
pub mod logging;
pub mod models;
pub mod scope;
pub mod store;

pub use canonical::canonicalize;
pub use crawler::{CrawlError, Crawler};
pub use export::export_jsonl;
pub use fetcher::{FetchError, Fetcher, HttpClient, Response};
pub use frontier::{Frontier, FrontierConfig, Lease, Outcome, QueueError};
pub use handlers::{filter_errors, follow_redirects, handle_retries, Handler, HandlerError};
pub use models::{parse_urls, LinkTag, Outlink, QueueItem, UrlInfo};
pub use scope::{AndScope, DepthScope, RegexIgnoreScope, Scope, SchemeScope, SeedScope};
pub use store::{ObjDb, StoreError};
