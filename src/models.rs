use serde::{Deserialize, Serialize};
use url::Url;

/// Relationship of a discovered link to the page that referenced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkTag {
    /// Another page to crawl transitively.
    Primary,
    /// A subordinate resource of the referring page (image, stylesheet, ...).
    Related,
}

/// A tagged outbound link.
#[derive(Debug, Clone)]
pub struct Outlink {
    pub url: Url,
    pub tag: LinkTag,
}

impl Outlink {
    pub fn primary(url: Url) -> Self {
        Self {
            url,
            tag: LinkTag::Primary,
        }
    }

    pub fn related(url: Url) -> Self {
        Self {
            url,
            tag: LinkTag::Related,
        }
    }
}

/// Payload stored in the frontier for each pending URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub url: String,
    pub depth: u32,
}

/// Crawl record for a URL, keyed by `url/<canonical>`.
///
/// An empty record is written at enqueue time and doubles as the dedupe
/// sentinel; it is updated at most once, after the fetch completes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlInfo {
    pub url: String,
    pub status_code: Option<u16>,
    pub crawled_at: Option<u64>,
    pub error: Option<String>,
}

impl UrlInfo {
    /// Stamp the record with the current time.
    pub fn mark_crawled(&mut self) {
        self.crawled_at = Some(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        );
    }
}

/// Key of the crawl record for a canonical URL string.
pub fn url_key(canonical: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + canonical.len());
    key.extend_from_slice(b"url/");
    key.extend_from_slice(canonical.as_bytes());
    key
}

/// Parse a list of URL strings, failing on the first malformed one.
pub fn parse_urls(raw: &[String]) -> Result<Vec<Url>, url::ParseError> {
    raw.iter().map(|s| Url::parse(s)).collect()
}
