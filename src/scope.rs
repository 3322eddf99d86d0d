//! Scope predicates deciding which URLs may ever enter the frontier.
//!
//! Scopes are pure and side-effect free; a crawl composes several of them
//! with [`AndScope`] and hands the result to the crawler.

use crate::models::Outlink;
use regex::RegexSet;
use url::Url;

/// Common crawl-trap patterns, applied when no custom deny list is given.
/// Mostly endless-pagination and login endpoints.
const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    r"(?i)/wp-login\.php",
    r"(?i)/xmlrpc\.php",
    r"[?&]replytocom=\d+",
    r"[?&]C=[NMSD];O=[AD]",
    r"[?&]action=(edit|history|raw)\b",
];

/// A pure predicate over a tagged URL and its link depth.
pub trait Scope: Send + Sync {
    /// Whether the link is admissible at this depth.
    fn check(&self, link: &Outlink, depth: u32) -> bool;
}

/// Logical AND of sub-scopes, short-circuiting on the first rejection.
pub struct AndScope {
    scopes: Vec<Box<dyn Scope>>,
}

impl AndScope {
    pub fn new(scopes: Vec<Box<dyn Scope>>) -> Self {
        Self { scopes }
    }
}

impl Scope for AndScope {
    fn check(&self, link: &Outlink, depth: u32) -> bool {
        self.scopes.iter().all(|s| s.check(link, depth))
    }
}

/// Admits only configured URL schemes.
pub struct SchemeScope {
    schemes: Vec<String>,
}

impl SchemeScope {
    pub fn new<S: AsRef<str>>(schemes: &[S]) -> Self {
        Self {
            schemes: schemes.iter().map(|s| s.as_ref().to_string()).collect(),
        }
    }
}

impl Scope for SchemeScope {
    fn check(&self, link: &Outlink, _depth: u32) -> bool {
        self.schemes.iter().any(|s| s == link.url.scheme())
    }
}

/// Admits links up to a maximum depth.
pub struct DepthScope {
    max_depth: u32,
}

impl DepthScope {
    pub fn new(max_depth: u32) -> Self {
        Self { max_depth }
    }
}

impl Scope for DepthScope {
    fn check(&self, _link: &Outlink, depth: u32) -> bool {
        depth <= self.max_depth
    }
}

/// Admits URLs whose host equals, or is a subdomain of, any seed host.
pub struct SeedScope {
    hosts: Vec<String>,
}

impl SeedScope {
    pub fn new(seeds: &[Url]) -> Self {
        Self {
            hosts: seeds
                .iter()
                .filter_map(|u| u.host_str().map(|h| h.to_string()))
                .collect(),
        }
    }
}

impl Scope for SeedScope {
    fn check(&self, link: &Outlink, _depth: u32) -> bool {
        let Some(host) = link.url.host_str() else {
            return false;
        };
        self.hosts
            .iter()
            .any(|seed| host == seed || host.ends_with(&format!(".{}", seed)))
    }
}

/// Admits URLs matching none of a set of deny patterns.
pub struct RegexIgnoreScope {
    deny: RegexSet,
}

impl RegexIgnoreScope {
    /// Build from explicit patterns. An empty slice means the built-in
    /// trap list.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, regex::Error> {
        let deny = if patterns.is_empty() {
            RegexSet::new(DEFAULT_IGNORE_PATTERNS)?
        } else {
            RegexSet::new(patterns.iter().map(|p| p.as_ref()))?
        };
        Ok(Self { deny })
    }
}

impl Scope for RegexIgnoreScope {
    fn check(&self, link: &Outlink, _depth: u32) -> bool {
        !self.deny.is_match(link.url.as_str())
    }
}
