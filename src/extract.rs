//! Outlink extraction from fetched responses. Used by the reference host
//! program's save handler; the crawler core only ever sees the resulting
//! `enqueue` calls.

use crate::fetcher::Response;
use crate::models::{LinkTag, Outlink};
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Element/attribute pairs that carry links, and how to tag what they point
/// at. Anchors lead to other pages; everything else is a page resource.
const LINK_SOURCES: &[(&str, &str, LinkTag)] = &[
    ("a[href]", "href", LinkTag::Primary),
    ("link[href]", "href", LinkTag::Related),
    ("img[src]", "src", LinkTag::Related),
    ("script[src]", "src", LinkTag::Related),
];

fn css_url_rx() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| Regex::new(r#"background.*:.*url\(["']?([^'"\)]+)["']?\)"#).expect("invalid CSS url regex"))
}

/// Extract all outbound links from a response, resolved against the request
/// URL and deduplicated. HTML and CSS bodies are understood; anything else
/// yields no links.
pub fn outlinks(response: &Response) -> Vec<Outlink> {
    let content_type = response.content_type().unwrap_or_default();

    let raw: Vec<(String, LinkTag)> = if content_type.starts_with("text/html")
        || content_type.starts_with("application/xhtml+xml")
    {
        html_links(&String::from_utf8_lossy(&response.body))
    } else if content_type.starts_with("text/css") {
        css_links(&String::from_utf8_lossy(&response.body))
    } else {
        Vec::new()
    };

    let mut resolved: HashMap<String, Outlink> = HashMap::new();
    for (href, tag) in raw {
        let href = href.trim();
        if href.is_empty()
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
            || href.starts_with("data:")
        {
            continue;
        }
        if let Ok(url) = response.url.join(href) {
            resolved
                .entry(url.to_string())
                .or_insert(Outlink { url, tag });
        }
    }
    resolved.into_values().collect()
}

fn html_links(body: &str) -> Vec<(String, LinkTag)> {
    let document = Html::parse_document(body);
    let mut links = Vec::new();

    for (selector, attr, tag) in LINK_SOURCES {
        let selector = Selector::parse(selector).expect("invalid CSS selector");
        for element in document.select(&selector) {
            if let Some(value) = element.value().attr(attr) {
                links.push((value.to_string(), *tag));
            }
        }
    }

    links
}

fn css_links(body: &str) -> Vec<(String, LinkTag)> {
    css_url_rx()
        .captures_iter(body)
        .map(|caps| (caps[1].to_string(), LinkTag::Related))
        .collect()
}
