//! URL canonicalization. Two URLs name the same resource iff their canonical
//! string forms are byte-equal, so everything that touches the crawl database
//! goes through [`canonicalize`] first.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use url::form_urlencoded;
use url::Url;

/// Characters kept percent-encoded inside a path segment. Every other ASCII
/// character stays bare; non-ASCII bytes are always encoded.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'\\')
    .add(b'^')
    .add(b'|');

/// Produce the canonical form of a URL.
///
/// Applied normalizations: host lowercasing and dot-segment resolution (done
/// by the parser), default-port removal, duplicate-slash collapse, fragment
/// removal, query-parameter sort, and percent-encoding normalization of path
/// segments (unreserved characters decoded, escapes uppercased).
///
/// Idempotent: `canonicalize(canonicalize(u)) == canonicalize(u)`.
///
/// # Panics
///
/// Panics if the canonical form fails to re-parse. That means the
/// normalization itself is broken, not that the input was bad.
pub fn canonicalize(url: &Url) -> Url {
    let mut out = url.clone();

    out.set_fragment(None);

    if let Some(port) = out.port() {
        if default_port(out.scheme()) == Some(port) {
            let _ = out.set_port(None);
        }
    }

    if !out.cannot_be_a_base() {
        normalize_path(&mut out);
        normalize_query(&mut out);
    }

    match Url::parse(out.as_str()) {
        Ok(reparsed) => reparsed,
        Err(e) => panic!("canonical URL {:?} failed to re-parse: {}", out.as_str(), e),
    }
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" | "ws" => Some(80),
        "https" | "wss" => Some(443),
        "ftp" => Some(21),
        _ => None,
    }
}

fn normalize_path(url: &mut Url) {
    let path = url.path().to_string();

    let mut segments = Vec::new();
    for segment in path.split('/') {
        if segment.is_empty() {
            // Skipping empty segments collapses duplicate slashes.
            continue;
        }
        let decoded = percent_decode_str(segment).decode_utf8_lossy().into_owned();
        segments.push(utf8_percent_encode(&decoded, SEGMENT).to_string());
    }

    let mut normalized = String::with_capacity(path.len());
    normalized.push('/');
    normalized.push_str(&segments.join("/"));
    if path.len() > 1 && path.ends_with('/') && normalized.len() > 1 {
        normalized.push('/');
    }

    url.set_path(&normalized);
}

fn normalize_query(url: &mut Url) {
    if url.query().is_none() {
        return;
    }

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if pairs.is_empty() {
        url.set_query(None);
        return;
    }

    pairs.sort();

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (k, v) in &pairs {
        serializer.append_pair(k, v);
    }
    let query = serializer.finish();
    url.set_query(Some(&query));
}
