//! Request canonicalization
//!
//! Deterministic normalization of a request's URL and headers before it is
//! handed to the real transport. Canonicalization is idempotent: running it
//! over its own output yields an identical request.

use crate::models::HttpMethod;
use std::collections::HashMap;
use thiserror::Error;
use url::Url;

/// An outbound request as issued by the host application
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub method: HttpMethod,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    /// Set once the engine has claimed and forwarded this request, so a
    /// re-entrant shim never intercepts its own traffic
    pub intercepted: bool,
}

impl HttpRequest {
    pub fn new(url: &str, method: HttpMethod) -> Self {
        Self {
            url: url.to_string(),
            method,
            headers: HashMap::new(),
            body: None,
            intercepted: false,
        }
    }
}

/// A request that has passed canonicalization. The URL is structurally valid
/// and normalized; default headers are present.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRequest {
    pub url: Url,
    pub method: HttpMethod,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    /// Carried through from [`HttpRequest::intercepted`]
    pub intercepted: bool,
}

impl CanonicalRequest {
    /// View the canonical request as a plain request again
    pub fn as_request(&self) -> HttpRequest {
        HttpRequest {
            url: self.url.to_string(),
            method: self.method,
            headers: self.headers.clone(),
            body: self.body.clone(),
            intercepted: self.intercepted,
        }
    }
}

#[derive(Debug, Error)]
pub enum CanonicalizeError {
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),
    #[error("malformed URL: {0}")]
    Malformed(#[from] url::ParseError),
}

/// Case-insensitive header lookup
pub fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn has_header(headers: &HashMap<String, String>, name: &str) -> bool {
    header_value(headers, name).is_some()
}

/// Canonicalize a request.
///
/// Only http/https requests are eligible. URL normalization runs the steps in
/// order, re-parsing whenever the URL was structurally altered: fix the
/// post-scheme separator, lowercase scheme and host, substitute `localhost`
/// for an empty host and `/` for an empty path.
pub fn canonical_request(request: &HttpRequest) -> Result<CanonicalRequest, CanonicalizeError> {
    let scheme = raw_scheme(&request.url).to_lowercase();
    if scheme != "http" && scheme != "https" {
        return Err(CanonicalizeError::UnsupportedScheme(scheme));
    }

    let url = normalize_url(&request.url)?;

    let mut headers = request.headers.clone();
    canonicalize_headers(&mut headers, request.method, request.body.is_some());

    Ok(CanonicalRequest {
        url,
        method: request.method,
        headers,
        body: request.body.clone(),
        intercepted: request.intercepted,
    })
}

fn raw_scheme(raw: &str) -> &str {
    raw.split(':').next().unwrap_or_default()
}

fn normalize_url(raw: &str) -> Result<Url, CanonicalizeError> {
    // The post-scheme separator must be exactly "://"; rewrite and start over
    // from the repaired string if it is not.
    let repaired = fix_scheme_separator(raw);

    // An absent authority component becomes localhost. This must happen
    // before parsing: the parser folds stray slashes into the host, so an
    // empty host would otherwise swallow the first path segment.
    let repaired = substitute_localhost_if_empty(&repaired);

    let mut url = match Url::parse(&repaired) {
        Ok(url) => url,
        // Covers hosts the pre-pass cannot see, e.g. "http://:8080/x".
        Err(url::ParseError::EmptyHost) => Url::parse(&insert_localhost(&repaired))?,
        Err(err) => return Err(err.into()),
    };

    // Parsing already lowercased the scheme and host. An empty path becomes "/".
    if url.path().is_empty() {
        url.set_path("/");
    }

    Ok(url)
}

fn fix_scheme_separator(raw: &str) -> String {
    let (scheme, rest) = match raw.split_once(':') {
        Some(parts) => parts,
        None => return raw.to_string(),
    };
    if rest.starts_with("//") {
        raw.to_string()
    } else {
        format!("{}://{}", scheme, rest.trim_start_matches('/'))
    }
}

fn substitute_localhost_if_empty(repaired: &str) -> String {
    if let Some((_, rest)) = repaired.split_once("://") {
        let authority_missing = rest
            .chars()
            .next()
            .map_or(true, |c| matches!(c, '/' | '?' | '#'));
        if authority_missing {
            return insert_localhost(repaired);
        }
    }
    repaired.to_string()
}

fn insert_localhost(repaired: &str) -> String {
    match repaired.split_once("://") {
        Some((scheme, rest)) => format!("{}://localhost{}", scheme, rest),
        None => repaired.to_string(),
    }
}

/// Add the default headers a well-formed request carries, without touching
/// any the caller already set.
fn canonicalize_headers(
    headers: &mut HashMap<String, String>,
    method: HttpMethod,
    has_body: bool,
) {
    if method == HttpMethod::Post && has_body && !has_header(headers, "Content-Type") {
        headers.insert(
            "Content-Type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        );
    }
    if !has_header(headers, "Accept") {
        headers.insert("Accept".to_string(), "*/*".to_string());
    }
    if !has_header(headers, "Accept-Encoding") {
        headers.insert("Accept-Encoding".to_string(), "gzip, deflate".to_string());
    }
    if !has_header(headers, "Accept-Language") {
        headers.insert("Accept-Language".to_string(), "en-us".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalization_is_idempotent() {
        let cases = [
            "HTTP://Example.COM/Path?q=1",
            "http:/example.com/a",
            "https:example.com",
            "http:///only-path",
            "http://",
            "https://example.com",
        ];
        for raw in cases {
            let request = HttpRequest::new(raw, HttpMethod::Get);
            let once = canonical_request(&request).expect("canonicalizes");
            let twice = canonical_request(&once.as_request()).expect("re-canonicalizes");
            assert_eq!(once, twice, "idempotence for {raw}");
        }
    }

    #[test]
    fn scheme_and_host_are_lowercased() {
        let request = HttpRequest::new("HTTPS://API.Example.COM/Users", HttpMethod::Get);
        let canonical = canonical_request(&request).unwrap();
        assert_eq!(canonical.url.scheme(), "https");
        assert_eq!(canonical.url.host_str(), Some("api.example.com"));
        // Path case is preserved.
        assert_eq!(canonical.url.path(), "/Users");
    }

    #[test]
    fn broken_separator_is_repaired() {
        let request = HttpRequest::new("http:/example.com/a", HttpMethod::Get);
        let canonical = canonical_request(&request).unwrap();
        assert_eq!(canonical.url.as_str(), "http://example.com/a");

        let request = HttpRequest::new("http:example.com", HttpMethod::Get);
        let canonical = canonical_request(&request).unwrap();
        assert_eq!(canonical.url.host_str(), Some("example.com"));
    }

    #[test]
    fn empty_host_becomes_localhost() {
        let request = HttpRequest::new("http:///status", HttpMethod::Get);
        let canonical = canonical_request(&request).unwrap();
        assert_eq!(canonical.url.host_str(), Some("localhost"));
        assert_eq!(canonical.url.path(), "/status");

        let request = HttpRequest::new("http://:8080/x", HttpMethod::Get);
        let canonical = canonical_request(&request).unwrap();
        assert_eq!(canonical.url.host_str(), Some("localhost"));
        assert_eq!(canonical.url.port(), Some(8080));
    }

    #[test]
    fn empty_path_becomes_root() {
        let request = HttpRequest::new("https://example.com", HttpMethod::Get);
        let canonical = canonical_request(&request).unwrap();
        assert_eq!(canonical.url.path(), "/");
    }

    #[test]
    fn non_http_schemes_are_rejected() {
        let request = HttpRequest::new("ftp://example.com/file", HttpMethod::Get);
        match canonical_request(&request) {
            Err(CanonicalizeError::UnsupportedScheme(scheme)) => assert_eq!(scheme, "ftp"),
            other => panic!("expected scheme rejection, got {other:?}"),
        }
    }

    #[test]
    fn post_with_body_gets_form_content_type() {
        let mut request = HttpRequest::new("https://example.com/submit", HttpMethod::Post);
        request.body = Some(b"a=1".to_vec());
        let canonical = canonical_request(&request).unwrap();
        assert_eq!(
            header_value(&canonical.headers, "content-type"),
            Some("application/x-www-form-urlencoded")
        );
    }

    #[test]
    fn default_headers_do_not_override_existing() {
        let mut request = HttpRequest::new("https://example.com", HttpMethod::Get);
        request
            .headers
            .insert("accept".to_string(), "application/json".to_string());
        let canonical = canonical_request(&request).unwrap();
        assert_eq!(
            header_value(&canonical.headers, "Accept"),
            Some("application/json")
        );
        assert_eq!(
            header_value(&canonical.headers, "Accept-Encoding"),
            Some("gzip, deflate")
        );
        assert_eq!(
            header_value(&canonical.headers, "Accept-Language"),
            Some("en-us")
        );
    }

    #[test]
    fn post_without_body_gets_no_content_type() {
        let request = HttpRequest::new("https://example.com/submit", HttpMethod::Post);
        let canonical = canonical_request(&request).unwrap();
        assert!(header_value(&canonical.headers, "Content-Type").is_none());
    }
}
