//! Cache decision engine and in-memory response cache
//!
//! Computes whether and for how long a response may be cached, and serves
//! still-fresh entries so repeated fetches of static media skip the network.

use crate::interceptor::canonical::CanonicalRequest;
use crate::interceptor::transport::ResponseHead;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Path extensions eligible for response caching
const CACHED_EXTENSIONS: [&str; 6] = ["swf", "flv", "png", "jpg", "jpeg", "mp3"];

/// Status codes a response may be cached under
const CACHEABLE_STATUS_CODES: [u16; 7] = [200, 203, 206, 301, 304, 404, 410];

/// Default capacity bounds for the in-memory cache
const DEFAULT_MAX_ENTRIES: usize = 1024;
const DEFAULT_MAX_BYTES: usize = 32 * 1024 * 1024;

/// Whether a response may be stored, and where
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoragePolicy {
    Allowed,
    /// https responses are held in memory only
    AllowedInMemoryOnly,
    NotAllowed,
}

impl StoragePolicy {
    pub fn permits_caching(&self) -> bool {
        !matches!(self, StoragePolicy::NotAllowed)
    }
}

/// Determine the cache storage policy for a response.
///
/// A response is cacheable if its status code allows it and neither side
/// forbids storage: `no-store` on the response, or `no-store` together with
/// `no-cache` on the request.
pub fn storage_policy(request: &CanonicalRequest, response: &ResponseHead) -> StoragePolicy {
    let mut cacheable = CACHEABLE_STATUS_CODES.contains(&response.status);

    if cacheable {
        if let Some(cc) = header_lowercase(&response.headers, "Cache-Control") {
            if cc.contains("no-store") {
                cacheable = false;
            }
        }
    }

    if cacheable {
        if let Some(cc) = header_lowercase(&request.headers, "Cache-Control") {
            if cc.contains("no-store") && cc.contains("no-cache") {
                cacheable = false;
            }
        }
    }

    if cacheable {
        if request.url.scheme() == "https" {
            StoragePolicy::AllowedInMemoryOnly
        } else {
            StoragePolicy::Allowed
        }
    } else {
        StoragePolicy::NotAllowed
    }
}

/// Compute the expiry timestamp of a response.
///
/// The first `max-age` directive in `Cache-Control` wins; otherwise a
/// parseable HTTP-date `Expires` header is used verbatim; otherwise the
/// response is not cacheable.
pub fn expiry(response: &ResponseHead) -> Option<DateTime<Utc>> {
    if let Some(cc) = header_lowercase(&response.headers, "Cache-Control") {
        if let Some(rest) = cc.split_once("max-age=").map(|(_, rest)| rest) {
            let digits = rest.split(',').next().unwrap_or(rest).trim();
            if let Ok(age) = digits.parse::<i64>() {
                return Some(Utc::now() + Duration::seconds(age));
            }
        }
    }

    if let Some(raw) = crate::interceptor::canonical::header_value(&response.headers, "Expires") {
        if let Ok(parsed) = DateTime::parse_from_rfc2822(raw) {
            return Some(parsed.with_timezone(&Utc));
        }
    }

    None
}

fn header_lowercase(
    headers: &std::collections::HashMap<String, String>,
    name: &str,
) -> Option<String> {
    crate::interceptor::canonical::header_value(headers, name).map(str::to_lowercase)
}

/// A cached exchange with its recorded expiry
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub head: ResponseHead,
    pub body: Vec<u8>,
    pub expires: DateTime<Utc>,
    pub stored_at: DateTime<Utc>,
}

/// Expiry-aware in-memory response cache keyed by canonical URL.
///
/// Bounded by entry count and total body bytes; oldest entries are evicted
/// first when either bound is exceeded.
pub struct ResponseCache {
    entries: DashMap<String, CachedResponse>,
    total_bytes: AtomicUsize,
    max_entries: usize,
    max_bytes: usize,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES, DEFAULT_MAX_BYTES)
    }
}

impl ResponseCache {
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            entries: DashMap::new(),
            total_bytes: AtomicUsize::new(0),
            max_entries,
            max_bytes,
        }
    }

    /// Store a completed response if it qualifies: the storage policy allows
    /// it, the URL's path extension is a cacheable media type, and the
    /// response carries a computable expiry.
    pub fn store_if_needed(
        &self,
        request: &CanonicalRequest,
        head: &ResponseHead,
        body: &[u8],
        policy: StoragePolicy,
    ) {
        if !policy.permits_caching() {
            return;
        }
        let extension = path_extension(request);
        if !extension
            .map(|ext| CACHED_EXTENSIONS.contains(&ext.as_str()))
            .unwrap_or(false)
        {
            return;
        }
        let expires = match expiry(head) {
            Some(expires) => expires,
            None => return,
        };

        let key = request.url.to_string();
        let entry = CachedResponse {
            head: head.clone(),
            body: body.to_vec(),
            expires,
            stored_at: Utc::now(),
        };

        let added = entry.body.len();
        if let Some(previous) = self.entries.insert(key, entry) {
            self.total_bytes.fetch_sub(previous.body.len(), Ordering::Relaxed);
        }
        self.total_bytes.fetch_add(added, Ordering::Relaxed);
        self.enforce_capacity();
    }

    /// Look up a still-fresh cached response. Entries whose expiry is not
    /// strictly in the future are treated as misses and dropped.
    pub fn valid_cached(&self, request: &CanonicalRequest) -> Option<CachedResponse> {
        let key = request.url.to_string();
        let entry = self.entries.get(&key)?.clone();
        if entry.expires > Utc::now() {
            Some(entry)
        } else {
            if let Some((_, stale)) = self.entries.remove(&key) {
                self.total_bytes
                    .fetch_sub(stale.body.len(), Ordering::Relaxed);
            }
            None
        }
    }

    /// Drop every cached response
    pub fn clear(&self) {
        self.entries.clear();
        self.total_bytes.store(0, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn enforce_capacity(&self) {
        while self.entries.len() > self.max_entries
            || self.total_bytes.load(Ordering::Relaxed) > self.max_bytes
        {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.stored_at)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    if let Some((_, removed)) = self.entries.remove(&key) {
                        self.total_bytes
                            .fetch_sub(removed.body.len(), Ordering::Relaxed);
                    }
                }
                None => break,
            }
        }
    }
}

fn path_extension(request: &CanonicalRequest) -> Option<String> {
    let path = request.url.path();
    let name = path.rsplit('/').next()?;
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::canonical::{canonical_request, HttpRequest};
    use crate::models::HttpMethod;

    fn request(url: &str) -> CanonicalRequest {
        canonical_request(&HttpRequest::new(url, HttpMethod::Get)).unwrap()
    }

    fn head(status: u16, headers: &[(&str, &str)]) -> ResponseHead {
        ResponseHead {
            url: "https://example.com/".to_string(),
            status,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            mime_type: None,
        }
    }

    #[test]
    fn max_age_directive_sets_expiry() {
        let head = head(200, &[("Cache-Control", "public, max-age=60, immutable")]);
        let expires = expiry(&head).expect("expiry computed");
        let delta = (expires - (Utc::now() + Duration::seconds(60))).num_seconds().abs();
        assert!(delta <= 1, "expiry within 1s of now + 60s");
    }

    #[test]
    fn invalid_cache_control_without_expires_is_uncacheable() {
        let head = head(200, &[("Cache-Control", "invalid-directive")]);
        assert!(expiry(&head).is_none());
    }

    #[test]
    fn expires_header_is_used_verbatim() {
        let head = head(200, &[("Expires", "Wed, 21 Oct 2065 07:28:00 GMT")]);
        let expires = expiry(&head).expect("expiry parsed");
        assert_eq!(expires.timezone(), Utc);
        assert!(expires > Utc::now());
    }

    #[test]
    fn max_age_wins_over_expires() {
        let head = head(
            200,
            &[
                ("Cache-Control", "max-age=10"),
                ("Expires", "Wed, 21 Oct 2065 07:28:00 GMT"),
            ],
        );
        let expires = expiry(&head).unwrap();
        assert!(expires < Utc::now() + Duration::seconds(11));
    }

    #[test]
    fn storage_policy_follows_status_and_directives() {
        let req = request("http://example.com/a.png");
        assert_eq!(storage_policy(&req, &head(200, &[])), StoragePolicy::Allowed);
        assert_eq!(
            storage_policy(&req, &head(500, &[])),
            StoragePolicy::NotAllowed
        );
        assert_eq!(
            storage_policy(&req, &head(200, &[("Cache-Control", "no-store")])),
            StoragePolicy::NotAllowed
        );

        let https = request("https://example.com/a.png");
        assert_eq!(
            storage_policy(&https, &head(200, &[])),
            StoragePolicy::AllowedInMemoryOnly
        );
    }

    #[test]
    fn request_no_store_no_cache_blocks_storage() {
        let mut plain = HttpRequest::new("http://example.com/a.png", HttpMethod::Get);
        plain.headers.insert(
            "Cache-Control".to_string(),
            "no-store, no-cache".to_string(),
        );
        let req = canonical_request(&plain).unwrap();
        assert_eq!(
            storage_policy(&req, &head(200, &[])),
            StoragePolicy::NotAllowed
        );
    }

    #[test]
    fn store_requires_cacheable_extension_and_expiry() {
        let cache = ResponseCache::default();
        let fresh = head(200, &[("Cache-Control", "max-age=60")]);

        // Wrong extension: not stored.
        cache.store_if_needed(
            &request("https://example.com/data.json"),
            &fresh,
            b"{}",
            StoragePolicy::Allowed,
        );
        assert!(cache.is_empty());

        // No expiry: not stored.
        cache.store_if_needed(
            &request("https://example.com/pic.png"),
            &head(200, &[]),
            b"png",
            StoragePolicy::Allowed,
        );
        assert!(cache.is_empty());

        // Qualifies.
        let req = request("https://example.com/pic.png");
        cache.store_if_needed(&req, &fresh, b"png", StoragePolicy::AllowedInMemoryOnly);
        assert_eq!(cache.len(), 1);
        assert!(cache.valid_cached(&req).is_some());
    }

    #[test]
    fn expired_entries_are_misses() {
        let cache = ResponseCache::default();
        let req = request("https://example.com/pic.jpg");
        let head = head(200, &[("Cache-Control", "max-age=0")]);
        cache.store_if_needed(&req, &head, b"jpg", StoragePolicy::Allowed);

        // max-age=0 is never strictly in the future at lookup time.
        assert!(cache.valid_cached(&req).is_none());
        assert!(cache.is_empty(), "stale entry dropped on lookup");
    }

    #[test]
    fn capacity_evicts_oldest_entries() {
        let cache = ResponseCache::new(2, usize::MAX);
        let fresh = head(200, &[("Cache-Control", "max-age=600")]);
        for name in ["a", "b", "c"] {
            cache.store_if_needed(
                &request(&format!("https://example.com/{name}.png")),
                &fresh,
                name.as_bytes(),
                StoragePolicy::Allowed,
            );
        }
        assert_eq!(cache.len(), 2);
        assert!(cache
            .valid_cached(&request("https://example.com/c.png"))
            .is_some());
    }
}
