//! Response cache adapter.
//!
//! The engine talks to any store through the [`Cache`] trait. Entries are
//! JSON documents ([`CachedResponse`]) keyed by method, URL and the values
//! of configured request headers. [`MemoryCache`] is a ready-made store:
//! - Cache-Control parsing (`max-age`, `s-maxage`, `no-store`, `private`)
//! - `Expires`/`Date` freshness fallback
//! - Thread-safe concurrent access through `DashMap`

use crate::base::neterror::BoxError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use dashmap::DashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;
use url::Url;

/// Alias for the `Future` type returned by a cache store.
pub type CacheFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BoxError>> + Send + 'a>>;

/// Key-value store backing the response cache.
///
/// Implementations must be thread-safe and atomic per key.
pub trait Cache: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Option<Bytes>>;

    /// Store `value`; `ttl` is the freshness lifetime of the entry.
    fn set<'a>(&'a self, key: &'a str, value: Bytes, ttl: Option<Duration>)
        -> CacheFuture<'a, ()>;

    /// Remove `key`, returning whether it was present.
    fn delete<'a>(&'a self, key: &'a str) -> CacheFuture<'a, bool>;
}

impl<C: Cache + ?Sized> Cache for Arc<C> {
    fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Option<Bytes>> {
        (**self).get(key)
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> CacheFuture<'a, ()> {
        (**self).set(key, value, ttl)
    }

    fn delete<'a>(&'a self, key: &'a str) -> CacheFuture<'a, bool> {
        (**self).delete(key)
    }
}

/// In-memory cache store with per-entry expiry.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, (Bytes, Option<Instant>)>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear all cached entries.
    pub fn clear(&self) {
        self.entries.clear();
    }

    fn lookup(&self, key: &str) -> Option<Bytes> {
        {
            let entry = self.entries.get(key)?;
            if !is_stale(&entry.1) {
                return Some(entry.0.clone());
            }
        }
        self.evict_stale(key);
        None
    }

    /// Drop `key` if it is still expired; re-checked under the shard lock so
    /// an entry written by a concurrent `set` survives.
    fn evict_stale(&self, key: &str) {
        self.entries.remove_if(key, |_, (_, deadline)| is_stale(deadline));
    }
}

fn is_stale(deadline: &Option<Instant>) -> bool {
    matches!(deadline, Some(d) if Instant::now() >= *d)
}

impl Cache for MemoryCache {
    fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Option<Bytes>> {
        Box::pin(async move { Ok(self.lookup(key)) })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> CacheFuture<'a, ()> {
        Box::pin(async move {
            let deadline = ttl.map(|ttl| Instant::now() + ttl);
            self.entries.insert(key.to_string(), (value, deadline));
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> CacheFuture<'a, bool> {
        Box::pin(async move { Ok(self.entries.remove(key).is_some()) })
    }
}

/// Serialized form of a cached response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub url: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    pub headers: Vec<(String, String)>,
    /// Body as received on the wire, base64 encoded.
    pub body: String,
    /// Expiry as milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl CachedResponse {
    pub fn new(
        url: &Url,
        status: StatusCode,
        status_message: Option<String>,
        headers: &HeaderMap,
        body: &[u8],
        ttl: Option<Duration>,
    ) -> Self {
        let headers = headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let expires_at = ttl.map(|ttl| now_millis().saturating_add(ttl.as_millis() as u64));
        Self {
            url: url.to_string(),
            status: status.as_u16(),
            status_message,
            headers,
            body: STANDARD.encode(body),
            expires_at,
        }
    }

    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    pub fn from_slice(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.expires_at, Some(at) if now_millis() >= at)
    }

    pub fn status(&self) -> Option<StatusCode> {
        StatusCode::from_u16(self.status).ok()
    }

    pub fn header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                map.append(name, value);
            }
        }
        map
    }

    pub fn body(&self) -> Result<Bytes, base64::DecodeError> {
        STANDARD.decode(&self.body).map(Bytes::from)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Only GET and HEAD responses are looked up or stored.
pub fn is_cacheable_method(method: &Method) -> bool {
    method == Method::GET || method == Method::HEAD
}

/// Build the cache key for a request.
///
/// `cacheable-request:<METHOD>:<url without fragment>` followed by
/// `|name=value` for each header in `vary`.
pub fn cache_key(method: &Method, url: &Url, headers: &HeaderMap, vary: &[HeaderName]) -> String {
    let mut url = url.clone();
    url.set_fragment(None);

    let mut key = format!("cacheable-request:{}:{}", method.as_str(), url);
    for name in vary {
        let value = headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        key.push('|');
        key.push_str(name.as_str());
        key.push('=');
        key.push_str(value);
    }
    key
}

const CACHEABLE_STATUSES: [u16; 11] = [200, 203, 204, 206, 300, 301, 404, 405, 410, 414, 501];

/// Freshness lifetime of a response, or `None` if it must not be stored.
pub fn cache_ttl(status: StatusCode, headers: &HeaderMap) -> Option<Duration> {
    if !CACHEABLE_STATUSES.contains(&status.as_u16()) {
        return None;
    }

    let cc = parse_cache_control(headers);
    if cc.no_store || cc.private {
        return None;
    }
    if let Some(age) = cc.s_maxage.or(cc.max_age) {
        return (age > 0).then(|| Duration::from_secs(age));
    }
    if cc.no_cache {
        return None;
    }

    let expires = header_date(headers, http::header::EXPIRES)?;
    let now = header_date(headers, http::header::DATE).unwrap_or_else(SystemTime::now);
    expires
        .duration_since(now)
        .ok()
        .filter(|ttl| !ttl.is_zero())
}

fn header_date(headers: &HeaderMap, name: HeaderName) -> Option<SystemTime> {
    let value = headers.get(name)?.to_str().ok()?;
    httpdate::parse_http_date(value).ok()
}

/// Parsed Cache-Control directive.
#[derive(Debug, Default)]
struct CacheControl {
    no_store: bool,
    no_cache: bool,
    private: bool,
    max_age: Option<u64>,
    s_maxage: Option<u64>,
}

/// Parse Cache-Control header.
fn parse_cache_control(headers: &HeaderMap) -> CacheControl {
    let mut cc = CacheControl::default();

    for value in headers.get_all(http::header::CACHE_CONTROL) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        for directive in value.split(',') {
            let directive = directive.trim().to_lowercase();

            if directive == "no-store" {
                cc.no_store = true;
            } else if directive == "no-cache" {
                cc.no_cache = true;
            } else if directive == "private" {
                cc.private = true;
            } else if let Some(age) = directive.strip_prefix("s-maxage=") {
                cc.s_maxage = age.trim_matches('"').parse().ok();
            } else if let Some(age) = directive.strip_prefix("max-age=") {
                cc.max_age = age.trim_matches('"').parse().ok();
            }
        }
    }

    cc
}
