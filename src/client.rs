//! HTTP Client with builder pattern.
//!
//! A [`Client`] holds immutable defaults; every call merges its own
//! [`Options`] over them.
//!
//! # Example
//!
//! ```rust,ignore
//! use fetchnet::{Client, Options};
//! use std::time::Duration;
//!
//! let client = Client::builder()
//!     .base_url("https://api.example.com/v1/")
//!     .timeout(Duration::from_secs(10))
//!     .retries(3)
//!     .build();
//!
//! let resp = client.get("users", Options::new().json(true)).await?;
//! ```

use crate::http::hooks::Hooks;
use crate::http::httpcache::Cache;
use crate::http::responsebody::Encoding;
use crate::http::retry::RetryPolicy;
use crate::http::streamfactory::Transport;
use crate::http::timing::Timeouts;
use crate::urlrequest::options::{Options, Target};
use crate::urlrequest::request::{ResponseFuture, ResponseStream};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use std::sync::Arc;

/// HTTP Client for making requests.
///
/// Cheap to clone; clones share the same defaults.
#[derive(Clone, Debug, Default)]
pub struct Client {
    defaults: Arc<Options>,
}

impl Client {
    /// Create a new client with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// The defaults every call starts from.
    pub fn defaults(&self) -> &Options {
        &self.defaults
    }

    /// A new client whose defaults are these defaults merged with `options`.
    pub fn extend(&self, options: Options) -> Client {
        Client {
            defaults: Arc::new(self.defaults.merge(options)),
        }
    }

    /// Start a call. It runs on its own task whether or not the returned
    /// future is polled.
    pub fn request(&self, target: impl Into<Target>, options: Options) -> ResponseFuture {
        ResponseFuture::spawn(target.into(), self.defaults.merge(options))
    }

    /// Start a call in stream mode.
    pub fn stream(&self, target: impl Into<Target>, options: Options) -> ResponseStream {
        ResponseStream::spawn(target.into(), self.defaults.merge(options))
    }

    pub fn get(&self, target: impl Into<Target>, options: Options) -> ResponseFuture {
        self.request(target, options.method(Method::GET))
    }

    pub fn post(&self, target: impl Into<Target>, options: Options) -> ResponseFuture {
        self.request(target, options.method(Method::POST))
    }

    pub fn put(&self, target: impl Into<Target>, options: Options) -> ResponseFuture {
        self.request(target, options.method(Method::PUT))
    }

    pub fn patch(&self, target: impl Into<Target>, options: Options) -> ResponseFuture {
        self.request(target, options.method(Method::PATCH))
    }

    pub fn head(&self, target: impl Into<Target>, options: Options) -> ResponseFuture {
        self.request(target, options.method(Method::HEAD))
    }

    pub fn delete(&self, target: impl Into<Target>, options: Options) -> ResponseFuture {
        self.request(target, options.method(Method::DELETE))
    }

    pub fn get_stream(&self, target: impl Into<Target>, options: Options) -> ResponseStream {
        self.stream(target, options.method(Method::GET))
    }

    pub fn post_stream(&self, target: impl Into<Target>, options: Options) -> ResponseStream {
        self.stream(target, options.method(Method::POST))
    }

    pub fn put_stream(&self, target: impl Into<Target>, options: Options) -> ResponseStream {
        self.stream(target, options.method(Method::PUT))
    }

    pub fn patch_stream(&self, target: impl Into<Target>, options: Options) -> ResponseStream {
        self.stream(target, options.method(Method::PATCH))
    }

    pub fn head_stream(&self, target: impl Into<Target>, options: Options) -> ResponseStream {
        self.stream(target, options.method(Method::HEAD))
    }

    pub fn delete_stream(&self, target: impl Into<Target>, options: Options) -> ResponseStream {
        self.stream(target, options.method(Method::DELETE))
    }
}

/// Builder for creating a [`Client`].
#[derive(Debug, Default)]
pub struct ClientBuilder {
    options: Options,
}

impl ClientBuilder {
    /// Prefix for relative targets.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.options = self.options.base_url(base_url);
        self
    }

    /// Add a default header.
    pub fn header<K, V>(mut self, key: K, value: V) -> Self
    where
        K: TryInto<HeaderName>,
        V: TryInto<HeaderValue>,
    {
        self.options = self.options.header(key, value);
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.options = self.options.headers(headers);
        self
    }

    /// Add a default query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.options = self.options.query(key, value);
        self
    }

    pub fn json(mut self, json: bool) -> Self {
        self.options = self.options.json(json);
        self
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.options = self.options.encoding(encoding);
        self
    }

    /// Set timeout budgets. A plain `Duration` bounds the whole request.
    pub fn timeout(mut self, timeout: impl Into<Timeouts>) -> Self {
        self.options = self.options.timeout(timeout);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.options = self.options.retry(retry);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.options = self.options.retries(retries);
        self
    }

    pub fn follow_redirect(mut self, follow: bool) -> Self {
        self.options = self.options.follow_redirect(follow);
        self
    }

    pub fn max_redirects(mut self, max: u32) -> Self {
        self.options = self.options.max_redirects(max);
        self
    }

    pub fn decompress(mut self, decompress: bool) -> Self {
        self.options = self.options.decompress(decompress);
        self
    }

    pub fn throw_http_errors(mut self, throw: bool) -> Self {
        self.options = self.options.throw_http_errors(throw);
        self
    }

    /// Set the transport every call goes through.
    pub fn agent<T: Transport + 'static>(mut self, agent: T) -> Self {
        self.options = self.options.agent(agent);
        self
    }

    /// Enable response caching backed by `cache`.
    pub fn cache<C: Cache + 'static>(mut self, cache: C) -> Self {
        self.options = self.options.cache(cache);
        self
    }

    pub fn cache_vary(mut self, names: impl IntoIterator<Item = HeaderName>) -> Self {
        self.options = self.options.cache_vary(names);
        self
    }

    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.options = self.options.hooks(hooks);
        self
    }

    /// Start from a complete set of options.
    pub fn options(mut self, options: Options) -> Self {
        self.options = self.options.merge(options);
        self
    }

    /// Build the client.
    pub fn build(self) -> Client {
        Client {
            defaults: Arc::new(self.options),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_extend_merges_defaults() {
        let client = Client::builder()
            .base_url("http://example.com/")
            .header("x-one", "1")
            .retries(4)
            .build();
        let extended = client.extend(Options::new().header("x-two", "2").retries(1));

        let defaults = extended.defaults();
        assert_eq!(defaults.base_url.as_deref(), Some("http://example.com/"));
        assert_eq!(defaults.headers["x-one"], "1");
        assert_eq!(defaults.headers["x-two"], "2");
        assert!(
            matches!(defaults.retry.as_ref().map(|r| &r.retries), Some(crate::http::retry::Retries::Limit(1)))
        );
        // The original is untouched.
        assert!(!client.defaults().headers.contains_key("x-two"));
    }

    #[test]
    fn test_builder_timeout_from_duration() {
        let client = Client::builder().timeout(Duration::from_secs(3)).build();
        let timeout = client.defaults().timeout.unwrap();
        assert_eq!(timeout.request, Some(Duration::from_secs(3)));
        assert_eq!(timeout.connect, None);
    }
}
