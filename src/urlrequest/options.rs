//! Request options and their normalization.
//!
//! [`Options`] is what callers write: every field optional so that client
//! defaults and per-call values can be merged explicitly. Normalization
//! turns the merged options plus a [`Target`] into a [`RequestDescriptor`],
//! the fully resolved view the lifecycle engine works on.

use crate::base::neterror::RequestError;
use crate::http::hooks::Hooks;
use crate::http::httpcache::Cache;
use crate::http::requestbody::{RequestBody, StreamBody};
use crate::http::responsebody::Encoding;
use crate::http::retry::RetryPolicy;
use crate::http::streamfactory::Transport;
use crate::http::timing::Timeouts;
use crate::socket::connectjob::HttpConnector;
use bytes::Bytes;
use http::header::{self, HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use url::Url;

const DEFAULT_MAX_REDIRECTS: u32 = 10;

/// Where a request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Absolute URL, or a path resolved against `base_url`.
    Str(String),
    Url(Url),
    Parts(TargetParts),
}

/// A target given as its components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetParts {
    /// Scheme, with or without the trailing `:`.
    pub protocol: String,
    pub hostname: String,
    pub port: Option<u16>,
    /// Path plus optional query.
    pub path: String,
}

impl From<&str> for Target {
    fn from(s: &str) -> Self {
        Target::Str(s.to_string())
    }
}

impl From<String> for Target {
    fn from(s: String) -> Self {
        Target::Str(s)
    }
}

impl From<&String> for Target {
    fn from(s: &String) -> Self {
        Target::Str(s.clone())
    }
}

impl From<Url> for Target {
    fn from(url: Url) -> Self {
        Target::Url(url)
    }
}

impl From<&Url> for Target {
    fn from(url: &Url) -> Self {
        Target::Url(url.clone())
    }
}

impl From<TargetParts> for Target {
    fn from(parts: TargetParts) -> Self {
        Target::Parts(parts)
    }
}

impl Target {
    fn resolve(self, base_url: Option<&str>) -> Result<Url, RequestError> {
        let raw = match self {
            Target::Url(url) => return Ok(url),
            Target::Parts(parts) => {
                let protocol = parts.protocol.trim_end_matches(':');
                let port = parts.port.map(|p| format!(":{p}")).unwrap_or_default();
                let path = if parts.path.starts_with('/') || parts.path.is_empty() {
                    parts.path
                } else {
                    format!("/{}", parts.path)
                };
                format!("{protocol}://{}{port}{path}", parts.hostname)
            }
            Target::Str(s) if s.contains("://") => s,
            Target::Str(s) => match base_url {
                Some(base) => format!(
                    "{}/{}",
                    base.trim_end_matches('/'),
                    s.trim_start_matches('/')
                ),
                None if s.starts_with('/') => {
                    return Err(RequestError::validation(format!(
                        "Invalid URL: {s} (a relative target needs a base URL)"
                    )))
                }
                None => format!("https://{s}"),
            },
        };
        Url::parse(&raw).map_err(|e| {
            RequestError::validation(format!("Invalid URL: {raw}")).with_source(e)
        })
    }
}

/// Caller-supplied body, before it is checked against `json`/`form`.
#[derive(Debug, Clone)]
pub enum Body {
    Text(String),
    Bytes(Bytes),
    Stream(StreamBody),
    /// Structured body; requires `json` or `form`.
    Value(Value),
}

impl From<&str> for Body {
    fn from(s: &str) -> Self {
        Body::Text(s.to_string())
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Body::Text(s)
    }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Self {
        Body::Bytes(b)
    }
}

impl From<Vec<u8>> for Body {
    fn from(v: Vec<u8>) -> Self {
        Body::Bytes(Bytes::from(v))
    }
}

impl From<Value> for Body {
    fn from(v: Value) -> Self {
        Body::Value(v)
    }
}

impl From<RequestBody> for Body {
    fn from(body: RequestBody) -> Self {
        match body {
            RequestBody::Empty => Body::Bytes(Bytes::new()),
            RequestBody::Raw(bytes) => Body::Bytes(bytes),
            RequestBody::Stream(stream) => Body::Stream(stream),
            RequestBody::Json(value) => Body::Value(value),
            RequestBody::Form(pairs) => Body::Value(Value::Object(
                pairs
                    .into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect(),
            )),
        }
    }
}

/// Request options. Unset fields fall back to the client defaults, then to
/// the built-in defaults.
#[derive(Clone, Default)]
pub struct Options {
    pub base_url: Option<String>,
    pub method: Option<Method>,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: Option<Body>,
    /// Serialize the body as JSON and parse the response as JSON.
    pub json: Option<bool>,
    /// Serialize the body as `application/x-www-form-urlencoded`.
    pub form: Option<bool>,
    pub encoding: Option<Encoding>,
    pub timeout: Option<Timeouts>,
    pub retry: Option<RetryPolicy>,
    pub follow_redirect: Option<bool>,
    pub max_redirects: Option<u32>,
    pub decompress: Option<bool>,
    pub throw_http_errors: Option<bool>,
    pub agent: Option<Arc<dyn Transport>>,
    pub cache: Option<Arc<dyn Cache>>,
    /// Request headers whose values take part in the cache key.
    pub cache_vary: Option<Vec<HeaderName>>,
    /// Replaces the default hook set as a whole.
    pub hooks: Option<Hooks>,
    error: Option<RequestError>,
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("base_url", &self.base_url)
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("query", &self.query)
            .field("body", &self.body)
            .field("json", &self.json)
            .field("form", &self.form)
            .field("encoding", &self.encoding)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("follow_redirect", &self.follow_redirect)
            .field("max_redirects", &self.max_redirects)
            .field("decompress", &self.decompress)
            .field("throw_http_errors", &self.throw_http_errors)
            .field("agent", &self.agent.is_some())
            .field("cache", &self.cache.is_some())
            .field("hooks", &self.hooks)
            .finish()
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Add a header. An invalid name or value fails the call at
    /// normalization time.
    pub fn header<K, V>(mut self, key: K, value: V) -> Self
    where
        K: TryInto<HeaderName>,
        V: TryInto<HeaderValue>,
    {
        match (key.try_into(), value.try_into()) {
            (Ok(key), Ok(value)) => {
                self.headers.append(key, value);
            }
            _ => self.fail(RequestError::validation("Invalid header name or value")),
        }
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        merge_headers(&mut self.headers, headers);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body; turns on `json`.
    pub fn json_body<T: Serialize>(mut self, value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => {
                self.body = Some(Body::Value(value));
                self.json = Some(true);
            }
            Err(e) => self.fail(RequestError::validation(e.to_string())),
        }
        self
    }

    /// Serialize `value` as a form body; turns on `form`.
    pub fn form_body<T: Serialize>(mut self, value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => {
                self.body = Some(Body::Value(value));
                self.form = Some(true);
            }
            Err(e) => self.fail(RequestError::validation(e.to_string())),
        }
        self
    }

    pub fn json(mut self, json: bool) -> Self {
        self.json = Some(json);
        self
    }

    pub fn form(mut self, form: bool) -> Self {
        self.form = Some(form);
        self
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    /// Set timeout budgets. A bare `Duration` bounds the whole attempt.
    pub fn timeout(mut self, timeout: impl Into<Timeouts>) -> Self {
        self.timeout = Some(timeout.into());
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Shorthand for a default retry policy with `retries` retries.
    pub fn retries(self, retries: u32) -> Self {
        self.retry(RetryPolicy::limit(retries))
    }

    pub fn follow_redirect(mut self, follow: bool) -> Self {
        self.follow_redirect = Some(follow);
        self
    }

    pub fn max_redirects(mut self, max: u32) -> Self {
        self.max_redirects = Some(max);
        self
    }

    pub fn decompress(mut self, decompress: bool) -> Self {
        self.decompress = Some(decompress);
        self
    }

    pub fn throw_http_errors(mut self, throw: bool) -> Self {
        self.throw_http_errors = Some(throw);
        self
    }

    pub fn agent<T: Transport + 'static>(mut self, agent: T) -> Self {
        self.agent = Some(Arc::new(agent));
        self
    }

    pub fn cache<C: Cache + 'static>(mut self, cache: C) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    pub fn cache_vary(mut self, names: impl IntoIterator<Item = HeaderName>) -> Self {
        self.cache_vary = Some(names.into_iter().collect());
        self
    }

    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = Some(hooks);
        self
    }

    fn fail(&mut self, error: RequestError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Overlay `call` on top of `self`.
    ///
    /// Scalar fields are taken from `call` when set. Headers and query
    /// parameters merge key by key with `call` winning; timeout budgets merge
    /// phase by phase. Hooks and retry policies are replaced as a whole.
    pub fn merge(&self, call: Options) -> Options {
        let mut headers = self.headers.clone();
        merge_headers(&mut headers, call.headers);

        let mut query: Vec<(String, String)> = self
            .query
            .iter()
            .filter(|(key, _)| !call.query.iter().any(|(k, _)| k == key))
            .cloned()
            .collect();
        query.extend(call.query);

        let timeout = match (self.timeout, call.timeout) {
            (Some(defaults), Some(call)) => Some(defaults.merge(call)),
            (defaults, call) => call.or(defaults),
        };

        Options {
            base_url: call.base_url.or_else(|| self.base_url.clone()),
            method: call.method.or_else(|| self.method.clone()),
            headers,
            query,
            body: call.body.or_else(|| self.body.clone()),
            json: call.json.or(self.json),
            form: call.form.or(self.form),
            encoding: call.encoding.or(self.encoding),
            timeout,
            retry: call.retry.or_else(|| self.retry.clone()),
            follow_redirect: call.follow_redirect.or(self.follow_redirect),
            max_redirects: call.max_redirects.or(self.max_redirects),
            decompress: call.decompress.or(self.decompress),
            throw_http_errors: call.throw_http_errors.or(self.throw_http_errors),
            agent: call.agent.or_else(|| self.agent.clone()),
            cache: call.cache.or_else(|| self.cache.clone()),
            cache_vary: call.cache_vary.or_else(|| self.cache_vary.clone()),
            hooks: call.hooks.or_else(|| self.hooks.clone()),
            error: call.error.or_else(|| self.error.clone()),
        }
    }
}

/// Replace every key of `target` present in `overrides`, keeping all of the
/// override's values for that key.
fn merge_headers(target: &mut HeaderMap, overrides: HeaderMap) {
    let mut current: Option<HeaderName> = None;
    for (name, value) in overrides {
        if let Some(name) = name {
            target.remove(&name);
            current = Some(name);
        }
        if let Some(name) = &current {
            target.append(name.clone(), value);
        }
    }
}

/// The normalized, fully resolved view of a request.
///
/// Hooks receive it mutably and may change any field before the next
/// attempt.
#[derive(Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: RequestBody,
    pub encoding: Encoding,
    /// Parse the response body as JSON.
    pub json: bool,
    pub timeout: Timeouts,
    pub retry: RetryPolicy,
    pub follow_redirect: bool,
    pub max_redirects: u32,
    pub decompress: bool,
    pub throw_http_errors: bool,
    pub hooks: Arc<Hooks>,
    pub cache: Option<Arc<dyn Cache>>,
    pub cache_vary: Vec<HeaderName>,
    pub agent: Arc<dyn Transport>,
}

impl fmt::Debug for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDescriptor")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("encoding", &self.encoding)
            .field("json", &self.json)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("follow_redirect", &self.follow_redirect)
            .field("max_redirects", &self.max_redirects)
            .field("decompress", &self.decompress)
            .field("throw_http_errors", &self.throw_http_errors)
            .field("hooks", &self.hooks)
            .field("cache", &self.cache.is_some())
            .finish()
    }
}

impl RequestDescriptor {
    /// Normalize already-merged options against a target.
    pub fn from_options(target: Target, options: Options) -> Result<Self, RequestError> {
        if let Some(error) = options.error {
            return Err(error);
        }

        let mut url = target.resolve(options.base_url.as_deref())?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(RequestError::unsupported_protocol(format!("{}:", url.scheme()))
                .with_url(url));
        }
        if url.host_str().is_none() {
            return Err(RequestError::validation(format!("Invalid URL: {url} has no host")));
        }
        apply_query(&mut url, &options.query);

        let method = options.method.unwrap_or(Method::GET);
        let json = options.json.unwrap_or(false);
        let form = options.form.unwrap_or(false);
        let body = select_body(options.body, json, form)?;
        if !body.is_empty() && (method == Method::GET || method == Method::HEAD) {
            return Err(RequestError::validation(format!(
                "The `{method}` method cannot be used with a body"
            )));
        }

        let timeout = options.timeout.unwrap_or_default();
        let mut retry = options.retry.unwrap_or_default();
        if retry.max_retry_after.is_none() {
            retry.max_retry_after = match (timeout.request, timeout.connect) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
        }

        let mut descriptor = RequestDescriptor {
            method,
            url,
            headers: options.headers,
            body,
            encoding: options.encoding.unwrap_or_default(),
            json,
            timeout,
            retry,
            follow_redirect: options.follow_redirect.unwrap_or(true),
            max_redirects: options.max_redirects.unwrap_or(DEFAULT_MAX_REDIRECTS),
            decompress: options.decompress.unwrap_or(true),
            throw_http_errors: options.throw_http_errors.unwrap_or(true),
            hooks: Arc::new(options.hooks.unwrap_or_default()),
            cache: options.cache,
            cache_vary: options.cache_vary.unwrap_or_default(),
            agent: options
                .agent
                .unwrap_or_else(|| Arc::new(HttpConnector::new())),
        };
        descriptor.finalize_headers()?;
        Ok(descriptor)
    }

    /// Re-normalize with `options` overlaid on the current state.
    pub fn overlay(&mut self, options: Options) -> Result<(), RequestError> {
        let mut current = self.to_options();
        if options.body.is_some() {
            current.headers.remove(header::CONTENT_LENGTH);
        }
        let merged = current.merge(options);
        *self = RequestDescriptor::from_options(Target::Url(self.url.clone()), merged)?;
        Ok(())
    }

    fn to_options(&self) -> Options {
        let form = matches!(self.body, RequestBody::Form(_));
        let body = (!self.body.is_empty()).then(|| Body::from(self.body.clone()));
        Options {
            method: Some(self.method.clone()),
            headers: self.headers.clone(),
            body,
            json: Some(self.json),
            form: Some(form),
            encoding: Some(self.encoding),
            timeout: Some(self.timeout),
            retry: Some(self.retry.clone()),
            follow_redirect: Some(self.follow_redirect),
            max_redirects: Some(self.max_redirects),
            decompress: Some(self.decompress),
            throw_http_errors: Some(self.throw_http_errors),
            agent: Some(Arc::clone(&self.agent)),
            cache: self.cache.clone(),
            cache_vary: Some(self.cache_vary.clone()),
            hooks: Some((*self.hooks).clone()),
            ..Default::default()
        }
    }

    /// Fill in the headers implied by the other fields, unless the caller
    /// set them.
    pub fn finalize_headers(&mut self) -> Result<(), RequestError> {
        let headers = &mut self.headers;
        headers
            .entry(header::USER_AGENT)
            .or_insert_with(|| HeaderValue::from_static(USER_AGENT));
        if self.decompress {
            headers
                .entry(header::ACCEPT_ENCODING)
                .or_insert_with(|| HeaderValue::from_static("gzip, deflate"));
        }
        if self.json {
            headers
                .entry(header::ACCEPT)
                .or_insert_with(|| HeaderValue::from_static("application/json"));
        }
        if let Some(content_type) = self.body.content_type() {
            headers
                .entry(header::CONTENT_TYPE)
                .or_insert_with(|| HeaderValue::from_static(content_type));
        }
        if !self.body.is_empty() {
            if let Some(length) = self.body.content_length()? {
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
            }
        }
        Ok(())
    }
}

const USER_AGENT: &str = concat!("fetchnet/", env!("CARGO_PKG_VERSION"));

/// Keep the URL's own query, replacing keys present in `query`.
fn apply_query(url: &mut Url, query: &[(String, String)]) {
    if query.is_empty() {
        return;
    }
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .into_owned()
        .filter(|(key, _)| !query.iter().any(|(k, _)| k == key))
        .collect();
    pairs.extend(query.iter().cloned());
    url.query_pairs_mut().clear().extend_pairs(pairs);
}

fn select_body(body: Option<Body>, json: bool, form: bool) -> Result<RequestBody, RequestError> {
    if json && form {
        return Err(RequestError::validation(
            "The `json` and `form` options are mutually exclusive",
        ));
    }
    let Some(body) = body else {
        return Ok(RequestBody::Empty);
    };
    match body {
        Body::Value(value) if json && (value.is_object() || value.is_array()) => {
            Ok(RequestBody::Json(value))
        }
        Body::Value(Value::Object(map)) if form => Ok(RequestBody::Form(
            map.into_iter()
                .map(|(key, value)| match value {
                    Value::String(s) => (key, s),
                    other => (key, other.to_string()),
                })
                .collect(),
        )),
        _ if json => Err(RequestError::validation(
            "The `body` option must be an Object or Array when the `json` option is used",
        )),
        _ if form => Err(RequestError::validation(
            "The `body` option must be an Object when the `form` option is used",
        )),
        Body::Value(_) => Err(RequestError::validation(
            "The `body` option must be a string, bytes or a stream; use `json` or `form` for structured bodies",
        )),
        Body::Text(text) if text.is_empty() => Ok(RequestBody::Empty),
        Body::Text(text) => Ok(RequestBody::Raw(Bytes::from(text))),
        Body::Bytes(bytes) if bytes.is_empty() => Ok(RequestBody::Empty),
        Body::Bytes(bytes) => Ok(RequestBody::Raw(bytes)),
        Body::Stream(stream) => Ok(RequestBody::Stream(stream)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::neterror::ErrorKind;
    use serde_json::json;
    use std::time::Duration;

    fn normalize(target: &str, options: Options) -> Result<RequestDescriptor, RequestError> {
        RequestDescriptor::from_options(target.into(), options)
    }

    #[test]
    fn test_base_url_prefix() {
        let d = normalize("/users/1", Options::new().base_url("https://api.example.com/v1/"))
            .unwrap();
        assert_eq!(d.url.as_str(), "https://api.example.com/v1/users/1");
    }

    #[test]
    fn test_base_url_ignored_for_absolute_target() {
        let d = normalize(
            "http://other.example.com/x",
            Options::new().base_url("https://api.example.com"),
        )
        .unwrap();
        assert_eq!(d.url.host_str(), Some("other.example.com"));
    }

    #[test]
    fn test_schemeless_target_defaults_to_https() {
        let d = normalize("example.com/path", Options::new()).unwrap();
        assert_eq!(d.url.as_str(), "https://example.com/path");
    }

    #[test]
    fn test_target_parts() {
        let parts = TargetParts {
            protocol: "http:".into(),
            hostname: "localhost".into(),
            port: Some(8080),
            path: "status?verbose=1".into(),
        };
        let d = RequestDescriptor::from_options(parts.into(), Options::new()).unwrap();
        assert_eq!(d.url.as_str(), "http://localhost:8080/status?verbose=1");
    }

    #[test]
    fn test_unsupported_protocol() {
        let err = normalize("ftp://example.com/file", Options::new()).unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::UnsupportedProtocol {
                protocol: "ftp:".into()
            }
        );
    }

    #[test]
    fn test_invalid_url() {
        let err = normalize("http://exa mple.com", Options::new()).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Validation(_)));
    }

    #[test]
    fn test_header_and_query_merge_precedence() {
        let defaults = Options::new()
            .header("x-a", "1")
            .header("x-b", "default")
            .query("page", 1)
            .query("sort", "asc");
        let call = Options::new().header("x-b", "call").query("page", 2);

        let merged = defaults.merge(call);
        let d = normalize("http://example.com/list?keep=yes", merged).unwrap();

        assert_eq!(d.headers["x-a"], "1");
        assert_eq!(d.headers["x-b"], "call");
        assert_eq!(d.url.query(), Some("keep=yes&sort=asc&page=2"));
    }

    #[test]
    fn test_default_headers() {
        let d = normalize("http://example.com", Options::new().json(true)).unwrap();
        assert!(d.headers[header::USER_AGENT]
            .to_str()
            .unwrap()
            .starts_with("fetchnet/"));
        assert_eq!(d.headers[header::ACCEPT_ENCODING], "gzip, deflate");
        assert_eq!(d.headers[header::ACCEPT], "application/json");

        let d = normalize("http://example.com", Options::new().decompress(false)).unwrap();
        assert!(!d.headers.contains_key(header::ACCEPT_ENCODING));
    }

    #[test]
    fn test_json_body_headers() {
        let d = normalize(
            "http://example.com",
            Options::new()
                .method(Method::POST)
                .json_body(&json!({"name": "x"})),
        )
        .unwrap();
        assert_eq!(d.headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(d.headers[header::CONTENT_LENGTH], "12");
    }

    #[test]
    fn test_json_and_form_exclusive() {
        let err = normalize(
            "http://example.com",
            Options::new().method(Method::POST).json(true).form(true),
        )
        .unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn test_body_shape_validation() {
        let post = || Options::new().method(Method::POST);

        let err = normalize("http://example.com", post().body("text").json(true)).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Validation(_)));

        let err = normalize("http://example.com", post().body(json!([1, 2])).form(true))
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Validation(_)));

        let err = normalize("http://example.com", post().body(json!({"a": 1}))).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Validation(_)));

        let d = normalize("http://example.com", post().form_body(&json!({"a": 1, "b": "x"})))
            .unwrap();
        assert_eq!(d.headers[header::CONTENT_TYPE], "application/x-www-form-urlencoded");
    }

    #[test]
    fn test_get_with_body_rejected() {
        let err = normalize("http://example.com", Options::new().body("data")).unwrap_err();
        assert!(err.to_string().contains("GET"));
    }

    #[test]
    fn test_invalid_header_surfaces_at_normalization() {
        let err = normalize("http://example.com", Options::new().header("bad header", "v"))
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Validation(_)));
    }

    #[test]
    fn test_max_retry_after_defaults_to_smallest_budget() {
        let timeout = Timeouts {
            request: Some(Duration::from_secs(30)),
            connect: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let d = normalize("http://example.com", Options::new().timeout(timeout)).unwrap();
        assert_eq!(d.retry.max_retry_after, Some(Duration::from_secs(5)));

        let d = normalize("http://example.com", Options::new()).unwrap();
        assert_eq!(d.retry.max_retry_after, None);
    }

    #[test]
    fn test_timeout_budgets_merge_per_phase() {
        let defaults = Options::new().timeout(Timeouts {
            connect: Some(Duration::from_secs(1)),
            ..Default::default()
        });
        let merged = defaults.merge(Options::new().timeout(Duration::from_secs(9)));
        let timeout = merged.timeout.unwrap();
        assert_eq!(timeout.connect, Some(Duration::from_secs(1)));
        assert_eq!(timeout.request, Some(Duration::from_secs(9)));
    }

    #[test]
    fn test_overlay_keeps_hook_mutations() {
        let mut d = normalize("http://example.com/a", Options::new()).unwrap();
        d.headers
            .insert("x-token", HeaderValue::from_static("old"));

        d.overlay(Options::new().header("x-token", "new").throw_http_errors(false))
            .unwrap();
        assert_eq!(d.headers["x-token"], "new");
        assert!(!d.throw_http_errors);
        assert_eq!(d.url.as_str(), "http://example.com/a");
    }
}
