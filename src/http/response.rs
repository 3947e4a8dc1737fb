//! HTTP Response with decoded body.

use crate::base::neterror::RequestError;
use crate::http::responsebody::ResponseBody;
use crate::http::timing::Timings;
use bytes::Bytes;
use http::{HeaderMap, StatusCode, Version};
use serde::de::DeserializeOwned;
use url::Url;

/// Status line and headers of a response, before its body is read.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    /// Reason phrase as sent by the server, if any.
    pub status_message: Option<String>,
    pub version: Version,
    pub headers: HeaderMap,
    /// URL that produced this response.
    pub url: Url,
}

impl ResponseHead {
    pub fn status_message(&self) -> &str {
        self.status_message
            .as_deref()
            .or_else(|| self.status.canonical_reason())
            .unwrap_or("")
    }
}

/// The final response of a logical call. Immutable once delivered.
#[derive(Debug, Clone)]
pub struct Response {
    head: ResponseHead,
    body: ResponseBody,
    raw_body: Bytes,
    request_url: Url,
    redirect_urls: Vec<Url>,
    retry_count: u32,
    from_cache: bool,
    timings: Timings,
}

impl Response {
    pub fn new(head: ResponseHead, body: ResponseBody, request_url: Url) -> Self {
        Self {
            head,
            body,
            raw_body: Bytes::new(),
            request_url,
            redirect_urls: Vec::new(),
            retry_count: 0,
            from_cache: false,
            timings: Timings::default(),
        }
    }

    pub(crate) fn with_raw_body(mut self, raw: Bytes) -> Self {
        self.raw_body = raw;
        self
    }

    pub(crate) fn with_redirects(mut self, redirect_urls: Vec<Url>) -> Self {
        self.redirect_urls = redirect_urls;
        self
    }

    pub(crate) fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub(crate) fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    pub(crate) fn cached(mut self) -> Self {
        self.from_cache = true;
        self
    }

    /// Get the status code.
    pub fn status(&self) -> StatusCode {
        self.head.status
    }

    pub fn status_message(&self) -> &str {
        self.head.status_message()
    }

    /// Get the HTTP version.
    pub fn version(&self) -> Version {
        self.head.version
    }

    /// Get a reference to the headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    pub fn into_body(self) -> ResponseBody {
        self.body
    }

    /// Body bytes after decompression.
    pub fn raw_body(&self) -> &Bytes {
        &self.raw_body
    }

    /// Body as text, when the response was decoded as UTF-8.
    pub fn text(&self) -> Option<&str> {
        self.body.as_text()
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, RequestError> {
        self.body.json()
    }

    /// Effective URL after redirects.
    pub fn url(&self) -> &Url {
        &self.head.url
    }

    /// URL of the first request of the logical call.
    pub fn request_url(&self) -> &Url {
        &self.request_url
    }

    /// Every URL that answered with a redirect, in order.
    pub fn redirect_urls(&self) -> &[Url] {
        &self.redirect_urls
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn is_from_cache(&self) -> bool {
        self.from_cache
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    /// Whether the status is acceptable given the redirect setting.
    ///
    /// 2xx always passes, 3xx passes only when redirects are not followed,
    /// and 304 always passes.
    pub fn is_ok(&self, follow_redirect: bool) -> bool {
        let status = self.status();
        let limit = if follow_redirect { 299 } else { 399 };
        (status.as_u16() >= 200 && status.as_u16() <= limit) || status == StatusCode::NOT_MODIFIED
    }
}
