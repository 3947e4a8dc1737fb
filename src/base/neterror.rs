//! Request error taxonomy.
//!
//! Every failure surfaced by a logical call is a [`RequestError`]: an
//! [`ErrorKind`] plus the request context (code, URL, method) and, where one
//! was received, the response that triggered it.

use crate::http::response::Response;
use crate::http::timing::Phase;
use http::{HeaderMap, Method, StatusCode};
use std::borrow::Cow;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Boxed error used at extension seams (hooks, caches, transports).
pub type BoxError = Box<dyn StdError + Send + Sync>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed options or target. Never retried.
    #[error("{0}")]
    Validation(String),
    /// The transport failed while reading the response.
    #[error("Read error")]
    Read,
    /// Connection establishment failed (refused, reset, DNS failure).
    #[error("Request error")]
    Request,
    /// A phase budget expired.
    #[error("Timeout awaiting '{phase}' for {}ms", .budget.as_millis())]
    Timeout { phase: Phase, budget: Duration },
    /// Terminal non-2xx response with `throw_http_errors` enabled.
    #[error("Response code {status} ({message})")]
    Http { status: StatusCode, message: String },
    /// Redirect hop count exceeded.
    #[error("Redirected {} times. Aborting.", .redirect_urls.len())]
    MaxRedirects { redirect_urls: Vec<Url> },
    /// Target scheme is not `http` or `https`.
    #[error("Unsupported protocol \"{protocol}\"")]
    UnsupportedProtocol { protocol: String },
    /// The logical call was cancelled.
    #[error("Promise was canceled")]
    Cancel,
    /// The response body could not be parsed as JSON.
    #[error("{0}")]
    Parse(String),
    /// A hook failed with an error that is not a `RequestError`.
    #[error("Hook failed")]
    Hook,
}

impl ErrorKind {
    /// Default code reported when the transport did not supply one.
    pub fn default_code(&self) -> &'static str {
        match self {
            ErrorKind::Validation(_) => "ERR_INVALID_OPTIONS",
            ErrorKind::Read => "ERR_READ",
            ErrorKind::Request => "ERR_REQUEST",
            ErrorKind::Timeout { .. } => "ETIMEDOUT",
            ErrorKind::Http { .. } => "ERR_NON_2XX_3XX_RESPONSE",
            ErrorKind::MaxRedirects { .. } => "ERR_TOO_MANY_REDIRECTS",
            ErrorKind::UnsupportedProtocol { .. } => "ERR_UNSUPPORTED_PROTOCOL",
            ErrorKind::Cancel => "ERR_CANCELED",
            ErrorKind::Parse(_) => "ERR_BODY_PARSE_FAILURE",
            ErrorKind::Hook => "ERR_HOOK",
        }
    }

    /// Network-level failures: the ones a retry may fix regardless of status.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            ErrorKind::Read | ErrorKind::Request | ErrorKind::Timeout { .. }
        )
    }

    /// Whether the retry policy may consider this kind at all.
    pub fn is_retryable(&self) -> bool {
        self.is_network() || matches!(self, ErrorKind::Http { .. })
    }
}

/// Error surfaced by a logical call.
#[derive(Debug, Clone, Error)]
#[error("{kind}")]
pub struct RequestError {
    kind: ErrorKind,
    code: Cow<'static, str>,
    url: Option<Url>,
    method: Option<Method>,
    response: Option<Box<Response>>,
    #[source]
    source: Option<Arc<dyn StdError + Send + Sync>>,
}

impl RequestError {
    pub fn new(kind: ErrorKind) -> Self {
        let code = Cow::Borrowed(kind.default_code());
        Self {
            kind,
            code,
            url: None,
            method: None,
            response: None,
            source: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation(message.into()))
    }

    /// Connection-establishment failure with an errno-style code.
    pub fn request(code: impl Into<Cow<'static, str>>, source: impl Into<BoxError>) -> Self {
        Self::new(ErrorKind::Request)
            .with_code(code)
            .with_source(source)
    }

    /// Failure while reading the response.
    pub fn read(source: impl Into<BoxError>) -> Self {
        Self::new(ErrorKind::Read).with_source(source)
    }

    pub fn timeout(phase: Phase, budget: Duration) -> Self {
        Self::new(ErrorKind::Timeout { phase, budget })
    }

    /// HTTP status error carrying the full response.
    pub fn http(response: Response) -> Self {
        let kind = ErrorKind::Http {
            status: response.status(),
            message: response.status_message().to_string(),
        };
        let url = response.url().clone();
        Self::new(kind).with_url(url).with_response(response)
    }

    pub fn max_redirects(redirect_urls: Vec<Url>) -> Self {
        Self::new(ErrorKind::MaxRedirects { redirect_urls })
    }

    pub fn unsupported_protocol(protocol: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnsupportedProtocol {
            protocol: protocol.into(),
        })
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancel)
    }

    pub fn parse(source: serde_json::Error) -> Self {
        Self::new(ErrorKind::Parse(source.to_string())).with_source(source)
    }

    /// Wrap an error raised by a hook. A `RequestError` surfaces unchanged.
    pub fn hook(error: BoxError) -> Self {
        match error.downcast::<RequestError>() {
            Ok(inner) => *inner,
            Err(other) => Self::new(ErrorKind::Hook).with_source(other),
        }
    }

    pub fn with_code(mut self, code: impl Into<Cow<'static, str>>) -> Self {
        self.code = code.into();
        self
    }

    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn with_response(mut self, response: Response) -> Self {
        self.response = Some(Box::new(response));
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(Arc::from(source.into()));
        self
    }

    /// Fill in the request context unless it is already present.
    pub fn with_request(mut self, url: &Url, method: &Method) -> Self {
        if self.url.is_none() {
            self.url = Some(url.clone());
        }
        if self.method.is_none() {
            self.method = Some(method.clone());
        }
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub fn method(&self) -> Option<&Method> {
        self.method.as_ref()
    }

    /// The (possibly partial) response received before the failure.
    pub fn response(&self) -> Option<&Response> {
        self.response.as_deref()
    }

    pub fn into_response(self) -> Option<Response> {
        self.response.map(|r| *r)
    }

    /// Status code of the carried response, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match &self.kind {
            ErrorKind::Http { status, .. } => Some(*status),
            _ => self.response.as_ref().map(|r| r.status()),
        }
    }

    /// Headers of the carried response, if any.
    pub fn headers(&self) -> Option<&HeaderMap> {
        self.response.as_ref().map(|r| r.headers())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancel)
    }

    /// Name of the error class, as reported in events and logs.
    pub fn name(&self) -> &'static str {
        match self.kind {
            ErrorKind::Validation(_) => "ValidationError",
            ErrorKind::Read => "ReadError",
            ErrorKind::Request => "RequestError",
            ErrorKind::Timeout { .. } => "TimeoutError",
            ErrorKind::Http { .. } => "HTTPError",
            ErrorKind::MaxRedirects { .. } => "MaxRedirectsError",
            ErrorKind::UnsupportedProtocol { .. } => "UnsupportedProtocolError",
            ErrorKind::Cancel => "CancelError",
            ErrorKind::Parse(_) => "ParseError",
            ErrorKind::Hook => "HookError",
        }
    }
}
