//! Transport contract.
//!
//! The engine never touches sockets itself: every attempt is handed to a
//! [`Transport`], which reports phase boundaries through the supplied
//! [`PhaseObserver`] and returns the response head plus a body stream.

use crate::base::neterror::RequestError;
use crate::http::requestbody::{BodyStream, OutgoingBody};
use crate::http::timing::PhaseObserver;
use bytes::Bytes;
use futures::StreamExt;
use http::{HeaderMap, Method, StatusCode, Version};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

/// One request as handed to a transport.
#[derive(Debug)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: OutgoingBody,
    /// Cancelled when the attempt is abandoned; the transport must release
    /// its connection.
    pub abort: CancellationToken,
}

/// Response head plus an unread body.
pub struct TransportResponse {
    pub status: StatusCode,
    /// Reason phrase, when the wire carried one.
    pub reason: Option<String>,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl TransportResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: BodyStream) -> Self {
        Self {
            status,
            reason: None,
            version: Version::HTTP_11,
            headers,
            body,
        }
    }

    /// A response whose body is already in memory.
    pub fn full(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        let stream = futures::stream::iter((!body.is_empty()).then_some(Ok(body))).boxed();
        Self::new(status, headers, stream)
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Declared body length, if any.
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(http::header::CONTENT_LENGTH)?
            .to_str()
            .ok()?
            .parse()
            .ok()
    }
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .finish()
    }
}

/// Alias for the `Future` type returned by a transport.
pub type Dispatching = Pin<Box<dyn Future<Output = Result<TransportResponse, RequestError>> + Send>>;

/// Sends requests. Implementations must be thread-safe.
///
/// Transport errors should carry [`ErrorKind::Request`] or
/// [`ErrorKind::Read`] with an errno-style code so the retry policy can
/// classify them.
///
/// [`ErrorKind::Request`]: crate::base::neterror::ErrorKind::Request
/// [`ErrorKind::Read`]: crate::base::neterror::ErrorKind::Read
pub trait Transport: Send + Sync {
    fn dispatch(&self, request: TransportRequest, observer: PhaseObserver) -> Dispatching;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn dispatch(&self, request: TransportRequest, observer: PhaseObserver) -> Dispatching {
        (**self).dispatch(request, observer)
    }
}
