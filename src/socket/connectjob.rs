//! Default transport: DNS -> TCP -> (TLS) -> HTTP/1.1.
//!
//! One fresh connection per attempt; the connection is torn down when the
//! response body is dropped or the attempt's abort token fires.

use crate::base::context::{errno_code, IoResultExt};
use crate::base::neterror::RequestError;
use crate::http::requestbody::OutgoingBody;
use crate::http::streamfactory::{Dispatching, Transport, TransportRequest, TransportResponse};
use crate::http::timing::{PhaseEvent, PhaseObserver};
use crate::socket::stream::SocketType;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use http::header::{HeaderValue, HOST};
use http::Version;
use http_body::{Body, Frame, SizeHint};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyDataStream, BodyExt, Empty, Full, StreamBody};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use std::error::Error as StdError;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use tokio::net::TcpStream;
use url::Url;

type OutgoingHttpBody = UnsyncBoxBody<Bytes, io::Error>;

/// Manages the connection process: DNS -> TCP -> SSL.
pub struct ConnectJob;

impl ConnectJob {
    pub async fn connect(url: &Url, observer: &PhaseObserver) -> Result<SocketType, RequestError> {
        let host = url
            .host_str()
            .ok_or_else(|| RequestError::validation(format!("Invalid URL: {url} has no host")))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| RequestError::validation(format!("Invalid URL: {url} has no port")))?;
        let lookup_host = host.trim_start_matches('[').trim_end_matches(']');

        observer.event(PhaseEvent::SocketAssigned);

        // 1. DNS Resolution
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((lookup_host, port))
            .await
            .dns_context(host)?
            .collect();
        observer.event(PhaseEvent::LookupEnd);

        // 2. TCP Connect
        let mut last_error = None;
        let mut stream = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => last_error = Some(e),
            }
        }
        let stream = match (stream, last_error) {
            (Some(stream), _) => stream,
            (None, Some(e)) => return Err::<SocketType, _>(e).connection_context(host, port),
            (None, None) => {
                return Err(RequestError::request("ENOTFOUND", format!("{host} has no addresses")))
            }
        };
        let _ = stream.set_nodelay(true);
        observer.event(PhaseEvent::ConnectEnd);
        tracing::debug!(host = %host, port, "connected");

        // 3. SSL Handshake (if https)
        if url.scheme() == "https" {
            let socket = Self::secure(stream, host).await?;
            observer.event(PhaseEvent::SecureConnectEnd);
            Ok(socket)
        } else {
            Ok(SocketType::Tcp(stream))
        }
    }

    #[cfg(feature = "tls")]
    async fn secure(stream: TcpStream, host: &str) -> Result<SocketType, RequestError> {
        use boring::ssl::{SslConnector, SslMethod};

        let tls_error = |e: boring::error::ErrorStack| RequestError::request("ERR_SSL_PROTOCOL_ERROR", e);

        let mut builder = SslConnector::builder(SslMethod::tls()).map_err(tls_error)?;
        // Only HTTP/1.1 is spoken on the connection.
        builder.set_alpn_protos(b"\x08http/1.1").map_err(tls_error)?;

        let connector = builder.build();
        let config = connector.configure().map_err(tls_error)?;

        let tls_stream = tokio_boring::connect(config, host, stream)
            .await
            .map_err(|e| {
                tracing::debug!(host = %host, error = %e, "TLS handshake failed");
                RequestError::request("ERR_SSL_PROTOCOL_ERROR", e.to_string())
            })?;

        Ok(SocketType::Ssl(tls_stream))
    }

    #[cfg(not(feature = "tls"))]
    async fn secure(_stream: TcpStream, host: &str) -> Result<SocketType, RequestError> {
        Err(RequestError::request(
            "ERR_TLS_UNAVAILABLE",
            format!("cannot open https connection to {host}: built without the `tls` feature"),
        ))
    }
}

/// The default [`Transport`]: a fresh HTTP/1.1 connection per request.
#[derive(Debug, Clone, Default)]
pub struct HttpConnector {
    _priv: (),
}

impl HttpConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for HttpConnector {
    fn dispatch(&self, request: TransportRequest, observer: PhaseObserver) -> Dispatching {
        Box::pin(async move {
            let abort = request.abort.clone();
            tokio::select! {
                biased;
                _ = abort.cancelled() => Err(RequestError::cancelled()),
                result = send(request, observer) => result,
            }
        })
    }
}

async fn send(
    request: TransportRequest,
    observer: PhaseObserver,
) -> Result<TransportResponse, RequestError> {
    let TransportRequest {
        method,
        url,
        mut headers,
        body,
        abort,
    } = request;

    let socket = ConnectJob::connect(&url, &observer).await?;
    tracing::debug!(url = %url, secure = socket.is_secure(), "socket ready");
    let (mut sender, conn) = http1::handshake::<_, ObservedBody>(TokioIo::new(socket))
        .await
        .map_err(|e| RequestError::request(hyper_error_code(&e), e))?;

    // Spawn the connection driver; it lives until the body is read or the
    // attempt is aborted.
    tokio::spawn(async move {
        tokio::select! {
            _ = abort.cancelled() => tracing::debug!("connection aborted"),
            result = conn => {
                if let Err(e) = result {
                    tracing::debug!(error = %e, "connection driver failed");
                }
            }
        }
    });

    if !headers.contains_key(HOST) {
        headers.insert(HOST, host_header(&url)?);
    }

    let mut target = url.path().to_string();
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }

    let mut req = http::Request::builder()
        .method(method)
        .uri(target)
        .version(Version::HTTP_11)
        .body(ObservedBody::new(outgoing_body(body), observer.clone()))
        .map_err(|e| RequestError::validation(e.to_string()))?;
    *req.headers_mut() = headers;

    let response = sender
        .send_request(req)
        .await
        .map_err(|e| RequestError::request(hyper_error_code(&e), e))?;
    observer.event(PhaseEvent::ResponseReceived);

    let (parts, incoming) = response.into_parts();
    let reason = parts
        .extensions
        .get::<hyper::ext::ReasonPhrase>()
        .and_then(|r| std::str::from_utf8(r.as_bytes()).ok())
        .map(str::to_string);
    let body = BodyDataStream::new(incoming)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
        .boxed();

    Ok(TransportResponse {
        status: parts.status,
        reason,
        version: parts.version,
        headers: parts.headers,
        body,
    })
}

fn outgoing_body(body: OutgoingBody) -> OutgoingHttpBody {
    match body {
        OutgoingBody::Empty => Empty::new().map_err(|never| match never {}).boxed_unsync(),
        OutgoingBody::Full(bytes) => Full::new(bytes).map_err(|never| match never {}).boxed_unsync(),
        OutgoingBody::Stream(stream) => StreamBody::new(stream.map_ok(Frame::data)).boxed_unsync(),
    }
}

/// Outgoing body that reports `RequestSent` once its last frame is handed
/// to the connection.
struct ObservedBody {
    inner: OutgoingHttpBody,
    observer: PhaseObserver,
    reported: AtomicBool,
}

impl ObservedBody {
    fn new(inner: OutgoingHttpBody, observer: PhaseObserver) -> Self {
        Self {
            inner,
            observer,
            reported: AtomicBool::new(false),
        }
    }

    fn report(&self) {
        if !self.reported.swap(true, Ordering::AcqRel) {
            self.observer.event(PhaseEvent::RequestSent);
        }
    }
}

impl Body for ObservedBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>> {
        let polled = Pin::new(&mut self.inner).poll_frame(cx);
        if let Poll::Ready(None) = polled {
            self.report();
        }
        polled
    }

    // hyper stops polling once this is true, so the end is reported here too.
    fn is_end_stream(&self) -> bool {
        let end = self.inner.is_end_stream();
        if end {
            self.report();
        }
        end
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

fn host_header(url: &Url) -> Result<HeaderValue, RequestError> {
    let host = url
        .host_str()
        .ok_or_else(|| RequestError::validation(format!("Invalid URL: {url} has no host")))?;
    let value = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    HeaderValue::from_str(&value).map_err(|e| RequestError::validation(e.to_string()))
}

/// Errno-style code for a hyper failure, from its IO cause when there is one.
fn hyper_error_code(error: &hyper::Error) -> &'static str {
    let mut source = error.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<io::Error>() {
            return errno_code(io.kind());
        }
        source = cause.source();
    }
    if error.is_incomplete_message() || error.is_closed() {
        "ECONNRESET"
    } else if error.is_canceled() {
        "ECONNABORTED"
    } else if error.is_timeout() {
        "ETIMEDOUT"
    } else {
        "ERR_REQUEST"
    }
}
