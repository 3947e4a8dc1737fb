#![allow(dead_code)]

use bytes::Bytes;
use fetchnet::http::requestbody::OutgoingBody;
use fetchnet::http::streamfactory::Dispatching;
use fetchnet::http::timing::{PhaseEvent, PhaseObserver};
use fetchnet::{RequestError, Transport, TransportRequest, TransportResponse};
use futures::{StreamExt, TryStreamExt};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Route crate logs to the test harness; `RUST_LOG=fetchnet=debug` shows them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// What the scripted transport does for one request.
#[derive(Clone)]
pub enum Outcome {
    Respond {
        status: StatusCode,
        headers: HeaderMap,
        chunks: Vec<Bytes>,
    },
    /// Fail with a connection error carrying this code.
    Fail(&'static str),
    /// Never answer; only the abort token ends the dispatch.
    Hang,
    /// Wait, then behave like the inner outcome.
    Delay(Duration, Box<Outcome>),
}

impl Outcome {
    pub fn status(code: u16) -> Self {
        Outcome::Respond {
            status: StatusCode::from_u16(code).unwrap(),
            headers: HeaderMap::new(),
            chunks: Vec::new(),
        }
    }

    pub fn ok(body: &'static str) -> Self {
        Outcome::status(200).body(body)
    }

    pub fn header(mut self, name: &'static str, value: &str) -> Self {
        if let Outcome::Respond { headers, .. } = &mut self {
            headers.append(
                HeaderName::from_static(name),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        self
    }

    pub fn body(self, body: impl Into<Bytes>) -> Self {
        self.chunks(vec![body.into()])
    }

    pub fn chunks(mut self, body: Vec<Bytes>) -> Self {
        if let Outcome::Respond { chunks, .. } = &mut self {
            *chunks = body.into_iter().filter(|c| !c.is_empty()).collect();
        }
        self
    }

    pub fn redirect(code: u16, location: &str) -> Self {
        Outcome::status(code).header("location", location)
    }

    pub fn after(self, delay: Duration) -> Self {
        Outcome::Delay(delay, Box::new(self))
    }
}

/// A request as the transport saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// The attempt's abort token; cancelled once the attempt is over.
    pub abort: CancellationToken,
}

#[derive(Default)]
struct Inner {
    script: Mutex<VecDeque<Outcome>>,
    last: Mutex<Option<Outcome>>,
    requests: Mutex<Vec<Recorded>>,
}

/// Mock transport answering from a script. Once the script runs out, the
/// last outcome repeats.
#[derive(Clone, Default)]
pub struct Scripted {
    inner: Arc<Inner>,
}

impl Scripted {
    pub fn new(script: impl IntoIterator<Item = Outcome>) -> Self {
        init_tracing();
        let scripted = Self::default();
        scripted.inner.script.lock().unwrap().extend(script);
        scripted
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.inner.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.inner.requests.lock().unwrap().len()
    }

    fn next(&self) -> Outcome {
        let next = self.inner.script.lock().unwrap().pop_front();
        let mut last = self.inner.last.lock().unwrap();
        match next {
            Some(outcome) => {
                *last = Some(outcome.clone());
                outcome
            }
            None => last.clone().unwrap_or(Outcome::Fail("ENOSCRIPT")),
        }
    }
}

impl Transport for Scripted {
    fn dispatch(&self, request: TransportRequest, observer: PhaseObserver) -> Dispatching {
        let this = self.clone();
        Box::pin(async move {
            observer.event(PhaseEvent::SocketAssigned);
            observer.event(PhaseEvent::LookupEnd);
            observer.event(PhaseEvent::ConnectEnd);

            let body = match request.body {
                OutgoingBody::Empty => Bytes::new(),
                OutgoingBody::Full(bytes) => bytes,
                OutgoingBody::Stream(stream) => {
                    let chunks: Vec<Bytes> = stream
                        .try_collect()
                        .await
                        .map_err(|e| RequestError::request("EPIPE", e))?;
                    Bytes::from(chunks.concat())
                }
            };
            observer.event(PhaseEvent::RequestSent);

            this.inner.requests.lock().unwrap().push(Recorded {
                method: request.method.clone(),
                url: request.url.clone(),
                headers: request.headers.clone(),
                body,
                abort: request.abort.clone(),
            });

            let mut outcome = this.next();
            loop {
                match outcome {
                    Outcome::Delay(delay, inner) => {
                        tokio::select! {
                            _ = request.abort.cancelled() => {
                                return Err(RequestError::request("ECONNABORTED", "aborted"));
                            }
                            _ = tokio::time::sleep(delay) => outcome = *inner,
                        }
                    }
                    Outcome::Respond {
                        status,
                        headers,
                        chunks,
                    } => {
                        observer.event(PhaseEvent::ResponseReceived);
                        let body = futures::stream::iter(
                            chunks.into_iter().map(Ok::<Bytes, std::io::Error>),
                        )
                        .boxed();
                        return Ok(TransportResponse::new(status, headers, body));
                    }
                    Outcome::Fail(code) => {
                        return Err(RequestError::request(code, "scripted failure"));
                    }
                    Outcome::Hang => {
                        request.abort.cancelled().await;
                        return Err(RequestError::request("ECONNABORTED", "aborted"));
                    }
                }
            }
        })
    }
}
