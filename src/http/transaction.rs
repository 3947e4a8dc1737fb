//! A single network attempt.
//!
//! An [`Attempt`] dispatches one request through the descriptor's transport
//! while racing it against the call's cancellation token and the attempt's
//! phase budgets. Whichever fires first aborts the transport.

use crate::base::context::IoResultExt;
use crate::base::neterror::RequestError;
use crate::http::requestbody::{BodyStream, OutgoingBody};
use crate::http::responsebody::StreamDecoder;
use crate::http::streamfactory::{TransportRequest, TransportResponse};
use crate::http::timing::{PhaseEvent, PhaseTracker, Timings};
use crate::urlrequest::events::{Event, EventSink, Progress};
use crate::urlrequest::options::RequestDescriptor;
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

/// Stream of decoded body chunks handed to a streaming caller.
pub type ChunkStream = BoxStream<'static, Result<Bytes, RequestError>>;

pub struct Attempt {
    retry_count: u32,
    tracker: PhaseTracker,
    abort: CancellationToken,
}

impl Attempt {
    /// Start the clock for a new attempt.
    pub fn new(request: &RequestDescriptor, retry_count: u32) -> Self {
        let https = request.url.scheme() == "https";
        Self {
            retry_count,
            tracker: PhaseTracker::start(request.timeout, https),
            abort: CancellationToken::new(),
        }
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn timings(&self) -> Timings {
        self.tracker.timings()
    }

    /// Abort the transport operation, releasing its connection.
    pub fn abort(&self) {
        self.abort.cancel();
    }

    /// Dispatch the request and wait for the response head.
    pub async fn send(
        &mut self,
        request: &RequestDescriptor,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> Result<TransportResponse, RequestError> {
        let body = request.body.encode()?;
        let upload_total = match &body {
            OutgoingBody::Empty => Some(0),
            OutgoingBody::Full(bytes) => Some(bytes.len() as u64),
            OutgoingBody::Stream(_) => None,
        };
        let body = match body {
            OutgoingBody::Stream(stream) => OutgoingBody::Stream(track_upload(stream, events.clone())),
            other => other,
        };
        events.emit(Event::UploadProgress(Progress::new(0, upload_total)));

        let transport_request = TransportRequest {
            method: request.method.clone(),
            url: request.url.clone(),
            headers: request.headers.clone(),
            body,
            abort: self.abort.clone(),
        };
        tracing::debug!(
            method = %request.method,
            url = %request.url,
            attempt = self.retry_count,
            "dispatching"
        );
        let dispatch = request
            .agent
            .dispatch(transport_request, self.tracker.observer());

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RequestError::cancelled()),
            (phase, budget) = self.tracker.expired() => {
                tracing::debug!(phase = %phase, budget_ms = budget.as_millis() as u64, "phase timed out");
                Err(RequestError::timeout(phase, budget))
            }
            result = dispatch => result,
        };

        match result {
            Ok(response) => {
                if let Some(total) = upload_total {
                    events.emit(Event::UploadProgress(Progress::done(total)));
                }
                Ok(response)
            }
            Err(e) => {
                self.abort.cancel();
                Err(e.with_request(&request.url, &request.method))
            }
        }
    }

    /// Next body chunk, raced against cancellation and the phase budgets.
    async fn next_chunk(
        &mut self,
        body: &mut BodyStream,
        cancel: &CancellationToken,
    ) -> Result<Option<Bytes>, RequestError> {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RequestError::cancelled()),
            (phase, budget) = self.tracker.expired() => Err(RequestError::timeout(phase, budget)),
            next = body.next() => Ok(next),
        };
        match next {
            Ok(Some(Ok(chunk))) => {
                self.tracker.record(PhaseEvent::BodyActivity);
                Ok(Some(chunk))
            }
            Ok(Some(Err(e))) => {
                self.abort.cancel();
                Err::<Option<Bytes>, _>(e).read_context()
            }
            Ok(None) => {
                self.tracker.record(PhaseEvent::ResponseEnd);
                Ok(None)
            }
            Err(e) => {
                self.abort.cancel();
                Err(e)
            }
        }
    }

    /// Buffer the whole response body.
    pub async fn read_body(
        &mut self,
        mut body: BodyStream,
        total: Option<u64>,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> Result<Bytes, RequestError> {
        let mut buf = BytesMut::new();
        events.emit(Event::DownloadProgress(Progress::new(0, total)));

        while let Some(chunk) = self.next_chunk(&mut body, cancel).await? {
            buf.extend_from_slice(&chunk);
            events.emit(Event::DownloadProgress(Progress::new(buf.len() as u64, total)));
        }

        events.emit(Event::DownloadProgress(Progress::done(buf.len() as u64)));
        Ok(buf.freeze())
    }

    /// Hand the body to a streaming caller. Chunks are inflated on the fly
    /// when `decoder` is not the identity.
    pub fn forward_body(
        self,
        body: BodyStream,
        total: Option<u64>,
        decoder: StreamDecoder,
        cancel: CancellationToken,
        events: EventSink,
    ) -> ChunkStream {
        struct Forward {
            attempt: Attempt,
            body: BodyStream,
            decoder: StreamDecoder,
            transferred: u64,
            total: Option<u64>,
            cancel: CancellationToken,
            events: EventSink,
            finished: bool,
        }

        events.emit(Event::DownloadProgress(Progress::new(0, total)));
        let state = Forward {
            attempt: self,
            body,
            decoder,
            transferred: 0,
            total,
            cancel,
            events,
            finished: false,
        };

        futures::stream::unfold(state, |mut st| async move {
            loop {
                if st.finished {
                    return None;
                }
                let step = match st.attempt.next_chunk(&mut st.body, &st.cancel).await {
                    Ok(Some(chunk)) => {
                        st.transferred += chunk.len() as u64;
                        st.events.emit(Event::DownloadProgress(Progress::new(
                            st.transferred,
                            st.total,
                        )));
                        st.decoder.push(&chunk).map(Some)
                    }
                    Ok(None) => {
                        st.finished = true;
                        let tail = st.decoder.finish();
                        if tail.is_ok() {
                            st.events
                                .emit(Event::DownloadProgress(Progress::done(st.transferred)));
                            st.events.close();
                        }
                        tail.map(Some)
                    }
                    Err(e) => Err(e),
                };
                match step {
                    Ok(Some(decoded)) if decoded.is_empty() => continue,
                    Ok(Some(decoded)) => return Some((Ok(decoded), st)),
                    Ok(None) => return None,
                    Err(e) => {
                        st.finished = true;
                        st.events.fail(e.clone());
                        return Some((Err(e), st));
                    }
                }
            }
        })
        .boxed()
    }
}

impl Drop for Attempt {
    fn drop(&mut self) {
        self.abort.cancel();
        tracing::trace!(attempt = self.retry_count, "attempt released");
    }
}

/// Count bytes of a streaming request body as they are sent.
fn track_upload(stream: BodyStream, events: EventSink) -> BodyStream {
    let mut transferred = 0u64;
    stream
        .inspect(move |chunk| {
            if let Ok(chunk) = chunk {
                transferred += chunk.len() as u64;
                events.emit(Event::UploadProgress(Progress::new(transferred, None)));
            }
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::neterror::ErrorKind;
    use crate::http::streamfactory::{Dispatching, Transport};
    use crate::http::timing::{Phase, PhaseObserver, Timeouts};
    use crate::urlrequest::options::Options;
    use http::{HeaderMap, StatusCode};
    use std::time::Duration;

    struct Stalled;

    impl Transport for Stalled {
        fn dispatch(&self, request: TransportRequest, observer: PhaseObserver) -> Dispatching {
            Box::pin(async move {
                observer.event(PhaseEvent::SocketAssigned);
                observer.event(PhaseEvent::LookupEnd);
                observer.event(PhaseEvent::ConnectEnd);
                observer.event(PhaseEvent::RequestSent);
                request.abort.cancelled().await;
                Err(RequestError::request("ECONNABORTED", "aborted"))
            })
        }
    }

    struct Ready;

    impl Transport for Ready {
        fn dispatch(&self, _: TransportRequest, observer: PhaseObserver) -> Dispatching {
            Box::pin(async move {
                observer.event(PhaseEvent::ResponseReceived);
                Ok(TransportResponse::full(StatusCode::OK, HeaderMap::new(), "hello"))
            })
        }
    }

    fn descriptor(agent: impl Transport + 'static, timeout: Timeouts) -> RequestDescriptor {
        RequestDescriptor::from_options(
            "http://example.com/".into(),
            Options::new().agent(agent).timeout(timeout),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_budget_aborts_transport() {
        let request = descriptor(
            Stalled,
            Timeouts::default().with(Phase::Response, Duration::from_millis(200)),
        );
        let (events, _rx) = EventSink::new();
        let cancel = CancellationToken::new();

        let mut attempt = Attempt::new(&request, 0);
        let err = attempt.send(&request, &cancel, &events).await.unwrap_err();

        assert!(matches!(
            err.kind(),
            ErrorKind::Timeout {
                phase: Phase::Response,
                ..
            }
        ));
        assert_eq!(err.url().map(|u| u.as_str()), Some("http://example.com/"));
        assert!(attempt.abort.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_wins() {
        let request = descriptor(Stalled, Timeouts::default());
        let (events, _rx) = EventSink::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut attempt = Attempt::new(&request, 0);
        let err = attempt.send(&request, &cancel, &events).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_read_body_reports_progress() {
        let request = descriptor(Ready, Timeouts::default());
        let (events, mut rx) = EventSink::new();
        let cancel = CancellationToken::new();

        let mut attempt = Attempt::new(&request, 0);
        let response = attempt.send(&request, &cancel, &events).await.unwrap();
        let body = attempt
            .read_body(response.body, Some(5), &cancel, &events)
            .await
            .unwrap();
        assert_eq!(body, Bytes::from_static(b"hello"));
        assert!(attempt.timings().end.is_some());

        let mut last_download = None;
        while let Ok(event) = rx.try_recv() {
            if let Event::DownloadProgress(p) = event {
                last_download = Some(p);
            }
        }
        assert_eq!(last_download, Some(Progress::done(5)));
    }
}
