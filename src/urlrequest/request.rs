//! Caller-facing handles of a running call.
//!
//! Each call runs on its own tokio task. [`ResponseFuture`] resolves to the
//! buffered response; [`ResponseStream`] yields the body chunk by chunk.
//! Both cancel the call when dropped.

use crate::base::neterror::RequestError;
use crate::http::response::Response;
use crate::http::transaction::ChunkStream;
use crate::urlrequest::events::{Event, EventSink};
use crate::urlrequest::job::RequestJob;
use crate::urlrequest::options::{Options, Target};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::{CancellationToken, DropGuard};

/// Shared plumbing of both handles.
struct Handle {
    cancel: CancellationToken,
    events: EventSink,
    /// Receiver created with the channel, so nothing sent before the first
    /// `events()` call is lost.
    first: Option<broadcast::Receiver<Event>>,
    _cancel_on_drop: DropGuard,
}

impl Handle {
    fn new() -> Self {
        let cancel = CancellationToken::new();
        let (events, first) = EventSink::new();
        Self {
            _cancel_on_drop: cancel.clone().drop_guard(),
            cancel,
            events,
            first: Some(first),
        }
    }

    fn events(&mut self) -> broadcast::Receiver<Event> {
        self.first.take().unwrap_or_else(|| self.events.subscribe())
    }
}

fn join_failed(error: JoinError) -> RequestError {
    if error.is_panic() {
        std::panic::resume_unwind(error.into_panic());
    }
    RequestError::cancelled()
}

/// A running call that resolves to its [`Response`].
pub struct ResponseFuture {
    task: JoinHandle<Result<Response, RequestError>>,
    handle: Handle,
}

impl ResponseFuture {
    pub(crate) fn spawn(target: Target, options: Options) -> Self {
        let handle = Handle::new();
        let job = RequestJob::new(target, options, handle.cancel.clone(), handle.events.clone());
        Self {
            task: tokio::spawn(job.run()),
            handle,
        }
    }

    /// Cancel the call. The future then resolves with a cancel error unless
    /// it already settled.
    pub fn cancel(&self) {
        self.handle.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.cancel.is_cancelled()
    }

    /// Lifecycle events of the call. The first receiver sees every event;
    /// later ones see events from the moment they subscribe.
    pub fn events(&mut self) -> broadcast::Receiver<Event> {
        self.handle.events()
    }
}

impl Future for ResponseFuture {
    type Output = Result<Response, RequestError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match ready!(Pin::new(&mut self.task).poll(cx)) {
            Ok(result) => Poll::Ready(result),
            Err(e) => Poll::Ready(Err(join_failed(e))),
        }
    }
}

type HeadTask = JoinHandle<Result<(Response, ChunkStream), RequestError>>;

enum StreamState {
    Head(HeadTask),
    Body(ChunkStream),
    Done,
}

/// A running call in stream mode: a [`Stream`] of body chunks.
///
/// Failures before the body starts, including HTTP status errors, are
/// yielded as the single item of the stream.
pub struct ResponseStream {
    state: StreamState,
    response: Option<Response>,
    handle: Handle,
}

impl ResponseStream {
    pub(crate) fn spawn(target: Target, options: Options) -> Self {
        let handle = Handle::new();
        let job = RequestJob::new(target, options, handle.cancel.clone(), handle.events.clone());
        Self {
            state: StreamState::Head(tokio::spawn(job.run_stream())),
            response: None,
            handle,
        }
    }

    pub fn cancel(&self) {
        self.handle.cancel.cancel();
    }

    pub fn events(&mut self) -> broadcast::Receiver<Event> {
        self.handle.events()
    }

    /// Status, headers and redirect history, once the first item was
    /// polled. The body of this response is empty.
    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    /// Read the rest of the body into memory.
    pub async fn bytes(mut self) -> Result<Bytes, RequestError> {
        let mut buf = bytes::BytesMut::new();
        while let Some(chunk) = self.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl Stream for ResponseStream {
    type Item = Result<Bytes, RequestError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                StreamState::Head(task) => match ready!(Pin::new(task).poll(cx)) {
                    Ok(Ok((response, body))) => {
                        this.response = Some(response);
                        this.state = StreamState::Body(body);
                    }
                    Ok(Err(e)) => {
                        this.state = StreamState::Done;
                        return Poll::Ready(Some(Err(e)));
                    }
                    Err(e) => {
                        this.state = StreamState::Done;
                        return Poll::Ready(Some(Err(join_failed(e))));
                    }
                },
                StreamState::Body(body) => {
                    let item = ready!(body.poll_next_unpin(cx));
                    if !matches!(item, Some(Ok(_))) {
                        this.state = StreamState::Done;
                    }
                    return Poll::Ready(item);
                }
                StreamState::Done => return Poll::Ready(None),
            }
        }
    }
}
