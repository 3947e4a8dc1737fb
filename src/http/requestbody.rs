//! Request body for POST/PUT operations.

use crate::base::neterror::RequestError;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// A stream of body chunks.
pub type BodyStream = BoxStream<'static, Result<Bytes, io::Error>>;

/// A streaming body that can be taken exactly once.
///
/// Clones share the same underlying stream, so a descriptor carrying a
/// streaming body can be cloned but only one attempt can ever send it.
#[derive(Clone)]
pub struct StreamBody {
    inner: Arc<Mutex<Option<BodyStream>>>,
}

impl StreamBody {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, io::Error>> + Send + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Some(stream.boxed()))),
        }
    }

    pub fn take(&self) -> Option<BodyStream> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

impl fmt::Debug for StreamBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StreamBody")
    }
}

/// Request body, selected when options are normalized.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    /// No body (GET, HEAD, DELETE).
    #[default]
    Empty,
    /// Body with raw bytes.
    Raw(Bytes),
    /// Body produced incrementally.
    Stream(StreamBody),
    /// Serialized as `application/json`.
    Json(Value),
    /// Serialized as `application/x-www-form-urlencoded`.
    Form(Vec<(String, String)>),
}

/// Body as handed to a transport.
pub enum OutgoingBody {
    Empty,
    Full(Bytes),
    Stream(BodyStream),
}

impl fmt::Debug for OutgoingBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutgoingBody::Empty => f.write_str("Empty"),
            OutgoingBody::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            OutgoingBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl From<String> for RequestBody {
    fn from(s: String) -> Self {
        RequestBody::Raw(Bytes::from(s))
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(v: Vec<u8>) -> Self {
        RequestBody::Raw(Bytes::from(v))
    }
}

impl From<&str> for RequestBody {
    fn from(s: &str) -> Self {
        RequestBody::Raw(Bytes::from(s.to_owned()))
    }
}

impl From<Bytes> for RequestBody {
    fn from(b: Bytes) -> Self {
        RequestBody::Raw(b)
    }
}

impl RequestBody {
    /// Create a writable body: chunks written to the [`BodyWriter`] are
    /// streamed as the request body until the writer is dropped.
    pub fn channel() -> (BodyWriter, RequestBody) {
        let (tx, rx) = mpsc::channel(16);
        let body = RequestBody::Stream(StreamBody::new(ReceiverStream::new(rx)));
        (BodyWriter { tx }, body)
    }

    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, io::Error>> + Send + 'static,
    {
        RequestBody::Stream(StreamBody::new(stream))
    }

    /// Check if the body is empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, RequestBody::Empty)
    }

    /// Whether the body can be sent again on a retry or redirect.
    pub fn is_replayable(&self) -> bool {
        !matches!(self, RequestBody::Stream(_))
    }

    /// `content-type` implied by the body variant.
    pub fn content_type(&self) -> Option<&'static str> {
        match self {
            RequestBody::Json(_) => Some("application/json"),
            RequestBody::Form(_) => Some("application/x-www-form-urlencoded"),
            _ => None,
        }
    }

    /// Serialized bytes for bodies of known size. `None` for streams.
    pub fn to_bytes(&self) -> Result<Option<Bytes>, RequestError> {
        match self {
            RequestBody::Empty => Ok(Some(Bytes::new())),
            RequestBody::Raw(bytes) => Ok(Some(bytes.clone())),
            RequestBody::Stream(_) => Ok(None),
            RequestBody::Json(value) => serde_json::to_vec(value)
                .map(|v| Some(Bytes::from(v)))
                .map_err(|e| RequestError::validation(e.to_string())),
            RequestBody::Form(pairs) => serde_urlencoded::to_string(pairs)
                .map(|s| Some(Bytes::from(s)))
                .map_err(|e| RequestError::validation(e.to_string())),
        }
    }

    /// Length in bytes, when known up front.
    pub fn content_length(&self) -> Result<Option<u64>, RequestError> {
        Ok(self.to_bytes()?.map(|b| b.len() as u64))
    }

    /// Produce the body for one attempt. A streaming body can only be
    /// encoded once.
    pub fn encode(&self) -> Result<OutgoingBody, RequestError> {
        match self {
            RequestBody::Empty => Ok(OutgoingBody::Empty),
            RequestBody::Stream(stream) => stream.take().map(OutgoingBody::Stream).ok_or_else(|| {
                RequestError::validation("The request body stream was already consumed")
            }),
            other => Ok(other
                .to_bytes()?
                .map(OutgoingBody::Full)
                .unwrap_or(OutgoingBody::Empty)),
        }
    }
}

/// Writable half of a streaming request body.
#[derive(Debug, Clone)]
pub struct BodyWriter {
    tx: mpsc::Sender<Result<Bytes, io::Error>>,
}

impl BodyWriter {
    /// Send one chunk. Fails once the request no longer reads the body.
    pub async fn write(&self, chunk: impl Into<Bytes>) -> Result<(), RequestError> {
        self.tx
            .send(Ok(chunk.into()))
            .await
            .map_err(|_| RequestError::request("ERR_STREAM_DESTROYED", "request body closed"))
    }

    /// Fail the body with `error`; the attempt surfaces it as a request error.
    pub async fn abort(self, error: io::Error) {
        let _ = self.tx.send(Err(error)).await;
    }

    /// End the body.
    pub fn finish(self) {}
}
