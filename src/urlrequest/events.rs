//! Lifecycle events of a logical call.
//!
//! Events are broadcast to every subscriber; the channel closes after the
//! terminal event.

use crate::base::neterror::RequestError;
use crate::http::response::ResponseHead;
use crate::urlrequest::options::RequestDescriptor;
use http::{Method, StatusCode};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use url::Url;

const EVENT_CAPACITY: usize = 256;

/// Transfer progress of a request or response body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// Fraction in `[0, 1]`; `0` until done when the total is unknown.
    pub percent: f64,
    pub transferred: u64,
    pub total: Option<u64>,
}

impl Progress {
    pub fn new(transferred: u64, total: Option<u64>) -> Self {
        let percent = match total {
            Some(0) => 1.0,
            Some(total) => (transferred as f64 / total as f64).min(1.0),
            None => 0.0,
        };
        Self {
            percent,
            transferred,
            total,
        }
    }

    /// Final progress: always `percent == 1`.
    pub fn done(transferred: u64) -> Self {
        Self {
            percent: 1.0,
            transferred,
            total: Some(transferred),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    /// An attempt is about to be dispatched.
    Request { method: Method, url: Url },
    /// A response head arrived (or was served from the cache).
    Response {
        status: StatusCode,
        url: Url,
        from_cache: bool,
    },
    /// A redirect is being followed.
    Redirect {
        status: StatusCode,
        from: Url,
        to: Url,
    },
    /// Terminal failure.
    Error(RequestError),
    DownloadProgress(Progress),
    UploadProgress(Progress),
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Request { .. } => "request",
            Event::Response { .. } => "response",
            Event::Redirect { .. } => "redirect",
            Event::Error(_) => "error",
            Event::DownloadProgress(_) => "downloadProgress",
            Event::UploadProgress(_) => "uploadProgress",
        }
    }
}

/// Sending half of the event channel, shared by a call and its nested
/// re-issued requests.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Arc<Mutex<Option<broadcast::Sender<Event>>>>,
}

impl EventSink {
    pub fn new() -> (Self, broadcast::Receiver<Event>) {
        let (tx, rx) = broadcast::channel(EVENT_CAPACITY);
        let sink = Self {
            tx: Arc::new(Mutex::new(Some(tx))),
        };
        (sink, rx)
    }

    /// A receiver for events sent from now on. Closed if the call already
    /// ended.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        match &*self.lock() {
            Some(tx) => tx.subscribe(),
            None => {
                let (_, rx) = broadcast::channel(1);
                rx
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<broadcast::Sender<Event>>> {
        self.tx.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn emit(&self, event: Event) {
        tracing::trace!(event = event.name(), "emit");
        if let Some(tx) = &*self.lock() {
            // No subscribers is fine.
            let _ = tx.send(event);
        }
    }

    pub fn request(&self, request: &RequestDescriptor) {
        self.emit(Event::Request {
            method: request.method.clone(),
            url: request.url.clone(),
        });
    }

    pub fn response(&self, head: &ResponseHead, from_cache: bool) {
        self.emit(Event::Response {
            status: head.status,
            url: head.url.clone(),
            from_cache,
        });
    }

    /// Emit the terminal error and close the channel.
    pub fn fail(&self, error: RequestError) {
        self.emit(Event::Error(error));
        self.close();
    }

    /// Close the channel; receivers drain what was sent and then end.
    pub fn close(&self) {
        self.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent() {
        assert_eq!(Progress::new(50, Some(200)).percent, 0.25);
        assert_eq!(Progress::new(10, None).percent, 0.0);
        assert_eq!(Progress::new(0, Some(0)).percent, 1.0);
        assert_eq!(Progress::done(42).percent, 1.0);
    }

    #[tokio::test]
    async fn test_channel_closes_after_terminal_event() {
        let (sink, mut rx) = EventSink::new();
        sink.fail(RequestError::cancelled());

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "error");
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));

        let mut late = sink.subscribe();
        assert!(late.recv().await.is_err());
    }
}
