//! Per-phase timeout budgets and timing capture.
//!
//! A [`PhaseTracker`] is created for every attempt. The transport reports
//! phase boundaries through a [`PhaseObserver`]; the tracker arms an
//! independent countdown per phase and reports the first one that expires.
//!
//! | phase           | armed at                         | cleared at          |
//! |-----------------|----------------------------------|---------------------|
//! | `request`       | attempt start                    | response end        |
//! | `lookup`        | socket assigned / lookup start   | lookup end          |
//! | `connect`       | lookup end                       | connect end         |
//! | `secureConnect` | connect end (https)              | secure connect end  |
//! | `socket`        | socket assigned, re-armed on every event | response end |
//! | `send`          | connect end / secure connect end | request sent        |
//! | `response`      | request sent                     | response received   |

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// A timed phase of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Lookup,
    Connect,
    SecureConnect,
    Socket,
    Send,
    Response,
    Request,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Lookup => "lookup",
            Phase::Connect => "connect",
            Phase::SecureConnect => "secureConnect",
            Phase::Socket => "socket",
            Phase::Send => "send",
            Phase::Response => "response",
            Phase::Request => "request",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional ceilings per phase. Unset phases are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeouts {
    pub lookup: Option<Duration>,
    pub connect: Option<Duration>,
    pub secure_connect: Option<Duration>,
    pub socket: Option<Duration>,
    pub send: Option<Duration>,
    pub response: Option<Duration>,
    pub request: Option<Duration>,
}

impl Timeouts {
    pub fn get(&self, phase: Phase) -> Option<Duration> {
        match phase {
            Phase::Lookup => self.lookup,
            Phase::Connect => self.connect,
            Phase::SecureConnect => self.secure_connect,
            Phase::Socket => self.socket,
            Phase::Send => self.send,
            Phase::Response => self.response,
            Phase::Request => self.request,
        }
    }

    pub fn set(&mut self, phase: Phase, budget: Option<Duration>) {
        let slot = match phase {
            Phase::Lookup => &mut self.lookup,
            Phase::Connect => &mut self.connect,
            Phase::SecureConnect => &mut self.secure_connect,
            Phase::Socket => &mut self.socket,
            Phase::Send => &mut self.send,
            Phase::Response => &mut self.response,
            Phase::Request => &mut self.request,
        };
        *slot = budget;
    }

    pub fn with(mut self, phase: Phase, budget: Duration) -> Self {
        self.set(phase, Some(budget));
        self
    }

    /// Overlay `other` on top of `self`, phase by phase.
    pub fn merge(self, other: Timeouts) -> Timeouts {
        Timeouts {
            lookup: other.lookup.or(self.lookup),
            connect: other.connect.or(self.connect),
            secure_connect: other.secure_connect.or(self.secure_connect),
            socket: other.socket.or(self.socket),
            send: other.send.or(self.send),
            response: other.response.or(self.response),
            request: other.request.or(self.request),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Timeouts::default()
    }
}

/// A bare duration bounds the whole attempt.
impl From<Duration> for Timeouts {
    fn from(request: Duration) -> Self {
        Timeouts {
            request: Some(request),
            ..Default::default()
        }
    }
}

/// Phase boundaries reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    SocketAssigned,
    LookupStart,
    LookupEnd,
    ConnectEnd,
    SecureConnectEnd,
    RequestSent,
    ResponseReceived,
    /// Bytes moved on the socket. Only restarts the idle timer.
    BodyActivity,
    ResponseEnd,
}

/// Timestamps captured during one attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timings {
    pub start: Option<Instant>,
    pub socket: Option<Instant>,
    pub lookup: Option<Instant>,
    pub connect: Option<Instant>,
    pub secure_connect: Option<Instant>,
    pub upload: Option<Instant>,
    pub response: Option<Instant>,
    pub end: Option<Instant>,
}

/// Durations derived from [`Timings`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseDurations {
    pub wait: Option<Duration>,
    pub dns: Option<Duration>,
    pub tcp: Option<Duration>,
    pub tls: Option<Duration>,
    pub request: Option<Duration>,
    pub first_byte: Option<Duration>,
    pub download: Option<Duration>,
    pub total: Option<Duration>,
}

fn between(from: Option<Instant>, to: Option<Instant>) -> Option<Duration> {
    Some(to?.saturating_duration_since(from?))
}

impl Timings {
    pub fn phases(&self) -> PhaseDurations {
        let sent_from = self.secure_connect.or(self.connect);
        PhaseDurations {
            wait: between(self.start, self.socket),
            dns: between(self.socket, self.lookup),
            tcp: between(self.lookup, self.connect),
            tls: between(self.connect, self.secure_connect),
            request: between(sent_from, self.upload),
            first_byte: between(self.upload, self.response),
            download: between(self.response, self.end),
            total: between(self.start, self.end),
        }
    }
}

struct TrackerState {
    timers: HashMap<Phase, (u64, JoinHandle<()>)>,
    started: HashSet<Phase>,
    generation: u64,
    timings: Timings,
    finished: bool,
}

struct TrackerInner {
    budgets: Timeouts,
    https: bool,
    state: Mutex<TrackerState>,
    expired_tx: mpsc::UnboundedSender<(Phase, u64)>,
}

impl TrackerInner {
    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn arm(&self, state: &mut TrackerState, phase: Phase) {
        let Some(budget) = self.budgets.get(phase) else {
            return;
        };
        state.generation += 1;
        let generation = state.generation;
        let tx = self.expired_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(budget).await;
            let _ = tx.send((phase, generation));
        });
        if let Some((_, previous)) = state.timers.insert(phase, (generation, handle)) {
            previous.abort();
        }
    }

    fn arm_once(&self, state: &mut TrackerState, phase: Phase) {
        if state.started.insert(phase) {
            self.arm(state, phase);
        }
    }

    fn clear(state: &mut TrackerState, phase: Phase) {
        if let Some((_, handle)) = state.timers.remove(&phase) {
            handle.abort();
        }
    }

    fn record(&self, event: PhaseEvent) {
        let mut state = self.lock();
        if state.finished {
            return;
        }
        let now = Instant::now();
        match event {
            PhaseEvent::SocketAssigned => {
                state.timings.socket = Some(now);
                self.arm_once(&mut state, Phase::Lookup);
            }
            PhaseEvent::LookupStart => self.arm_once(&mut state, Phase::Lookup),
            PhaseEvent::LookupEnd => {
                state.timings.lookup = Some(now);
                Self::clear(&mut state, Phase::Lookup);
                self.arm_once(&mut state, Phase::Connect);
            }
            PhaseEvent::ConnectEnd => {
                state.timings.connect = Some(now);
                Self::clear(&mut state, Phase::Connect);
                if self.https {
                    self.arm_once(&mut state, Phase::SecureConnect);
                } else {
                    self.arm_once(&mut state, Phase::Send);
                }
            }
            PhaseEvent::SecureConnectEnd => {
                state.timings.secure_connect = Some(now);
                Self::clear(&mut state, Phase::SecureConnect);
                self.arm_once(&mut state, Phase::Send);
            }
            PhaseEvent::RequestSent => {
                state.timings.upload = Some(now);
                Self::clear(&mut state, Phase::Send);
                self.arm_once(&mut state, Phase::Response);
            }
            PhaseEvent::ResponseReceived => {
                state.timings.response = Some(now);
                // A server may answer before the upload is done.
                Self::clear(&mut state, Phase::Send);
                Self::clear(&mut state, Phase::Response);
            }
            PhaseEvent::BodyActivity => {}
            PhaseEvent::ResponseEnd => {
                state.timings.end = Some(now);
                state.finished = true;
                for (_, (_, handle)) in state.timers.drain() {
                    handle.abort();
                }
                return;
            }
        }
        if state.timings.socket.is_some() {
            self.arm(&mut state, Phase::Socket);
        }
    }
}

/// Owns the countdowns of one attempt. Dropping it clears every timer.
pub struct PhaseTracker {
    inner: Arc<TrackerInner>,
    expired_rx: mpsc::UnboundedReceiver<(Phase, u64)>,
}

impl PhaseTracker {
    /// Start tracking an attempt; arms the `request` budget immediately.
    pub fn start(budgets: Timeouts, https: bool) -> Self {
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(TrackerInner {
            budgets,
            https,
            state: Mutex::new(TrackerState {
                timers: HashMap::new(),
                started: HashSet::new(),
                generation: 0,
                timings: Timings {
                    start: Some(Instant::now()),
                    ..Default::default()
                },
                finished: false,
            }),
            expired_tx,
        });
        {
            let mut state = inner.lock();
            inner.arm_once(&mut state, Phase::Request);
        }
        Self { inner, expired_rx }
    }

    pub fn observer(&self) -> PhaseObserver {
        PhaseObserver {
            inner: Some(Arc::clone(&self.inner)),
        }
    }

    /// Resolves with the first phase whose budget ran out.
    ///
    /// Expirations of phases that were cleared before being observed are
    /// ignored. Pending forever if nothing expires.
    pub async fn expired(&mut self) -> (Phase, Duration) {
        while let Some((phase, generation)) = self.expired_rx.recv().await {
            let live = {
                let state = self.inner.lock();
                matches!(state.timers.get(&phase), Some((current, _)) if *current == generation)
            };
            if live {
                let budget = self.inner.budgets.get(phase).unwrap_or_default();
                return (phase, budget);
            }
        }
        futures::future::pending().await
    }

    pub fn record(&self, event: PhaseEvent) {
        self.inner.record(event);
    }

    pub fn timings(&self) -> Timings {
        self.inner.lock().timings
    }

    /// Phases that currently have a running countdown.
    pub fn armed(&self) -> Vec<Phase> {
        self.inner.lock().timers.keys().copied().collect()
    }
}

impl Drop for PhaseTracker {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        state.finished = true;
        for (_, (_, handle)) in state.timers.drain() {
            handle.abort();
        }
    }
}

/// Handle through which a transport reports phase boundaries.
#[derive(Clone, Default)]
pub struct PhaseObserver {
    inner: Option<Arc<TrackerInner>>,
}

impl PhaseObserver {
    /// An observer that records nothing.
    pub fn noop() -> Self {
        Self::default()
    }

    pub fn event(&self, event: PhaseEvent) {
        if let Some(inner) = &self.inner {
            inner.record(event);
        }
    }
}

impl fmt::Debug for PhaseObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseObserver")
            .field("attached", &self.inner.is_some())
            .finish()
    }
}
