/// The lifecycle state of a logical call.
///
/// Every call starts `Idle` and reaches exactly one of the terminal states
/// `Completed`, `Failed` or `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    /// The call has not started.
    #[default]
    Idle,

    /// Merging defaults and per-call options into a descriptor.
    Normalizing,

    /// Looking up the response cache.
    CacheCheck,

    /// Running `beforeRequest` hooks and waiting on the transport.
    Dispatching,

    /// Waiting out the backoff before the next attempt.
    Retrying,

    /// Building the request for the next redirect hop.
    Redirecting,

    /// A response was delivered.
    Completed,

    /// A terminal error was delivered.
    Failed,

    /// The call was cancelled by the caller.
    Cancelled,
}

impl LoadState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LoadState::Completed | LoadState::Failed | LoadState::Cancelled
        )
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: LoadState) -> bool {
        use LoadState::*;

        if self.is_terminal() {
            return false;
        }
        if next == Cancelled {
            return true;
        }
        matches!(
            (self, next),
            (Idle, Normalizing)
                | (Normalizing, CacheCheck)
                | (Normalizing, Failed)
                | (CacheCheck, Completed)
                | (CacheCheck, Dispatching)
                | (CacheCheck, Retrying)
                | (CacheCheck, Redirecting)
                | (CacheCheck, Failed)
                | (Dispatching, Dispatching)
                | (Dispatching, Completed)
                | (Dispatching, Retrying)
                | (Dispatching, Redirecting)
                | (Dispatching, Failed)
                | (Retrying, Dispatching)
                | (Retrying, Failed)
                | (Redirecting, CacheCheck)
                | (Redirecting, Dispatching)
                | (Redirecting, Failed)
        )
    }
}
