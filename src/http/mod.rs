//! HTTP layer: one attempt and everything it is made of.
//!
//! - [`transaction`]: a single dispatch raced against cancellation and timeouts
//! - [`timing`]: per-phase budgets and timings
//! - [`retry`]: retry policy and backoff
//! - [`hooks`]: lifecycle hooks
//! - [`httpcache`]: response cache adapter
//! - [`streamfactory`]: the transport contract

pub mod hooks;
pub mod httpcache;
pub mod requestbody;
pub mod response;
pub mod responsebody;
pub mod retry;
pub mod streamfactory;
pub mod timing;
pub mod transaction;

// Re-exports for convenience
pub use hooks::{Hooks, RetryWithMergedOptions};
pub use httpcache::{Cache, MemoryCache};
pub use requestbody::{BodyWriter, RequestBody};
pub use response::Response;
pub use responsebody::{Encoding, ResponseBody};
pub use retry::RetryPolicy;
pub use streamfactory::{Transport, TransportRequest, TransportResponse};
pub use timing::{Phase, Timeouts, Timings};
