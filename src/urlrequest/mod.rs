//! Logical calls: options, the lifecycle controller and the handles given
//! to callers.

pub mod events;
pub mod job;
pub mod options;
pub mod redirect;
pub mod request;

pub use events::{Event, Progress};
pub use options::{Body, Options, RequestDescriptor, Target, TargetParts};
pub use request::{ResponseFuture, ResponseStream};
