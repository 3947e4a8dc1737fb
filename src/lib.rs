//! # fetchnet
//!
//! An HTTP client built around a request lifecycle engine.
//!
//! A single configurable call issues a request, tracks per-phase timeout
//! budgets, retries failed attempts with backoff, follows redirects, runs
//! user hooks at fixed points and can serve responses from a cache. Every
//! call is cancellable and broadcasts its lifecycle events.
//!
//! ## Features
//!
//! - **Phase timeouts**: lookup, connect, secureConnect, socket, send,
//!   response and whole-request budgets
//! - **Retries**: method/status eligibility, exponential backoff, `Retry-After`
//! - **Redirects**: method rewriting, hop limit, credential stripping
//! - **Hooks**: `beforeRequest`, `beforeRedirect`, `beforeRetry`, `afterResponse`
//! - **Caching**: pluggable [`Cache`] store, in-memory default
//! - **Streaming**: chunked response bodies and writable request bodies
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fetchnet::{Client, Options};
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = Client::new();
//!     let response = client
//!         .get("http://example.com", Options::new())
//!         .await
//!         .unwrap();
//!     println!("Status: {}", response.status());
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error taxonomy and lifecycle states
//! - [`http`] - Attempts, timing, retry, hooks, cache and the transport contract
//! - [`socket`] - The default HTTP/1.1 transport
//! - [`urlrequest`] - Options, the lifecycle controller and caller handles
//!
//! ## Cargo features
//!
//! - `tls`: https support in the default transport via BoringSSL

pub mod base;
pub mod client;
pub mod http;
pub mod socket;
pub mod urlrequest;

pub use base::neterror::{BoxError, ErrorKind, RequestError};
pub use client::{Client, ClientBuilder};
pub use crate::http::{
    BodyWriter, Cache, Encoding, Hooks, MemoryCache, Phase, RequestBody, Response, ResponseBody,
    RetryPolicy, RetryWithMergedOptions, Timeouts, Timings, Transport, TransportRequest,
    TransportResponse,
};
pub use urlrequest::{Event, Options, Progress, ResponseFuture, ResponseStream, Target};

/// Start a call with default settings.
pub fn request(target: impl Into<Target>, options: Options) -> ResponseFuture {
    Client::new().request(target, options)
}

/// Start a call in stream mode with default settings.
pub fn stream(target: impl Into<Target>, options: Options) -> ResponseStream {
    Client::new().stream(target, options)
}

pub fn get(target: impl Into<Target>, options: Options) -> ResponseFuture {
    Client::new().get(target, options)
}

pub fn post(target: impl Into<Target>, options: Options) -> ResponseFuture {
    Client::new().post(target, options)
}

pub fn put(target: impl Into<Target>, options: Options) -> ResponseFuture {
    Client::new().put(target, options)
}

pub fn patch(target: impl Into<Target>, options: Options) -> ResponseFuture {
    Client::new().patch(target, options)
}

pub fn head(target: impl Into<Target>, options: Options) -> ResponseFuture {
    Client::new().head(target, options)
}

pub fn delete(target: impl Into<Target>, options: Options) -> ResponseFuture {
    Client::new().delete(target, options)
}
