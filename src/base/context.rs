//! Ergonomic error context helpers.
//!
//! Provides extension traits for adding context to `Result` types,
//! converting IO errors into transport-level [`RequestError`]s with
//! errno-style codes.

use crate::base::neterror::RequestError;
use std::io;

/// Extension trait for adding context to IO Results.
pub trait IoResultExt<T> {
    /// Add connection context to an IO error.
    ///
    /// # Example
    /// ```ignore
    /// use fetchnet::base::context::IoResultExt;
    ///
    /// let stream = TcpStream::connect(addr).await
    ///     .connection_context("example.com", 443)?;
    /// // Error code: "ECONNREFUSED"
    /// ```
    fn connection_context(self, host: &str, port: u16) -> Result<T, RequestError>;

    /// Add DNS resolution context to an IO error.
    fn dns_context(self, domain: &str) -> Result<T, RequestError>;

    /// Mark an IO error as a failure while reading the response.
    fn read_context(self) -> Result<T, RequestError>;
}

impl<T> IoResultExt<T> for Result<T, io::Error> {
    fn connection_context(self, host: &str, port: u16) -> Result<T, RequestError> {
        self.map_err(|e| {
            tracing::debug!(host = %host, port, error = %e, "connection failed");
            RequestError::request(errno_code(e.kind()), e)
        })
    }

    fn dns_context(self, domain: &str) -> Result<T, RequestError> {
        self.map_err(|e| {
            tracing::debug!(domain = %domain, error = %e, "DNS resolution failed");
            RequestError::request("ENOTFOUND", e)
        })
    }

    fn read_context(self) -> Result<T, RequestError> {
        self.map_err(|e| {
            let code = errno_code(e.kind());
            RequestError::read(e).with_code(code)
        })
    }
}

/// Map an IO error kind to the errno name reported as the error code.
pub fn errno_code(kind: io::ErrorKind) -> &'static str {
    match kind {
        io::ErrorKind::ConnectionRefused => "ECONNREFUSED",
        io::ErrorKind::ConnectionReset => "ECONNRESET",
        io::ErrorKind::ConnectionAborted => "ECONNABORTED",
        io::ErrorKind::NotConnected => "ENOTCONN",
        io::ErrorKind::AddrInUse => "EADDRINUSE",
        io::ErrorKind::AddrNotAvailable => "EADDRNOTAVAIL",
        io::ErrorKind::BrokenPipe => "EPIPE",
        io::ErrorKind::TimedOut => "ETIMEDOUT",
        io::ErrorKind::UnexpectedEof => "ECONNRESET",
        _ => "ERR_REQUEST",
    }
}
