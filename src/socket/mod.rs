//! Socket and connection handling for the default transport:
//! - [`connectjob`]: DNS → TCP → TLS connection flow and [`HttpConnector`]
//! - [`stream`]: plain or TLS socket

pub mod connectjob;
pub mod stream;

pub use connectjob::HttpConnector;
