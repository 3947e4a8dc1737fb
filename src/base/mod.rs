//! Base types and error handling.
//!
//! - [`RequestError`](neterror::RequestError): the error taxonomy of a logical call
//! - [`LoadState`](loadstate::LoadState): lifecycle states of the request engine

pub mod context;
pub mod loadstate;
pub mod neterror;
