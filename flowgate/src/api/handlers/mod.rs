//! Route handlers.
//!
//! - [`auth`]: session termination
//! - [`upstream`]: forwarding to the page server

pub mod auth;
pub mod upstream;
