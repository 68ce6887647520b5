//! HTTP handlers that sit beside the guard.
//!
//! - **[`handlers::auth`]**: `/logout`, answered without passing through the guard
//! - **[`handlers::upstream`]**: relays guarded requests to the page server

pub mod handlers;
