//! Session authentication and authorization.
//!
//! Every page request passes through the session guard before it reaches the page server. The
//! guard works with two cookies issued at login by the backend:
//!
//! - **access**: short-lived (30 minutes), used to resolve the caller's identity
//! - **refresh**: long-lived (24 hours), used only to mint a new access/refresh pair
//!
//! # Request Flow
//!
//! 1. Static assets and public pages (see [`paths`]) bypass the guard entirely.
//! 2. The access token is resolved to an identity through the backend ([`client`]).
//! 3. If the access token has expired, the refresh token is exchanged once ([`refresh`]) and the
//!    new pair is written back as cookies ([`session`]).
//! 4. The identity is forwarded as `x-user-id` / `x-user-role` headers and as a request extension
//!    ([`current_user`]).
//! 5. Admin-restricted paths require the `ADMIN` role.
//!
//! Callers without an identity are redirected to the login page with both cookies cleared.
//! Callers lacking the role are redirected home.
//!
//! # Modules
//!
//! - [`client`]: identity lookup, token reissue and logout against the backend
//! - [`current_user`]: the resolved identity and its extractor
//! - [`middleware`]: the guard itself
//! - [`paths`]: bypass and admin-restricted path rules
//! - [`refresh`]: single-flight refresh exchanges
//! - [`session`]: cookie parsing and `Set-Cookie` construction

pub mod client;
pub mod current_user;
pub mod middleware;
pub mod paths;
pub mod refresh;
pub mod session;
