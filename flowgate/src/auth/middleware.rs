use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, Uri},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use tracing::{debug, info, instrument, warn};

use crate::{
    AppState,
    auth::{
        current_user::{USER_ID_HEADER, USER_ROLE_HEADER, UserIdentity},
        paths::{PathClass, PathRules, canonical_path},
        session::{SessionCookie, SessionTokens, TokenPair, append_set_cookies, clear_cookies, issue_cookies},
    },
    errors::Error,
    metrics,
};

/// Why a request could not be tied to an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnauthenticatedReason {
    /// Neither cookie was sent
    NoCredentials,
    /// The access token failed with something other than expiry; refresh is not attempted
    AccessRejected,
    /// The access token is expired or missing and there is no refresh token
    MissingRefreshToken,
    /// The refresh exchange failed or returned an incomplete pair
    RefreshFailed,
    /// A new pair was issued but the identity lookup with it failed
    LookupAfterRefreshFailed,
}

/// Result of [`resolve_identity`].
#[derive(Debug)]
pub enum Resolution {
    /// `rotated` carries the new pair when the identity was resolved through a refresh exchange
    Resolved {
        identity: UserIdentity,
        rotated: Option<TokenPair>,
    },
    Unauthenticated(UnauthenticatedReason),
}

/// Result of [`authorize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Allow,
    Deny,
}

/// Terminal decision of the guard for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOutcome {
    Bypassed,
    Authorized,
    AuthorizedViaRefresh,
    Unauthenticated,
    RoleDenied,
    LoginBlocked,
    /// The identity could not be encoded into headers
    InvalidIdentity,
}

impl GuardOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardOutcome::Bypassed => "bypassed",
            GuardOutcome::Authorized => "authorized",
            GuardOutcome::AuthorizedViaRefresh => "authorized_via_refresh",
            GuardOutcome::Unauthenticated => "unauthenticated",
            GuardOutcome::RoleDenied => "role_denied",
            GuardOutcome::LoginBlocked => "login_blocked",
            GuardOutcome::InvalidIdentity => "invalid_identity",
        }
    }
}

/// Resolve the caller's identity from their session cookies.
///
/// The access token is tried first. Only an expiry signal (or a non-success envelope) leads to a
/// refresh exchange, which happens at most once; any other failure of the access token ends the
/// attempt.
pub async fn resolve_identity(state: &AppState, tokens: &SessionTokens) -> Resolution {
    if let Some(access) = &tokens.access {
        match state.auth_api.fetch_user_info(access).await {
            Ok(response) => match response.into_identity() {
                Some(identity) => {
                    return Resolution::Resolved { identity, rotated: None };
                }
                None => debug!("Identity lookup did not succeed, falling back to refresh"),
            },
            Err(e) if e.is_expired() => debug!("Access token expired, falling back to refresh"),
            Err(e) => {
                warn!("Access token validation failed: {}", e);
                return Resolution::Unauthenticated(UnauthenticatedReason::AccessRejected);
            }
        }
    }

    let Some(refresh) = &tokens.refresh else {
        let reason = if tokens.access.is_none() {
            UnauthenticatedReason::NoCredentials
        } else {
            UnauthenticatedReason::MissingRefreshToken
        };
        return Resolution::Unauthenticated(reason);
    };

    let pair = match state.refresher.exchange(refresh).await {
        Ok(pair) => pair,
        Err(e) => {
            info!("Refresh exchange failed: {}", e);
            return Resolution::Unauthenticated(UnauthenticatedReason::RefreshFailed);
        }
    };

    match state.auth_api.fetch_user_info(&pair.access).await {
        Ok(response) => match response.into_identity() {
            Some(identity) => Resolution::Resolved {
                identity,
                rotated: Some(pair),
            },
            None => Resolution::Unauthenticated(UnauthenticatedReason::LookupAfterRefreshFailed),
        },
        Err(e) => {
            warn!("Identity lookup with reissued token failed: {}", e);
            Resolution::Unauthenticated(UnauthenticatedReason::LookupAfterRefreshFailed)
        }
    }
}

/// Admin-restricted paths need the ADMIN role; everything else is open to any identity.
pub fn authorize(rules: &PathRules, identity: &UserIdentity, path: &str) -> Authorization {
    if rules.is_admin_restricted(path) && !identity.role.is_admin() {
        Authorization::Deny
    } else {
        Authorization::Allow
    }
}

/// 307 redirect carrying the given cookies.
pub fn redirect_with_cookies(location: &str, cookies: &[SessionCookie]) -> Response {
    let mut response = Redirect::temporary(location).into_response();
    append_set_cookies(response.headers_mut(), cookies);
    response
}

fn identity_headers(identity: &UserIdentity) -> Result<[(&'static str, HeaderValue); 2], Error> {
    let encode = |value: &str| {
        HeaderValue::from_str(value).map_err(|e| Error::Internal {
            operation: format!("encode identity header: {e}"),
        })
    };
    Ok([
        (USER_ID_HEADER, encode(&identity.id)?),
        (USER_ROLE_HEADER, encode(identity.role.as_str())?),
    ])
}

/// Identity headers are only trustworthy if the guard is the one that set them.
fn strip_identity_headers(headers: &mut HeaderMap) {
    headers.remove(USER_ID_HEADER);
    headers.remove(USER_ROLE_HEADER);
}

/// Point the request at `path`, keeping its query.
fn replace_path(request: &mut Request, path: &str) -> Result<(), Error> {
    let path_and_query = match request.uri().query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    };
    let mut parts = request.uri().clone().into_parts();
    parts.path_and_query = Some(path_and_query.parse().map_err(|e| Error::Internal {
        operation: format!("rewrite request path: {e}"),
    })?);
    *request.uri_mut() = Uri::from_parts(parts).map_err(|e| Error::Internal {
        operation: format!("rewrite request path: {e}"),
    })?;
    Ok(())
}

/// Implementation of [`session_guard_middleware`]. Returns the response to send and the decision
/// that produced it.
pub(crate) async fn session_guard(state: &AppState, mut request: Request, next: Next) -> Result<(Response, GuardOutcome), Error> {
    strip_identity_headers(request.headers_mut());

    // Decisions are made on the path the page server will route, and that is the path it receives
    let path = canonical_path(request.uri().path());
    if path != request.uri().path() {
        debug!(raw = request.uri().path(), canonical = %path, "Normalized request path");
        replace_path(&mut request, &path)?;
    }

    if state.paths.classify(&path) == PathClass::Bypass {
        return Ok((next.run(request).await, GuardOutcome::Bypassed));
    }

    let tokens = SessionTokens::from_headers(request.headers(), &state.config.cookies);
    let (identity, rotated) = match resolve_identity(state, &tokens).await {
        Resolution::Resolved { identity, rotated } => (identity, rotated),
        Resolution::Unauthenticated(reason) => {
            info!(?reason, "Unauthenticated request, redirecting to {}", state.paths.login_path());
            let response = redirect_with_cookies(state.paths.login_path(), &clear_cookies(&state.config.cookies));
            return Ok((response, GuardOutcome::Unauthenticated));
        }
    };

    // A rotated pair must reach the browser whatever happens next: the old refresh token may
    // already be spent.
    let rotated_cookies: Vec<SessionCookie> = rotated
        .as_ref()
        .map(|pair| issue_cookies(pair, &state.config.cookies).to_vec())
        .unwrap_or_default();

    if state.paths.is_login(&path) {
        info!("Authenticated user requested the login page, redirecting home");
        let response = redirect_with_cookies(state.paths.home_path(), &rotated_cookies);
        return Ok((response, GuardOutcome::LoginBlocked));
    }

    if authorize(&state.paths, &identity, &path) == Authorization::Deny {
        info!(user_id = %identity.id, role = %identity.role, "Insufficient role, redirecting home");
        let response = redirect_with_cookies(state.paths.home_path(), &rotated_cookies);
        return Ok((response, GuardOutcome::RoleDenied));
    }

    let headers = match identity_headers(&identity) {
        Ok(headers) => headers,
        Err(e) => {
            let mut response = e.into_response();
            append_set_cookies(response.headers_mut(), &rotated_cookies);
            return Ok((response, GuardOutcome::InvalidIdentity));
        }
    };
    for (name, value) in headers.iter().cloned() {
        request.headers_mut().insert(name, value);
    }
    request.extensions_mut().insert(identity);

    let mut response = next.run(request).await;
    for (name, value) in headers {
        response.headers_mut().insert(name, value);
    }
    append_set_cookies(response.headers_mut(), &rotated_cookies);

    let outcome = if rotated.is_some() {
        GuardOutcome::AuthorizedViaRefresh
    } else {
        GuardOutcome::Authorized
    };
    Ok((response, outcome))
}

/// Gate in front of every page render.
///
/// Bypass paths pass straight through. Everything else needs an identity, obtained from the access
/// cookie or, when that has expired, through a single refresh exchange whose new pair is written
/// back as cookies. Callers without an identity are sent to the login page with their cookies
/// cleared; callers lacking the ADMIN role on admin paths are sent home.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn session_guard_middleware(State(state): State<AppState>, request: Request, next: Next) -> Result<Response, Error> {
    let (response, outcome) = session_guard(&state, request, next).await?;
    debug!(outcome = outcome.as_str(), status = %response.status(), "Guard decision");
    metrics::record_guard_outcome(outcome);
    Ok(response)
}
