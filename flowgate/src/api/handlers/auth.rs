use axum::{extract::State, http::HeaderMap, response::Response};
use tracing::warn;

use crate::{
    AppState,
    auth::{
        middleware::redirect_with_cookies,
        session::{clear_cookies, read_cookie},
    },
};

/// End the session: notify the backend (best effort), clear both cookies, go to the login page.
#[tracing::instrument(skip_all)]
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(access) = read_cookie(&headers, &state.config.cookies.access_name)
        && let Err(e) = state.auth_api.logout(&access).await
    {
        warn!("Backend logout failed, clearing cookies anyway: {}", e);
    }

    redirect_with_cookies(state.paths.login_path(), &clear_cookies(&state.config.cookies))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockAuthApi, create_test_state};
    use axum::http::{StatusCode, header::SET_COOKIE};
    use axum_test::TestServer;
    use std::sync::Arc;

    fn server(api: Arc<MockAuthApi>) -> TestServer {
        let state = create_test_state(api);
        let app = axum::Router::new()
            .route("/logout", axum::routing::get(logout).post(logout))
            .with_state(state);
        TestServer::new(app).unwrap()
    }

    #[tokio::test]
    async fn test_logout_clears_cookies_and_notifies_backend() {
        let api = Arc::new(MockAuthApi::new().with_user("valid-token", "1", "MEMBER"));
        let server = server(api.clone());

        let response = server.post("/logout").add_header("cookie", "access=valid-token; refresh=r").await;

        assert_eq!(response.status_code(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.header("location"), "/login");
        let cookies: Vec<_> = response.iter_headers_by_name(SET_COOKIE).map(|v| v.to_str().unwrap().to_string()).collect();
        assert_eq!(cookies.len(), 2);
        assert!(cookies.iter().all(|c| c.contains("Max-Age=0")));

        assert_eq!(api.logout_calls(), 1);
        assert_eq!(api.user_info_calls(), 0);
        assert_eq!(api.reissue_calls(), 0);
    }

    #[tokio::test]
    async fn test_logout_without_session() {
        let api = Arc::new(MockAuthApi::new());
        let server = server(api.clone());

        let response = server.get("/logout").await;

        assert_eq!(response.status_code(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.iter_headers_by_name(SET_COOKIE).count(), 2);
        assert_eq!(api.logout_calls(), 0);
    }

    #[tokio::test]
    async fn test_logout_survives_backend_failure() {
        let api = Arc::new(MockAuthApi::new().with_failing_logout());
        let server = server(api.clone());

        let response = server.post("/logout").add_header("cookie", "access=whatever").await;

        assert_eq!(response.status_code(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.iter_headers_by_name(SET_COOKIE).count(), 2);
        assert_eq!(api.logout_calls(), 1);
    }
}
