//! Test utilities for integration testing (available with `test-utils` feature).

use async_trait::async_trait;
use axum::{Json, Router, extract::Request, http::StatusCode};
use axum_test::TestServer;
use serde_json::{Value, json};
use std::{
    collections::HashMap,
    sync::{
        Arc, Once,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use crate::{
    AppState,
    auth::{
        client::{AuthApi, AuthApiError, RESULT_SUCCESS, ReissueData, ReissueResponse, UserInfoResponse},
        current_user::{Role, USER_ID_HEADER, USER_ROLE_HEADER, UserIdentity},
    },
    config::Config,
};

static CRYPTO_PROVIDER: Once = Once::new();

/// reqwest is built without a default rustls provider; install one before building clients.
pub fn install_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

pub fn create_test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        enable_metrics: false,
        ..Default::default()
    }
}

pub fn create_test_state(api: Arc<MockAuthApi>) -> AppState {
    AppState::new(create_test_config(), api)
}

/// Guarded test server whose downstream echoes the identity headers it received as JSON.
pub fn create_test_server(api: Arc<MockAuthApi>) -> TestServer {
    let state = create_test_state(api);
    let router = crate::build_router(&state, echo_router()).expect("Failed to build router");
    TestServer::new(router).expect("Failed to create test server")
}

/// Downstream stand-in for the page server.
pub fn echo_router() -> Router {
    Router::new().fallback(echo_identity)
}

async fn echo_identity(request: Request) -> (StatusCode, Json<Value>) {
    let header = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    (
        StatusCode::OK,
        Json(json!({
            "path": request.uri().path(),
            "user_id": header(USER_ID_HEADER),
            "user_role": header(USER_ROLE_HEADER),
        })),
    )
}

#[derive(Debug, Clone)]
enum UserLookup {
    Found(UserIdentity),
    Rejected,
    FailedEnvelope,
}

/// In-memory [`AuthApi`]. Tokens it has not been told about behave as expired.
#[derive(Debug, Default)]
pub struct MockAuthApi {
    users: HashMap<String, UserLookup>,
    refreshes: HashMap<String, ReissueData>,
    latency: Option<Duration>,
    failing_logout: bool,
    user_info_calls: AtomicUsize,
    reissue_calls: AtomicUsize,
    logout_calls: AtomicUsize,
}

impl MockAuthApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, access: &str, id: &str, role: &str) -> Self {
        let identity = UserIdentity {
            id: id.to_string(),
            role: Role::from(role.to_string()),
        };
        self.users.insert(access.to_string(), UserLookup::Found(identity));
        self
    }

    /// The access token fails with a non-expiry error (HTTP 500).
    pub fn with_rejected(mut self, access: &str) -> Self {
        self.users.insert(access.to_string(), UserLookup::Rejected);
        self
    }

    /// The lookup succeeds at the HTTP level but the envelope is not `SUCCESS`.
    pub fn with_failed_envelope(mut self, access: &str) -> Self {
        self.users.insert(access.to_string(), UserLookup::FailedEnvelope);
        self
    }

    pub fn with_refresh(mut self, refresh: &str, new_access: &str, new_refresh: &str) -> Self {
        self.refreshes.insert(
            refresh.to_string(),
            ReissueData {
                access: Some(new_access.to_string()),
                refresh: Some(new_refresh.to_string()),
            },
        );
        self
    }

    /// The exchange answers with an access token only.
    pub fn with_incomplete_refresh(mut self, refresh: &str) -> Self {
        self.refreshes.insert(
            refresh.to_string(),
            ReissueData {
                access: Some("partial-access".to_string()),
                refresh: None,
            },
        );
        self
    }

    /// Delay every reissue call, to widen the window for concurrent requests.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_failing_logout(mut self) -> Self {
        self.failing_logout = true;
        self
    }

    pub fn user_info_calls(&self) -> usize {
        self.user_info_calls.load(Ordering::SeqCst)
    }

    pub fn reissue_calls(&self) -> usize {
        self.reissue_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthApi for MockAuthApi {
    async fn fetch_user_info(&self, access_token: &str) -> Result<UserInfoResponse, AuthApiError> {
        self.user_info_calls.fetch_add(1, Ordering::SeqCst);
        match self.users.get(access_token) {
            Some(UserLookup::Found(identity)) => Ok(UserInfoResponse {
                result: RESULT_SUCCESS.to_string(),
                data: Some(identity.clone()),
            }),
            Some(UserLookup::FailedEnvelope) => Ok(UserInfoResponse {
                result: "FAIL".to_string(),
                data: None,
            }),
            Some(UserLookup::Rejected) => Err(AuthApiError::Rejected {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: "internal error".to_string(),
            }),
            None => Err(AuthApiError::Expired),
        }
    }

    async fn reissue_tokens(&self, refresh_token: &str) -> Result<ReissueResponse, AuthApiError> {
        self.reissue_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match self.refreshes.get(refresh_token) {
            Some(data) => Ok(ReissueResponse { data: Some(data.clone()) }),
            None => Err(AuthApiError::Expired),
        }
    }

    async fn logout(&self, _access_token: &str) -> Result<(), AuthApiError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_logout {
            return Err(AuthApiError::Rejected {
                status: StatusCode::BAD_GATEWAY,
                body: "logout unavailable".to_string(),
            });
        }
        Ok(())
    }
}
