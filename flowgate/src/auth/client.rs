//! Client for the backend service that resolves identities and reissues tokens.

use async_trait::async_trait;
use axum::http::{StatusCode, header::COOKIE};
use reqwest::Client;
use serde::{Deserialize, de::DeserializeOwned};
use tracing::{debug, instrument};
use url::Url;

use crate::{
    auth::{current_user::UserIdentity, session::TokenPair},
    config::{AuthApiConfig, CookieConfig},
};

/// Envelope `result` value for a successful call
pub const RESULT_SUCCESS: &str = "SUCCESS";

/// Errors from the identity/token service, classified for the guard.
#[derive(thiserror::Error, Debug)]
pub enum AuthApiError {
    /// The token was expired or otherwise unauthorized (HTTP 401)
    #[error("token expired or unauthorized")]
    Expired,

    /// The service answered with a non-success status other than 401
    #[error("auth API responded with {status}: {body}")]
    Rejected { status: StatusCode, body: String },

    /// The request never completed (connection, timeout, ...)
    #[error("auth API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The service answered with a body we could not decode
    #[error("could not decode auth API response: {0}")]
    Decode(String),
}

impl AuthApiError {
    pub fn is_expired(&self) -> bool {
        matches!(self, AuthApiError::Expired)
    }
}

/// Response of the identity lookup.
#[derive(Debug, Clone, Deserialize)]
pub struct UserInfoResponse {
    pub result: String,
    pub data: Option<UserIdentity>,
}

impl UserInfoResponse {
    /// The identity, when the envelope reports success and carries one.
    pub fn into_identity(self) -> Option<UserIdentity> {
        if self.result == RESULT_SUCCESS { self.data } else { None }
    }
}

/// Tokens inside a reissue response. Either may be missing on a partial failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReissueData {
    pub access: Option<String>,
    pub refresh: Option<String>,
}

/// Response of the refresh exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct ReissueResponse {
    pub data: Option<ReissueData>,
}

impl ReissueResponse {
    /// The new pair, only when both tokens are present and non-empty.
    pub fn into_pair(self) -> Option<TokenPair> {
        let data = self.data?;
        match (data.access, data.refresh) {
            (Some(access), Some(refresh)) if !access.is_empty() && !refresh.is_empty() => Some(TokenPair { access, refresh }),
            _ => None,
        }
    }
}

/// The collaborator the guard consults. Implemented over HTTP by [`HttpAuthApi`]; tests provide
/// in-memory implementations.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Resolve the identity behind an access token.
    async fn fetch_user_info(&self, access_token: &str) -> Result<UserInfoResponse, AuthApiError>;

    /// Exchange a refresh token for a new access/refresh pair.
    async fn reissue_tokens(&self, refresh_token: &str) -> Result<ReissueResponse, AuthApiError>;

    /// Tell the backend the session is over.
    async fn logout(&self, access_token: &str) -> Result<(), AuthApiError>;
}

/// [`AuthApi`] over HTTP. Tokens are presented as cookies, the way the browser presents them.
pub struct HttpAuthApi {
    client: Client,
    user_info_url: Url,
    reissue_url: Url,
    logout_url: Url,
    access_cookie: String,
    refresh_cookie: String,
}

impl HttpAuthApi {
    pub fn new(config: &AuthApiConfig, cookies: &CookieConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            user_info_url: config.base_url.join(&config.user_info_path)?,
            reissue_url: config.base_url.join(&config.reissue_path)?,
            logout_url: config.base_url.join(&config.logout_path)?,
            access_cookie: cookies.access_name.clone(),
            refresh_cookie: cookies.refresh_name.clone(),
        })
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T, AuthApiError> {
        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            return Err(AuthApiError::Expired);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthApiError::Rejected { status, body });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| AuthApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    #[instrument(skip_all, err)]
    async fn fetch_user_info(&self, access_token: &str) -> Result<UserInfoResponse, AuthApiError> {
        debug!("Looking up identity at {}", self.user_info_url);
        let request = self
            .client
            .get(self.user_info_url.clone())
            .header(COOKIE, format!("{}={}", self.access_cookie, access_token));
        self.send(request).await
    }

    #[instrument(skip_all, err)]
    async fn reissue_tokens(&self, refresh_token: &str) -> Result<ReissueResponse, AuthApiError> {
        debug!("Reissuing tokens at {}", self.reissue_url);
        let request = self
            .client
            .post(self.reissue_url.clone())
            .header(COOKIE, format!("{}={}", self.refresh_cookie, refresh_token));
        self.send(request).await
    }

    #[instrument(skip_all, err)]
    async fn logout(&self, access_token: &str) -> Result<(), AuthApiError> {
        let response = self
            .client
            .post(self.logout_url.clone())
            .header(COOKIE, format!("{}={}", self.access_cookie, access_token))
            .send()
            .await?;

        match response.status() {
            // Already expired on the backend: nothing left to end
            status if status.is_success() || status == StatusCode::UNAUTHORIZED => Ok(()),
            status => Err(AuthApiError::Rejected {
                status,
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::current_user::Role;
    use crate::test_utils::install_crypto_provider;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> HttpAuthApi {
        install_crypto_provider();
        let config = AuthApiConfig {
            base_url: server.uri().parse().unwrap(),
            timeout: Duration::from_secs(2),
            ..Default::default()
        };
        HttpAuthApi::new(&config, &CookieConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_user_info_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/user-info"))
            .and(header("cookie", "access=valid-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": "SUCCESS",
                "data": { "id": "7", "role": "ADMIN", "name": "Kim" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = client_for(&server);
        let identity = api.fetch_user_info("valid-token").await.unwrap().into_identity().unwrap();

        assert_eq!(identity.id, "7");
        assert_eq!(identity.role, Role::Admin);
    }

    #[tokio::test]
    async fn test_fetch_user_info_unauthorized_is_expired() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/user-info"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = client_for(&server).fetch_user_info("expired-token").await.unwrap_err();
        assert!(err.is_expired());
    }

    #[tokio::test]
    async fn test_fetch_user_info_server_error_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/user-info"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = client_for(&server).fetch_user_info("token").await.unwrap_err();
        match err {
            AuthApiError::Rejected { status, body } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body, "boom");
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_user_info_bad_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/user-info"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client_for(&server).fetch_user_info("token").await.unwrap_err();
        assert!(matches!(err, AuthApiError::Decode(_)));
    }

    #[tokio::test]
    async fn test_non_success_envelope_has_no_identity() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/user-info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": "FAIL", "data": null })))
            .mount(&server)
            .await;

        let response = client_for(&server).fetch_user_info("token").await.unwrap();
        assert!(response.into_identity().is_none());
    }

    #[tokio::test]
    async fn test_reissue_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/reissue"))
            .and(header("cookie", "refresh=valid-refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "access": "new-access", "refresh": "new-refresh" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let pair = client_for(&server).reissue_tokens("valid-refresh").await.unwrap().into_pair().unwrap();
        assert_eq!(pair.access, "new-access");
        assert_eq!(pair.refresh, "new-refresh");
    }

    #[tokio::test]
    async fn test_reissue_partial_response_has_no_pair() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/reissue"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "access": "only-access" } })))
            .mount(&server)
            .await;

        let response = client_for(&server).reissue_tokens("valid-refresh").await.unwrap();
        assert!(response.into_pair().is_none());
    }

    #[tokio::test]
    async fn test_logout_tolerates_expired_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/logout"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        assert!(client_for(&server).logout("expired-token").await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transport_error() {
        install_crypto_provider();
        let config = AuthApiConfig {
            // Port 9 (discard) is not listening in test environments
            base_url: "http://127.0.0.1:9".parse().unwrap(),
            timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let api = HttpAuthApi::new(&config, &CookieConfig::default()).unwrap();

        let err = api.fetch_user_info("token").await.unwrap_err();
        assert!(matches!(err, AuthApiError::Transport(_)));
    }
}
