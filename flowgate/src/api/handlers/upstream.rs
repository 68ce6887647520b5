//! Forwarding of gated requests to the page server.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, header},
    response::Response,
};
use reqwest::Client;
use std::sync::Arc;
use tracing::{debug, instrument};
use url::Url;

use crate::{config::UpstreamConfig, errors::Error};

/// Connection-scoped headers that must not be relayed by a proxy (RFC 9110 §7.6.1).
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// The page server behind the guard.
pub struct Upstream {
    client: Client,
    base_url: Url,
    max_body_bytes: usize,
}

impl Upstream {
    pub fn new(config: &UpstreamConfig) -> anyhow::Result<Self> {
        // Bounds connecting and each read; a streamed response has no overall deadline
        let client = Client::builder()
            .connect_timeout(config.timeout)
            .read_timeout(config.timeout)
            // Redirects are the page server's answer to the browser, not ours to follow
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.clone(),
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// Upstream URL for an incoming path and query, keeping any path prefix of the base URL.
    fn target(&self, path: &str, query: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        let prefix = self.base_url.path().trim_end_matches('/');
        url.set_path(&format!("{prefix}{path}"));
        url.set_query(query);
        url
    }
}

fn copy_headers(from: &HeaderMap, to: &mut HeaderMap) {
    for (name, value) in from {
        if HOP_BY_HOP.contains(&name.as_str()) || *name == header::HOST || *name == header::CONTENT_LENGTH {
            continue;
        }
        to.append(name.clone(), value.clone());
    }
}

/// Relay the request to the page server and its response back to the caller.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn forward(State(upstream): State<Arc<Upstream>>, request: Request) -> Result<Response, Error> {
    let (parts, body) = request.into_parts();
    let target = upstream.target(parts.uri.path(), parts.uri.query());

    let body = axum::body::to_bytes(body, upstream.max_body_bytes)
        .await
        .map_err(|_| Error::PayloadTooLarge {
            limit: upstream.max_body_bytes,
        })?;

    let mut headers = HeaderMap::new();
    copy_headers(&parts.headers, &mut headers);
    if let Some(host) = parts.headers.get(header::HOST) {
        headers.insert(HeaderName::from_static("x-forwarded-host"), host.clone());
    }

    debug!("Forwarding to {}", target);
    let upstream_response = upstream
        .client
        .request(parts.method, target.clone())
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|e| Error::BadGateway {
            target: target.to_string(),
            reason: e.to_string(),
        })?;

    let status = upstream_response.status();
    let mut response_headers = HeaderMap::new();
    copy_headers(upstream_response.headers(), &mut response_headers);

    let mut response = Response::new(Body::from_stream(upstream_response.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::install_crypto_provider;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use wiremock::matchers::{body_string, header as header_eq, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn server_for(url: &str) -> TestServer {
        install_crypto_provider();
        let config = UpstreamConfig {
            url: url.parse().unwrap(),
            max_body_bytes: 16,
            ..Default::default()
        };
        let upstream = Arc::new(Upstream::new(&config).unwrap());
        let app = axum::Router::new().fallback(forward).with_state(upstream);
        TestServer::new(app).unwrap()
    }

    #[test]
    fn test_target_keeps_base_prefix() {
        install_crypto_provider();
        let upstream = Upstream::new(&UpstreamConfig {
            url: "http://pages:3000/app/".parse().unwrap(),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(
            upstream.target("/projects/1", Some("tab=tasks")).as_str(),
            "http://pages:3000/app/projects/1?tab=tasks"
        );
        assert_eq!(upstream.target("/", None).as_str(), "http://pages:3000/app/");
    }

    #[tokio::test]
    async fn test_forward_relays_request_and_response() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/projects/1"))
            .and(query_param("tab", "tasks"))
            .and(header_eq("x-user-role", "MEMBER"))
            .and(body_string("hello"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("x-page", "project")
                    .set_body_string("rendered"),
            )
            .expect(1)
            .mount(&mock)
            .await;

        let server = server_for(&mock.uri());
        let response = server
            .post("/projects/1?tab=tasks")
            .add_header("x-user-role", "MEMBER")
            .text("hello")
            .await;

        assert_eq!(response.status_code(), StatusCode::CREATED);
        assert_eq!(response.header("x-page"), "project");
        assert_eq!(response.text(), "rendered");
    }

    #[tokio::test]
    async fn test_forward_does_not_follow_redirects() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(308).insert_header("location", "/new"))
            .mount(&mock)
            .await;

        let server = server_for(&mock.uri());
        let response = server.get("/old").await;

        assert_eq!(response.status_code(), StatusCode::PERMANENT_REDIRECT);
        assert_eq!(response.header("location"), "/new");
    }

    #[tokio::test]
    async fn test_forward_streams_responses_beyond_request_limit() {
        let mock = MockServer::start().await;
        let page = "<p>row</p>".repeat(1000);
        Mock::given(method("GET"))
            .and(path("/reports"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page.clone()))
            .mount(&mock)
            .await;

        // The request body limit is 16 bytes; responses are not bound by it
        let server = server_for(&mock.uri());
        let response = server.get("/reports").await;

        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.text(), page);
    }

    #[tokio::test]
    async fn test_forward_rejects_oversized_body() {
        let mock = MockServer::start().await;
        let server = server_for(&mock.uri());

        let response = server.post("/upload").text("x".repeat(64)).await;

        assert_eq!(response.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_bad_gateway() {
        let server = server_for("http://127.0.0.1:9");

        let response = server.get("/").await;

        assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.text(), "Upstream unavailable");
    }
}
