//! # flowgate: session guard for the Flowssync web front
//!
//! `flowgate` sits in front of the page server and decides, for every page request, whether the
//! caller may see it. Sessions are carried by two HttpOnly cookies issued by the backend at login:
//! a short-lived **access** token and a long-lived **refresh** token.
//!
//! ## Request Flow
//!
//! 1. Any `x-user-*` header sent by the client is dropped.
//! 2. Static assets and public pages (`/_next/`, `/static/`, `/favicon.ico`, `/login`, ...) pass
//!    straight through.
//! 3. The access token is resolved to an identity through the backend's user-info endpoint.
//! 4. When it has expired, the refresh token is exchanged for a new pair, at most once per request
//!    and at most once per refresh token across concurrent requests. The new pair is written back
//!    as cookies on the response.
//! 5. Callers without an identity are redirected to `/login` with both cookies cleared.
//! 6. Admin pages need the `ADMIN` role; other callers are redirected to `/`.
//! 7. The request is forwarded to the page server with `x-user-id` and `x-user-role` set.
//!
//! ## Routes
//!
//! - `/healthz`: liveness probe
//! - `/logout` (GET and POST): ends the session and clears the cookies
//! - `/internal/metrics`: Prometheus metrics (when `enable_metrics` is set)
//! - everything else: guarded, then forwarded to the page server
//!
//! ## Modules
//!
//! - [`auth`]: the guard, cookie handling, and the backend client
//! - [`api`]: the logout handler and the page-server proxy
//! - [`config`]: YAML + environment configuration
//! - [`errors`]: error type and HTTP mapping
//! - [`metrics`]: guard counters
//! - [`telemetry`]: tracing and optional OTLP export

pub mod api;
pub mod auth;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod telemetry;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use axum::{Router, middleware::from_fn_with_state, routing::get};
use axum_prometheus::PrometheusMetricLayer;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, debug, info};

use crate::{
    api::handlers::{auth::logout, upstream::Upstream},
    auth::{client::AuthApi, client::HttpAuthApi, middleware::session_guard_middleware, paths::PathRules, refresh::RefreshCoalescer},
};

pub use config::Config;

/// Shared state for the guard and the logout handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub auth_api: Arc<dyn AuthApi>,
    pub refresher: RefreshCoalescer,
    pub paths: PathRules,
}

impl AppState {
    pub fn new(config: Config, auth_api: Arc<dyn AuthApi>) -> Self {
        let refresher = RefreshCoalescer::new(auth_api.clone(), &config.refresh);
        let paths = PathRules::new(&config.paths);
        Self {
            config,
            auth_api,
            refresher,
            paths,
        }
    }
}

/// Build the application router around `downstream`, which receives every guarded request.
///
/// `/healthz` and `/logout` are answered by the guard itself and never reach `downstream`.
pub fn build_router(state: &AppState, downstream: Router) -> anyhow::Result<Router> {
    let guarded = downstream.layer(from_fn_with_state(state.clone(), session_guard_middleware));

    let mut router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/logout", get(logout).post(logout))
        .with_state(state.clone())
        .fallback_service(guarded);

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// The guard, wired to the real backend and page server.
///
/// 1. **Create**: [`Application::new`] builds the HTTP clients and the router
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and handles requests until the
///    shutdown future resolves
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting session guard with configuration: {:#?}", config);

        let auth_api = Arc::new(HttpAuthApi::new(&config.auth_api, &config.cookies)?);
        let state = AppState::new(config.clone(), auth_api);

        let upstream = Arc::new(Upstream::new(&config.upstream)?);
        let downstream = Router::new()
            .fallback(api::handlers::upstream::forward)
            .with_state(upstream);

        let router = build_router(&state, downstream)?;
        Ok(Self { router, config })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Session guard listening on http://{}, forwarding to {}",
            bind_addr, self.config.upstream.url
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
