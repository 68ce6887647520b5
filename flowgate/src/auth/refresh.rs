//! Single-flight refresh exchanges.
//!
//! Two tabs holding the same expired access token both present the same refresh token. Without
//! coordination each would exchange it, and with a rotating token service the second exchange
//! fails and logs that tab out. Exchanges are therefore coalesced per refresh token: the first
//! caller performs the exchange, concurrent callers await its result, and a successful pair is
//! shared for a short window afterwards. Failures are never remembered.

use moka::future::Cache;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{
    auth::{
        client::{AuthApi, AuthApiError},
        session::TokenPair,
    },
    config::RefreshConfig,
    metrics,
};

#[derive(thiserror::Error, Debug)]
pub enum RefreshError {
    #[error(transparent)]
    Api(#[from] AuthApiError),

    #[error("reissue response did not contain both tokens")]
    Incomplete,
}

/// Coalesces refresh exchanges by refresh token.
#[derive(Clone)]
pub struct RefreshCoalescer {
    api: Arc<dyn AuthApi>,
    exchanges: Cache<String, TokenPair>,
}

impl RefreshCoalescer {
    pub fn new(api: Arc<dyn AuthApi>, config: &RefreshConfig) -> Self {
        let exchanges = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(config.coalesce_window)
            .build();
        Self { api, exchanges }
    }

    /// Exchange `refresh_token` for a new pair, joining an in-flight or just-finished exchange of
    /// the same token if there is one.
    pub async fn exchange(&self, refresh_token: &str) -> Result<TokenPair, Arc<RefreshError>> {
        let api = self.api.clone();
        let token = refresh_token.to_string();

        self.exchanges
            .try_get_with(refresh_token.to_string(), async move {
                debug!("Exchanging refresh token");
                let result = match api.reissue_tokens(&token).await {
                    Ok(response) => response.into_pair().ok_or(RefreshError::Incomplete),
                    Err(e) => Err(RefreshError::Api(e)),
                };

                match &result {
                    Ok(_) => metrics::record_refresh_exchange("success"),
                    Err(RefreshError::Api(e)) if e.is_expired() => metrics::record_refresh_exchange("expired"),
                    Err(e) => {
                        warn!("Refresh exchange failed: {}", e);
                        metrics::record_refresh_exchange("error");
                    }
                }
                result
            })
            .await
    }
}
