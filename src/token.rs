//! Bearer token for the payment gateway.
//!
//! The token and its expiry live behind one async mutex, which is also held
//! for the whole refresh call. That gives two guarantees: readers never see a
//! token paired with another token's expiry, and only one refresh is ever in
//! flight. Callers that queued behind a refresh take its outcome instead of
//! starting another one.

use crate::epoch_millis;
use crate::error::GatewayError;
use log::{error, info, warn};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Mutex;
use url::Url;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenState {
    pub token: Option<String>,
    pub expires_at_epoch_millis: i64,
}

impl TokenState {
    pub fn is_valid_at(&self, now_millis: i64) -> bool {
        self.token.is_some() && now_millis < self.expires_at_epoch_millis
    }
}

pub struct TokenCache {
    client: reqwest::Client,
    token_url: Url,
    state: Mutex<TokenState>,
    // Bumped under the state lock by every refresh attempt and invalidation.
    changes: AtomicU64,
    // Value of `changes` left by the latest refresh attempt.
    last_refresh: AtomicU64,
    // Mirrors `state.token.is_some()` for readers that must not wait on a refresh.
    cached: AtomicBool,
}

impl TokenCache {
    pub fn new(client: reqwest::Client, token_url: Url) -> Self {
        TokenCache {
            client,
            token_url,
            state: Mutex::new(TokenState::default()),
            changes: AtomicU64::new(0),
            last_refresh: AtomicU64::new(0),
            cached: AtomicBool::new(false),
        }
    }

    /// Whether a token is cached. Never waits on an in-flight refresh.
    pub fn has_token(&self) -> bool {
        self.cached.load(Ordering::Acquire)
    }

    #[cfg(test)]
    async fn snapshot(&self) -> TokenState {
        self.state.lock().await.clone()
    }

    /// Returns a token that was valid when cached, refreshing first if there
    /// is none or it has expired.
    pub async fn get_valid_token(&self) -> Result<String, GatewayError> {
        let seen = self.changes.load(Ordering::Acquire);
        let mut state = self.state.lock().await;
        // Only a refresh that was the last change while we queued counts as ours.
        let current = self.changes.load(Ordering::Acquire);
        let refreshed_while_waiting =
            current != seen && self.last_refresh.load(Ordering::Acquire) == current;
        if !refreshed_while_waiting && !state.is_valid_at(epoch_millis()) {
            if let Err(e) = self.refresh_locked(&mut state).await {
                warn!("Payment token unavailable: {}", e);
            }
        }
        state
            .token
            .clone()
            .ok_or(GatewayError::AuthenticationUnavailable)
    }

    /// Fetches a new token unconditionally.
    pub async fn refresh(&self) -> Result<(), GatewayError> {
        let mut state = self.state.lock().await;
        self.refresh_locked(&mut state).await
    }

    /// Called once at startup so the first payment does not wait on the
    /// token endpoint. Failure is only logged.
    pub async fn warm_up(&self) {
        match self.refresh().await {
            Ok(()) => info!("Payment token warmed up"),
            Err(e) => error!("Payment token warm-up failed: {}", e),
        }
    }

    /// Drops the cached token, e.g. after the gateway refused it.
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        *state = TokenState::default();
        self.cached.store(false, Ordering::Release);
        self.changes.fetch_add(1, Ordering::AcqRel);
    }

    async fn refresh_locked(&self, state: &mut TokenState) -> Result<(), GatewayError> {
        info!("Refreshing payment token");
        let outcome = self.fetch_token().await;
        *state = match &outcome {
            Ok((token, ttl_secs)) => TokenState {
                token: Some(token.clone()),
                expires_at_epoch_millis: epoch_millis()
                    .saturating_add(ttl_secs.saturating_mul(1000)),
            },
            Err(_) => TokenState::default(),
        };
        self.cached.store(state.token.is_some(), Ordering::Release);
        let change = self.changes.fetch_add(1, Ordering::AcqRel) + 1;
        self.last_refresh.store(change, Ordering::Release);
        match outcome {
            Ok((_, ttl_secs)) => {
                info!("Payment token refreshed, valid for {}s", ttl_secs);
                Ok(())
            }
            Err(e) => {
                error!("Failed to fetch payment token: {}", e);
                Err(e)
            }
        }
    }

    async fn fetch_token(&self) -> Result<(String, i64), GatewayError> {
        let body = self
            .client
            .get(self.token_url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_token_response(&body)
    }
}

/// Expects `{"accessToken": "...", "token_expired_at": <ttl seconds>}`.
fn parse_token_response(body: &str) -> Result<(String, i64), GatewayError> {
    let malformed = |what: &str| {
        GatewayError::MalformedUpstreamResponse(format!("token response {}", what))
    };
    let json: Value = serde_json::from_str(body).map_err(|_| malformed("is not JSON"))?;
    let token = json["accessToken"]
        .as_str()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| malformed("has no accessToken"))?;
    let ttl_secs = match &json["token_expired_at"] {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| malformed("has no token_expired_at"))?;
    if ttl_secs <= 0 {
        return Err(malformed("has an expiry that is not in the future"));
    }
    Ok((token.to_string(), ttl_secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use httpmock::prelude::*;
    use std::time::Duration;

    fn cache_for(server: &MockServer) -> TokenCache {
        let url = Url::parse(&server.url("/lpr/token")).unwrap();
        TokenCache::new(reqwest::Client::new(), url)
    }

    #[test]
    fn parses_numeric_and_string_ttl() {
        assert_eq!(
            parse_token_response(r#"{"accessToken":"abc","token_expired_at":3600}"#).unwrap(),
            ("abc".to_string(), 3600)
        );
        assert_eq!(
            parse_token_response(r#"{"accessToken":"abc","token_expired_at":"60"}"#).unwrap(),
            ("abc".to_string(), 60)
        );
        assert!(parse_token_response(r#"{"token_expired_at":60}"#).is_err());
        assert!(parse_token_response(r#"{"accessToken":"abc"}"#).is_err());
        assert!(parse_token_response(r#"{"accessToken":"abc","token_expired_at":0}"#).is_err());
        assert!(parse_token_response(r#"{"accessToken":"abc","token_expired_at":"-5"}"#).is_err());
        assert!(parse_token_response("<html/>").is_err());
    }

    #[tokio::test]
    async fn refresh_stores_token_and_expiry() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/lpr/token")
                    .header("accept", "application/json");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"accessToken":"tok-1","token_expired_at":3600}"#);
            })
            .await;

        let cache = cache_for(&server);
        let before = epoch_millis();
        cache.refresh().await.unwrap();
        let state = cache.snapshot().await;
        assert_eq!(state.token.as_deref(), Some("tok-1"));
        assert!(state.expires_at_epoch_millis >= before + 3_600_000);
        assert!(state.expires_at_epoch_millis <= epoch_millis() + 3_600_000);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn valid_token_is_served_without_refresh() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/lpr/token");
                then.status(200)
                    .body(r#"{"accessToken":"fresh","token_expired_at":3600}"#);
            })
            .await;

        let cache = cache_for(&server);
        *cache.state.lock().await = TokenState {
            token: Some("cached".to_string()),
            expires_at_epoch_millis: epoch_millis() + 60_000,
        };
        assert_eq!(cache.get_valid_token().await.unwrap(), "cached");
        assert_eq!(mock.hits_async().await, 0);
    }

    #[tokio::test]
    async fn expired_token_triggers_exactly_one_refresh() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/lpr/token");
                then.status(200)
                    .body(r#"{"accessToken":"fresh","token_expired_at":3600}"#);
            })
            .await;

        let cache = cache_for(&server);
        *cache.state.lock().await = TokenState {
            token: Some("stale".to_string()),
            expires_at_epoch_millis: epoch_millis() - 1,
        };
        assert_eq!(cache.get_valid_token().await.unwrap(), "fresh");
        assert_eq!(mock.hits_async().await, 1);
    }

    #[tokio::test]
    async fn empty_cache_refreshes_lazily() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/lpr/token");
                then.status(200)
                    .body(r#"{"accessToken":"lazy","token_expired_at":3600}"#);
            })
            .await;

        let cache = cache_for(&server);
        assert_eq!(cache.get_valid_token().await.unwrap(), "lazy");
        assert_eq!(cache.get_valid_token().await.unwrap(), "lazy");
        assert_eq!(mock.hits_async().await, 1);
    }

    #[tokio::test]
    async fn failed_refresh_clears_token() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/lpr/token");
                then.status(503).body("maintenance");
            })
            .await;

        let cache = cache_for(&server);
        *cache.state.lock().await = TokenState {
            token: Some("stale".to_string()),
            expires_at_epoch_millis: 0,
        };
        assert!(matches!(
            cache.refresh().await,
            Err(GatewayError::UpstreamUnreachable(_))
        ));
        assert_eq!(cache.snapshot().await.token, None);
        assert_eq!(
            cache.get_valid_token().await,
            Err(GatewayError::AuthenticationUnavailable)
        );
        assert_eq!(mock.hits_async().await, 2);
    }

    #[tokio::test]
    async fn unparseable_token_response_clears_token() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/lpr/token");
                then.status(200).body(r#"{"unexpected":true}"#);
            })
            .await;

        let cache = cache_for(&server);
        assert!(matches!(
            cache.refresh().await,
            Err(GatewayError::MalformedUpstreamResponse(_))
        ));
        assert_eq!(cache.snapshot().await, TokenState::default());
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/lpr/token");
                then.status(200)
                    .delay(Duration::from_millis(200))
                    .body(r#"{"accessToken":"shared","token_expired_at":3600}"#);
            })
            .await;

        let cache = cache_for(&server);
        let results = join_all((0..8).map(|_| cache.get_valid_token())).await;
        for result in results {
            assert_eq!(result.unwrap(), "shared");
        }
        assert_eq!(mock.hits_async().await, 1);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_failed_refresh() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/lpr/token");
                then.status(500).delay(Duration::from_millis(200));
            })
            .await;

        let cache = cache_for(&server);
        let results = join_all((0..4).map(|_| cache.get_valid_token())).await;
        for result in results {
            assert_eq!(result, Err(GatewayError::AuthenticationUnavailable));
        }
        assert_eq!(mock.hits_async().await, 1);
    }

    #[tokio::test]
    async fn warm_up_failure_is_not_fatal() {
        let cache = TokenCache::new(
            reqwest::Client::new(),
            Url::parse("http://127.0.0.1:1/token").unwrap(),
        );
        cache.warm_up().await;
        assert_eq!(cache.snapshot().await.token, None);
    }

    #[tokio::test]
    async fn invalidate_forces_next_refresh() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/lpr/token");
                then.status(200)
                    .body(r#"{"accessToken":"again","token_expired_at":3600}"#);
            })
            .await;

        let cache = cache_for(&server);
        cache.warm_up().await;
        cache.invalidate().await;
        assert_eq!(cache.snapshot().await.token, None);
        assert_eq!(cache.get_valid_token().await.unwrap(), "again");
        assert_eq!(mock.hits_async().await, 2);
    }

    #[tokio::test]
    async fn zero_ttl_is_not_cached() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/lpr/token");
                then.status(200)
                    .body(r#"{"accessToken":"dead","token_expired_at":0}"#);
            })
            .await;

        let cache = cache_for(&server);
        assert!(matches!(
            cache.refresh().await,
            Err(GatewayError::MalformedUpstreamResponse(_))
        ));
        assert!(!cache.has_token());
        assert_eq!(cache.snapshot().await, TokenState::default());
    }

    #[tokio::test]
    async fn caller_queued_behind_invalidation_refreshes_again() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/lpr/token");
                then.status(200)
                    .delay(Duration::from_millis(300))
                    .body(r#"{"accessToken":"tok","token_expired_at":3600}"#);
            })
            .await;

        let cache = cache_for(&server);
        let (first, (), second) = tokio::join!(
            cache.get_valid_token(),
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                cache.invalidate().await;
            },
            async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                cache.get_valid_token().await
            },
        );
        assert_eq!(first.unwrap(), "tok");
        assert_eq!(second.unwrap(), "tok");
        assert_eq!(mock.hits_async().await, 2);
    }

    #[tokio::test]
    async fn has_token_does_not_wait_on_refresh() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/lpr/token");
                then.status(200)
                    .delay(Duration::from_millis(300))
                    .body(r#"{"accessToken":"slow","token_expired_at":3600}"#);
            })
            .await;

        let cache = cache_for(&server);
        let (refreshed, during) = tokio::join!(cache.refresh(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cache.has_token()
        });
        refreshed.unwrap();
        assert!(!during);
        assert!(cache.has_token());
        cache.invalidate().await;
        assert!(!cache.has_token());
    }
}
