//! HTTP surface: `POST /search`, `POST /search/more`, `GET /health`.
//!
//! Every failure, including a malformed body or an invalid query, is answered
//! with `500 {"error": "search_failed", "details": ...}`.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use placescout_discovery::api::{ErrorBody, HealthResponse, SearchRequest, SearchResponse};
use placescout_discovery::{Discovery, DiscoveryError};

use crate::config::ServerConfig;

#[derive(Clone)]
struct AppState {
    discovery: Discovery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Search,
    LoadMore,
}

/// Build the router over a shared engine.
pub fn router(discovery: Discovery) -> Router {
    Router::new()
        .route("/search", post(search))
        .route("/search/more", post(search_more))
        .route("/health", get(health))
        .with_state(AppState { discovery })
}

/// Bind and serve until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn run(config: &ServerConfig, discovery: Discovery) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(providers = ?discovery.provider_ids(), "placescout listening on http://{local_addr}");
    axum::serve(listener, router(discovery))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

async fn search(
    State(state): State<AppState>,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> Response {
    handle(&state, body, Mode::Search).await
}

async fn search_more(
    State(state): State<AppState>,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> Response {
    handle(&state, body, Mode::LoadMore).await
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::from_snapshot(&state.discovery.health_snapshot()))
}

async fn handle(
    state: &AppState,
    body: Result<Json<SearchRequest>, JsonRejection>,
    mode: Mode,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "rejected request body");
            return failure(ErrorBody::search_failed(rejection.body_text()));
        }
    };

    let result = match request.into_query(state.discovery.config()) {
        Ok(query) => match mode {
            Mode::Search => state.discovery.search(query).await,
            Mode::LoadMore => state.discovery.load_more(query).await,
        },
        Err(e) => Err(e),
    };

    match result {
        Ok(outcome) => {
            tracing::debug!(
                venues = outcome.venues.len(),
                partial = outcome.partial,
                stale = outcome.stale,
                ?mode,
                "search answered"
            );
            (StatusCode::OK, Json(SearchResponse::from(outcome))).into_response()
        }
        Err(err) => {
            log_failure(&err);
            failure(ErrorBody::from(&err))
        }
    }
}

fn log_failure(err: &DiscoveryError) {
    match err {
        DiscoveryError::InvalidQuery(_) => tracing::debug!(error = %err, "invalid query"),
        _ => tracing::warn!(error = %err, "search failed"),
    }
}

fn failure(body: ErrorBody) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use placescout_discovery::{
        DiscoveryConfig, GeoPoint, ProviderAdapter, ProviderError, ProviderId, ProviderRequest,
        RawHit,
    };
    use tower::ServiceExt;

    struct Fixed {
        id: ProviderId,
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProviderAdapter for Fixed {
        fn id(&self) -> &ProviderId {
            &self.id
        }

        fn default_timeout(&self) -> Duration {
            Duration::from_secs(1)
        }

        fn trust(&self) -> f64 {
            0.6
        }

        async fn search(
            &self,
            request: &ProviderRequest,
            _timeout: Duration,
        ) -> Result<Vec<RawHit>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProviderError::Unavailable("HTTP 503".into()));
            }
            Ok(vec![
                RawHit::new(self.id.clone(), format!("{} place", request.category))
                    .with_location(GeoPoint::new(38.71, -9.14), 10.0),
            ])
        }
    }

    fn test_app(fail: bool) -> (Router, Arc<Fixed>) {
        let provider = Arc::new(Fixed {
            id: ProviderId::new("fixed"),
            fail,
            calls: AtomicUsize::new(0),
        });
        let discovery = Discovery::with_providers(
            DiscoveryConfig::default(),
            vec![Arc::clone(&provider) as Arc<dyn ProviderAdapter>],
        )
        .expect("engine");
        (router(discovery), provider)
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_owned()))
            .expect("request")
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json")
    }

    #[tokio::test]
    async fn search_returns_venues() {
        let (app, provider) = test_app(false);
        let response = app
            .oneshot(post_json("/search", r#"{"city": "Lisbon", "q": "coffee"}"#))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["partial"], false);
        assert!(body.get("stale").is_none());
        assert_eq!(body["venues"][0]["name"], "coffee place");
        assert_eq!(body["venues"][0]["source_providers"][0], "fixed");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn load_more_serves_complete_cache_entry() {
        let (app, provider) = test_app(false);
        let body = r#"{"city": "Lisbon", "q": "museum"}"#;
        let first = app
            .clone()
            .oneshot(post_json("/search", body))
            .await
            .expect("response");
        assert_eq!(first.status(), StatusCode::OK);

        let more = app
            .oneshot(post_json("/search/more", body))
            .await
            .expect("response");
        assert_eq!(more.status(), StatusCode::OK);
        assert_eq!(json_body(more).await["venues"][0]["name"], "museum place");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_query_is_search_failed() {
        let (app, provider) = test_app(false);
        let response = app
            .oneshot(post_json("/search", r#"{"city": "", "q": "coffee"}"#))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["error"], "search_failed");
        assert!(body["details"].as_str().expect("details").contains("invalid query"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn malformed_body_is_search_failed() {
        let (app, _) = test_app(false);
        let response = app
            .oneshot(post_json("/search", r#"{"city": "Lisbon""#))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(response).await["error"], "search_failed");
    }

    #[tokio::test]
    async fn provider_failure_is_search_failed_with_details() {
        let (app, _) = test_app(true);
        let response = app
            .oneshot(post_json("/search", r#"{"city": "Lisbon", "q": "coffee"}"#))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert!(body["details"].as_str().expect("details").contains("fixed"));
    }

    #[tokio::test]
    async fn health_lists_providers() {
        let (app, _) = test_app(false);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["providers"][0]["provider"], "fixed");
        assert_eq!(body["providers"][0]["state"], "closed");
    }
}
