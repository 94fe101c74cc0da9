//! HTTP API route definitions.

use axum::{routing::get, Router};

use super::handlers::{health, ready, status, AppState};

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        // Status endpoint
        .route("/api/v1/status", get(status))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::{Aggregator, AggregatorConfig, MockAdapter, ProviderAdapter, RetryPolicy};
    use crate::{catalog::ProviderId, pricing::PricingFilter};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn state() -> AppState {
        let adapter: Arc<dyn ProviderAdapter> = Arc::new(
            MockAdapter::new(ProviderId::LambdaLabs)
                .with_point("gpu_1x_a100", "us-east-1", dec!(2.40), None),
        );
        let aggregator = Aggregator::new(
            vec![adapter],
            AggregatorConfig {
                cycle_interval: Duration::from_secs(60),
                cycle_deadline: Duration::from_millis(500),
                staleness_ceiling: Duration::from_secs(600),
                retry: RetryPolicy {
                    max_attempts: 1,
                    base: Duration::from_millis(1),
                    cap: Duration::from_millis(1),
                },
                filter: PricingFilter::all(),
            },
        )
        .unwrap();
        AppState::new(Arc::new(aggregator))
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = create_router(state());

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ready_endpoint_returns_503_before_first_publish() {
        let app = create_router(state());

        let response = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn ready_endpoint_returns_200_after_publish() {
        let state = state();
        state.aggregator.run_cycle().await;
        let app = create_router(state);

        let response = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_endpoint_reports_adapters() {
        let state = state();
        state.aggregator.run_cycle().await;
        let app = create_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
