//! Provider adapter contract and the shared retry driver.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use crate::catalog::ProviderId;
use crate::error::AdapterError;

use super::types::{PricePoint, PricingFilter};

/// What an adapter can do and how hard it may be driven.
#[derive(Debug, Clone, Copy)]
pub struct AdapterCapabilities {
    /// Whether the provider quotes spot prices at all.
    pub supports_spot: bool,
    /// Whether prices differ per region (false: one global price list).
    pub has_region_granularity: bool,
    /// Sustained request rate the provider tolerates.
    pub sustainable_qps: f32,
    /// Minimum interval between successive polls of this provider.
    pub min_poll_interval: Duration,
}

impl Default for AdapterCapabilities {
    fn default() -> Self {
        Self {
            supports_spot: false,
            has_region_granularity: true,
            sustainable_qps: 1.0,
            min_poll_interval: Duration::from_secs(30),
        }
    }
}

/// Uniform interface over provider pricing catalogs.
///
/// Implementations translate the provider's catalog into normalized
/// [`PricePoint`]s ($/hr, canonical GPU kinds) and surface failures using
/// the [`AdapterError`] taxonomy. Duplicates within one fetch are allowed;
/// the aggregator deduplicates during merge.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// The provider this adapter speaks for.
    fn provider(&self) -> ProviderId;

    /// Static capability and rate policy description.
    fn capabilities(&self) -> AdapterCapabilities;

    /// Fetch the current price set, restricted by `filter`.
    ///
    /// Cancellation is cooperative: the aggregator wraps this call in its
    /// cycle deadline, so implementations must not block outside awaited I/O.
    async fn fetch_pricing(&self, filter: &PricingFilter) -> Result<Vec<PricePoint>, AdapterError>;
}

/// Retry policy for transient adapter failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Max attempts, including the first.
    pub max_attempts: u32,
    /// Initial backoff.
    pub base: Duration,
    /// Backoff ceiling.
    pub cap: Duration,
}

impl RetryPolicy {
    /// Backoff before attempt `n` (1-based), exponential with full jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base.saturating_mul(1u32 << attempt.min(16).saturating_sub(1));
        let capped = exp.min(self.cap);
        let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis() as u64);
        Duration::from_millis(jitter_ms)
    }
}

/// Drive a fetch through the retry policy.
///
/// Only [`AdapterError::is_retryable`] failures are retried; auth and parse
/// failures surface immediately so the aggregator can quarantine or skip.
pub async fn fetch_with_retry(
    adapter: &dyn ProviderAdapter,
    filter: &PricingFilter,
    policy: RetryPolicy,
) -> Result<Vec<PricePoint>, AdapterError> {
    let provider = adapter.provider();
    let mut last_err = None;

    for attempt in 1..=policy.max_attempts.max(1) {
        if attempt > 1 {
            let backoff = policy.backoff(attempt);
            debug!(%provider, attempt, backoff_ms = backoff.as_millis() as u64, "Retrying fetch");
            tokio::time::sleep(backoff).await;
        }

        match adapter.fetch_pricing(filter).await {
            Ok(points) => {
                debug!(%provider, attempt, points = points.len(), "Fetch succeeded");
                return Ok(points);
            }
            Err(err) if err.is_retryable() => {
                warn!(%provider, attempt, error = %err, "Transient fetch failure");
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_err.unwrap_or(AdapterError::Timeout { provider }))
}

/// Build the HTTP client adapters share, with the timeouts and pool limits
/// from configuration.
pub fn build_http_client(timeout_ms: u64, pool_size: usize) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .connect_timeout(Duration::from_millis(500))
        .tcp_nodelay(true)
        .tcp_keepalive(Duration::from_secs(30))
        .pool_max_idle_per_host(pool_size)
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
        .expect("failed to create HTTP client")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::mock::MockAdapter;
    use rust_decimal_macros::dec;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base: Duration::from_millis(1),
            cap: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn retry_succeeds_after_transient_failures() {
        let adapter = MockAdapter::new(ProviderId::Aws)
            .with_point("p4d.24xlarge", "us-east-1", dec!(16.00), None)
            .fail_transient_times(2);

        let points = fetch_with_retry(&adapter, &PricingFilter::all(), policy())
            .await
            .unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(adapter.fetch_count(), 3);
    }

    #[tokio::test]
    async fn retry_exhaustion_surfaces_last_error() {
        let adapter = MockAdapter::new(ProviderId::Gcp).fail_transient_times(10);

        let err = fetch_with_retry(&adapter, &PricingFilter::all(), policy())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(adapter.fetch_count(), 3);
    }

    #[tokio::test]
    async fn auth_failure_is_not_retried() {
        let adapter = MockAdapter::new(ProviderId::RunPod).fail_auth();

        let err = fetch_with_retry(&adapter, &PricingFilter::all(), policy())
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::AuthFailed { .. }));
        assert_eq!(adapter.fetch_count(), 1);
    }

    #[test]
    fn backoff_respects_cap() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base: Duration::from_millis(100),
            cap: Duration::from_millis(250),
        };
        for attempt in 1..=10 {
            assert!(policy.backoff(attempt) <= Duration::from_millis(250));
        }
    }
}
