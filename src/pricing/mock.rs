//! Mock provider adapter for unit testing.
//!
//! Lets tests script price sets and failure sequences without network
//! access. Failure injection covers the full adapter taxonomy.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use time::OffsetDateTime;

use crate::catalog::ProviderId;
use crate::error::AdapterError;

use super::adapter::{AdapterCapabilities, ProviderAdapter};
use super::types::{Line, PricePoint, PricingFilter};

/// Scripted price entry. `age` is applied at fetch time so freshness
/// checks see a stable relative age regardless of when the test runs.
#[derive(Debug, Clone)]
struct MockPoint {
    instance: String,
    region: String,
    on_demand: Decimal,
    spot: Option<Decimal>,
    age: Duration,
}

/// Mock adapter with scripted prices and failures.
pub struct MockAdapter {
    provider: ProviderId,
    capabilities: AdapterCapabilities,
    points: Mutex<Vec<MockPoint>>,
    transient_remaining: AtomicU32,
    auth_fails: AtomicBool,
    parse_fails: AtomicBool,
    latency: Mutex<Duration>,
    fetches: AtomicU32,
}

impl MockAdapter {
    /// Create a mock adapter for a provider with default capabilities.
    pub fn new(provider: ProviderId) -> Self {
        Self {
            provider,
            capabilities: AdapterCapabilities {
                supports_spot: provider.supports_spot(),
                has_region_granularity: true,
                sustainable_qps: 100.0,
                min_poll_interval: Duration::ZERO,
            },
            points: Mutex::new(Vec::new()),
            transient_remaining: AtomicU32::new(0),
            auth_fails: AtomicBool::new(false),
            parse_fails: AtomicBool::new(false),
            latency: Mutex::new(Duration::ZERO),
            fetches: AtomicU32::new(0),
        }
    }

    /// Add a fresh price point.
    pub fn with_point(
        self,
        instance: &str,
        region: &str,
        on_demand: Decimal,
        spot: Option<Decimal>,
    ) -> Self {
        self.with_aged_point(instance, region, on_demand, spot, Duration::ZERO)
    }

    /// Add a price point observed `age` ago.
    pub fn with_aged_point(
        self,
        instance: &str,
        region: &str,
        on_demand: Decimal,
        spot: Option<Decimal>,
        age: Duration,
    ) -> Self {
        self.points.lock().unwrap().push(MockPoint {
            instance: instance.to_string(),
            region: region.to_string(),
            on_demand,
            spot,
            age,
        });
        self
    }

    /// Fail the next `n` fetches with a transient error.
    pub fn fail_transient_times(self, n: u32) -> Self {
        self.transient_remaining.store(n, Ordering::SeqCst);
        self
    }

    /// Fail every fetch with an authentication error.
    pub fn fail_auth(self) -> Self {
        self.auth_fails.store(true, Ordering::SeqCst);
        self
    }

    /// Fail every fetch with a parse error.
    pub fn fail_parse(self) -> Self {
        self.parse_fails.store(true, Ordering::SeqCst);
        self
    }

    /// Simulate per-fetch latency.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock().unwrap() = latency;
        self
    }

    /// Replace the scripted price for an instance/region pair.
    pub fn set_price(&self, instance: &str, region: &str, on_demand: Decimal, spot: Option<Decimal>) {
        let mut points = self.points.lock().unwrap();
        points.retain(|p| !(p.instance == instance && p.region == region));
        points.push(MockPoint {
            instance: instance.to_string(),
            region: region.to_string(),
            on_demand,
            spot,
            age: Duration::ZERO,
        });
    }

    /// Fail the next `n` fetches with a transient error (non-consuming form).
    pub fn inject_transient(&self, n: u32) {
        self.transient_remaining.store(n, Ordering::SeqCst);
    }

    /// Clear failure injection so subsequent fetches succeed.
    pub fn heal(&self) {
        self.transient_remaining.store(0, Ordering::SeqCst);
        self.auth_fails.store(false, Ordering::SeqCst);
        self.parse_fails.store(false, Ordering::SeqCst);
    }

    /// How many fetches were attempted.
    pub fn fetch_count(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn provider(&self) -> ProviderId {
        self.provider
    }

    fn capabilities(&self) -> AdapterCapabilities {
        self.capabilities
    }

    async fn fetch_pricing(&self, filter: &PricingFilter) -> Result<Vec<PricePoint>, AdapterError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.lock().unwrap();
        if latency > Duration::ZERO {
            tokio::time::sleep(latency).await;
        }

        if self.auth_fails.load(Ordering::SeqCst) {
            return Err(AdapterError::AuthFailed {
                provider: self.provider,
            });
        }

        if self.parse_fails.load(Ordering::SeqCst) {
            return Err(AdapterError::Parse {
                provider: self.provider,
                message: "scripted parse failure".to_string(),
            });
        }

        let remaining = self.transient_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(AdapterError::Transient {
                provider: self.provider,
                status: Some(503),
                message: "scripted transient failure".to_string(),
            });
        }

        let now = OffsetDateTime::now_utc();
        let points = self
            .points
            .lock()
            .unwrap()
            .iter()
            .filter(|p| filter.matches_region(&p.region))
            .map(|p| PricePoint {
                line: Line::new(self.provider, p.instance.clone(), p.region.clone()),
                on_demand: p.on_demand,
                spot: p.spot,
                observed_at: now - time::Duration::try_from(p.age).unwrap_or(time::Duration::ZERO),
            })
            .collect();

        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn mock_returns_scripted_points() {
        let adapter = MockAdapter::new(ProviderId::LambdaLabs)
            .with_point("gpu_1x_a100", "us-east-1", dec!(2.40), None)
            .with_point("gpu_8x_a100", "us-east-1", dec!(17.92), None);

        let points = adapter.fetch_pricing(&PricingFilter::all()).await.unwrap();
        assert_eq!(points.len(), 2);
        assert!(points.iter().all(|p| p.line.provider == ProviderId::LambdaLabs));
    }

    #[tokio::test]
    async fn mock_applies_region_filter() {
        let adapter = MockAdapter::new(ProviderId::Aws)
            .with_point("p4d.24xlarge", "us-east-1", dec!(16.00), Some(dec!(6.40)))
            .with_point("p4d.24xlarge", "eu-west-1", dec!(17.50), None);

        let filter = PricingFilter {
            regions: Some(vec!["eu-west-1".to_string()]),
            ..PricingFilter::all()
        };
        let points = adapter.fetch_pricing(&filter).await.unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].line.region, "eu-west-1");
    }

    #[tokio::test]
    async fn transient_failures_heal_after_count() {
        let adapter = MockAdapter::new(ProviderId::Gcp)
            .with_point("a2-highgpu-1g", "us-central1", dec!(2.50), None)
            .fail_transient_times(1);

        assert!(adapter.fetch_pricing(&PricingFilter::all()).await.is_err());
        assert!(adapter.fetch_pricing(&PricingFilter::all()).await.is_ok());
    }

    #[tokio::test]
    async fn set_price_replaces_entry() {
        let adapter = MockAdapter::new(ProviderId::Gcp)
            .with_point("a2-highgpu-1g", "us-central1", dec!(2.50), None);
        adapter.set_price("a2-highgpu-1g", "us-central1", dec!(2.10), None);

        let points = adapter.fetch_pricing(&PricingFilter::all()).await.unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].on_demand, dec!(2.10));
    }
}
