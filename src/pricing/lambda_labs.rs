//! Lambda Labs pricing adapter.
//!
//! One bearer-authenticated call returns the whole instance-type listing
//! with per-region availability. Prices arrive in cents per hour and are
//! scaled to dollars; Lambda has no spot market, so `spot` is always absent.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{debug, instrument};

use crate::catalog::{Catalog, ProviderId};
use crate::error::AdapterError;

use super::adapter::{AdapterCapabilities, ProviderAdapter};
use super::types::{Line, PricePoint, PricingFilter};

/// Lambda Labs cloud API adapter.
pub struct LambdaLabsAdapter {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    catalog: Arc<Catalog>,
}

#[derive(Debug, Deserialize)]
struct InstanceTypesResponse {
    data: Vec<InstanceTypeEntry>,
}

#[derive(Debug, Deserialize)]
struct InstanceTypeEntry {
    name: String,
    price_cents_per_hour: i64,
    #[serde(default)]
    regions_with_capacity_available: Vec<RegionEntry>,
}

#[derive(Debug, Deserialize)]
struct RegionEntry {
    name: String,
}

impl LambdaLabsAdapter {
    /// Create an adapter against the configured Lambda endpoint.
    pub fn new(
        http: reqwest::Client,
        base_url: String,
        api_key: Option<String>,
        catalog: Arc<Catalog>,
    ) -> Self {
        Self {
            http,
            base_url,
            api_key,
            catalog,
        }
    }
}

#[async_trait]
impl ProviderAdapter for LambdaLabsAdapter {
    fn provider(&self) -> ProviderId {
        ProviderId::LambdaLabs
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            supports_spot: false,
            has_region_granularity: true,
            sustainable_qps: 1.0,
            min_poll_interval: std::time::Duration::from_secs(30),
        }
    }

    #[instrument(skip(self, filter))]
    async fn fetch_pricing(&self, filter: &PricingFilter) -> Result<Vec<PricePoint>, AdapterError> {
        let provider = ProviderId::LambdaLabs;
        let key = self
            .api_key
            .as_deref()
            .ok_or(AdapterError::NotConfigured { provider })?;

        let url = format!("{}/api/v1/instance-types", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(key)
            .send()
            .await
            .map_err(|e| AdapterError::from_http(provider, e))?;

        if !response.status().is_success() {
            return Err(AdapterError::from_status(provider, response.status().as_u16()));
        }

        let body: InstanceTypesResponse =
            response.json().await.map_err(|e| AdapterError::Parse {
                provider,
                message: format!("instance types decode failed: {}", e),
            })?;

        let now = OffsetDateTime::now_utc();
        let mut points = Vec::new();
        for entry in body.data {
            let Some(spec) = self.catalog.spec(provider, &entry.name) else {
                continue;
            };
            if !filter.matches_gpu(spec.gpu_kind) {
                continue;
            }
            if entry.price_cents_per_hour <= 0 {
                continue;
            }
            // Cents per hour to dollars per hour.
            let on_demand = Decimal::new(entry.price_cents_per_hour, 2);
            for region in &entry.regions_with_capacity_available {
                if !filter.matches_region(&region.name) {
                    continue;
                }
                points.push(PricePoint {
                    line: Line::new(provider, entry.name.clone(), region.name.clone()),
                    on_demand,
                    spot: None,
                    observed_at: now,
                });
            }
        }

        debug!(points = points.len(), "Lambda Labs fetch complete");
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn instance_types_parse() {
        let raw = r#"{
            "data": [{
                "name": "gpu_1x_a100",
                "price_cents_per_hour": 240,
                "regions_with_capacity_available": [{"name": "us-east-1"}, {"name": "us-west-1"}]
            }]
        }"#;
        let parsed: InstanceTypesResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.data[0].regions_with_capacity_available.len(), 2);
        assert_eq!(Decimal::new(parsed.data[0].price_cents_per_hour, 2), dec!(2.40));
    }
}
