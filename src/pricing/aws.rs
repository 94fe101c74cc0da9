//! AWS pricing adapter.
//!
//! Reads the public EC2 GPU price list (no auth required) one region at a
//! time. On-demand and spot quotes arrive in the same document.

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

/// Regions polled when the caller does not restrict them.
const DEFAULT_REGIONS: &[&str] = &[
    "us-east-1",
    "us-west-2",
    "eu-west-1",
    "eu-central-1",
    "ap-southeast-1",
    "ap-northeast-1",
];

/// AWS EC2 pricing adapter.
pub struct AwsAdapter {
    http: reqwest::Client,
    base_url: String,
    catalog: Arc<Catalog>,
}

/// Price list response document.
#[derive(Debug, Deserialize)]
struct PriceListResponse {
    prices: Vec<PriceEntry>,
}

/// Single instance-type quote within a region document.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceEntry {
    instance_type: String,
    /// On-demand price as a decimal string, USD per hour.
    on_demand_usd_per_hour: String,
    /// Current spot quote, absent when no spot capacity is offered.
    #[serde(default)]
    spot_usd_per_hour: Option<String>,
}

impl AwsAdapter {
    /// Create an adapter against the configured price list endpoint.
    pub fn new(http: reqwest::Client, base_url: String, catalog: Arc<Catalog>) -> Self {
        Self {
            http,
            base_url,
            catalog,
        }
    }

    async fn fetch_region(&self, region: &str) -> Result<Vec<PricePoint>, AdapterError> {
        let provider = ProviderId::Aws;
        let url = format!(
            "{}/offers/v1.0/aws/AmazonEC2/current/{}/gpu-index.json",
            self.base_url, region
        );

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AdapterError::from_http(provider, e))?;

        if !response.status().is_success() {
            return Err(AdapterError::from_status(provider, response.status().as_u16()));
        }

        let body: PriceListResponse = response.json().await.map_err(|e| AdapterError::Parse {
            provider,
            message: format!("price list decode failed: {}", e),
        })?;

        let now = OffsetDateTime::now_utc();
        let points = body
            .prices
            .into_iter()
            .filter_map(|entry| {
                // Only instance types the catalog knows carry a GPU kind.
                self.catalog.spec(provider, &entry.instance_type)?;
                let on_demand: Decimal = entry.on_demand_usd_per_hour.parse().ok()?;
                let spot = entry
                    .spot_usd_per_hour
                    .as_deref()
                    .and_then(|s| s.parse::<Decimal>().ok());
                Some(PricePoint {
                    line: Line::new(provider, entry.instance_type, region),
                    on_demand,
                    spot,
                    observed_at: now,
                })
            })
            .collect();

        Ok(points)
    }
}

#[async_trait]
impl ProviderAdapter for AwsAdapter {
    fn provider(&self) -> ProviderId {
        ProviderId::Aws
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            supports_spot: true,
            has_region_granularity: true,
            sustainable_qps: 0.5,
            min_poll_interval: std::time::Duration::from_secs(60),
        }
    }

    #[instrument(skip(self, filter))]
    async fn fetch_pricing(&self, filter: &PricingFilter) -> Result<Vec<PricePoint>, AdapterError> {
        let regions: Vec<String> = match &filter.regions {
            Some(regions) => regions.clone(),
            None => DEFAULT_REGIONS.iter().map(|r| r.to_string()).collect(),
        };

        let mut points = Vec::new();
        for region in &regions {
            let mut regional = self.fetch_region(region).await?;
            regional.retain(|p| {
                self.catalog
                    .spec(ProviderId::Aws, &p.line.instance)
                    .map_or(false, |spec| filter.matches_gpu(spec.gpu_kind))
            });
            points.append(&mut regional);
        }

        debug!(points = points.len(), regions = regions.len(), "AWS fetch complete");
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_entry_parses_with_and_without_spot() {
        let raw = r#"{
            "prices": [
                {"instanceType": "p4d.24xlarge", "onDemandUsdPerHour": "16.00", "spotUsdPerHour": "6.40"},
                {"instanceType": "g5.xlarge", "onDemandUsdPerHour": "1.006"}
            ]
        }"#;
        let parsed: PriceListResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.prices.len(), 2);
        assert_eq!(parsed.prices[0].spot_usd_per_hour.as_deref(), Some("6.40"));
        assert!(parsed.prices[1].spot_usd_per_hour.is_none());
    }
}
