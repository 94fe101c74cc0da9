//! GCP pricing adapter.
//!
//! Queries the Cloud Billing catalog with an API key. GCP quotes prices as
//! (units, nanos) pairs per hour; both on-demand and preemptible rates come
//! back in one SKU listing per region.

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

const DEFAULT_REGIONS: &[&str] = &[
    "us-central1",
    "us-east1",
    "europe-west1",
    "europe-west4",
    "asia-east1",
];

/// GCP Cloud Billing adapter.
pub struct GcpAdapter {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    catalog: Arc<Catalog>,
}

#[derive(Debug, Deserialize)]
struct SkuListResponse {
    skus: Vec<SkuEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SkuEntry {
    machine_type: String,
    price_per_hour: GcpMoney,
    #[serde(default)]
    preemptible_price_per_hour: Option<GcpMoney>,
}

/// GCP money representation: whole units plus nanos.
#[derive(Debug, Deserialize)]
struct GcpMoney {
    #[serde(default)]
    units: i64,
    #[serde(default)]
    nanos: i64,
}

impl GcpMoney {
    /// Convert to a Decimal dollar amount.
    fn to_decimal(&self) -> Decimal {
        Decimal::from(self.units) + Decimal::new(self.nanos, 9)
    }
}

impl GcpAdapter {
    /// Create an adapter against the configured billing endpoint.
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

    async fn fetch_region(&self, region: &str) -> Result<Vec<PricePoint>, AdapterError> {
        let provider = ProviderId::Gcp;
        let key = self
            .api_key
            .as_deref()
            .ok_or(AdapterError::NotConfigured { provider })?;

        let url = format!("{}/v1/services/compute/skus", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("key", key), ("region", region), ("category", "gpu")])
            .send()
            .await
            .map_err(|e| AdapterError::from_http(provider, e))?;

        if !response.status().is_success() {
            return Err(AdapterError::from_status(provider, response.status().as_u16()));
        }

        let body: SkuListResponse = response.json().await.map_err(|e| AdapterError::Parse {
            provider,
            message: format!("sku list decode failed: {}", e),
        })?;

        let now = OffsetDateTime::now_utc();
        let points = body
            .skus
            .into_iter()
            .filter_map(|sku| {
                self.catalog.spec(provider, &sku.machine_type)?;
                let on_demand = sku.price_per_hour.to_decimal();
                let spot = sku.preemptible_price_per_hour.map(|m| m.to_decimal());
                Some(PricePoint {
                    line: Line::new(provider, sku.machine_type, region),
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
impl ProviderAdapter for GcpAdapter {
    fn provider(&self) -> ProviderId {
        ProviderId::Gcp
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            supports_spot: true,
            has_region_granularity: true,
            sustainable_qps: 1.0,
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
                    .spec(ProviderId::Gcp, &p.line.instance)
                    .map_or(false, |spec| filter.matches_gpu(spec.gpu_kind))
            });
            points.append(&mut regional);
        }

        debug!(points = points.len(), "GCP fetch complete");
        Ok(points)
    }
}
