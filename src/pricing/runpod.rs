//! RunPod pricing adapter.
//!
//! Bearer-authenticated GPU type listing. RunPod prices per GPU type rather
//! than per machine shape, and offers no spot market.

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

/// RunPod API adapter.
pub struct RunPodAdapter {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    catalog: Arc<Catalog>,
}

#[derive(Debug, Deserialize)]
struct GpuTypesResponse {
    data: Vec<GpuTypeEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GpuTypeEntry {
    display_name: String,
    /// Secure-cloud hourly price in dollars.
    secure_price: f64,
    #[serde(default = "default_runpod_region")]
    region: String,
}

fn default_runpod_region() -> String {
    "US-East".to_string()
}

impl RunPodAdapter {
    /// Create an adapter against the configured RunPod endpoint.
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
impl ProviderAdapter for RunPodAdapter {
    fn provider(&self) -> ProviderId {
        ProviderId::RunPod
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            supports_spot: false,
            has_region_granularity: false,
            sustainable_qps: 1.0,
            min_poll_interval: std::time::Duration::from_secs(30),
        }
    }

    #[instrument(skip(self, filter))]
    async fn fetch_pricing(&self, filter: &PricingFilter) -> Result<Vec<PricePoint>, AdapterError> {
        let provider = ProviderId::RunPod;
        let key = self
            .api_key
            .as_deref()
            .ok_or(AdapterError::NotConfigured { provider })?;

        let url = format!("{}/v2/gpu-types", self.base_url);
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

        let body: GpuTypesResponse = response.json().await.map_err(|e| AdapterError::Parse {
            provider,
            message: format!("gpu types decode failed: {}", e),
        })?;

        let now = OffsetDateTime::now_utc();
        let points = body
            .data
            .into_iter()
            .filter_map(|entry| {
                let spec = self.catalog.spec(provider, &entry.display_name)?;
                if !filter.matches_gpu(spec.gpu_kind) || !filter.matches_region(&entry.region) {
                    return None;
                }
                let on_demand = Decimal::from_f64_retain(entry.secure_price)?;
                Some(PricePoint {
                    line: Line::new(provider, entry.display_name, entry.region),
                    on_demand,
                    spot: None,
                    observed_at: now,
                })
            })
            .collect();

        debug!("RunPod fetch complete");
        Ok(points)
    }
}
