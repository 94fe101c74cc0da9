//! Azure pricing adapter.
//!
//! Uses the public Retail Prices API (no auth). Spot quotes arrive as
//! separate items whose meter name carries a "Spot" suffix; the adapter
//! folds them into the matching on-demand entry.

use std::collections::HashMap;
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
    "eastus",
    "westus2",
    "northeurope",
    "westeurope",
    "southeastasia",
];

/// Azure Retail Prices adapter.
pub struct AzureAdapter {
    http: reqwest::Client,
    base_url: String,
    catalog: Arc<Catalog>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RetailPricesResponse {
    items: Vec<RetailPriceItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetailPriceItem {
    arm_sku_name: String,
    retail_price: f64,
    meter_name: String,
    #[serde(default)]
    arm_region_name: String,
}

impl RetailPriceItem {
    fn is_spot(&self) -> bool {
        self.meter_name.contains("Spot")
    }

    /// Low-priority meters are the legacy spot tier; skip them so they do
    /// not clobber the real spot quote.
    fn is_low_priority(&self) -> bool {
        self.meter_name.contains("Low Priority")
    }
}

impl AzureAdapter {
    /// Create an adapter against the configured retail prices endpoint.
    pub fn new(http: reqwest::Client, base_url: String, catalog: Arc<Catalog>) -> Self {
        Self {
            http,
            base_url,
            catalog,
        }
    }

    async fn fetch_region(&self, region: &str) -> Result<Vec<PricePoint>, AdapterError> {
        let provider = ProviderId::Azure;
        let url = format!("{}/api/retail/prices", self.base_url);
        let filter = format!(
            "serviceName eq 'Virtual Machines' and armRegionName eq '{}' and priceType eq 'Consumption'",
            region
        );

        let response = self
            .http
            .get(&url)
            .query(&[("$filter", filter.as_str()), ("currencyCode", "USD")])
            .send()
            .await
            .map_err(|e| AdapterError::from_http(provider, e))?;

        if !response.status().is_success() {
            return Err(AdapterError::from_status(provider, response.status().as_u16()));
        }

        let body: RetailPricesResponse =
            response.json().await.map_err(|e| AdapterError::Parse {
                provider,
                message: format!("retail prices decode failed: {}", e),
            })?;

        // Fold per-SKU on-demand and spot meters together.
        let mut on_demand: HashMap<String, Decimal> = HashMap::new();
        let mut spot: HashMap<String, Decimal> = HashMap::new();
        for item in body.items {
            if self.catalog.spec(provider, &item.arm_sku_name).is_none() {
                continue;
            }
            if item.is_low_priority() {
                continue;
            }
            let Some(price) = Decimal::from_f64_retain(item.retail_price) else {
                continue;
            };
            if item.is_spot() {
                spot.insert(item.arm_sku_name, price);
            } else {
                on_demand.insert(item.arm_sku_name, price);
            }
        }

        let now = OffsetDateTime::now_utc();
        let points = on_demand
            .into_iter()
            .map(|(sku, price)| PricePoint {
                spot: spot.get(&sku).copied(),
                line: Line::new(provider, sku, region),
                on_demand: price,
                observed_at: now,
            })
            .collect();

        Ok(points)
    }
}

#[async_trait]
impl ProviderAdapter for AzureAdapter {
    fn provider(&self) -> ProviderId {
        ProviderId::Azure
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            supports_spot: true,
            has_region_granularity: true,
            sustainable_qps: 2.0,
            min_poll_interval: std::time::Duration::from_secs(30),
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
                    .spec(ProviderId::Azure, &p.line.instance)
                    .map_or(false, |spec| filter.matches_gpu(spec.gpu_kind))
            });
            points.append(&mut regional);
        }

        debug!(points = points.len(), "Azure fetch complete");
        Ok(points)
    }
}
