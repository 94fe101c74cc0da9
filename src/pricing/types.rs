//! Pricing types and the aggregated pricing table.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::catalog::{GpuKind, ProviderId};

/// Monotonic version identifier of a published pricing table.
pub type Generation = u64;

/// The granularity at which prices are quoted and allocations selected:
/// (provider, instance type, region).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Line {
    /// Cloud provider.
    pub provider: ProviderId,
    /// Provider-side instance type name.
    pub instance: String,
    /// Region, passed through verbatim as an opaque string.
    pub region: String,
}

impl Line {
    /// Create a new line key.
    pub fn new(provider: ProviderId, instance: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            provider,
            instance: instance.into(),
            region: region.into(),
        }
    }
}

impl std::fmt::Display for Line {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.provider, self.instance, self.region)
    }
}

/// One observed price for a line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePoint {
    /// The line this price belongs to.
    pub line: Line,
    /// On-demand price in $/hr. Always positive.
    pub on_demand: Decimal,
    /// Spot price in $/hr, absent for providers without a spot market.
    pub spot: Option<Decimal>,
    /// When the provider reported this price.
    #[serde(with = "time::serde::rfc3339")]
    pub observed_at: OffsetDateTime,
}

impl PricePoint {
    /// Whether the point satisfies the pricing invariants:
    /// `on_demand > 0` and, if present, `spot <= on_demand` with `spot > 0`.
    pub fn is_valid(&self) -> bool {
        if self.on_demand <= Decimal::ZERO {
            return false;
        }
        match self.spot {
            Some(spot) => spot > Decimal::ZERO && spot <= self.on_demand,
            None => true,
        }
    }

    /// Age of the observation relative to `now`.
    pub fn age(&self, now: OffsetDateTime) -> time::Duration {
        now - self.observed_at
    }

    /// Risk-tolerance-weighted blend of on-demand and spot.
    ///
    /// `spot_weight` is the fraction assigned to the spot price; lines
    /// without a spot quote price at pure on-demand regardless.
    pub fn effective_price(&self, spot_weight: Decimal) -> Decimal {
        match self.spot {
            Some(spot) => (Decimal::ONE - spot_weight) * self.on_demand + spot_weight * spot,
            None => self.on_demand,
        }
    }
}

/// Restricts a fetch or snapshot query to the slices actually required.
#[derive(Debug, Clone, Default)]
pub struct PricingFilter {
    /// Only these GPU kinds, or all when `None`.
    pub gpu_kinds: Option<Vec<GpuKind>>,
    /// Only these providers, or all when `None`.
    pub providers: Option<Vec<ProviderId>>,
    /// Only these regions, or all when `None`.
    pub regions: Option<Vec<String>>,
}

impl PricingFilter {
    /// A filter matching everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Whether a GPU kind passes the filter.
    pub fn matches_gpu(&self, kind: GpuKind) -> bool {
        self.gpu_kinds.as_ref().map_or(true, |ks| ks.contains(&kind))
    }

    /// Whether a provider passes the filter.
    pub fn matches_provider(&self, provider: ProviderId) -> bool {
        self.providers.as_ref().map_or(true, |ps| ps.contains(&provider))
    }

    /// Whether a region passes the filter.
    pub fn matches_region(&self, region: &str) -> bool {
        self.regions
            .as_ref()
            .map_or(true, |rs| rs.iter().any(|r| r == region))
    }
}

/// The authoritative, freshness-bounded map of lines to latest prices.
///
/// Tables are immutable once published; the aggregator builds a new one
/// each cycle and swaps it in atomically.
#[derive(Debug, Clone)]
pub struct PricingTable {
    entries: HashMap<Line, PricePoint>,
    /// Monotonic generation counter.
    pub generation: Generation,
    /// When this table was assembled.
    pub built_at: OffsetDateTime,
}

impl PricingTable {
    /// An empty generation-zero table (pre-first-publish).
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
            generation: 0,
            built_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    /// Assemble a table from merged entries.
    pub fn new(
        entries: HashMap<Line, PricePoint>,
        generation: Generation,
        built_at: OffsetDateTime,
    ) -> Self {
        Self {
            entries,
            generation,
            built_at,
        }
    }

    /// Latest price for a line.
    pub fn get(&self, line: &Line) -> Option<&PricePoint> {
        self.entries.get(line)
    }

    /// Iterate all entries.
    pub fn iter(&self) -> impl Iterator<Item = &PricePoint> {
        self.entries.values()
    }

    /// Number of lines in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries passing a filter, sorted by line for stable output.
    pub fn filtered(&self, filter: &PricingFilter) -> Vec<&PricePoint> {
        let mut points: Vec<&PricePoint> = self
            .entries
            .values()
            .filter(|p| {
                filter.matches_provider(p.line.provider) && filter.matches_region(&p.line.region)
            })
            .collect();
        points.sort_by(|a, b| a.line.cmp(&b.line));
        points
    }

    /// Move the entries out of the table.
    pub fn into_entries(self) -> HashMap<Line, PricePoint> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn point(on_demand: Decimal, spot: Option<Decimal>) -> PricePoint {
        PricePoint {
            line: Line::new(ProviderId::Aws, "p4d.24xlarge", "us-east-1"),
            on_demand,
            spot,
            observed_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn validity_requires_positive_on_demand() {
        assert!(point(dec!(3.00), None).is_valid());
        assert!(!point(dec!(0), None).is_valid());
        assert!(!point(dec!(-1.50), None).is_valid());
    }

    #[test]
    fn validity_requires_spot_below_on_demand() {
        assert!(point(dec!(3.00), Some(dec!(1.20))).is_valid());
        assert!(point(dec!(3.00), Some(dec!(3.00))).is_valid());
        assert!(!point(dec!(3.00), Some(dec!(3.10))).is_valid());
        assert!(!point(dec!(3.00), Some(dec!(0))).is_valid());
    }

    #[test]
    fn effective_price_blends_toward_spot() {
        let p = point(dec!(3.00), Some(dec!(1.00)));
        assert_eq!(p.effective_price(dec!(0)), dec!(3.00));
        assert_eq!(p.effective_price(dec!(1)), dec!(1.00));
        assert_eq!(p.effective_price(dec!(0.5)), dec!(2.00));
    }

    #[test]
    fn effective_price_without_spot_ignores_alpha() {
        let p = point(dec!(2.40), None);
        assert_eq!(p.effective_price(dec!(1)), dec!(2.40));
    }

    #[test]
    fn filter_matches() {
        let filter = PricingFilter {
            gpu_kinds: Some(vec![GpuKind::A100]),
            providers: Some(vec![ProviderId::Aws, ProviderId::Gcp]),
            regions: None,
        };
        assert!(filter.matches_gpu(GpuKind::A100));
        assert!(!filter.matches_gpu(GpuKind::H100));
        assert!(filter.matches_provider(ProviderId::Aws));
        assert!(!filter.matches_provider(ProviderId::RunPod));
        assert!(filter.matches_region("anywhere"));
    }

    #[test]
    fn filtered_output_is_sorted() {
        let mut entries = HashMap::new();
        for (provider, instance, region) in [
            (ProviderId::Gcp, "a2-highgpu-1g", "us-central1"),
            (ProviderId::Aws, "p4d.24xlarge", "us-east-1"),
            (ProviderId::Aws, "g5.xlarge", "us-east-1"),
        ] {
            let line = Line::new(provider, instance, region);
            entries.insert(
                line.clone(),
                PricePoint {
                    line,
                    on_demand: dec!(1.00),
                    spot: None,
                    observed_at: OffsetDateTime::now_utc(),
                },
            );
        }
        let table = PricingTable::new(entries, 1, OffsetDateTime::now_utc());
        let points = table.filtered(&PricingFilter::all());
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].line.instance, "g5.xlarge");
        assert_eq!(points[1].line.instance, "p4d.24xlarge");
        assert_eq!(points[2].line.provider, ProviderId::Gcp);
    }
}
