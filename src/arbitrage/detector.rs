//! Arbitrage detector: scans pricing generations for cross-provider deltas.
//!
//! Runs as one task subscribed to the aggregator's generation bus. Each
//! bump triggers a scan that partitions the table by (GPU kind, region
//! class), compares effective prices within each partition, and emits
//! [`Opportunity`] events over a bounded broadcast bus. Lagging
//! subscribers lose the oldest events.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use time::OffsetDateTime;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::catalog::{Catalog, GpuKind};
use crate::config::Config;
use crate::forecast::{DemandSignal, DemandSignalSource};
use crate::metrics;
use crate::pricing::{Aggregator, Line, PricingTable};

use super::risk::{self, RiskInputs};
use super::types::{Opportunity, OpportunityLeg, RegionClass, RegionClassifier};

/// Detector settings.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Minimum savings fraction to emit.
    pub threshold: Decimal,
    /// Per-pair suppression window.
    pub cooldown: Duration,
    /// Spot weight for the detector's effective-price blend.
    pub spot_weight: Decimal,
    /// Broadcast buffer size.
    pub buffer: usize,
    /// Forecast horizon consulted for risk scoring.
    pub demand_horizon_hrs: u32,
}

impl DetectorConfig {
    /// Derive detector settings from the application config.
    pub fn from_config(config: &Config) -> Self {
        Self {
            threshold: config.arbitrage_threshold,
            cooldown: Duration::from_secs(config.arbitrage_cooldown_secs),
            spot_weight: config.arbitrage_risk_tolerance,
            buffer: config.opportunity_buffer,
            demand_horizon_hrs: 4,
        }
    }
}

/// The arbitrage detector.
pub struct ArbitrageDetector {
    config: DetectorConfig,
    catalog: Arc<Catalog>,
    regions: RegionClassifier,
    forecast: Arc<dyn DemandSignalSource>,
    tx: broadcast::Sender<Opportunity>,
    cooldowns: Mutex<HashMap<(Line, Line), Instant>>,
}

impl ArbitrageDetector {
    /// Create a detector.
    pub fn new(
        catalog: Arc<Catalog>,
        regions: RegionClassifier,
        forecast: Arc<dyn DemandSignalSource>,
        config: DetectorConfig,
    ) -> Self {
        let (tx, _) = broadcast::channel(config.buffer.max(1));
        Self {
            config,
            catalog,
            regions,
            forecast,
            tx,
            cooldowns: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to the opportunity stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Opportunity> {
        self.tx.subscribe()
    }

    /// Spawn the scan loop over the aggregator's generation bus.
    pub fn start(self: Arc<Self>, aggregator: Arc<Aggregator>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut generations = aggregator.subscribe();

            // Catch up on a table published before this task subscribed.
            let current = *generations.borrow_and_update();
            if current >= 1 {
                let (table, _) = aggregator.snapshot();
                let emitted = self.scan(&table).await;
                debug!(generation = current, emitted = emitted.len(), "Catch-up scan");
            }

            loop {
                if generations.changed().await.is_err() {
                    // Aggregator dropped; nothing further to scan.
                    return;
                }
                let generation = *generations.borrow_and_update();
                let (table, _) = aggregator.snapshot();
                let emitted = self.scan(&table).await;
                debug!(generation, emitted = emitted.len(), "Scan complete");
            }
        })
    }

    /// Scan one table and emit every new opportunity. Returns what was
    /// emitted, which the CLI and tests consume directly.
    #[instrument(skip(self, table), fields(generation = table.generation))]
    pub async fn scan(&self, table: &PricingTable) -> Vec<Opportunity> {
        // Partition by (GPU kind, region class).
        let mut partitions: HashMap<(GpuKind, RegionClass), Vec<(Line, Decimal, Decimal)>> =
            HashMap::new();
        for point in table.iter() {
            let Some(spec) = self.catalog.spec(point.line.provider, &point.line.instance) else {
                continue;
            };
            let effective = point.effective_price(self.config.spot_weight);
            // Compare per GPU so differently sized instances line up.
            let per_gpu = effective / Decimal::from(spec.gpu_count.max(1));
            let spot_share = if point.spot.is_some() {
                self.config.spot_weight
            } else {
                Decimal::ZERO
            };
            let class = self.regions.classify(&point.line.region);
            partitions
                .entry((spec.gpu_kind, class))
                .or_default()
                .push((point.line.clone(), per_gpu, spot_share));
        }

        // One forecast lookup per kind per scan.
        let mut demand: HashMap<GpuKind, Option<DemandSignal>> = HashMap::new();
        for (kind, _) in partitions.keys() {
            if !demand.contains_key(kind) {
                let signal = self
                    .forecast
                    .demand_signal(*kind, self.config.demand_horizon_hrs)
                    .await;
                demand.insert(*kind, signal);
            }
        }

        let now = Instant::now();
        let detected_at = OffsetDateTime::now_utc();
        let mut emitted = Vec::new();
        let mut cooldowns = self.cooldowns.lock().await;
        cooldowns.retain(|_, at| now.duration_since(*at) < self.config.cooldown);

        for ((kind, _class), mut lines) in partitions {
            lines.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

            for low_idx in 0..lines.len() {
                for high_idx in (low_idx + 1)..lines.len() {
                    let (high_line, high_price, _) = &lines[high_idx];
                    let (low_line, low_price, low_spot_share) = &lines[low_idx];
                    // Only cross-provider deltas are arbitrage.
                    if high_line.provider == low_line.provider {
                        continue;
                    }
                    if *high_price <= Decimal::ZERO {
                        continue;
                    }
                    let savings = (high_price - low_price) / high_price;
                    if savings < self.config.threshold {
                        continue;
                    }

                    let key = (high_line.clone(), low_line.clone());
                    if cooldowns.contains_key(&key) {
                        metrics::inc_opportunities_suppressed();
                        continue;
                    }
                    cooldowns.insert(key, now);

                    let from = OpportunityLeg {
                        provider: high_line.provider,
                        instance: high_line.instance.clone(),
                        region: high_line.region.clone(),
                        price: *high_price,
                    };
                    let to = OpportunityLeg {
                        provider: low_line.provider,
                        instance: low_line.instance.clone(),
                        region: low_line.region.clone(),
                        price: *low_price,
                    };
                    let risk_score = risk::score(
                        &RiskInputs {
                            gpu_kind: kind,
                            from: &from,
                            to: &to,
                            to_spot_share: *low_spot_share,
                            demand: demand.get(&kind).copied().flatten(),
                        },
                        &self.regions,
                    );

                    let opportunity = Opportunity {
                        gpu_kind: kind,
                        from,
                        to,
                        savings_pct: savings,
                        risk_score,
                        detected_at,
                    };

                    metrics::inc_opportunities_emitted();
                    info!(
                        gpu_kind = %kind,
                        from = %high_line,
                        to = %low_line,
                        savings_pct = %savings,
                        risk = risk_score,
                        "Opportunity emitted"
                    );
                    // Drop-oldest semantics come from the broadcast buffer;
                    // a send without receivers is not an error.
                    let _ = self.tx.send(opportunity.clone());
                    emitted.push(opportunity);
                }
            }
        }

        emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ProviderId;
    use crate::forecast::NoForecast;
    use crate::pricing::PricePoint;
    use rust_decimal_macros::dec;
    use std::collections::HashMap as StdHashMap;

    fn detector(threshold: Decimal) -> ArbitrageDetector {
        ArbitrageDetector::new(
            Arc::new(Catalog::builtin()),
            RegionClassifier::default(),
            Arc::new(NoForecast),
            DetectorConfig {
                threshold,
                cooldown: Duration::from_secs(300),
                spot_weight: dec!(0.5),
                buffer: 16,
                demand_horizon_hrs: 4,
            },
        )
    }

    fn table(points: Vec<(ProviderId, &str, &str, Decimal, Option<Decimal>)>) -> PricingTable {
        let now = OffsetDateTime::now_utc();
        let entries: StdHashMap<Line, PricePoint> = points
            .into_iter()
            .map(|(provider, instance, region, on_demand, spot)| {
                let line = Line::new(provider, instance, region);
                (
                    line.clone(),
                    PricePoint {
                        line,
                        on_demand,
                        spot,
                        observed_at: now,
                    },
                )
            })
            .collect();
        PricingTable::new(entries, 1, now)
    }

    #[tokio::test]
    async fn emits_above_threshold_with_expected_savings() {
        let detector = detector(dec!(0.05));
        let table = table(vec![
            (ProviderId::Gcp, "a2-highgpu-1g", "us-central1", dec!(3.00), None),
            (ProviderId::LambdaLabs, "gpu_1x_a100", "us-east-1", dec!(2.40), None),
        ]);

        let emitted = detector.scan(&table).await;
        assert_eq!(emitted.len(), 1);
        let opp = &emitted[0];
        assert_eq!(opp.gpu_kind, GpuKind::A100);
        assert_eq!(opp.from.provider, ProviderId::Gcp);
        assert_eq!(opp.to.provider, ProviderId::LambdaLabs);
        assert_eq!(opp.savings_pct, dec!(0.2));
        assert!((0.0..=1.0).contains(&opp.risk_score));
    }

    #[tokio::test]
    async fn below_threshold_is_silent() {
        let detector = detector(dec!(0.05));
        let table = table(vec![
            (ProviderId::Gcp, "a2-highgpu-1g", "us-central1", dec!(2.50), None),
            (ProviderId::LambdaLabs, "gpu_1x_a100", "us-east-1", dec!(2.40), None),
        ]);

        let emitted = detector.scan(&table).await;
        assert!(emitted.is_empty());
    }

    #[tokio::test]
    async fn cooldown_suppresses_republication() {
        let detector = detector(dec!(0.05));
        let table = table(vec![
            (ProviderId::Gcp, "a2-highgpu-1g", "us-central1", dec!(3.00), None),
            (ProviderId::LambdaLabs, "gpu_1x_a100", "us-east-1", dec!(2.40), None),
        ]);

        assert_eq!(detector.scan(&table).await.len(), 1);
        assert!(detector.scan(&table).await.is_empty());
    }

    #[tokio::test]
    async fn cross_continent_pairs_are_not_compared() {
        let detector = detector(dec!(0.05));
        let table = table(vec![
            (ProviderId::Gcp, "a2-highgpu-1g", "europe-west1", dec!(3.00), None),
            (ProviderId::LambdaLabs, "gpu_1x_a100", "us-east-1", dec!(2.40), None),
        ]);

        assert!(detector.scan(&table).await.is_empty());
    }

    #[tokio::test]
    async fn different_gpu_kinds_are_not_compared() {
        let detector = detector(dec!(0.05));
        let table = table(vec![
            (ProviderId::LambdaLabs, "gpu_1x_h100_pcie", "us-east-1", dec!(2.49), None),
            (ProviderId::LambdaLabs, "gpu_1x_a100", "us-east-1", dec!(1.80), None),
        ]);

        assert!(detector.scan(&table).await.is_empty());
    }

    #[tokio::test]
    async fn multi_gpu_instances_compare_per_gpu() {
        let detector = detector(dec!(0.05));
        // 8x A100 at 16.00 is 2.00/GPU, cheaper than 2.40 single.
        let table = table(vec![
            (ProviderId::Aws, "p4d.24xlarge", "us-east-1", dec!(16.00), None),
            (ProviderId::LambdaLabs, "gpu_1x_a100", "us-east-1", dec!(2.40), None),
        ]);

        let emitted = detector.scan(&table).await;
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].to.provider, ProviderId::Aws);
        assert_eq!(emitted[0].to.price, dec!(2.00));
    }

    #[tokio::test]
    async fn subscribers_receive_emitted_opportunities() {
        let detector = detector(dec!(0.05));
        let mut rx = detector.subscribe();
        let table = table(vec![
            (ProviderId::Gcp, "a2-highgpu-1g", "us-central1", dec!(3.00), None),
            (ProviderId::LambdaLabs, "gpu_1x_a100", "us-east-1", dec!(2.40), None),
        ]);

        detector.scan(&table).await;
        let opportunity = rx.recv().await.unwrap();
        assert_eq!(opportunity.savings_pct, dec!(0.2));
    }
}
