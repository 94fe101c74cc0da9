//! Pricing aggregator: drives adapters on a cadence and owns the table.
//!
//! Exactly one writer exists (the cycle driver). Readers obtain immutable
//! snapshots through a watch channel holding `Arc<PricingTable>`, which is
//! an atomic pointer load; a superseded generation stays alive until its
//! last reader drops it. The generation bus is a second watch channel, so
//! slow subscribers naturally coalesce to the latest generation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use time::OffsetDateTime;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::catalog::ProviderId;
use crate::config::Config;
use crate::error::{AdapterError, AggregatorError, OptimizeError};
use crate::metrics;

use super::adapter::{fetch_with_retry, ProviderAdapter, RetryPolicy};
use super::types::{Generation, Line, PricePoint, PricingFilter, PricingTable};

/// Aggregation cadence and discipline settings.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Interval between cycles.
    pub cycle_interval: Duration,
    /// Max wall-clock per cycle; late adapters yield stale entries.
    pub cycle_deadline: Duration,
    /// Max entry age before eviction.
    pub staleness_ceiling: Duration,
    /// Retry policy for transient adapter failures.
    pub retry: RetryPolicy,
    /// The GPU kinds/regions this deployment actually needs.
    pub filter: PricingFilter,
}

impl AggregatorConfig {
    /// Derive aggregator settings from the application config.
    pub fn from_config(config: &Config) -> Self {
        Self {
            cycle_interval: Duration::from_secs(config.cycle_interval_secs),
            cycle_deadline: Duration::from_millis(config.cycle_deadline_ms),
            staleness_ceiling: Duration::from_secs(config.staleness_ceiling_secs),
            retry: RetryPolicy {
                max_attempts: config.adapter_retry_attempts,
                base: Duration::from_millis(config.adapter_backoff_base_ms),
                cap: Duration::from_millis(config.adapter_backoff_cap_ms),
            },
            filter: PricingFilter::all(),
        }
    }
}

/// Health status of one adapter as seen by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterStatus {
    /// Last fetch succeeded within the staleness ceiling.
    Healthy,
    /// No success within the staleness ceiling (or ever).
    Stale,
    /// Authentication failed; held out until credentials change.
    Quarantined,
}

/// Snapshot of one adapter's health for operators.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AdapterHealth {
    /// Provider the adapter speaks for.
    pub provider: ProviderId,
    /// Current status classification.
    pub status: AdapterStatus,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// When the adapter last returned points.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_success: Option<OffsetDateTime>,
    /// Machine-readable code of the last failure.
    pub last_error_code: Option<&'static str>,
}

/// What one cycle did, for logging and tests.
#[derive(Debug, Clone, Default)]
pub struct CycleSummary {
    /// Adapters driven this cycle.
    pub attempted: usize,
    /// Adapters that returned points.
    pub succeeded: usize,
    /// Points merged into the table.
    pub merged: usize,
    /// Points dropped by validation.
    pub dropped: usize,
    /// Entries evicted as stale.
    pub evicted: usize,
    /// Generation published by this cycle.
    pub generation: Generation,
}

struct AdapterSlot {
    adapter: Arc<dyn ProviderAdapter>,
    quarantined: bool,
    consecutive_failures: u32,
    last_success: Option<OffsetDateTime>,
    last_poll: Option<Instant>,
    last_error_code: Option<&'static str>,
}

/// The pricing aggregator. Cheap to clone via `Arc`.
pub struct Aggregator {
    config: AggregatorConfig,
    slots: Mutex<Vec<AdapterSlot>>,
    table_tx: watch::Sender<Arc<PricingTable>>,
    gen_tx: watch::Sender<Generation>,
    started: AtomicBool,
}

impl Aggregator {
    /// Create an aggregator over a set of adapters.
    pub fn new(
        adapters: Vec<Arc<dyn ProviderAdapter>>,
        config: AggregatorConfig,
    ) -> Result<Self, AggregatorError> {
        if adapters.is_empty() {
            return Err(AggregatorError::NoAdapters);
        }

        let slots = adapters
            .into_iter()
            .map(|adapter| AdapterSlot {
                adapter,
                quarantined: false,
                consecutive_failures: 0,
                last_success: None,
                last_poll: None,
                last_error_code: None,
            })
            .collect();

        let (table_tx, _) = watch::channel(Arc::new(PricingTable::empty()));
        let (gen_tx, _) = watch::channel(0);

        Ok(Self {
            config,
            slots: Mutex::new(slots),
            table_tx,
            gen_tx,
            started: AtomicBool::new(false),
        })
    }

    /// Begin the periodic cycle. Safe to call once; later calls error.
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>, AggregatorError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(AggregatorError::AlreadyStarted);
        }

        let aggregator = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(aggregator.config.cycle_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let summary = aggregator.run_cycle().await;
                debug!(
                    generation = summary.generation,
                    merged = summary.merged,
                    dropped = summary.dropped,
                    evicted = summary.evicted,
                    "Cycle complete"
                );
            }
        });
        Ok(handle)
    }

    /// Run one aggregation cycle: fan out, barrier, merge, validate, publish.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> CycleSummary {
        let cycle_start = Instant::now();
        let mut summary = CycleSummary::default();

        // Fan-out: one fetch per non-quarantined adapter whose poll
        // interval has elapsed, each bounded by the cycle deadline.
        let due: Vec<(usize, Arc<dyn ProviderAdapter>)> = {
            let mut slots = self.slots.lock().await;
            slots
                .iter_mut()
                .enumerate()
                .filter(|(_, slot)| {
                    if slot.quarantined {
                        return false;
                    }
                    let min_interval = slot.adapter.capabilities().min_poll_interval;
                    slot.last_poll.map_or(true, |t| t.elapsed() >= min_interval)
                })
                .map(|(idx, slot)| {
                    slot.last_poll = Some(Instant::now());
                    (idx, Arc::clone(&slot.adapter))
                })
                .collect()
        };
        summary.attempted = due.len();

        let deadline = self.config.cycle_deadline;
        let retry = self.config.retry;
        let filter = self.config.filter.clone();

        let fetches = due.into_iter().map(|(idx, adapter)| {
            let filter = filter.clone();
            async move {
                let provider = adapter.provider();
                let start = Instant::now();
                let outcome =
                    match tokio::time::timeout(deadline, fetch_with_retry(&*adapter, &filter, retry))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(AdapterError::Timeout { provider }),
                    };
                metrics::record_adapter_fetch_latency(start, &provider.to_string());
                (idx, provider, outcome)
            }
        });

        // Barrier: wait for every fetch (each already bounded by the deadline).
        let outcomes = futures::future::join_all(fetches).await;

        let now = OffsetDateTime::now_utc();
        let mut batches: Vec<Vec<PricePoint>> = Vec::new();
        {
            let mut slots = self.slots.lock().await;
            for (idx, provider, outcome) in outcomes {
                let slot = &mut slots[idx];
                match outcome {
                    Ok(points) => {
                        slot.consecutive_failures = 0;
                        slot.last_success = Some(now);
                        slot.last_error_code = None;
                        summary.succeeded += 1;
                        batches.push(points);
                    }
                    Err(err) => {
                        slot.consecutive_failures += 1;
                        slot.last_error_code = Some(err.code());
                        metrics::inc_adapter_failure(&provider.to_string(), err.code());
                        match &err {
                            AdapterError::AuthFailed { .. } => {
                                slot.quarantined = true;
                                metrics::inc_adapter_quarantined(&provider.to_string());
                                warn!(%provider, "Adapter quarantined after auth failure");
                            }
                            AdapterError::Parse { .. } => {
                                // Zero points this cycle; prior entries age out.
                                warn!(%provider, error = %err, "Adapter output unparseable");
                            }
                            _ => {
                                warn!(%provider, error = %err, "Adapter yielded no points; entries will age");
                            }
                        }
                    }
                }
            }
        }

        // Merge + validate against the previous generation, then publish.
        let previous = self.table_tx.borrow().clone();
        let mut entries: HashMap<Line, PricePoint> = previous
            .iter()
            .cloned()
            .map(|p| (p.line.clone(), p))
            .collect();

        for batch in batches {
            for point in batch {
                if !point.is_valid() {
                    summary.dropped += 1;
                    metrics::inc_points_dropped(&point.line.provider.to_string(), 1);
                    continue;
                }
                match entries.get(&point.line) {
                    Some(existing) if existing.observed_at > point.observed_at => {}
                    // Equal timestamps: a non-null spot beats a null one,
                    // otherwise the existing entry stays.
                    Some(existing)
                        if existing.observed_at == point.observed_at
                            && !(point.spot.is_some() && existing.spot.is_none()) => {}
                    _ => {
                        metrics::inc_points_merged(&point.line.provider.to_string(), 1);
                        summary.merged += 1;
                        entries.insert(point.line.clone(), point);
                    }
                }
            }
        }

        // Freshness invariant: evict anything older than the ceiling.
        let ceiling =
            time::Duration::try_from(self.config.staleness_ceiling).unwrap_or(time::Duration::MAX);
        let before = entries.len();
        entries.retain(|_, p| p.age(now) <= ceiling);
        summary.evicted = before - entries.len();
        if summary.evicted > 0 {
            metrics::inc_stale_evicted(summary.evicted as u64);
        }

        // Publish: atomically swap the table in, then bump subscribers.
        let generation = previous.generation + 1;
        summary.generation = generation;
        let table = Arc::new(PricingTable::new(entries, generation, now));
        self.table_tx.send_replace(table);
        self.gen_tx.send_replace(generation);

        metrics::record_cycle_latency(cycle_start);
        info!(
            generation,
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            merged = summary.merged,
            "Published pricing table"
        );
        summary
    }

    /// Immutable view of the current table and its generation.
    ///
    /// Concurrent readers never block one another; this is a pointer load.
    pub fn snapshot(&self) -> (Arc<PricingTable>, Generation) {
        let table = self.table_tx.borrow().clone();
        let generation = table.generation;
        (table, generation)
    }

    /// Subscribe to generation bumps.
    ///
    /// Watch semantics coalesce: a slow subscriber observes only the
    /// latest generation, never a replay of intermediate bumps.
    pub fn subscribe(&self) -> watch::Receiver<Generation> {
        self.gen_tx.subscribe()
    }

    /// Block until the first successful publish, up to `grace`.
    pub async fn wait_for_first_publish(&self, grace: Duration) -> Result<(), OptimizeError> {
        if *self.gen_tx.borrow() >= 1 && !self.table_tx.borrow().is_empty() {
            return Ok(());
        }
        let mut rx = self.gen_tx.subscribe();
        let table_tx = &self.table_tx;
        let wait = rx.wait_for(|gen| *gen >= 1 && !table_tx.borrow().is_empty());
        match tokio::time::timeout(grace, wait).await {
            Ok(Ok(_)) => Ok(()),
            _ => Err(OptimizeError::PricingUnavailable {
                waited_ms: grace.as_millis() as u64,
            }),
        }
    }

    /// Health of every registered adapter.
    pub async fn adapter_health(&self) -> Vec<AdapterHealth> {
        let now = OffsetDateTime::now_utc();
        let ceiling =
            time::Duration::try_from(self.config.staleness_ceiling).unwrap_or(time::Duration::MAX);
        self.slots
            .lock()
            .await
            .iter()
            .map(|slot| {
                let status = if slot.quarantined {
                    AdapterStatus::Quarantined
                } else {
                    match slot.last_success {
                        Some(at) if now - at <= ceiling => AdapterStatus::Healthy,
                        _ => AdapterStatus::Stale,
                    }
                };
                AdapterHealth {
                    provider: slot.adapter.provider(),
                    status,
                    consecutive_failures: slot.consecutive_failures,
                    last_success: slot.last_success,
                    last_error_code: slot.last_error_code,
                }
            })
            .collect()
    }

    /// Lift a quarantine after credentials changed out of band.
    pub async fn lift_quarantine(&self, provider: ProviderId) {
        let mut slots = self.slots.lock().await;
        for slot in slots.iter_mut() {
            if slot.adapter.provider() == provider && slot.quarantined {
                slot.quarantined = false;
                slot.consecutive_failures = 0;
                info!(%provider, "Quarantine lifted");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::mock::MockAdapter;
    use rust_decimal_macros::dec;

    fn test_config() -> AggregatorConfig {
        AggregatorConfig {
            cycle_interval: Duration::from_secs(60),
            cycle_deadline: Duration::from_millis(500),
            staleness_ceiling: Duration::from_secs(600),
            retry: RetryPolicy {
                max_attempts: 2,
                base: Duration::from_millis(1),
                cap: Duration::from_millis(2),
            },
            filter: PricingFilter::all(),
        }
    }

    fn aggregator_with(adapters: Vec<Arc<dyn ProviderAdapter>>) -> Aggregator {
        Aggregator::new(adapters, test_config()).unwrap()
    }

    #[tokio::test]
    async fn cycle_merges_points_and_bumps_generation() {
        let lambda = Arc::new(
            MockAdapter::new(ProviderId::LambdaLabs)
                .with_point("gpu_1x_a100", "us-east-1", dec!(2.40), None),
        );
        let aggregator = aggregator_with(vec![lambda]);

        let summary = aggregator.run_cycle().await;
        assert_eq!(summary.generation, 1);
        assert_eq!(summary.merged, 1);

        let (table, generation) = aggregator.snapshot();
        assert_eq!(generation, 1);
        assert_eq!(table.len(), 1);

        let summary = aggregator.run_cycle().await;
        assert_eq!(summary.generation, 2);
    }

    #[tokio::test]
    async fn invalid_points_are_dropped_not_fatal() {
        let adapter = Arc::new(
            MockAdapter::new(ProviderId::Aws)
                .with_point("p4d.24xlarge", "us-east-1", dec!(16.00), Some(dec!(20.00)))
                .with_point("g5.xlarge", "us-east-1", dec!(1.006), None),
        );
        let aggregator = aggregator_with(vec![adapter]);

        let summary = aggregator.run_cycle().await;
        assert_eq!(summary.dropped, 1);
        assert_eq!(summary.merged, 1);

        let (table, _) = aggregator.snapshot();
        assert!(table
            .get(&Line::new(ProviderId::Aws, "p4d.24xlarge", "us-east-1"))
            .is_none());
    }

    #[tokio::test]
    async fn auth_failure_quarantines_adapter() {
        let bad: Arc<MockAdapter> = Arc::new(MockAdapter::new(ProviderId::RunPod).fail_auth());
        let good = Arc::new(
            MockAdapter::new(ProviderId::LambdaLabs)
                .with_point("gpu_1x_a100", "us-east-1", dec!(2.40), None),
        );
        let aggregator = aggregator_with(vec![bad.clone(), good]);

        aggregator.run_cycle().await;
        let health = aggregator.adapter_health().await;
        let runpod = health
            .iter()
            .find(|h| h.provider == ProviderId::RunPod)
            .unwrap();
        assert_eq!(runpod.status, AdapterStatus::Quarantined);

        // Quarantined adapters are skipped entirely on later cycles.
        let fetches_before = bad.fetch_count();
        aggregator.run_cycle().await;
        assert_eq!(bad.fetch_count(), fetches_before);

        aggregator.lift_quarantine(ProviderId::RunPod).await;
        bad.heal();
        aggregator.run_cycle().await;
        assert!(bad.fetch_count() > fetches_before);
    }

    #[tokio::test]
    async fn failed_adapter_retains_prior_entries() {
        let adapter = Arc::new(
            MockAdapter::new(ProviderId::Gcp)
                .with_point("a2-highgpu-1g", "us-central1", dec!(2.50), None),
        );
        let aggregator = aggregator_with(vec![adapter.clone()]);

        aggregator.run_cycle().await;
        let (table, _) = aggregator.snapshot();
        assert_eq!(table.len(), 1);

        // Next cycle exhausts retries; the generation-1 entry is retained
        // and ages toward the staleness ceiling instead of vanishing.
        adapter.set_price("a2-highgpu-1g", "us-central1", dec!(2.10), None);
        adapter.inject_transient(test_config().retry.max_attempts + 2);
        let summary = aggregator.run_cycle().await;
        assert_eq!(summary.succeeded, 0);
        let (table_after, _) = aggregator.snapshot();
        assert_eq!(table_after.len(), 1);
        let point = table_after
            .get(&Line::new(ProviderId::Gcp, "a2-highgpu-1g", "us-central1"))
            .unwrap();
        assert_eq!(point.on_demand, dec!(2.50));
    }

    #[tokio::test]
    async fn stale_entries_are_evicted() {
        let adapter = Arc::new(MockAdapter::new(ProviderId::Gcp).with_aged_point(
            "a2-highgpu-1g",
            "us-central1",
            dec!(2.50),
            None,
            Duration::from_secs(3600),
        ));
        let aggregator = aggregator_with(vec![adapter]);

        let summary = aggregator.run_cycle().await;
        assert_eq!(summary.evicted, 1);
        let (table, _) = aggregator.snapshot();
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn newer_observation_wins_merge() {
        let adapter = Arc::new(
            MockAdapter::new(ProviderId::LambdaLabs)
                .with_point("gpu_1x_a100", "us-east-1", dec!(2.40), None),
        );
        let aggregator = aggregator_with(vec![adapter.clone()]);
        aggregator.run_cycle().await;

        adapter.set_price("gpu_1x_a100", "us-east-1", dec!(2.10), None);
        aggregator.run_cycle().await;

        let (table, _) = aggregator.snapshot();
        let point = table
            .get(&Line::new(ProviderId::LambdaLabs, "gpu_1x_a100", "us-east-1"))
            .unwrap();
        assert_eq!(point.on_demand, dec!(2.10));
    }

    #[tokio::test]
    async fn equal_timestamp_duplicates_keep_existing() {
        // Duplicates within one fetch share an observed_at; the first
        // merged entry wins unless a later one adds a spot quote.
        let adapter = Arc::new(
            MockAdapter::new(ProviderId::Aws)
                .with_point("p4d.24xlarge", "us-east-1", dec!(16.00), None)
                .with_point("p4d.24xlarge", "us-east-1", dec!(14.00), None),
        );
        let aggregator = aggregator_with(vec![adapter]);
        aggregator.run_cycle().await;

        let (table, _) = aggregator.snapshot();
        let point = table
            .get(&Line::new(ProviderId::Aws, "p4d.24xlarge", "us-east-1"))
            .unwrap();
        assert_eq!(point.on_demand, dec!(16.00));
    }

    #[tokio::test]
    async fn equal_timestamp_spot_beats_null_spot() {
        let adapter = Arc::new(
            MockAdapter::new(ProviderId::Aws)
                .with_point("p4d.24xlarge", "us-east-1", dec!(16.00), None)
                .with_point("p4d.24xlarge", "us-east-1", dec!(16.00), Some(dec!(6.40))),
        );
        let aggregator = aggregator_with(vec![adapter]);
        aggregator.run_cycle().await;

        let (table, _) = aggregator.snapshot();
        let point = table
            .get(&Line::new(ProviderId::Aws, "p4d.24xlarge", "us-east-1"))
            .unwrap();
        assert_eq!(point.spot, Some(dec!(6.40)));
    }

    #[tokio::test]
    async fn subscribers_coalesce_to_latest_generation() {
        let adapter = Arc::new(
            MockAdapter::new(ProviderId::LambdaLabs)
                .with_point("gpu_1x_a100", "us-east-1", dec!(2.40), None),
        );
        let aggregator = aggregator_with(vec![adapter]);
        let mut rx = aggregator.subscribe();

        aggregator.run_cycle().await;
        aggregator.run_cycle().await;
        aggregator.run_cycle().await;

        // A slow subscriber sees only the most recent generation.
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 3);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn wait_for_first_publish_times_out_on_empty() {
        let adapter = Arc::new(MockAdapter::new(ProviderId::LambdaLabs));
        let aggregator = aggregator_with(vec![adapter]);
        let err = aggregator
            .wait_for_first_publish(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, OptimizeError::PricingUnavailable { .. }));
    }

    #[tokio::test]
    async fn start_is_single_shot() {
        let adapter = Arc::new(
            MockAdapter::new(ProviderId::LambdaLabs)
                .with_point("gpu_1x_a100", "us-east-1", dec!(2.40), None),
        );
        let aggregator = Arc::new(aggregator_with(vec![adapter]));
        let handle = aggregator.start().unwrap();
        assert!(matches!(
            aggregator.start(),
            Err(AggregatorError::AlreadyStarted)
        ));
        handle.abort();
    }
}
