//! Risk scoring for arbitrage opportunities.
//!
//! A weighted average over the factors the allocation history showed to
//! matter: spot exposure dominates, then provider reliability, region
//! distance, price volatility and performance variance. An optional demand
//! signal raises the score on spot-heavy moves into rising demand.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::catalog::{GpuKind, ProviderId};
use crate::forecast::DemandSignal;

use super::types::{OpportunityLeg, RegionClassifier};

/// Factor weights; they sum to 1.
const WEIGHT_SPOT: f64 = 0.4;
const WEIGHT_PROVIDER: f64 = 0.2;
const WEIGHT_REGION: f64 = 0.15;
const WEIGHT_VOLATILITY: f64 = 0.15;
const WEIGHT_PERF_VARIANCE: f64 = 0.1;

/// Historical reliability per provider; higher is safer.
fn provider_reliability(provider: ProviderId) -> f64 {
    match provider {
        ProviderId::Aws => 0.95,
        ProviderId::Gcp => 0.93,
        ProviderId::Azure => 0.91,
        ProviderId::LambdaLabs => 0.88,
        ProviderId::RunPod => 0.85,
    }
}

/// Relative spot churn per GPU kind; hotter parts are reclaimed more.
fn gpu_volatility(kind: GpuKind) -> f64 {
    match kind {
        GpuKind::H100 => 0.75,
        GpuKind::A100 => 0.6,
        GpuKind::Rtx4090 => 0.45,
        GpuKind::V100 | GpuKind::A10G => 0.35,
        GpuKind::L4 | GpuKind::T4 | GpuKind::Rtx3090 => 0.25,
    }
}

/// Risk inputs for one opportunity.
#[derive(Debug, Clone, Copy)]
pub struct RiskInputs<'a> {
    /// GPU kind of both legs.
    pub gpu_kind: GpuKind,
    /// The expensive leg being abandoned.
    pub from: &'a OpportunityLeg,
    /// The cheap leg being adopted.
    pub to: &'a OpportunityLeg,
    /// Fraction of the `to` leg's effective price carried by spot.
    pub to_spot_share: Decimal,
    /// Demand forecast for the kind, when a source produced one.
    pub demand: Option<DemandSignal>,
}

/// Score an opportunity's risk in [0, 1].
pub fn score(inputs: &RiskInputs<'_>, regions: &RegionClassifier) -> f64 {
    let spot_share = inputs.to_spot_share.to_f64().unwrap_or(0.0).clamp(0.0, 1.0);

    // Spot exposure, amplified by expected demand: reclaim risk grows when
    // demand for the kind is forecast to rise.
    let mut spot_risk = spot_share;
    if let Some(signal) = inputs.demand {
        if signal.expected_relative_demand > 1.0 {
            let pressure = (signal.expected_relative_demand - 1.0).min(1.0) * signal.confidence;
            spot_risk = (spot_risk * (1.0 + pressure)).min(1.0);
        }
    }

    let provider_risk = 1.0 - provider_reliability(inputs.to.provider);

    // Moving across providers diversifies concentration; staying within
    // one provider keeps the correlated-failure exposure.
    let diversity_discount = if inputs.from.provider != inputs.to.provider {
        0.5
    } else {
        1.0
    };

    let region_risk = if inputs.from.region == inputs.to.region {
        0.0
    } else if regions.same_class(&inputs.from.region, &inputs.to.region) {
        0.5
    } else {
        1.0
    };

    let volatility_risk = gpu_volatility(inputs.gpu_kind) * spot_share.max(0.2);

    // Cheaper hardware pools vary more between hosts.
    let perf_variance_risk = match inputs.to.provider {
        ProviderId::RunPod => 0.5,
        ProviderId::LambdaLabs => 0.3,
        _ => 0.15,
    };

    let weighted = WEIGHT_SPOT * spot_risk
        + WEIGHT_PROVIDER * provider_risk * diversity_discount
        + WEIGHT_REGION * region_risk
        + WEIGHT_VOLATILITY * volatility_risk
        + WEIGHT_PERF_VARIANCE * perf_variance_risk;

    weighted.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn leg(provider: ProviderId, region: &str, price: Decimal) -> OpportunityLeg {
        OpportunityLeg {
            provider,
            instance: "x".to_string(),
            region: region.to_string(),
            price,
        }
    }

    fn inputs<'a>(
        from: &'a OpportunityLeg,
        to: &'a OpportunityLeg,
        spot_share: Decimal,
    ) -> RiskInputs<'a> {
        RiskInputs {
            gpu_kind: GpuKind::A100,
            from,
            to,
            to_spot_share: spot_share,
            demand: None,
        }
    }

    #[test]
    fn spot_share_raises_risk() {
        let regions = RegionClassifier::default();
        let from = leg(ProviderId::Gcp, "us-central1", dec!(3.00));
        let to = leg(ProviderId::Aws, "us-east-1", dec!(2.00));

        let low = score(&inputs(&from, &to, dec!(0)), &regions);
        let high = score(&inputs(&from, &to, dec!(1)), &regions);
        assert!(high > low);
    }

    #[test]
    fn cross_region_raises_risk() {
        let regions = RegionClassifier::default();
        let from = leg(ProviderId::Gcp, "us-central1", dec!(3.00));
        let same = leg(ProviderId::Aws, "us-central1", dec!(2.00));
        let near = leg(ProviderId::Aws, "us-east-1", dec!(2.00));

        let same_score = score(&inputs(&from, &same, dec!(0)), &regions);
        let near_score = score(&inputs(&from, &near, dec!(0)), &regions);
        assert!(near_score > same_score);
    }

    #[test]
    fn provider_diversification_discounts_risk() {
        let regions = RegionClassifier::default();
        let from_same = leg(ProviderId::RunPod, "US-East", dec!(3.00));
        let from_other = leg(ProviderId::Aws, "US-East", dec!(3.00));
        let to = leg(ProviderId::RunPod, "US-East", dec!(2.00));

        let within = score(&inputs(&from_same, &to, dec!(0)), &regions);
        let diversifying = score(&inputs(&from_other, &to, dec!(0)), &regions);
        assert!(diversifying < within);
    }

    #[test]
    fn demand_pressure_amplifies_spot_risk() {
        let regions = RegionClassifier::default();
        let from = leg(ProviderId::Gcp, "us-central1", dec!(3.00));
        let to = leg(ProviderId::Aws, "us-east-1", dec!(2.00));

        let mut with_demand = inputs(&from, &to, dec!(0.8));
        with_demand.demand = Some(DemandSignal {
            expected_relative_demand: 1.5,
            confidence: 1.0,
        });
        let neutral = score(&inputs(&from, &to, dec!(0.8)), &regions);
        let pressured = score(&with_demand, &regions);
        assert!(pressured > neutral);
    }

    #[test]
    fn score_stays_in_unit_interval() {
        let regions = RegionClassifier::default();
        let from = leg(ProviderId::Aws, "us-east-1", dec!(3.00));
        let to = leg(ProviderId::RunPod, "atlantis-9", dec!(1.00));
        let mut worst = inputs(&from, &to, dec!(1));
        worst.gpu_kind = GpuKind::H100;
        worst.demand = Some(DemandSignal {
            expected_relative_demand: 3.0,
            confidence: 1.0,
        });
        let s = score(&worst, &regions);
        assert!((0.0..=1.0).contains(&s));
    }
}
