//! Arbitrage opportunity types and region equivalence classes.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::catalog::{GpuKind, ProviderId};
use crate::error::ArbitrageError;

/// One leg of an opportunity: a priced line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpportunityLeg {
    /// Provider of the leg.
    pub provider: ProviderId,
    /// Instance type name.
    pub instance: String,
    /// Region of the quote.
    pub region: String,
    /// Effective hourly price used for comparison.
    pub price: Decimal,
}

/// A cross-provider savings opportunity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    /// GPU kind both legs share.
    pub gpu_kind: GpuKind,
    /// The expensive side.
    pub from: OpportunityLeg,
    /// The cheap side.
    pub to: OpportunityLeg,
    /// `(from.price - to.price) / from.price`.
    pub savings_pct: Decimal,
    /// Risk of acting on the opportunity, in [0, 1].
    pub risk_score: f64,
    /// When the detector observed the delta.
    #[serde(with = "time::serde::rfc3339")]
    pub detected_at: OffsetDateTime,
}

impl Opportunity {
    /// Suppression key: opportunities for the same leg pair share a cooldown.
    pub fn pair_key(&self) -> (OpportunityLeg, OpportunityLeg) {
        (self.from.clone(), self.to.clone())
    }
}

/// Continent-level region equivalence, conservative by default: only
/// same-continent regions are interchangeable, and unknown regions match
/// nothing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegionClass {
    /// North American regions.
    NorthAmerica,
    /// South American regions.
    SouthAmerica,
    /// European regions.
    Europe,
    /// Asia-Pacific regions.
    AsiaPacific,
    /// Middle Eastern regions.
    MiddleEast,
    /// African regions.
    Africa,
    /// Australia and New Zealand.
    Oceania,
    /// Region the mapping does not recognize; a singleton class.
    Unknown(String),
}

impl RegionClass {
    /// Parse an override class name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "north-america" => Some(RegionClass::NorthAmerica),
            "south-america" => Some(RegionClass::SouthAmerica),
            "europe" => Some(RegionClass::Europe),
            "asia-pacific" => Some(RegionClass::AsiaPacific),
            "middle-east" => Some(RegionClass::MiddleEast),
            "africa" => Some(RegionClass::Africa),
            "oceania" => Some(RegionClass::Oceania),
            _ => None,
        }
    }
}

/// The static region-to-class mapping, with configured overrides applied
/// first.
#[derive(Debug, Clone, Default)]
pub struct RegionClassifier {
    overrides: HashMap<String, RegionClass>,
}

impl RegionClassifier {
    /// Build a classifier with explicit region overrides.
    pub fn with_overrides(overrides: HashMap<String, RegionClass>) -> Self {
        Self { overrides }
    }

    /// Build a classifier from configured `(region, class name)` pairs,
    /// rejecting class names the mapping does not define.
    pub fn from_named_overrides(pairs: &[(String, String)]) -> Result<Self, ArbitrageError> {
        let mut overrides = HashMap::new();
        for (region, name) in pairs {
            let class = RegionClass::from_name(name).ok_or_else(|| {
                ArbitrageError::UnknownRegionClass { name: name.clone() }
            })?;
            overrides.insert(region.clone(), class);
        }
        Ok(Self { overrides })
    }

    /// Classify a region string.
    pub fn classify(&self, region: &str) -> RegionClass {
        if let Some(class) = self.overrides.get(region) {
            return class.clone();
        }

        let lowered = region.to_ascii_lowercase();
        // Ordered rules; the longer, more specific patterns come first so
        // "australia" never falls into the "us" bucket.
        const RULES: &[(&str, RegionClass)] = &[
            ("australia", RegionClass::Oceania),
            ("syd", RegionClass::Oceania),
            ("southamerica", RegionClass::SouthAmerica),
            ("sa-east", RegionClass::SouthAmerica),
            ("brazil", RegionClass::SouthAmerica),
            ("northeurope", RegionClass::Europe),
            ("westeurope", RegionClass::Europe),
            ("europe", RegionClass::Europe),
            ("eu-", RegionClass::Europe),
            ("uk", RegionClass::Europe),
            ("france", RegionClass::Europe),
            ("germany", RegionClass::Europe),
            ("southeastasia", RegionClass::AsiaPacific),
            ("eastasia", RegionClass::AsiaPacific),
            ("asia", RegionClass::AsiaPacific),
            ("ap-", RegionClass::AsiaPacific),
            ("japan", RegionClass::AsiaPacific),
            ("korea", RegionClass::AsiaPacific),
            ("india", RegionClass::AsiaPacific),
            ("me-", RegionClass::MiddleEast),
            ("uae", RegionClass::MiddleEast),
            ("africa", RegionClass::Africa),
            ("canada", RegionClass::NorthAmerica),
            ("ca-central", RegionClass::NorthAmerica),
            ("us-", RegionClass::NorthAmerica),
            ("us_", RegionClass::NorthAmerica),
            ("eastus", RegionClass::NorthAmerica),
            ("westus", RegionClass::NorthAmerica),
            ("centralus", RegionClass::NorthAmerica),
            ("northcentralus", RegionClass::NorthAmerica),
            ("southcentralus", RegionClass::NorthAmerica),
        ];
        for (needle, class) in RULES {
            if lowered.starts_with(needle) || lowered.contains(needle) {
                return class.clone();
            }
        }

        // "US-East" style names without a dash prefix.
        if lowered.starts_with("us") {
            return RegionClass::NorthAmerica;
        }

        RegionClass::Unknown(region.to_string())
    }

    /// Whether two regions are interchangeable for arbitrage.
    ///
    /// Identical region strings always match; unknown regions match
    /// nothing else.
    pub fn same_class(&self, a: &str, b: &str) -> bool {
        if a == b {
            return true;
        }
        let class_a = self.classify(a);
        if matches!(class_a, RegionClass::Unknown(_)) {
            return false;
        }
        class_a == self.classify(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aws_azure_gcp_spellings_collapse() {
        let classifier = RegionClassifier::default();
        assert_eq!(classifier.classify("us-east-1"), RegionClass::NorthAmerica);
        assert_eq!(classifier.classify("eastus"), RegionClass::NorthAmerica);
        assert_eq!(classifier.classify("us-central1"), RegionClass::NorthAmerica);
        assert_eq!(classifier.classify("US-East"), RegionClass::NorthAmerica);
        assert_eq!(classifier.classify("eu-west-1"), RegionClass::Europe);
        assert_eq!(classifier.classify("northeurope"), RegionClass::Europe);
        assert_eq!(classifier.classify("europe-west4"), RegionClass::Europe);
        assert_eq!(classifier.classify("ap-southeast-1"), RegionClass::AsiaPacific);
        assert_eq!(classifier.classify("southeastasia"), RegionClass::AsiaPacific);
    }

    #[test]
    fn australia_is_not_north_america() {
        let classifier = RegionClassifier::default();
        assert_eq!(classifier.classify("australiaeast"), RegionClass::Oceania);
    }

    #[test]
    fn unknown_regions_are_singletons() {
        let classifier = RegionClassifier::default();
        assert!(classifier.same_class("atlantis-1", "atlantis-1"));
        assert!(!classifier.same_class("atlantis-1", "us-east-1"));
    }

    #[test]
    fn same_class_is_conservative_across_continents() {
        let classifier = RegionClassifier::default();
        assert!(classifier.same_class("us-east-1", "eastus"));
        assert!(!classifier.same_class("us-east-1", "eu-west-1"));
    }

    #[test]
    fn overrides_take_precedence() {
        let mut overrides = HashMap::new();
        overrides.insert("atlantis-1".to_string(), RegionClass::Europe);
        let classifier = RegionClassifier::with_overrides(overrides);
        assert!(classifier.same_class("atlantis-1", "eu-west-1"));
    }

    #[test]
    fn named_overrides_resolve_classes() {
        let pairs = vec![("atlantis-1".to_string(), "oceania".to_string())];
        let classifier = RegionClassifier::from_named_overrides(&pairs).unwrap();
        assert!(classifier.same_class("atlantis-1", "australiaeast"));
    }

    #[test]
    fn named_overrides_reject_unknown_class() {
        let pairs = vec![("atlantis-1".to_string(), "mars".to_string())];
        let err = RegionClassifier::from_named_overrides(&pairs).unwrap_err();
        assert!(matches!(err, ArbitrageError::UnknownRegionClass { name } if name == "mars"));
    }
}
