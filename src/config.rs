//! Application configuration loaded from environment variables.
//!
//! All variables carry the `CLOUDARB_` prefix, e.g. `CLOUDARB_CYCLE_INTERVAL_SECS`.

use rust_decimal::Decimal;
use serde::Deserialize;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Aggregation Cadence ===
    /// Seconds between aggregation cycles.
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,

    /// Max wall-clock milliseconds per aggregation cycle.
    #[serde(default = "default_cycle_deadline")]
    pub cycle_deadline_ms: u64,

    /// Seconds before a provider's entries are evicted as stale.
    #[serde(default = "default_staleness_ceiling")]
    pub staleness_ceiling_secs: u64,

    // === Adapter I/O Discipline ===
    /// Max retry attempts per adapter fetch within a cycle.
    #[serde(default = "default_retry_attempts")]
    pub adapter_retry_attempts: u32,

    /// Initial backoff between adapter retries, in milliseconds.
    #[serde(default = "default_backoff_base")]
    pub adapter_backoff_base_ms: u64,

    /// Backoff ceiling, in milliseconds.
    #[serde(default = "default_backoff_cap")]
    pub adapter_backoff_cap_ms: u64,

    /// Per-request HTTP timeout for adapter calls, in milliseconds.
    #[serde(default = "default_http_timeout")]
    pub adapter_http_timeout_ms: u64,

    /// HTTP connection pool size per adapter.
    #[serde(default = "default_http_pool_size")]
    pub adapter_http_pool_size: usize,

    // === Solver ===
    /// Default per-request solve deadline, in seconds.
    #[serde(default = "default_solver_deadline")]
    pub solver_deadline_secs: u64,

    /// Target MILP optimality gap.
    #[serde(default = "default_solver_gap")]
    pub solver_gap: f64,

    /// Max concurrent solves.
    #[serde(default = "default_solver_pool_size")]
    pub solver_pool_size: usize,

    /// Solution cache capacity (entries).
    #[serde(default = "default_cache_capacity")]
    pub solution_cache_capacity: usize,

    /// Seconds a cold-start optimization waits for the first publish.
    #[serde(default = "default_first_publish_grace")]
    pub first_publish_grace_secs: u64,

    /// Weight of cost vs. performance in the balanced objective.
    #[serde(default = "default_balanced_lambda")]
    pub balanced_lambda: f64,

    // === Arbitrage Detection ===
    /// Minimum savings fraction for an opportunity to be emitted.
    #[serde(default = "default_arbitrage_threshold")]
    pub arbitrage_threshold: Decimal,

    /// Seconds a (from, to) pair is suppressed after emission.
    #[serde(default = "default_arbitrage_cooldown")]
    pub arbitrage_cooldown_secs: u64,

    /// Risk tolerance used for the detector's effective-price blend.
    #[serde(default = "default_arbitrage_risk_tolerance")]
    pub arbitrage_risk_tolerance: Decimal,

    /// Opportunity broadcast buffer size.
    #[serde(default = "default_opportunity_buffer")]
    pub opportunity_buffer: usize,

    // === Catalog & Region Classes ===
    /// Optional path to a catalog overlay JSON file.
    #[serde(default)]
    pub catalog_path: Option<String>,

    /// Extra region-class assignments as `region=class` pairs, comma separated.
    #[serde(default)]
    pub region_classes: Option<String>,

    // === Provider Credentials & Endpoints ===
    /// AWS price list endpoint (public bulk API).
    #[serde(default = "default_aws_pricing_url")]
    pub aws_pricing_url: String,

    /// GCP pricing endpoint.
    #[serde(default = "default_gcp_pricing_url")]
    pub gcp_pricing_url: String,

    /// GCP API key.
    #[serde(default)]
    pub gcp_api_key: Option<String>,

    /// Azure retail prices endpoint (public).
    #[serde(default = "default_azure_pricing_url")]
    pub azure_pricing_url: String,

    /// Lambda Labs API endpoint.
    #[serde(default = "default_lambda_api_url")]
    pub lambda_api_url: String,

    /// Lambda Labs API key.
    #[serde(default)]
    pub lambda_api_key: Option<String>,

    /// RunPod API endpoint.
    #[serde(default = "default_runpod_api_url")]
    pub runpod_api_url: String,

    /// RunPod API key.
    #[serde(default)]
    pub runpod_api_key: Option<String>,

    // === Server Configuration ===
    /// HTTP port for health/status endpoints.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub rust_log: String,
}

fn default_cycle_interval() -> u64 {
    60
}

fn default_cycle_deadline() -> u64 {
    5_000
}

fn default_staleness_ceiling() -> u64 {
    600
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_backoff_base() -> u64 {
    200
}

fn default_backoff_cap() -> u64 {
    2_000
}

fn default_http_timeout() -> u64 {
    3_000
}

fn default_http_pool_size() -> usize {
    4
}

fn default_solver_deadline() -> u64 {
    30
}

fn default_solver_gap() -> f64 {
    0.001
}

fn default_solver_pool_size() -> usize {
    4
}

fn default_cache_capacity() -> usize {
    128
}

fn default_first_publish_grace() -> u64 {
    10
}

fn default_balanced_lambda() -> f64 {
    0.5
}

fn default_arbitrage_threshold() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

fn default_arbitrage_cooldown() -> u64 {
    300
}

fn default_arbitrage_risk_tolerance() -> Decimal {
    Decimal::new(5, 1) // 0.5
}

fn default_opportunity_buffer() -> usize {
    256
}

fn default_aws_pricing_url() -> String {
    "https://pricing.us-east-1.amazonaws.com".to_string()
}

fn default_gcp_pricing_url() -> String {
    "https://cloudbilling.googleapis.com".to_string()
}

fn default_azure_pricing_url() -> String {
    "https://prices.azure.com".to_string()
}

fn default_lambda_api_url() -> String {
    "https://cloud.lambdalabs.com".to_string()
}

fn default_runpod_api_url() -> String {
    "https://api.runpod.io".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::prefixed("CLOUDARB_").from_env()
    }

    /// Check that the configuration is internally consistent.
    pub fn validate(&self) -> Result<(), String> {
        if self.cycle_interval_secs == 0 {
            return Err("CYCLE_INTERVAL_SECS must be positive".to_string());
        }

        if self.cycle_deadline_ms == 0 {
            return Err("CYCLE_DEADLINE_MS must be positive".to_string());
        }

        if self.cycle_deadline_ms / 1_000 > self.cycle_interval_secs {
            return Err("cycle deadline must not exceed the cycle interval".to_string());
        }

        if self.solver_pool_size == 0 {
            return Err("SOLVER_POOL_SIZE must be at least 1".to_string());
        }

        if !(0.0..=1.0).contains(&self.balanced_lambda) {
            return Err("BALANCED_LAMBDA must be within [0, 1]".to_string());
        }

        if self.arbitrage_risk_tolerance < Decimal::ZERO
            || self.arbitrage_risk_tolerance > Decimal::ONE
        {
            return Err("ARBITRAGE_RISK_TOLERANCE must be within [0, 1]".to_string());
        }

        if self.arbitrage_threshold <= Decimal::ZERO || self.arbitrage_threshold >= Decimal::ONE {
            return Err("ARBITRAGE_THRESHOLD must be within (0, 1)".to_string());
        }

        Ok(())
    }

    /// Parse the extra region-class assignments into pairs.
    ///
    /// Format: `us-east-1=north-america,syd-1=oceania`. Malformed entries
    /// are rejected rather than skipped.
    pub fn region_class_overrides(&self) -> Result<Vec<(String, String)>, String> {
        let Some(raw) = &self.region_classes else {
            return Ok(Vec::new());
        };

        let mut pairs = Vec::new();
        for entry in raw.split(',').filter(|e| !e.trim().is_empty()) {
            let (region, class) = entry
                .split_once('=')
                .ok_or_else(|| format!("malformed region class entry: {entry}"))?;
            pairs.push((region.trim().to_string(), class.trim().to_string()));
        }
        Ok(pairs)
    }
}

impl Default for Config {
    fn default() -> Self {
        // envy with no CLOUDARB_ vars set yields all defaults.
        serde_json::from_str("{}").expect("default config must deserialize")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values_are_sensible() {
        let config = Config::default();
        assert_eq!(config.cycle_interval_secs, 60);
        assert_eq!(config.cycle_deadline_ms, 5_000);
        assert_eq!(config.staleness_ceiling_secs, 600);
        assert_eq!(config.solver_deadline_secs, 30);
        assert_eq!(config.arbitrage_threshold, Decimal::new(5, 2));
        assert_eq!(config.arbitrage_cooldown_secs, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let config = Config {
            cycle_interval_secs: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_deadline_beyond_interval() {
        let config = Config {
            cycle_interval_secs: 2,
            cycle_deadline_ms: 10_000,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_lambda() {
        let config = Config {
            balanced_lambda: 1.5,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn region_class_overrides_parse() {
        let config = Config {
            region_classes: Some("us-east-1=north-america, syd-1=oceania".to_string()),
            ..Config::default()
        };
        let pairs = config.region_class_overrides().unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0], ("us-east-1".to_string(), "north-america".to_string()));
    }

    #[test]
    fn region_class_overrides_reject_malformed() {
        let config = Config {
            region_classes: Some("us-east-1".to_string()),
            ..Config::default()
        };
        assert!(config.region_class_overrides().is_err());
    }
}
