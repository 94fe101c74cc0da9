//! Unified error types for the CloudArb core.

use thiserror::Error;

use crate::catalog::ProviderId;

/// Unified error type for the CloudArb core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Config(#[from] envy::Error),

    /// Catalog loading error.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Provider adapter error.
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// Pricing aggregator error.
    #[error("aggregator error: {0}")]
    Aggregator(#[from] AggregatorError),

    /// Optimization error.
    #[error("optimization error: {0}")]
    Optimize(#[from] OptimizeError),

    /// Arbitrage detection error.
    #[error("arbitrage error: {0}")]
    Arbitrage(#[from] ArbitrageError),

    /// HTTP request error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Provider adapter failure modes.
///
/// The aggregator treats each variant differently: transient errors are
/// retried within the cycle, auth failures quarantine the adapter, and
/// parse errors drop the adapter's output for the cycle.
#[derive(Error, Debug)]
pub enum AdapterError {
    /// Retryable failure (HTTP 5xx, 429, connection errors).
    #[error("transient failure from {provider}: {message}")]
    Transient {
        /// Provider that failed.
        provider: ProviderId,
        /// HTTP status if the request completed.
        status: Option<u16>,
        /// Short failure description.
        message: String,
    },

    /// Authentication rejected (401/403). Not retryable; the adapter is
    /// quarantined until credentials change.
    #[error("authentication failed for {provider}")]
    AuthFailed {
        /// Provider whose credentials were rejected.
        provider: ProviderId,
    },

    /// Response body did not match the expected shape.
    #[error("unparseable response from {provider}: {message}")]
    Parse {
        /// Provider that returned the malformed payload.
        provider: ProviderId,
        /// Truncated description of the mismatch (never the raw body).
        message: String,
    },

    /// The fetch did not complete within its allotted deadline.
    #[error("fetch from {provider} timed out")]
    Timeout {
        /// Provider that ran over the deadline.
        provider: ProviderId,
    },

    /// The adapter is missing required credentials.
    #[error("{provider} credentials not configured")]
    NotConfigured {
        /// Provider lacking credentials.
        provider: ProviderId,
    },
}

impl AdapterError {
    /// Whether the failure is worth retrying within the same cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AdapterError::Transient { .. })
    }

    /// The provider this error originated from.
    pub fn provider(&self) -> ProviderId {
        match self {
            AdapterError::Transient { provider, .. }
            | AdapterError::AuthFailed { provider }
            | AdapterError::Parse { provider, .. }
            | AdapterError::Timeout { provider }
            | AdapterError::NotConfigured { provider } => *provider,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            AdapterError::Transient { .. } => "adapter_transient",
            AdapterError::AuthFailed { .. } => "adapter_auth_failed",
            AdapterError::Parse { .. } => "adapter_parse_error",
            AdapterError::Timeout { .. } => "adapter_timeout",
            AdapterError::NotConfigured { .. } => "adapter_not_configured",
        }
    }

    /// Classify a reqwest error for a given provider.
    pub fn from_http(provider: ProviderId, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return AdapterError::Timeout { provider };
        }
        let status = err.status().map(|s| s.as_u16());
        match status {
            Some(401) | Some(403) => AdapterError::AuthFailed { provider },
            _ => AdapterError::Transient {
                provider,
                status,
                message: sanitize_reqwest(&err),
            },
        }
    }

    /// Classify an HTTP status code returned by a provider API.
    pub fn from_status(provider: ProviderId, status: u16) -> Self {
        match status {
            401 | 403 => AdapterError::AuthFailed { provider },
            _ => AdapterError::Transient {
                provider,
                status: Some(status),
                message: format!("HTTP {}", status),
            },
        }
    }
}

/// Strip anything that could carry response-body content out of a reqwest
/// error description. Provider bodies must never reach callers or logs.
fn sanitize_reqwest(err: &reqwest::Error) -> String {
    if err.is_connect() {
        "connection failed".to_string()
    } else if err.is_decode() {
        "body decode failed".to_string()
    } else {
        "request failed".to_string()
    }
}

/// Pricing aggregator errors.
#[derive(Error, Debug)]
pub enum AggregatorError {
    /// `start` was called more than once.
    #[error("aggregator already started")]
    AlreadyStarted,

    /// No adapters were registered.
    #[error("no provider adapters registered")]
    NoAdapters,
}

/// Optimization engine errors.
///
/// Infeasible and timed-out solves are *not* errors; they come back as
/// successful [`Allocation`](crate::optimize::Allocation)s carrying the
/// corresponding status.
#[derive(Error, Debug)]
pub enum OptimizeError {
    /// Request failed validation before any solve was attempted.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No pricing table was published within the grace period.
    #[error("pricing unavailable after waiting {waited_ms}ms")]
    PricingUnavailable {
        /// How long the caller waited for a first publish.
        waited_ms: u64,
    },

    /// The solver library itself failed; safe to retry.
    #[error("solver failure: {0}")]
    SolverFailure(String),

    /// An async optimization run id was not found.
    #[error("unknown optimization run {0}")]
    RunNotFound(String),
}

impl OptimizeError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            OptimizeError::InvalidRequest(_) => "invalid_request",
            OptimizeError::PricingUnavailable { .. } => "pricing_unavailable",
            OptimizeError::SolverFailure(_) => "solver_failure",
            OptimizeError::RunNotFound(_) => "run_not_found",
        }
    }
}

/// Arbitrage detector errors.
#[derive(Error, Debug)]
pub enum ArbitrageError {
    /// A region-class override named a class the mapping does not define.
    #[error("unknown region class: {name}")]
    UnknownRegionClass {
        /// The class name that failed to resolve.
        name: String,
    },
}

impl ArbitrageError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ArbitrageError::UnknownRegionClass { .. } => "unknown_region_class",
        }
    }
}

/// Catalog loading and validation errors.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Catalog file could not be read.
    #[error("failed to read catalog file {path}: {source}")]
    Read {
        /// Path that failed.
        path: String,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// Catalog file could not be parsed.
    #[error("failed to parse catalog file {path}: {source}")]
    Parse {
        /// Path that failed.
        path: String,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// An instance entry declared an impossible spec.
    #[error("invalid instance spec {provider}/{name}: {reason}")]
    InvalidSpec {
        /// Provider owning the entry.
        provider: ProviderId,
        /// Instance type name.
        name: String,
        /// What was wrong.
        reason: String,
    },
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, CoreError>;
