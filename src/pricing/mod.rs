//! Pricing ingestion: provider adapters and the aggregator.
//!
//! This module handles:
//! - The uniform provider adapter contract and retry discipline
//! - Five concrete adapters (AWS, Azure, GCP, Lambda Labs, RunPod)
//! - The aggregation cycle maintaining the authoritative pricing table
//! - A mock adapter for testing

pub mod adapter;
pub mod aggregator;
pub mod aws;
pub mod azure;
pub mod gcp;
pub mod lambda_labs;
pub mod mock;
pub mod runpod;
pub mod types;

pub use adapter::{build_http_client, AdapterCapabilities, ProviderAdapter, RetryPolicy};
pub use aggregator::{AdapterHealth, AdapterStatus, Aggregator, AggregatorConfig, CycleSummary};
pub use aws::AwsAdapter;
pub use azure::AzureAdapter;
pub use gcp::GcpAdapter;
pub use lambda_labs::LambdaLabsAdapter;
pub use mock::MockAdapter;
pub use runpod::RunPodAdapter;
pub use types::{Generation, Line, PricePoint, PricingFilter, PricingTable};
