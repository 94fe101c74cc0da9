//! Provider and instance-type catalog.
//!
//! The catalog is the slow-moving half of the data model: which providers
//! exist, which GPU instance types they sell, and the hardware behind each
//! type. Pricing is the fast-moving half and lives in [`crate::pricing`].
//!
//! A built-in catalog covering the GPU fleets of all five providers ships
//! with the crate; deployments can override or extend it with a JSON file.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::error::CatalogError;

/// Supported cloud providers.
///
/// Variant order matches ASCII order of the wire names, which the
/// optimizer relies on for deterministic tie-breaking.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
pub enum ProviderId {
    /// Amazon Web Services.
    #[strum(serialize = "aws", ascii_case_insensitive)]
    #[serde(rename = "aws")]
    Aws,
    /// Microsoft Azure.
    #[strum(serialize = "azure", ascii_case_insensitive)]
    #[serde(rename = "azure")]
    Azure,
    /// Google Cloud Platform.
    #[strum(serialize = "gcp", ascii_case_insensitive)]
    #[serde(rename = "gcp")]
    Gcp,
    /// Lambda Labs.
    #[strum(to_string = "lambda-labs", serialize = "lambda", ascii_case_insensitive)]
    #[serde(rename = "lambda-labs", alias = "lambda")]
    LambdaLabs,
    /// RunPod.
    #[strum(serialize = "runpod", ascii_case_insensitive)]
    #[serde(rename = "runpod")]
    RunPod,
}

impl ProviderId {
    /// Whether the provider operates a spot/preemptible market.
    pub fn supports_spot(&self) -> bool {
        matches!(self, ProviderId::Aws | ProviderId::Azure | ProviderId::Gcp)
    }
}

/// Canonical GPU kinds.
///
/// Providers spell these many ways (`A100`, `a100`, `NVIDIA A100`,
/// `nvidia-tesla-a100`); [`GpuKind::canonicalize`] folds them all into one
/// value so prices from different clouds are comparable.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum GpuKind {
    /// NVIDIA A100.
    #[strum(to_string = "a100", serialize = "nvidia a100", serialize = "nvidia-tesla-a100")]
    A100,
    /// NVIDIA H100.
    #[strum(to_string = "h100", serialize = "nvidia h100")]
    H100,
    /// NVIDIA V100.
    #[strum(to_string = "v100", serialize = "nvidia v100", serialize = "nvidia-tesla-v100")]
    V100,
    /// NVIDIA T4.
    #[strum(to_string = "t4", serialize = "nvidia t4", serialize = "nvidia-tesla-t4")]
    T4,
    /// NVIDIA L4.
    #[strum(to_string = "l4", serialize = "nvidia l4")]
    L4,
    /// NVIDIA A10G.
    #[strum(to_string = "a10g", serialize = "nvidia a10g")]
    A10G,
    /// NVIDIA RTX 4090.
    #[strum(to_string = "rtx4090", serialize = "rtx 4090", serialize = "nvidia rtx 4090")]
    Rtx4090,
    /// NVIDIA RTX 3090.
    #[strum(to_string = "rtx3090", serialize = "rtx 3090", serialize = "nvidia rtx 3090")]
    Rtx3090,
}

impl GpuKind {
    /// Map a provider-reported GPU name onto a canonical kind.
    ///
    /// Returns `None` for GPUs this catalog does not track; adapters drop
    /// such instances rather than invent a kind.
    pub fn canonicalize(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if let Ok(kind) = trimmed.parse::<GpuKind>() {
            return Some(kind);
        }
        // Provider strings often wrap the kind in extra tokens
        // ("NVIDIA A100-SXM4-80GB", "1x RTX 4090").
        let lowered = trimmed.to_ascii_lowercase().replace(['_', '-'], " ");
        for (needle, kind) in [
            ("h100", GpuKind::H100),
            ("a100", GpuKind::A100),
            ("v100", GpuKind::V100),
            ("a10g", GpuKind::A10G),
            ("rtx 4090", GpuKind::Rtx4090),
            ("rtx4090", GpuKind::Rtx4090),
            ("rtx 3090", GpuKind::Rtx3090),
            ("rtx3090", GpuKind::Rtx3090),
            ("t4", GpuKind::T4),
            ("l4", GpuKind::L4),
        ] {
            if lowered.contains(needle) {
                return Some(kind);
            }
        }
        None
    }
}

/// Hardware description of one instance type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceSpec {
    /// Provider-side instance type name (unique within the provider).
    pub name: String,
    /// Canonical GPU kind on board.
    pub gpu_kind: GpuKind,
    /// Number of GPUs per instance.
    pub gpu_count: u32,
    /// Total GPU memory in GB.
    pub gpu_memory_gb: u32,
    /// vCPU count.
    pub vcpu: u32,
    /// System RAM in GB.
    pub ram_gb: u32,
    /// Static benchmark score in [0, 100]; 50 when unmeasured.
    #[serde(default = "default_perf_score")]
    pub perf_score: f64,
    /// How many instances of this type a single allocation may claim.
    #[serde(default = "default_capacity")]
    pub capacity: u32,
}

fn default_perf_score() -> f64 {
    50.0
}

fn default_capacity() -> u32 {
    64
}

/// On-disk catalog file shape.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogFile {
    providers: Vec<CatalogProviderEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogProviderEntry {
    provider: ProviderId,
    instances: Vec<InstanceSpec>,
}

/// The instance-type catalog, keyed by (provider, instance name).
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    specs: HashMap<(ProviderId, String), InstanceSpec>,
}

impl Catalog {
    /// Build the built-in catalog.
    pub fn builtin() -> Self {
        let mut catalog = Catalog::default();
        for (provider, specs) in builtin_entries() {
            for spec in specs {
                catalog.insert(provider, spec);
            }
        }
        catalog
    }

    /// Load a catalog overlay from a JSON file and merge it over `self`.
    ///
    /// Entries in the file replace built-in entries with the same
    /// (provider, name) key. Unknown JSON keys are rejected.
    pub fn merge_from_file(&mut self, path: &Path) -> Result<usize, CatalogError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let file: CatalogFile =
            serde_json::from_str(&raw).map_err(|source| CatalogError::Parse {
                path: path.display().to_string(),
                source,
            })?;

        let mut merged = 0;
        for entry in file.providers {
            for spec in entry.instances {
                if spec.gpu_count == 0 {
                    return Err(CatalogError::InvalidSpec {
                        provider: entry.provider,
                        name: spec.name,
                        reason: "gpu_count must be >= 1".to_string(),
                    });
                }
                self.insert(entry.provider, spec);
                merged += 1;
            }
        }
        Ok(merged)
    }

    fn insert(&mut self, provider: ProviderId, spec: InstanceSpec) {
        self.specs.insert((provider, spec.name.clone()), spec);
    }

    /// Look up the spec for an instance type.
    pub fn spec(&self, provider: ProviderId, instance: &str) -> Option<&InstanceSpec> {
        self.specs.get(&(provider, instance.to_string()))
    }

    /// All instance types sold by a provider.
    pub fn instances_for(&self, provider: ProviderId) -> Vec<&InstanceSpec> {
        let mut specs: Vec<&InstanceSpec> = self
            .specs
            .iter()
            .filter(|((p, _), _)| *p == provider)
            .map(|(_, spec)| spec)
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Instance types of a provider carrying a given GPU kind.
    pub fn instances_with_gpu(&self, provider: ProviderId, kind: GpuKind) -> Vec<&InstanceSpec> {
        self.instances_for(provider)
            .into_iter()
            .filter(|s| s.gpu_kind == kind)
            .collect()
    }

    /// Total number of catalog entries.
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Whether the catalog holds no entries.
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// Static per-provider instance tables.
///
/// GPU/vCPU/RAM figures follow each provider's published instance sheets;
/// perf scores are relative benchmark positions with H100 fleets at the top.
fn builtin_entries() -> Vec<(ProviderId, Vec<InstanceSpec>)> {
    fn spec(
        name: &str,
        gpu_kind: GpuKind,
        gpu_count: u32,
        gpu_memory_gb: u32,
        vcpu: u32,
        ram_gb: u32,
        perf_score: f64,
    ) -> InstanceSpec {
        InstanceSpec {
            name: name.to_string(),
            gpu_kind,
            gpu_count,
            gpu_memory_gb,
            vcpu,
            ram_gb,
            perf_score,
            capacity: default_capacity(),
        }
    }

    vec![
        (
            ProviderId::Aws,
            vec![
                spec("p3.2xlarge", GpuKind::V100, 1, 16, 8, 61, 55.0),
                spec("p3.8xlarge", GpuKind::V100, 4, 64, 32, 244, 58.0),
                spec("p3.16xlarge", GpuKind::V100, 8, 128, 64, 488, 60.0),
                spec("p4d.24xlarge", GpuKind::A100, 8, 320, 96, 1152, 82.0),
                spec("p5.48xlarge", GpuKind::H100, 8, 640, 192, 2048, 97.0),
                spec("g4dn.xlarge", GpuKind::T4, 1, 16, 4, 16, 30.0),
                spec("g4dn.12xlarge", GpuKind::T4, 4, 64, 48, 192, 34.0),
                spec("g5.xlarge", GpuKind::A10G, 1, 24, 4, 16, 42.0),
                spec("g5.12xlarge", GpuKind::A10G, 4, 96, 48, 192, 46.0),
                spec("g5.48xlarge", GpuKind::A10G, 8, 192, 192, 768, 48.0),
            ],
        ),
        (
            ProviderId::Azure,
            vec![
                spec("Standard_NC6s_v3", GpuKind::V100, 1, 16, 6, 112, 54.0),
                spec("Standard_NC24s_v3", GpuKind::V100, 4, 64, 24, 448, 57.0),
                spec("Standard_ND96asr_v4", GpuKind::A100, 8, 320, 96, 900, 80.0),
                spec("Standard_NC24ads_A100_v4", GpuKind::A100, 1, 80, 24, 220, 78.0),
                spec("Standard_ND96isr_H100_v5", GpuKind::H100, 8, 640, 96, 1900, 96.0),
                spec("Standard_NC4as_T4_v3", GpuKind::T4, 1, 16, 4, 28, 29.0),
            ],
        ),
        (
            ProviderId::Gcp,
            vec![
                spec("a2-highgpu-1g", GpuKind::A100, 1, 40, 12, 85, 79.0),
                spec("a2-highgpu-8g", GpuKind::A100, 8, 320, 96, 680, 81.0),
                spec("a3-highgpu-8g", GpuKind::H100, 8, 640, 208, 1872, 98.0),
                spec("n1-standard-8-v100", GpuKind::V100, 1, 16, 8, 30, 53.0),
                spec("n1-standard-8-t4", GpuKind::T4, 1, 16, 8, 30, 28.0),
                spec("g2-standard-8", GpuKind::L4, 1, 24, 8, 32, 38.0),
            ],
        ),
        (
            ProviderId::LambdaLabs,
            vec![
                spec("gpu_1x_a100", GpuKind::A100, 1, 40, 30, 200, 78.0),
                spec("gpu_8x_a100", GpuKind::A100, 8, 320, 124, 1800, 81.0),
                spec("gpu_1x_h100_pcie", GpuKind::H100, 1, 80, 26, 200, 92.0),
                spec("gpu_8x_h100_sxm5", GpuKind::H100, 8, 640, 208, 1800, 98.0),
                spec("gpu_1x_rtx4090", GpuKind::Rtx4090, 1, 24, 16, 64, 50.0),
            ],
        ),
        (
            ProviderId::RunPod,
            vec![
                spec("A100 80GB", GpuKind::A100, 1, 80, 16, 125, 77.0),
                spec("H100 80GB", GpuKind::H100, 1, 80, 20, 160, 93.0),
                spec("RTX 4090", GpuKind::Rtx4090, 1, 24, 12, 48, 49.0),
                spec("RTX 3090", GpuKind::Rtx3090, 1, 24, 12, 48, 40.0),
                spec("L4", GpuKind::L4, 1, 24, 8, 32, 37.0),
            ],
        ),
    ]
}
