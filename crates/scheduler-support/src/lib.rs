#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! Shared configuration and DTOs for the index-build task scheduler.
//!
//! This crate has no async runtime dependency: it only knows how to load,
//! normalize, and persist the parameter table the scheduler core consumes
//! to construct its parallel-build collaborator.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Index engine types recognized by the per-type memory factor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IndexEngineType {
    /// Hierarchical Navigable Small World.
    Hnsw,
    /// Inverted file, flat quantization.
    IvfFlat,
    /// Inverted file, product quantization.
    IvfPq,
    /// Inverted file, scalar quantization (8-bit).
    IvfSq8,
    /// DiskANN (disk-resident ANN index).
    DiskAnn,
    /// Brute-force flat index.
    Flat,
}

impl IndexEngineType {
    /// All recognized engine types, in a stable order.
    pub const ALL: [IndexEngineType; 6] = [
        IndexEngineType::Hnsw,
        IndexEngineType::IvfFlat,
        IndexEngineType::IvfPq,
        IndexEngineType::IvfSq8,
        IndexEngineType::DiskAnn,
        IndexEngineType::Flat,
    ];

    fn default_mem_factor(self) -> f64 {
        match self {
            IndexEngineType::Hnsw => 1.5,
            IndexEngineType::IvfFlat => 2.0,
            IndexEngineType::IvfPq => 1.8,
            IndexEngineType::IvfSq8 => 1.7,
            IndexEngineType::DiskAnn => 1.2,
            IndexEngineType::Flat => 1.1,
        }
    }
}

/// Configuration for the parallel-build collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildParallelParams {
    /// Whether the parallel-build collaborator should be constructed at all.
    #[serde(default = "default_enable")]
    pub enable: bool,
    /// Maximum concurrency the collaborator is allowed to use internally.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Fraction of node memory the collaborator should reserve per build.
    #[serde(default = "default_mem_reservation_ratio")]
    pub mem_reservation_ratio: f64,
    /// Per-index-type memory multiplier, relative to raw vector data size.
    #[serde(default)]
    pub mem_factor: HashMap<IndexEngineType, f64>,
}

fn default_enable() -> bool {
    true
}

fn default_max_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_mem_reservation_ratio() -> f64 {
    0.1
}

impl Default for BuildParallelParams {
    fn default() -> Self {
        let mem_factor = IndexEngineType::ALL
            .iter()
            .map(|t| (*t, t.default_mem_factor()))
            .collect();

        Self {
            enable: default_enable(),
            max_concurrency: default_max_concurrency(),
            mem_reservation_ratio: default_mem_reservation_ratio(),
            mem_factor,
        }
    }
}

impl BuildParallelParams {
    fn normalize(&mut self) {
        if self.max_concurrency == 0 {
            self.max_concurrency = 1;
        }
        self.mem_reservation_ratio = self.mem_reservation_ratio.clamp(0.0, 1.0);
        for engine in IndexEngineType::ALL {
            self.mem_factor
                .entry(engine)
                .or_insert_with(|| engine.default_mem_factor());
        }
    }

    /// Memory factor for a given engine type, falling back to its documented default.
    pub fn mem_factor_for(&self, engine: IndexEngineType) -> f64 {
        self.mem_factor
            .get(&engine)
            .copied()
            .unwrap_or_else(|| engine.default_mem_factor())
    }

    /// Load params from an optional JSON file, then apply environment overrides,
    /// then normalize. Missing file and missing env vars both fall back to defaults.
    pub fn load(json_path: Option<&Path>) -> anyhow::Result<Self> {
        let mut params = match json_path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path)?;
                serde_json::from_str(&raw)?
            }
            _ => Self::default(),
        };

        params.apply_env_overrides();
        params.normalize();
        Ok(params)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SCHEDULER_BUILD_PARALLEL_ENABLE") {
            if let Ok(parsed) = v.trim().parse() {
                self.enable = parsed;
            }
        }
        if let Ok(v) = std::env::var("SCHEDULER_BUILD_PARALLEL_MAX_CONCURRENCY") {
            if let Ok(parsed) = v.trim().parse() {
                self.max_concurrency = parsed;
            }
        }
        if let Ok(v) = std::env::var("SCHEDULER_BUILD_PARALLEL_MEM_RESERVATION_RATIO") {
            if let Ok(parsed) = v.trim().parse() {
                self.mem_reservation_ratio = parsed;
            }
        }
    }

    /// Persist the current params to a JSON file, writing through a temp file + rename
    /// so readers never observe a partially written file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("invalid params path: {}", path.display()))?;
        std::fs::create_dir_all(dir)?;

        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(tmp, path)?;
        Ok(())
    }
}

/// Default on-disk location for the build-parallel parameter file, following
/// the XDG base directory convention.
pub fn default_params_path() -> anyhow::Result<PathBuf> {
    let dir = if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(dir)
    } else {
        let home = std::env::var_os("HOME")
            .ok_or_else(|| anyhow::anyhow!("HOME is not set"))?;
        PathBuf::from(home).join(".config")
    };
    Ok(dir.join("datanode-scheduler").join("build_parallel.json"))
}
