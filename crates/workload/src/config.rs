use std::path::Path;

use anyhow::Context;
use serde::{
    Deserialize,
    Serialize,
};

/// Relative likelihood of each operation kind. Weights need not sum to any
/// particular total, but at least one must be nonzero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationWeights {
    #[serde(default)]
    pub read: u32,
    #[serde(default)]
    pub write: u32,
    #[serde(default)]
    pub transaction: u32,
}

/// Inclusive range of micro-ops per transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeRange {
    pub min: u32,
    pub max: u32,
}

fn default_transaction_size() -> SizeRange {
    SizeRange { min: 1, max: 8 }
}

fn default_read_probability() -> f64 {
    0.25
}

fn default_keys_per_transaction() -> u32 {
    2
}

fn default_concurrency() -> u32 {
    4
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkloadConfig {
    pub name: String,
    #[serde(default)]
    pub seed: u64,
    /// Number of logical keys, named `"0"` through `"{num_keys - 1}"`.
    pub num_keys: u32,
    pub weights: OperationWeights,
    #[serde(default = "default_transaction_size")]
    pub transaction_size: SizeRange,
    /// Probability that a micro-op inside a transaction is a read.
    #[serde(default = "default_read_probability")]
    pub read_probability: f64,
    /// Size of the key subset each transaction draws its micro-ops from.
    #[serde(default = "default_keys_per_transaction")]
    pub keys_per_transaction: u32,
    /// Operations issued by each session. `None` runs until stopped.
    #[serde(default)]
    pub ops_per_session: Option<u64>,
    /// Number of concurrent sessions the workload is tuned for.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
}

impl WorkloadConfig {
    /// The list-append workload used to grade candidates: 64 transactions of
    /// 8 micro-ops over 8 keys, spread across 4 sessions.
    pub fn list_append() -> Self {
        Self {
            name: "list_append".to_string(),
            seed: 0,
            num_keys: 8,
            weights: OperationWeights {
                read: 0,
                write: 0,
                transaction: 1,
            },
            transaction_size: SizeRange { min: 8, max: 8 },
            read_probability: 0.25,
            keys_per_transaction: 4,
            ops_per_session: Some(16),
            concurrency: 4,
        }
    }

    /// Every session appends to one shared key. The length of the final list
    /// is the counter's value.
    pub fn counter(ops_per_session: u64) -> Self {
        Self {
            name: "counter".to_string(),
            seed: 0,
            num_keys: 1,
            weights: OperationWeights {
                read: 0,
                write: 1,
                transaction: 0,
            },
            transaction_size: SizeRange { min: 1, max: 1 },
            read_probability: 0.0,
            keys_per_transaction: 1,
            ops_per_session: Some(ops_per_session),
            concurrency: 10,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.num_keys > 0, "workload {} has no keys", self.name);
        let OperationWeights {
            read,
            write,
            transaction,
        } = self.weights;
        anyhow::ensure!(
            read as u64 + write as u64 + transaction as u64 > 0,
            "workload {} has no nonzero operation weight",
            self.name
        );
        if transaction > 0 {
            anyhow::ensure!(
                self.transaction_size.min >= 1
                    && self.transaction_size.min <= self.transaction_size.max,
                "workload {} has invalid transaction size range {:?}",
                self.name,
                self.transaction_size
            );
            anyhow::ensure!(
                self.keys_per_transaction >= 1,
                "workload {} needs at least one key per transaction",
                self.name
            );
        }
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.read_probability),
            "workload {} has read probability {} outside [0, 1]",
            self.name,
            self.read_probability
        );
        anyhow::ensure!(
            self.concurrency >= 1,
            "workload {} needs at least one session",
            self.name
        );
        Ok(())
    }
}

/// Named workloads that ship with the harness.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum WorkloadPreset {
    ListAppend,
    Counter,
}

impl WorkloadPreset {
    pub fn config(&self) -> WorkloadConfig {
        match self {
            WorkloadPreset::ListAppend => WorkloadConfig::list_append(),
            WorkloadPreset::Counter => WorkloadConfig::counter(50),
        }
    }
}

pub fn parse_workload_config(path: impl AsRef<Path>) -> anyhow::Result<WorkloadConfig> {
    let path = path.as_ref();
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read workload config file at {}", path.display()))?;
    let workload: WorkloadConfig = serde_json::from_str(&s)
        .with_context(|| format!("Failed to parse workload config at {}", path.display()))?;
    workload.validate()?;
    Ok(workload)
}
