//! Declarative workload models and the deterministic per-session operation
//! streams generated from them.

mod config;
mod generator;

pub use config::{
    parse_workload_config,
    OperationWeights,
    SizeRange,
    WorkloadConfig,
    WorkloadPreset,
};
pub use generator::{
    SessionOps,
    WorkloadGenerator,
    MAX_SESSIONS,
};
