//! Uniform access to candidate backends.
//!
//! Every backend family speaks list-append transactions over HTTP but wraps
//! them differently. A [`Backend`] hides the wrapping and classifies every
//! failure as either definite (the operation did not take effect) or
//! indefinite (it may have).

mod config;
mod convex;
mod fast_api;
mod http;
mod wire;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

use async_trait::async_trait;
use history::{
    MicroOpResult,
    Operation,
};

pub use crate::{
    config::BackendConfig,
    convex::ConvexBackend,
    fast_api::FastApiBackend,
    http::{
        HttpOptions,
        HttpTransport,
    },
    wire::decode_results,
};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The backend explicitly rejected the operation, or the request never
    /// left the client.
    #[error("definite failure: {0}")]
    Definite(String),
    /// The operation may or may not have taken effect.
    #[error("indefinite failure: {0}")]
    Indefinite(String),
}

impl BackendError {
    pub fn is_definite(&self) -> bool {
        matches!(self, BackendError::Definite(_))
    }
}

/// A candidate backend. Implementations hold no per-call state beyond a
/// connection pool and are shared by every session of a run.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    /// Executes `op` as one transaction. On success the results are parallel
    /// to `op.kind.micro_ops()`.
    async fn invoke(&self, op: &Operation) -> Result<Vec<MicroOpResult>, BackendError>;
}
