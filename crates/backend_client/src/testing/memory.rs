use std::{
    collections::BTreeMap,
    sync::atomic::{
        AtomicU64,
        Ordering,
    },
};

use async_trait::async_trait;
use history::{
    Key,
    MicroOp,
    MicroOpResult,
    Operation,
    Value,
};
use parking_lot::Mutex;

use crate::{
    Backend,
    BackendError,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Isolation {
    /// Each transaction runs under one lock.
    Serializable,
    /// Appends read the list, yield, then write back the list they read
    /// plus the new element, so concurrent appends overwrite each other.
    Racy,
}

/// Deterministic failure injection, counted in calls to the backend.
#[derive(Clone, Copy, Debug, Default)]
pub struct Faults {
    /// Every nth call is rejected without being applied.
    pub reject_every: Option<u64>,
    /// Every nth call is applied but its acknowledgement is lost.
    pub lose_ack_every: Option<u64>,
}

pub struct InMemoryBackend {
    isolation: Isolation,
    faults: Faults,
    calls: AtomicU64,
    store: Mutex<BTreeMap<Key, Vec<Value>>>,
}

impl InMemoryBackend {
    pub fn new(isolation: Isolation) -> Self {
        Self::with_faults(isolation, Faults::default())
    }

    pub fn with_faults(isolation: Isolation, faults: Faults) -> Self {
        Self {
            isolation,
            faults,
            calls: AtomicU64::new(0),
            store: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn list(&self, key: &str) -> Vec<Value> {
        self.store.lock().get(key).cloned().unwrap_or_default()
    }

    /// Runs `ops` as one transaction, subject to the configured faults.
    pub async fn apply(&self, ops: &[MicroOp]) -> Result<Vec<MicroOpResult>, BackendError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if hits(self.faults.reject_every, call) {
            return Err(BackendError::Definite(format!("call {call} rejected")));
        }
        let results = match self.isolation {
            Isolation::Serializable => self.apply_serializable(ops),
            Isolation::Racy => self.apply_racy(ops).await,
        };
        if hits(self.faults.lose_ack_every, call) {
            return Err(BackendError::Indefinite(format!(
                "call {call} applied but not acknowledged"
            )));
        }
        Ok(results)
    }

    fn apply_serializable(&self, ops: &[MicroOp]) -> Vec<MicroOpResult> {
        let mut store = self.store.lock();
        ops.iter()
            .map(|op| match op {
                MicroOp::Read { key } => MicroOpResult::Read {
                    key: key.clone(),
                    value: store.get(key).cloned().unwrap_or_default(),
                },
                MicroOp::Append { key, value } => {
                    store.entry(key.clone()).or_default().push(*value);
                    MicroOpResult::Append {
                        key: key.clone(),
                        value: *value,
                    }
                },
            })
            .collect()
    }

    async fn apply_racy(&self, ops: &[MicroOp]) -> Vec<MicroOpResult> {
        let mut results = Vec::with_capacity(ops.len());
        for op in ops {
            match op {
                MicroOp::Read { key } => results.push(MicroOpResult::Read {
                    key: key.clone(),
                    value: self.list(key),
                }),
                MicroOp::Append { key, value } => {
                    let mut list = self.list(key);
                    tokio::task::yield_now().await;
                    list.push(*value);
                    self.store.lock().insert(key.clone(), list);
                    results.push(MicroOpResult::Append {
                        key: key.clone(),
                        value: *value,
                    });
                },
            }
        }
        results
    }
}

fn hits(every: Option<u64>, call: u64) -> bool {
    matches!(every, Some(n) if n > 0 && call % n == 0)
}

#[async_trait]
impl Backend for InMemoryBackend {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn invoke(&self, op: &Operation) -> Result<Vec<MicroOpResult>, BackendError> {
        self.apply(&op.kind.micro_ops()).await
    }
}
