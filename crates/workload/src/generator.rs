use std::sync::Arc;

use history::{
    Key,
    MicroOp,
    OpId,
    Operation,
    OperationKind,
    SessionId,
    Value,
};
use rand::{
    distr::{
        weighted::WeightedIndex,
        Distribution,
    },
    seq::index::sample,
    Rng,
    SeedableRng,
};
use rand_chacha::ChaCha8Rng;

use crate::config::WorkloadConfig;

/// Appended values are `(session << 32) | n`, which must stay exactly
/// representable as a JSON number (an f64), so session ids stay below 2^21.
pub const MAX_SESSIONS: u32 = 1 << 21;

/// Fewer expected accesses per key than this means sessions rarely touch the
/// same key.
const MIN_ACCESSES_PER_KEY: f64 = 2.0;

const READ: usize = 0;
const WRITE: usize = 1;
const TRANSACTION: usize = 2;

/// Produces deterministic, lazily generated operation streams. Each session's
/// stream depends only on `(seed, session id)`.
pub struct WorkloadGenerator {
    config: Arc<WorkloadConfig>,
    keys: Arc<[Key]>,
    kind_dist: WeightedIndex<u32>,
}

impl WorkloadGenerator {
    pub fn new(config: WorkloadConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let kind_dist = WeightedIndex::new([
            config.weights.read,
            config.weights.write,
            config.weights.transaction,
        ])?;
        let keys: Arc<[Key]> = (0..config.num_keys).map(|k| k.to_string()).collect();
        tracing::debug!(
            "Workload {} with seed {} over {} keys",
            config.name,
            config.seed,
            keys.len()
        );
        Ok(Self {
            config: Arc::new(config),
            keys,
            kind_dist,
        })
    }

    pub fn config(&self) -> &WorkloadConfig {
        &self.config
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn session(&self, session: SessionId) -> anyhow::Result<SessionOps> {
        anyhow::ensure!(
            session.0 < MAX_SESSIONS,
            "session {session} exceeds the maximum of {MAX_SESSIONS} sessions"
        );
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        rng.set_stream(session.0 as u64);
        Ok(SessionOps {
            session,
            rng,
            config: self.config.clone(),
            keys: self.keys.clone(),
            kind_dist: self.kind_dist.clone(),
            next_index: 0,
            next_value: 0,
        })
    }

    /// One read of every key, issued by `session` after the workload
    /// finishes.
    pub fn final_reads(&self, session: SessionId) -> Vec<Operation> {
        self.keys
            .iter()
            .enumerate()
            .map(|(i, key)| {
                Operation::new(
                    OpId::new(session, i as u64),
                    OperationKind::Read { key: key.clone() },
                )
            })
            .collect()
    }

    /// Describes why running this workload with `num_sessions` sessions is
    /// unlikely to produce any contention, if so.
    pub fn contention_warning(&self, num_sessions: u32) -> Option<String> {
        if num_sessions < 2 {
            return Some(format!(
                "workload {} runs with {num_sessions} session; nothing executes concurrently",
                self.config.name
            ));
        }
        let ops_per_session = self.config.ops_per_session?;
        let accesses = num_sessions as f64 * ops_per_session as f64 * self.mean_micro_ops();
        let per_key = accesses / self.config.num_keys as f64;
        if per_key < MIN_ACCESSES_PER_KEY {
            return Some(format!(
                "workload {} touches each of its {} keys about {per_key:.1} times; sessions will \
                 rarely contend and a passing verdict says little",
                self.config.name, self.config.num_keys
            ));
        }
        None
    }

    fn mean_micro_ops(&self) -> f64 {
        let weights = self.config.weights;
        let total = (weights.read + weights.write + weights.transaction) as f64;
        let size = &self.config.transaction_size;
        let mean_txn = (size.min + size.max) as f64 / 2.0;
        (weights.read as f64 + weights.write as f64 + weights.transaction as f64 * mean_txn)
            / total
    }
}

/// One session's operation stream. Ends after `ops_per_session` operations,
/// or never when the workload is unbounded.
pub struct SessionOps {
    session: SessionId,
    rng: ChaCha8Rng,
    config: Arc<WorkloadConfig>,
    keys: Arc<[Key]>,
    kind_dist: WeightedIndex<u32>,
    next_index: u64,
    next_value: u32,
}

impl SessionOps {
    pub fn session(&self) -> SessionId {
        self.session
    }

    fn next_value(&mut self) -> Option<Value> {
        let n = self.next_value;
        self.next_value = n.checked_add(1)?;
        Some(((self.session.0 as u64) << 32) | n as u64)
    }

    fn random_key(&mut self) -> Key {
        let i = self.rng.random_range(0..self.keys.len());
        self.keys[i].clone()
    }

    fn transaction(&mut self) -> Option<OperationKind> {
        let size = self.config.transaction_size;
        let len = self.rng.random_range(size.min..=size.max);
        let subset_size = (self.config.keys_per_transaction as usize).min(self.keys.len());
        let subset = sample(&mut self.rng, self.keys.len(), subset_size).into_vec();
        let mut ops = Vec::with_capacity(len as usize);
        for _ in 0..len {
            let key = self.keys[subset[self.rng.random_range(0..subset.len())]].clone();
            if self.rng.random_bool(self.config.read_probability) {
                ops.push(MicroOp::Read { key });
            } else {
                let value = self.next_value()?;
                ops.push(MicroOp::Append { key, value });
            }
        }
        Some(OperationKind::Transaction { ops })
    }
}

impl Iterator for SessionOps {
    type Item = Operation;

    fn next(&mut self) -> Option<Operation> {
        if let Some(limit) = self.config.ops_per_session {
            if self.next_index >= limit {
                return None;
            }
        }
        let kind = match self.kind_dist.sample(&mut self.rng) {
            READ => OperationKind::Read {
                key: self.random_key(),
            },
            WRITE => {
                let key = self.random_key();
                let value = self.next_value()?;
                OperationKind::Write { key, value }
            },
            TRANSACTION => self.transaction()?,
            _ => return None,
        };
        let op = Operation::new(OpId::new(self.session, self.next_index), kind);
        self.next_index += 1;
        Some(op)
    }
}
