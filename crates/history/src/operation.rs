use std::fmt;

use serde::{
    Deserialize,
    Serialize,
};

/// Logical key in the candidate's store.
pub type Key = String;

/// An appended element. Every value appended during a run is unique, so an
/// element observed in a read identifies the operation that wrote it.
pub type Value = u64;

/// Identifies one simulated client. Stable for the lifetime of the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Operation identifier, unique within its session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OpId {
    pub session: SessionId,
    pub index: u64,
}

impl OpId {
    pub fn new(session: SessionId, index: u64) -> Self {
        Self { session, index }
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.session, self.index)
    }
}

/// One read or append inside a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MicroOp {
    Read { key: Key },
    Append { key: Key, value: Value },
}

impl MicroOp {
    pub fn key(&self) -> &str {
        match self {
            MicroOp::Read { key } | MicroOp::Append { key, .. } => key,
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self, MicroOp::Read { .. })
    }
}

/// The backend's answer for one [`MicroOp`]. Reads carry the full list
/// observed at the key; appends echo the appended value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MicroOpResult {
    Read { key: Key, value: Vec<Value> },
    Append { key: Key, value: Value },
}

impl MicroOpResult {
    pub fn key(&self) -> &str {
        match self {
            MicroOpResult::Read { key, .. } | MicroOpResult::Append { key, .. } => key,
        }
    }

    /// Whether this result is a well-formed answer to `op`: same kind, same
    /// key, and for appends the same value.
    pub fn answers(&self, op: &MicroOp) -> bool {
        match (self, op) {
            (MicroOpResult::Read { key, .. }, MicroOp::Read { key: op_key }) => key == op_key,
            (
                MicroOpResult::Append { key, value },
                MicroOp::Append {
                    key: op_key,
                    value: op_value,
                },
            ) => key == op_key && value == op_value,
            _ => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationKind {
    Read { key: Key },
    Write { key: Key, value: Value },
    Transaction { ops: Vec<MicroOp> },
}

impl OperationKind {
    /// The operation as the list of micro-ops sent over the wire. Plain reads
    /// and writes are single-op transactions.
    pub fn micro_ops(&self) -> Vec<MicroOp> {
        match self {
            OperationKind::Read { key } => vec![MicroOp::Read { key: key.clone() }],
            OperationKind::Write { key, value } => vec![MicroOp::Append {
                key: key.clone(),
                value: *value,
            }],
            OperationKind::Transaction { ops } => ops.clone(),
        }
    }

    pub fn is_read_only(&self) -> bool {
        match self {
            OperationKind::Read { .. } => true,
            OperationKind::Write { .. } => false,
            OperationKind::Transaction { ops } => ops.iter().all(MicroOp::is_read),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            OperationKind::Read { .. } => "read",
            OperationKind::Write { .. } => "write",
            OperationKind::Transaction { .. } => "transaction",
        }
    }
}

/// A generated operation. Immutable once handed to a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OpId,
    pub kind: OperationKind,
}

impl Operation {
    pub fn new(id: OpId, kind: OperationKind) -> Self {
        Self { id, kind }
    }

    pub fn session(&self) -> SessionId {
        self.id.session
    }
}
