use std::collections::BTreeMap;

use history::{
    EventKind,
    EventType,
    History,
    HistoryError,
    Key,
    MicroOp,
    MicroOpResult,
    OpId,
    Outcome,
    SessionId,
    Value,
};
use serde::{
    ser::SerializeTuple,
    Serialize,
    Serializer,
};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslateError {
    #[error("malformed history: {0}")]
    MalformedHistory(#[from] HistoryError),
    #[error("operation {op_id}: {message}")]
    Encoding { op_id: OpId, message: String },
    #[error("failed to serialize history: {0}")]
    Serialize(String),
}

/// How sessions map to checker processes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProcessPolicy {
    /// Each session is one process for the whole run.
    #[default]
    PerSession,
    /// A session moves to a fresh process after every indeterminate
    /// operation, since the checker assumes a process has at most one
    /// operation in flight and an `info` op may still be running.
    FreshAfterInfo,
}

#[derive(Clone, Debug, Default)]
pub struct TranslateOptions {
    pub process_policy: ProcessPolicy,
}

/// One micro-op in checker notation: `["r", k, [..] | null]` or
/// `["append", k, v]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ElleMop {
    Read { key: Key, value: Option<Vec<Value>> },
    Append { key: Key, value: Value },
}

impl Serialize for ElleMop {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(3)?;
        match self {
            ElleMop::Read { key, value } => {
                tuple.serialize_element("r")?;
                tuple.serialize_element(key)?;
                tuple.serialize_element(value)?;
            },
            ElleMop::Append { key, value } => {
                tuple.serialize_element("append")?;
                tuple.serialize_element(key)?;
                tuple.serialize_element(value)?;
            },
        }
        tuple.end()
    }
}

impl From<&MicroOp> for ElleMop {
    fn from(op: &MicroOp) -> Self {
        match op {
            MicroOp::Read { key } => ElleMop::Read {
                key: key.clone(),
                value: None,
            },
            MicroOp::Append { key, value } => ElleMop::Append {
                key: key.clone(),
                value: *value,
            },
        }
    }
}

impl From<&MicroOpResult> for ElleMop {
    fn from(result: &MicroOpResult) -> Self {
        match result {
            MicroOpResult::Read { key, value } => ElleMop::Read {
                key: key.clone(),
                value: Some(value.clone()),
            },
            MicroOpResult::Append { key, value } => ElleMop::Append {
                key: key.clone(),
                value: *value,
            },
        }
    }
}

/// A checker history record. Field order is part of the format.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ElleRecord {
    #[serde(rename = "type")]
    pub ty: EventType,
    pub f: &'static str,
    pub value: Vec<ElleMop>,
    pub process: u64,
    pub time: u64,
    pub index: u64,
}

/// What a record index refers to in the harness history.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub op_id: OpId,
    pub process: u64,
    pub ty: EventType,
}

#[derive(Clone, Debug)]
pub struct TranslatedHistory {
    pub records: Vec<ElleRecord>,
    /// Serialized checker input: a JSON array, one record per line.
    pub bytes: Vec<u8>,
    index: Vec<IndexEntry>,
}

impl TranslatedHistory {
    pub fn lookup(&self, index: u64) -> Option<&IndexEntry> {
        self.index.get(usize::try_from(index).ok()?)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Translates a frozen history into checker records. Pure: the same history
/// and options always produce the same bytes.
pub fn translate(
    history: &History,
    options: &TranslateOptions,
) -> Result<TranslatedHistory, TranslateError> {
    let paired = history.paired_operations()?;
    let mut invokes: BTreeMap<OpId, Vec<MicroOp>> = BTreeMap::new();
    for op in &paired {
        let micro_ops = op.kind.micro_ops();
        if let Outcome::Ok { results } = op.outcome {
            check_results(op.id, &micro_ops, results)?;
        }
        invokes.insert(op.id, micro_ops);
    }

    let mut processes = Processes::new(history, options.process_policy);
    let mut records = Vec::with_capacity(history.len());
    let mut index = Vec::with_capacity(history.len());
    for event in history.events() {
        let op_id = event.op_id;
        let ty = event.event_type();
        let micro_ops = invokes
            .get(&op_id)
            .ok_or_else(|| TranslateError::Encoding {
                op_id,
                message: "event without a paired invoke".to_string(),
            })?;
        let value: Vec<ElleMop> = match &event.kind {
            EventKind::Complete(Outcome::Ok { results }) => {
                results.iter().map(ElleMop::from).collect()
            },
            _ => micro_ops.iter().map(ElleMop::from).collect(),
        };
        let process = processes.process(op_id.session);
        if ty == EventType::Info {
            processes.retire(op_id.session);
        }
        let position = records.len() as u64;
        records.push(ElleRecord {
            ty,
            f: "txn",
            value,
            process,
            time: event.timestamp.as_nanos(),
            index: position,
        });
        index.push(IndexEntry { op_id, process, ty });
    }

    let bytes =
        serialize_records(&records).map_err(|e| TranslateError::Serialize(e.to_string()))?;
    tracing::debug!(
        "Translated {} events into {} bytes of checker input",
        records.len(),
        bytes.len()
    );
    Ok(TranslatedHistory {
        records,
        bytes,
        index,
    })
}

fn check_results(
    op_id: OpId,
    micro_ops: &[MicroOp],
    results: &[MicroOpResult],
) -> Result<(), TranslateError> {
    if micro_ops.len() != results.len() {
        return Err(TranslateError::Encoding {
            op_id,
            message: format!(
                "{} results for {} micro-ops",
                results.len(),
                micro_ops.len()
            ),
        });
    }
    for (i, (op, result)) in micro_ops.iter().zip(results).enumerate() {
        if !result.answers(op) {
            return Err(TranslateError::Encoding {
                op_id,
                message: format!("result {i} {result:?} does not answer {op:?}"),
            });
        }
    }
    Ok(())
}

fn serialize_records(records: &[ElleRecord]) -> serde_json::Result<Vec<u8>> {
    if records.is_empty() {
        return Ok(b"[]\n".to_vec());
    }
    let mut out = b"[\n".to_vec();
    for (i, record) in records.iter().enumerate() {
        if i > 0 {
            out.extend_from_slice(b",\n");
        }
        serde_json::to_writer(&mut out, record)?;
    }
    out.extend_from_slice(b"\n]\n");
    Ok(out)
}

struct Processes {
    policy: ProcessPolicy,
    current: BTreeMap<SessionId, u64>,
    next_fresh: u64,
}

impl Processes {
    fn new(history: &History, policy: ProcessPolicy) -> Self {
        let next_fresh = history
            .sessions()
            .last()
            .map(|s| s.0 as u64 + 1)
            .unwrap_or(0);
        Self {
            policy,
            current: BTreeMap::new(),
            next_fresh,
        }
    }

    fn process(&mut self, session: SessionId) -> u64 {
        *self.current.entry(session).or_insert(session.0 as u64)
    }

    /// Called on the session's `info` record, after which its next
    /// operation runs as a new process.
    fn retire(&mut self, session: SessionId) {
        if self.policy == ProcessPolicy::FreshAfterInfo {
            self.current.insert(session, self.next_fresh);
            self.next_fresh += 1;
        }
    }
}
