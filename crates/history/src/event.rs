use std::{
    fmt,
    time::Duration,
};

use serde::{
    Deserialize,
    Serialize,
};

use crate::operation::{
    MicroOpResult,
    OpId,
    OperationKind,
};

/// Nanoseconds since the recorder was created.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn from_elapsed(elapsed: Duration) -> Self {
        Self(u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
    }

    pub fn as_nanos(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", Duration::from_nanos(self.0))
    }
}

/// How an operation ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// The backend acknowledged the operation and returned these results.
    Ok { results: Vec<MicroOpResult> },
    /// The backend explicitly rejected the operation; it did not take effect.
    Fail { error: String },
    /// The effect is unknown (timeout, connection loss, garbled response).
    Info { error: String },
}

impl Outcome {
    pub fn event_type(&self) -> EventType {
        match self {
            Outcome::Ok { .. } => EventType::Ok,
            Outcome::Fail { .. } => EventType::Fail,
            Outcome::Info { .. } => EventType::Info,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Invoke(OperationKind),
    Complete(Outcome),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Invoke,
    Ok,
    Fail,
    Info,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Invoke => "invoke",
            EventType::Ok => "ok",
            EventType::Fail => "fail",
            EventType::Info => "info",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Position in append order. Breaks timestamp ties.
    pub seq: u64,
    pub timestamp: Timestamp,
    pub op_id: OpId,
    pub kind: EventKind,
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match &self.kind {
            EventKind::Invoke(_) => EventType::Invoke,
            EventKind::Complete(outcome) => outcome.event_type(),
        }
    }

    pub fn is_invoke(&self) -> bool {
        matches!(self.kind, EventKind::Invoke(_))
    }
}
