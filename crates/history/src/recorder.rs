use std::{
    sync::Arc,
    time::Instant,
};

use parking_lot::Mutex;

use crate::{
    errors::HistoryError,
    event::{
        Event,
        EventKind,
        Outcome,
        Timestamp,
    },
    frozen::History,
    operation::{
        OpId,
        Operation,
    },
};

/// Append-only event log shared by every session of a run.
///
/// Cloning is cheap and every clone appends to the same log. The timestamp
/// and sequence number are taken inside the same critical section as the
/// push, so append order and timestamp order always agree.
#[derive(Clone)]
pub struct HistoryRecorder {
    start: Instant,
    inner: Arc<Mutex<RecorderInner>>,
}

struct RecorderInner {
    events: Vec<Event>,
    frozen: bool,
}

impl Default for HistoryRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryRecorder {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            inner: Arc::new(Mutex::new(RecorderInner {
                events: Vec::new(),
                frozen: false,
            })),
        }
    }

    /// Records that `op` is about to be dispatched.
    pub fn invoke(&self, op: &Operation) -> Result<Timestamp, HistoryError> {
        self.append(op.id, EventKind::Invoke(op.kind.clone()))
    }

    /// Records the terminal event for `op_id`.
    pub fn complete(&self, op_id: OpId, outcome: Outcome) -> Result<Timestamp, HistoryError> {
        self.append(op_id, EventKind::Complete(outcome))
    }

    pub fn append(&self, op_id: OpId, kind: EventKind) -> Result<Timestamp, HistoryError> {
        let mut inner = self.inner.lock();
        if inner.frozen {
            return Err(HistoryError::Frozen);
        }
        let timestamp = Timestamp::from_elapsed(self.start.elapsed());
        let seq = inner.events.len() as u64;
        inner.events.push(Event {
            seq,
            timestamp,
            op_id,
            kind,
        });
        Ok(timestamp)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops accepting events and hands the log over to a single reader.
    /// Freezing twice yields an empty history the second time.
    pub fn freeze(&self) -> History {
        let events = {
            let mut inner = self.inner.lock();
            inner.frozen = true;
            std::mem::take(&mut inner.events)
        };
        tracing::debug!("Froze history with {} events", events.len());
        History::from_events(events)
    }
}
