use std::collections::{
    btree_map::Entry,
    BTreeMap,
    BTreeSet,
};

use crate::{
    errors::HistoryError,
    event::{
        Event,
        EventKind,
        Outcome,
        Timestamp,
    },
    operation::{
        OpId,
        OperationKind,
        SessionId,
    },
    summary::HistorySummary,
};

/// A frozen, read-only history ordered by `(timestamp, seq)`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct History {
    events: Vec<Event>,
}

/// An invoke event joined with its terminal event.
#[derive(Clone, Copy, Debug)]
pub struct PairedOperation<'a> {
    pub id: OpId,
    pub kind: &'a OperationKind,
    pub outcome: &'a Outcome,
    pub invoked_at: Timestamp,
    pub completed_at: Timestamp,
    /// Positions of the two events in [`History::events`].
    pub invoke_position: usize,
    pub complete_position: usize,
}

impl History {
    pub fn from_events(mut events: Vec<Event>) -> Self {
        events.sort_by_key(|e| (e.timestamp, e.seq));
        Self { events }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn sessions(&self) -> BTreeSet<SessionId> {
        self.events.iter().map(|e| e.op_id.session).collect()
    }

    pub fn session_events(&self, session: SessionId) -> impl Iterator<Item = &Event> + '_ {
        self.events
            .iter()
            .filter(move |e| e.op_id.session == session)
    }

    /// Operation ids of `session` in the order they were invoked.
    pub fn session_invoke_order(&self, session: SessionId) -> Vec<OpId> {
        self.session_events(session)
            .filter(|e| e.is_invoke())
            .map(|e| e.op_id)
            .collect()
    }

    /// Invokes that have no terminal event.
    pub fn orphaned_invokes(&self) -> Vec<OpId> {
        let mut open = BTreeSet::new();
        for event in &self.events {
            match event.kind {
                EventKind::Invoke(_) => {
                    open.insert(event.op_id);
                },
                EventKind::Complete(_) => {
                    open.remove(&event.op_id);
                },
            }
        }
        open.into_iter().collect()
    }

    pub fn validate(&self) -> Result<(), HistoryError> {
        self.paired_operations().map(|_| ())
    }

    /// Joins every invoke with its terminal event, checking that:
    ///
    /// - each operation is invoked exactly once and terminates exactly once,
    ///   strictly after its invoke;
    /// - a session never has two operations in flight;
    /// - a session invokes its operations in issuance order.
    ///
    /// The result is ordered by invoke position.
    pub fn paired_operations(&self) -> Result<Vec<PairedOperation<'_>>, HistoryError> {
        let mut pending: BTreeMap<OpId, usize> = BTreeMap::new();
        let mut completed: BTreeSet<OpId> = BTreeSet::new();
        let mut in_flight: BTreeMap<SessionId, OpId> = BTreeMap::new();
        let mut last_invoked: BTreeMap<SessionId, OpId> = BTreeMap::new();
        let mut paired = Vec::new();

        for (position, event) in self.events.iter().enumerate() {
            let op_id = event.op_id;
            let session = op_id.session;
            match &event.kind {
                EventKind::Invoke(_) => {
                    if pending.contains_key(&op_id) || completed.contains(&op_id) {
                        return Err(HistoryError::DuplicateInvoke(op_id));
                    }
                    if let Some(&pending_op) = in_flight.get(&session) {
                        return Err(HistoryError::SessionOverlap {
                            session,
                            pending: pending_op,
                            next: op_id,
                        });
                    }
                    match last_invoked.entry(session) {
                        Entry::Occupied(mut previous) => {
                            if previous.get().index >= op_id.index {
                                return Err(HistoryError::SessionOutOfOrder {
                                    session,
                                    previous: *previous.get(),
                                    next: op_id,
                                });
                            }
                            previous.insert(op_id);
                        },
                        Entry::Vacant(entry) => {
                            entry.insert(op_id);
                        },
                    }
                    in_flight.insert(session, op_id);
                    pending.insert(op_id, position);
                },
                EventKind::Complete(outcome) => {
                    let Some(invoke_position) = pending.remove(&op_id) else {
                        if completed.contains(&op_id) {
                            return Err(HistoryError::DuplicateTerminal(op_id));
                        }
                        return Err(HistoryError::TerminalWithoutInvoke(op_id));
                    };
                    let invoke = &self.events[invoke_position];
                    if (invoke.timestamp, invoke.seq) >= (event.timestamp, event.seq) {
                        return Err(HistoryError::TerminalBeforeInvoke(op_id));
                    }
                    let EventKind::Invoke(kind) = &invoke.kind else {
                        return Err(HistoryError::TerminalWithoutInvoke(op_id));
                    };
                    in_flight.remove(&session);
                    completed.insert(op_id);
                    paired.push(PairedOperation {
                        id: op_id,
                        kind,
                        outcome,
                        invoked_at: invoke.timestamp,
                        completed_at: event.timestamp,
                        invoke_position,
                        complete_position: position,
                    });
                },
            }
        }

        if let Some((&op_id, _)) = pending.iter().next() {
            return Err(HistoryError::MissingTerminal(op_id));
        }
        paired.sort_by_key(|op| op.invoke_position);
        Ok(paired)
    }

    pub fn summary(&self) -> HistorySummary {
        HistorySummary::from_events(&self.events)
    }
}
