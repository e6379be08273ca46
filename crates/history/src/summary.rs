use std::collections::BTreeMap;

use serde::Serialize;

use crate::{
    event::{
        Event,
        EventType,
    },
    operation::SessionId,
};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub invoked: u64,
    pub ok: u64,
    pub fail: u64,
    pub info: u64,
}

impl SessionSummary {
    fn record(&mut self, event_type: EventType) {
        match event_type {
            EventType::Invoke => self.invoked += 1,
            EventType::Ok => self.ok += 1,
            EventType::Fail => self.fail += 1,
            EventType::Info => self.info += 1,
        }
    }
}

/// Operation counts for a run, reported alongside the verdict.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HistorySummary {
    pub sessions: usize,
    pub operations: u64,
    pub ok: u64,
    pub fail: u64,
    pub info: u64,
    pub per_session: BTreeMap<SessionId, SessionSummary>,
}

impl HistorySummary {
    pub fn from_events(events: &[Event]) -> Self {
        let mut per_session: BTreeMap<SessionId, SessionSummary> = BTreeMap::new();
        for event in events {
            per_session
                .entry(event.op_id.session)
                .or_default()
                .record(event.event_type());
        }
        let mut summary = Self {
            sessions: per_session.len(),
            ..Default::default()
        };
        for session in per_session.values() {
            summary.operations += session.invoked;
            summary.ok += session.ok;
            summary.fail += session.fail;
            summary.info += session.info;
        }
        summary.per_session = per_session;
        summary
    }

    /// Fraction of completed operations that ended indeterminate.
    pub fn info_ratio(&self) -> f64 {
        let completed = self.ok + self.fail + self.info;
        if completed == 0 {
            return 0.0;
        }
        self.info as f64 / completed as f64
    }
}
