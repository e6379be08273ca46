//! Operations, events and the append-only history shared by every stage of a
//! grading run.
//!
//! Sessions record events through a [`HistoryRecorder`]. Once every session
//! has finished, the recorder is frozen into a [`History`], which is the only
//! input the translation and audit stages ever look at.

mod errors;
mod event;
mod frozen;
mod operation;
mod recorder;
mod summary;
#[cfg(test)]
mod tests;

pub use errors::HistoryError;
pub use event::{
    Event,
    EventKind,
    EventType,
    Outcome,
    Timestamp,
};
pub use frozen::{
    History,
    PairedOperation,
};
pub use operation::{
    Key,
    MicroOp,
    MicroOpResult,
    OpId,
    Operation,
    OperationKind,
    SessionId,
    Value,
};
pub use recorder::HistoryRecorder;
pub use summary::{
    HistorySummary,
    SessionSummary,
};
