use crate::operation::{
    OpId,
    SessionId,
};

/// A history that violates the invoke/terminal pairing rules. Any of these
/// means the harness itself misbehaved, never the candidate.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("history is frozen; no further events may be appended")]
    Frozen,
    #[error("operation {0} was invoked twice")]
    DuplicateInvoke(OpId),
    #[error("operation {0} completed without being invoked")]
    TerminalWithoutInvoke(OpId),
    #[error("operation {0} has more than one terminal event")]
    DuplicateTerminal(OpId),
    #[error("operation {0} was invoked but never completed")]
    MissingTerminal(OpId),
    #[error("operation {0} completed before it was invoked")]
    TerminalBeforeInvoke(OpId),
    #[error("session {session} invoked {next} while {pending} was still in flight")]
    SessionOverlap {
        session: SessionId,
        pending: OpId,
        next: OpId,
    },
    #[error("session {session} invoked {next} after {previous}, out of issuance order")]
    SessionOutOfOrder {
        session: SessionId,
        previous: OpId,
        next: OpId,
    },
}
