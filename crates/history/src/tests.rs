use pretty_assertions::assert_eq;

use crate::{
    Event,
    EventKind,
    EventType,
    History,
    HistoryError,
    HistoryRecorder,
    MicroOp,
    MicroOpResult,
    OpId,
    Operation,
    OperationKind,
    Outcome,
    SessionId,
    Timestamp,
};

fn append_op(session: u32, index: u64, value: u64) -> Operation {
    Operation::new(
        OpId::new(SessionId(session), index),
        OperationKind::Write {
            key: "k".to_string(),
            value,
        },
    )
}

fn ok_append(value: u64) -> Outcome {
    Outcome::Ok {
        results: vec![MicroOpResult::Append {
            key: "k".to_string(),
            value,
        }],
    }
}

fn event(seq: u64, session: u32, index: u64, kind: EventKind) -> Event {
    Event {
        seq,
        timestamp: Timestamp(seq * 10),
        op_id: OpId::new(SessionId(session), index),
        kind,
    }
}

fn invoke_kind(value: u64) -> EventKind {
    EventKind::Invoke(OperationKind::Write {
        key: "k".to_string(),
        value,
    })
}

#[tokio::test]
async fn test_concurrent_sessions_record_well_formed_history() -> anyhow::Result<()> {
    let recorder = HistoryRecorder::new();
    let mut handles = Vec::new();
    for session in 0..8u32 {
        let recorder = recorder.clone();
        handles.push(tokio::spawn(async move {
            for index in 0..25u64 {
                let value = ((session as u64) << 32) | index;
                let op = append_op(session, index, value);
                recorder.invoke(&op)?;
                tokio::task::yield_now().await;
                recorder.complete(op.id, ok_append(value))?;
            }
            Ok::<_, HistoryError>(())
        }));
    }
    for handle in handles {
        handle.await??;
    }

    let history = recorder.freeze();
    assert_eq!(history.len(), 8 * 25 * 2);
    history.validate()?;

    let ops = history.paired_operations()?;
    assert_eq!(ops.len(), 200);
    for op in &ops {
        assert!(op.invoked_at <= op.completed_at);
        assert!(op.invoke_position < op.complete_position);
    }

    let summary = history.summary();
    assert_eq!(summary.sessions, 8);
    assert_eq!(summary.operations, 200);
    assert_eq!(summary.ok, 200);
    assert_eq!(summary.per_session[&SessionId(3)].invoked, 25);

    let order = history.session_invoke_order(SessionId(5));
    let indexes: Vec<u64> = order.iter().map(|id| id.index).collect();
    assert_eq!(indexes, (0..25).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_events_are_ordered_by_timestamp_then_seq() -> anyhow::Result<()> {
    let recorder = HistoryRecorder::new();
    for index in 0..10 {
        let op = append_op(0, index, index);
        recorder.invoke(&op)?;
        recorder.complete(op.id, ok_append(index))?;
    }
    let history = recorder.freeze();
    let keys: Vec<_> = history
        .events()
        .iter()
        .map(|e| (e.timestamp, e.seq))
        .collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
    Ok(())
}

#[test]
fn test_freeze_rejects_further_appends() -> anyhow::Result<()> {
    let recorder = HistoryRecorder::new();
    let op = append_op(0, 0, 1);
    recorder.invoke(&op)?;
    recorder.complete(op.id, ok_append(1))?;
    let history = recorder.freeze();
    assert_eq!(history.len(), 2);

    let late = append_op(0, 1, 2);
    assert_eq!(recorder.invoke(&late), Err(HistoryError::Frozen));
    assert!(recorder.is_empty());
    Ok(())
}

#[test]
fn test_orphaned_invoke_is_missing_terminal() -> anyhow::Result<()> {
    let recorder = HistoryRecorder::new();
    let op = append_op(2, 0, 7);
    recorder.invoke(&op)?;
    let history = recorder.freeze();
    assert_eq!(history.orphaned_invokes(), vec![op.id]);
    assert_eq!(history.validate(), Err(HistoryError::MissingTerminal(op.id)));
    Ok(())
}

#[test]
fn test_terminal_without_invoke() {
    let history = History::from_events(vec![event(0, 0, 0, EventKind::Complete(ok_append(1)))]);
    assert_eq!(
        history.validate(),
        Err(HistoryError::TerminalWithoutInvoke(OpId::new(SessionId(0), 0)))
    );
}

#[test]
fn test_duplicate_terminal() {
    let history = History::from_events(vec![
        event(0, 0, 0, invoke_kind(1)),
        event(1, 0, 0, EventKind::Complete(ok_append(1))),
        event(
            2,
            0,
            0,
            EventKind::Complete(Outcome::Info {
                error: "late".to_string(),
            }),
        ),
    ]);
    assert_eq!(
        history.validate(),
        Err(HistoryError::DuplicateTerminal(OpId::new(SessionId(0), 0)))
    );
}

#[test]
fn test_duplicate_invoke() {
    let history = History::from_events(vec![
        event(0, 0, 0, invoke_kind(1)),
        event(1, 0, 0, EventKind::Complete(ok_append(1))),
        event(2, 0, 0, invoke_kind(1)),
        event(3, 0, 0, EventKind::Complete(ok_append(1))),
    ]);
    assert_eq!(
        history.validate(),
        Err(HistoryError::DuplicateInvoke(OpId::new(SessionId(0), 0)))
    );
}

#[test]
fn test_session_overlap() {
    let history = History::from_events(vec![
        event(0, 1, 0, invoke_kind(1)),
        event(1, 1, 1, invoke_kind(2)),
        event(2, 1, 0, EventKind::Complete(ok_append(1))),
        event(3, 1, 1, EventKind::Complete(ok_append(2))),
    ]);
    assert_eq!(
        history.validate(),
        Err(HistoryError::SessionOverlap {
            session: SessionId(1),
            pending: OpId::new(SessionId(1), 0),
            next: OpId::new(SessionId(1), 1),
        })
    );
}

#[test]
fn test_session_out_of_order() {
    let history = History::from_events(vec![
        event(0, 1, 4, invoke_kind(1)),
        event(1, 1, 4, EventKind::Complete(ok_append(1))),
        event(2, 1, 3, invoke_kind(2)),
        event(3, 1, 3, EventKind::Complete(ok_append(2))),
    ]);
    assert_eq!(
        history.validate(),
        Err(HistoryError::SessionOutOfOrder {
            session: SessionId(1),
            previous: OpId::new(SessionId(1), 4),
            next: OpId::new(SessionId(1), 3),
        })
    );
}

#[test]
fn test_summary_counts_outcomes() {
    let history = History::from_events(vec![
        event(0, 0, 0, invoke_kind(1)),
        event(1, 1, 0, invoke_kind(2)),
        event(2, 0, 0, EventKind::Complete(ok_append(1))),
        event(
            3,
            1,
            0,
            EventKind::Complete(Outcome::Fail {
                error: "conflict".to_string(),
            }),
        ),
        event(4, 0, 1, invoke_kind(3)),
        event(
            5,
            0,
            1,
            EventKind::Complete(Outcome::Info {
                error: "timeout".to_string(),
            }),
        ),
    ]);
    let summary = history.summary();
    assert_eq!(summary.sessions, 2);
    assert_eq!(summary.operations, 3);
    assert_eq!((summary.ok, summary.fail, summary.info), (1, 1, 1));
    assert!((summary.info_ratio() - 1.0 / 3.0).abs() < 1e-9);
    assert_eq!(history.events()[5].event_type(), EventType::Info);
}

#[test]
fn test_micro_op_wire_shape() -> anyhow::Result<()> {
    let op = MicroOp::Append {
        key: "foo".to_string(),
        value: 3,
    };
    assert_eq!(
        serde_json::to_value(&op)?,
        serde_json::json!({"type": "append", "key": "foo", "value": 3})
    );
    let read: MicroOp = serde_json::from_value(serde_json::json!({"type": "read", "key": "foo"}))?;
    assert_eq!(
        read,
        MicroOp::Read {
            key: "foo".to_string()
        }
    );
    let result = MicroOpResult::Read {
        key: "foo".to_string(),
        value: vec![1, 2],
    };
    assert!(result.answers(&read));
    assert!(!result.answers(&op));
    Ok(())
}
