//! Checks the final state of every key against the writes the history
//! recorded, independently of the external checker.

use std::collections::{
    BTreeMap,
    BTreeSet,
};

use elle::{
    AnomalyReport,
    Witness,
    WitnessOp,
};
use history::{
    History,
    HistoryError,
    Key,
    MicroOp,
    MicroOpResult,
    Outcome,
    PairedOperation,
    SessionId,
    Value,
};
use serde_json::json;

pub const LOST_UPDATE: &str = "lost-update";
pub const ABORTED_READ: &str = "aborted-read";
pub const PHANTOM_READ: &str = "phantom-read";
pub const DUPLICATE_ELEMENTS: &str = "duplicate-elements";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WriteStatus {
    Acknowledged,
    Failed,
    Unknown,
}

#[derive(Clone, Debug)]
struct Write {
    op: WitnessOp,
    status: WriteStatus,
}

fn witness_op(op: &PairedOperation<'_>) -> WitnessOp {
    WitnessOp {
        index: op.complete_position as u64,
        process: None,
        op_id: Some(op.id),
    }
}

/// Audits `history` for anomalies that only need the set of writes and the
/// lists each key ended with:
///
/// - `lost-update`: an acknowledged append is missing from the final read of
///   its key.
/// - `aborted-read`: a read observed a value whose append definitely failed.
/// - `phantom-read`: a read observed a value nobody appended to that key.
/// - `duplicate-elements`: a read observed the same value twice.
///
/// Lost updates are only checked for keys whose final read in
/// `final_read_session` succeeded.
pub fn audit_final_reads(
    history: &History,
    final_read_session: Option<SessionId>,
) -> Result<AnomalyReport, HistoryError> {
    let paired = history.paired_operations()?;
    let mut report = AnomalyReport::valid();

    let mut writes: BTreeMap<(Key, Value), Write> = BTreeMap::new();
    for op in &paired {
        let status = match op.outcome {
            Outcome::Ok { .. } => WriteStatus::Acknowledged,
            Outcome::Fail { .. } => WriteStatus::Failed,
            Outcome::Info { .. } => WriteStatus::Unknown,
        };
        for micro_op in op.kind.micro_ops() {
            if let MicroOp::Append { key, value } = micro_op {
                writes.insert(
                    (key, value),
                    Write {
                        op: witness_op(op),
                        status,
                    },
                );
            }
        }
    }

    let mut final_reads: BTreeMap<Key, (WitnessOp, BTreeSet<Value>)> = BTreeMap::new();
    for op in &paired {
        let Outcome::Ok { results } = op.outcome else {
            if Some(op.id.session) == final_read_session {
                report.warnings.push(format!(
                    "final read {} did not complete, lost updates on its key were not checked",
                    op.id
                ));
            }
            continue;
        };
        for result in results {
            let MicroOpResult::Read { key, value } = result else {
                continue;
            };
            check_read(op, key, value, &writes, &mut report);
            if Some(op.id.session) == final_read_session {
                final_reads.insert(
                    key.clone(),
                    (witness_op(op), value.iter().copied().collect()),
                );
            }
        }
    }

    match final_read_session {
        Some(_) => check_lost_updates(&writes, &final_reads, &mut report),
        None => report
            .warnings
            .push("no final reads were taken, lost updates were not checked".to_string()),
    }

    if !report.is_clean() {
        tracing::warn!("Final-read audit found {:?}", report.anomaly_types());
    }
    Ok(report)
}

fn check_read(
    op: &PairedOperation<'_>,
    key: &Key,
    observed: &[Value],
    writes: &BTreeMap<(Key, Value), Write>,
    report: &mut AnomalyReport,
) {
    let mut seen = BTreeSet::new();
    let mut duplicates = BTreeSet::new();
    let mut phantoms = vec![];
    for &value in observed {
        if !seen.insert(value) {
            duplicates.insert(value);
        }
        match writes.get(&(key.clone(), value)) {
            None => phantoms.push(value),
            Some(write) if write.status == WriteStatus::Failed => {
                report.add_anomaly(
                    ABORTED_READ,
                    Witness {
                        operations: vec![write.op.clone(), witness_op(op)],
                        detail: json!({ "key": key, "value": value }),
                    },
                );
            },
            Some(_) => {},
        }
    }
    if !duplicates.is_empty() {
        report.add_anomaly(
            DUPLICATE_ELEMENTS,
            Witness {
                operations: vec![witness_op(op)],
                detail: json!({ "key": key, "values": duplicates, "read": observed }),
            },
        );
    }
    if !phantoms.is_empty() {
        report.add_anomaly(
            PHANTOM_READ,
            Witness {
                operations: vec![witness_op(op)],
                detail: json!({ "key": key, "values": phantoms }),
            },
        );
    }
}

fn check_lost_updates(
    writes: &BTreeMap<(Key, Value), Write>,
    final_reads: &BTreeMap<Key, (WitnessOp, BTreeSet<Value>)>,
    report: &mut AnomalyReport,
) {
    let mut lost: BTreeMap<&Key, Vec<(Value, &Write)>> = BTreeMap::new();
    for ((key, value), write) in writes {
        if write.status != WriteStatus::Acknowledged {
            continue;
        }
        let Some((_, final_values)) = final_reads.get(key) else {
            continue;
        };
        if !final_values.contains(value) {
            lost.entry(key).or_default().push((*value, write));
        }
    }
    for (key, missing) in lost {
        let Some((final_read, _)) = final_reads.get(key) else {
            continue;
        };
        let values: Vec<Value> = missing.iter().map(|(value, _)| *value).collect();
        let mut operations: Vec<WitnessOp> =
            missing.iter().map(|(_, write)| write.op.clone()).collect();
        operations.push(final_read.clone());
        report.add_anomaly(
            LOST_UPDATE,
            Witness {
                operations,
                detail: json!({ "key": key, "values": values }),
            },
        );
    }
}
