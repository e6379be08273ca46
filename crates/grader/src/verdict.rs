use std::collections::BTreeMap;

use elle::{
    AnomalyReport,
    Validity,
};
use history::HistorySummary;
use serde::Serialize;

use crate::unit_tests::UnitTestReport;

/// Score key for the consistency check, next to one key per unit test.
pub const CONSISTENCY_SCORE: &str = "elle";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VerdictStatus {
    Pass,
    Fail,
    HarnessError,
}

impl VerdictStatus {
    /// Process exit code for the `grade` binary.
    pub fn exit_code(self) -> i32 {
        match self {
            VerdictStatus::Pass => 0,
            VerdictStatus::Fail => 1,
            VerdictStatus::HarnessError => 2,
        }
    }
}

/// Where a run stopped when it could not produce a consistency result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Setup,
    Workload,
    Translation,
    Audit,
    Checker,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HarnessError {
    pub stage: Stage,
    pub message: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    pub unit_tests: UnitTestReport,
    /// Absent when the run failed before the consistency check finished.
    pub consistency: Option<AnomalyReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub harness_error: Option<HarnessError>,
    /// Why an otherwise clean run still proved nothing about the backend.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub inconclusive: Vec<String>,
    pub summary: Option<HistorySummary>,
}

impl Verdict {
    /// Passes only if every unit test passed, no anomaly was found, the
    /// checker reached a decision and at least one of the `workload_ok`
    /// workload operations succeeded.
    pub fn aggregate(
        unit_tests: UnitTestReport,
        consistency: AnomalyReport,
        summary: HistorySummary,
        workload_ok: u64,
    ) -> Self {
        let mut inconclusive = vec![];
        if consistency.validity == Validity::Unknown {
            inconclusive.push("checker could not determine validity".to_string());
        }
        if workload_ok == 0 {
            inconclusive.push("no workload operation succeeded".to_string());
        }
        let status =
            if unit_tests.passed() && consistency.is_clean() && inconclusive.is_empty() {
                VerdictStatus::Pass
            } else {
                VerdictStatus::Fail
            };
        for warning in &consistency.warnings {
            tracing::warn!("{warning}");
        }
        for reason in &inconclusive {
            tracing::warn!("Inconclusive run: {reason}");
        }
        tracing::info!(
            "Verdict: {status} (unit tests {}, anomalies {:?})",
            if unit_tests.passed() { "passed" } else { "failed" },
            consistency.anomaly_types()
        );
        Self {
            status,
            unit_tests,
            consistency: Some(consistency),
            harness_error: None,
            inconclusive,
            summary: Some(summary),
        }
    }

    pub fn harness_error(
        stage: Stage,
        error: &anyhow::Error,
        unit_tests: UnitTestReport,
        summary: Option<HistorySummary>,
    ) -> Self {
        let message = format!("{error:#}");
        tracing::error!("Harness error during {stage}: {message}");
        Self {
            status: VerdictStatus::HarnessError,
            unit_tests,
            consistency: None,
            harness_error: Some(HarnessError { stage, message }),
            inconclusive: vec![],
            summary,
        }
    }

    /// Pass/fail per unit test plus the consistency check.
    pub fn scores(&self) -> BTreeMap<String, bool> {
        let mut scores: BTreeMap<String, bool> = self
            .unit_tests
            .results
            .iter()
            .map(|result| (result.name.clone(), result.passed))
            .collect();
        let consistent = self.harness_error.is_none()
            && self.inconclusive.is_empty()
            && self
                .consistency
                .as_ref()
                .is_some_and(AnomalyReport::is_clean);
        scores.insert(CONSISTENCY_SCORE.to_string(), consistent);
        scores
    }

    /// The grading report: scores followed by the full verdict.
    pub fn to_json(&self) -> anyhow::Result<String> {
        #[derive(Serialize)]
        struct Report<'a> {
            scores: BTreeMap<String, bool>,
            #[serde(flatten)]
            verdict: &'a Verdict,
        }
        let report = Report {
            scores: self.scores(),
            verdict: self,
        };
        Ok(serde_json::to_string_pretty(&report)?)
    }
}
