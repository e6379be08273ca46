use std::{
    path::PathBuf,
    sync::Arc,
};

use anyhow::Context;
use backend_client::Backend;
use driver::{
    Driver,
    DriverConfig,
    RunOutcome,
};
use elle::{
    translate,
    AnomalyReport,
    CheckerConfig,
    ElleChecker,
    TranslateOptions,
};
use history::{
    HistorySummary,
    SessionId,
};
use tokio_util::sync::CancellationToken;
use workload::{
    WorkloadConfig,
    WorkloadGenerator,
};

use crate::{
    audit::audit_final_reads,
    knobs::{
        HARNESS_CHECKER_TIMEOUT,
        HARNESS_OP_TIMEOUT,
    },
    unit_tests::{
        default_unit_tests,
        run_unit_tests,
        UnitTest,
    },
    verdict::{
        Stage,
        Verdict,
    },
};

#[derive(Clone, Debug)]
pub struct GradeConfig {
    pub workload: WorkloadConfig,
    pub driver: DriverConfig,
    pub translate: TranslateOptions,
    pub checker: CheckerConfig,
    pub unit_tests: Vec<UnitTest>,
    /// Keeps the history and checker artifacts here. Without it they go to a
    /// temporary directory that is removed after the check.
    pub run_dir: Option<PathBuf>,
}

impl GradeConfig {
    /// Runs `workload` with the session count it is tuned for and the
    /// default unit tests.
    pub fn new(workload: WorkloadConfig) -> Self {
        let driver = DriverConfig {
            num_sessions: workload.concurrency,
            op_timeout: *HARNESS_OP_TIMEOUT,
            ..DriverConfig::default()
        };
        let checker = CheckerConfig {
            timeout: *HARNESS_CHECKER_TIMEOUT,
            ..CheckerConfig::default()
        };
        Self {
            workload,
            driver,
            translate: TranslateOptions::default(),
            checker,
            unit_tests: default_unit_tests(),
            run_dir: None,
        }
    }
}

/// Grades `backend`: unit tests first, then the concurrent workload, whose
/// history is audited and checked. Harness failures end up in the verdict
/// rather than as an error.
pub async fn grade(
    backend: Arc<dyn Backend>,
    config: &GradeConfig,
    stop: CancellationToken,
) -> Verdict {
    tracing::info!(
        "Running {} unit tests against {}",
        config.unit_tests.len(),
        backend.name()
    );
    let unit_tests = run_unit_tests(backend.as_ref(), &config.unit_tests).await;

    let outcome = match run_workload(backend, config, stop).await {
        Ok(outcome) => outcome,
        Err(e) => return Verdict::harness_error(Stage::Workload, &e, unit_tests, None),
    };
    let summary = outcome.history.summary();
    if outcome.cancelled {
        let e = anyhow::anyhow!("run was cancelled before the workload finished");
        return Verdict::harness_error(Stage::Workload, &e, unit_tests, Some(summary));
    }
    match check_history(&outcome, config).await {
        Ok(report) => {
            let workload_ok = workload_successes(&summary, outcome.final_read_session);
            Verdict::aggregate(unit_tests, report, summary, workload_ok)
        },
        Err((stage, e)) => Verdict::harness_error(stage, &e, unit_tests, Some(summary)),
    }
}

/// Successful operations issued by the workload sessions, leaving out the
/// final reads.
fn workload_successes(summary: &HistorySummary, final_read_session: Option<SessionId>) -> u64 {
    summary
        .per_session
        .iter()
        .filter(|(session, _)| Some(**session) != final_read_session)
        .map(|(_, session)| session.ok)
        .sum()
}

async fn run_workload(
    backend: Arc<dyn Backend>,
    config: &GradeConfig,
    stop: CancellationToken,
) -> anyhow::Result<RunOutcome> {
    let generator = Arc::new(WorkloadGenerator::new(config.workload.clone())?);
    let driver = Driver::new(backend, generator, config.driver.clone())?;
    driver.run(stop).await
}

async fn check_history(
    outcome: &RunOutcome,
    config: &GradeConfig,
) -> Result<AnomalyReport, (Stage, anyhow::Error)> {
    let translated = translate(&outcome.history, &config.translate)
        .map_err(|e| (Stage::Translation, anyhow::Error::from(e)))?;
    let audit = audit_final_reads(&outcome.history, outcome.final_read_session)
        .map_err(|e| (Stage::Audit, anyhow::Error::from(e)))?;

    let checker = ElleChecker::new(config.checker.clone());
    let checked = match &config.run_dir {
        Some(dir) => {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create run directory {}", dir.display()))
                .map_err(|e| (Stage::Checker, e))?;
            checker.check(&translated, dir).await
        },
        None => {
            let dir = tempfile::tempdir()
                .context("Failed to create run directory")
                .map_err(|e| (Stage::Checker, e))?;
            checker.check(&translated, dir.path()).await
        },
    };
    let mut report = checked.map_err(|e| (Stage::Checker, anyhow::Error::from(e)))?;
    report.merge(audit);
    Ok(report)
}
