#![cfg(unix)]

use std::{
    path::Path,
    sync::{
        atomic::{
            AtomicU64,
            Ordering,
        },
        Arc,
    },
};

use async_trait::async_trait;
use backend_client::{
    testing::{
        serve,
        Faults,
        InMemoryBackend,
        Isolation,
    },
    Backend,
    BackendConfig,
    BackendError,
    HttpOptions,
};
use elle::CheckerConfig;
use history::{
    MicroOpResult,
    Operation,
};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;
use workload::WorkloadConfig;

use crate::{
    audit::LOST_UPDATE,
    grade,
    GradeConfig,
    Stage,
    VerdictStatus,
    CONSISTENCY_SCORE,
};

const VALID_ANALYSIS: &str =
    r#"echo '{"valid?": true, "anomaly-types": [], "anomalies": {}, "not": []}'"#;

const UNKNOWN_ANALYSIS: &str = r#"echo '{"valid?": "unknown", "anomaly-types": ["empty-transaction-graph"], "anomalies": {"empty-transaction-graph": true}}'"#;

/// Answers its first `healthy_calls` calls, then loses every
/// acknowledgement.
struct GoesDark {
    inner: InMemoryBackend,
    healthy_calls: u64,
    calls: AtomicU64,
}

impl GoesDark {
    fn new(healthy_calls: u64) -> Self {
        Self {
            inner: InMemoryBackend::new(Isolation::Serializable),
            healthy_calls,
            calls: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Backend for GoesDark {
    fn name(&self) -> &str {
        "goes-dark"
    }

    async fn invoke(&self, op: &Operation) -> Result<Vec<MicroOpResult>, BackendError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.healthy_calls {
            return self.inner.invoke(op).await;
        }
        Err(BackendError::Indefinite("connection reset".to_string()))
    }
}

fn checker_script(dir: &Path, body: &str) -> anyhow::Result<CheckerConfig> {
    let path = dir.join("checker.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n"))?;
    Ok(CheckerConfig {
        command: vec!["sh".to_string(), path.to_string_lossy().into_owned()],
        ..CheckerConfig::default()
    })
}

fn counter_config(dir: &Path, checker_body: &str) -> anyhow::Result<GradeConfig> {
    let mut config = GradeConfig::new(WorkloadConfig::counter(50));
    config.checker = checker_script(dir, checker_body)?;
    Ok(config)
}

#[tokio::test]
async fn test_serializable_backend_passes() -> anyhow::Result<()> {
    cmd_util::env::config_test();
    let scripts = tempfile::tempdir()?;
    let backend = Arc::new(InMemoryBackend::new(Isolation::Serializable));
    let config = counter_config(scripts.path(), VALID_ANALYSIS)?;

    let verdict = grade(backend.clone(), &config, CancellationToken::new()).await;
    assert_eq!(verdict.status, VerdictStatus::Pass, "{verdict:?}");
    assert_eq!(backend.list("0").len(), 500);
    let summary = verdict.summary.as_ref().map(|s| (s.operations, s.ok));
    assert_eq!(summary, Some((501, 501)));
    assert!(verdict.scores().values().all(|passed| *passed));

    let report: serde_json::Value = serde_json::from_str(&verdict.to_json()?)?;
    assert_eq!(report["status"], "pass");
    assert_eq!(report["scores"]["basic_append"], true);
    assert_eq!(report["scores"][CONSISTENCY_SCORE], true);
    Ok(())
}

#[tokio::test]
async fn test_racy_backend_loses_updates() -> anyhow::Result<()> {
    let scripts = tempfile::tempdir()?;
    let backend = Arc::new(InMemoryBackend::new(Isolation::Racy));
    let config = counter_config(scripts.path(), VALID_ANALYSIS)?;

    let verdict = grade(backend.clone(), &config, CancellationToken::new()).await;
    assert_eq!(verdict.status, VerdictStatus::Fail);
    assert!(backend.list("0").len() < 500);
    let consistency = verdict.consistency.as_ref().map(|c| c.anomaly_types());
    assert_eq!(consistency, Some(vec![LOST_UPDATE]));
    // The single-session unit test cannot observe the race.
    assert_eq!(verdict.unit_tests.get("basic_append").map(|r| r.passed), Some(true));
    assert_eq!(verdict.scores()[CONSISTENCY_SCORE], false);
    Ok(())
}

#[tokio::test]
async fn test_checker_crash_is_a_harness_error() -> anyhow::Result<()> {
    let scripts = tempfile::tempdir()?;
    let backend = Arc::new(InMemoryBackend::new(Isolation::Serializable));
    let config = counter_config(scripts.path(), "echo 'Exception in thread main' 1>&2; exit 254")?;

    let verdict = grade(backend, &config, CancellationToken::new()).await;
    assert_eq!(verdict.status, VerdictStatus::HarnessError);
    assert_eq!(verdict.status.exit_code(), 2);
    assert_eq!(verdict.harness_error.as_ref().map(|e| e.stage), Some(Stage::Checker));
    assert!(verdict.consistency.is_none());
    assert!(verdict.summary.is_some());
    assert_eq!(verdict.scores()[CONSISTENCY_SCORE], false);
    Ok(())
}

#[tokio::test]
async fn test_checker_anomalies_fail_the_run() -> anyhow::Result<()> {
    let scripts = tempfile::tempdir()?;
    let backend = Arc::new(InMemoryBackend::new(Isolation::Serializable));
    let config = counter_config(
        scripts.path(),
        r#"echo '{"valid?": false, "anomaly-types": ["G1c"], "anomalies": {"G1c": []}}'"#,
    )?;

    let verdict = grade(backend, &config, CancellationToken::new()).await;
    assert_eq!(verdict.status, VerdictStatus::Fail);
    assert_eq!(verdict.status.exit_code(), 1);
    let consistency = verdict.consistency.as_ref().map(|c| c.anomaly_types());
    assert_eq!(consistency, Some(vec!["G1c"]));
    Ok(())
}

#[tokio::test]
async fn test_failed_unit_test_fails_clean_run() -> anyhow::Result<()> {
    let scripts = tempfile::tempdir()?;
    let faults = Faults {
        reject_every: Some(1),
        lose_ack_every: None,
    };
    let backend = Arc::new(InMemoryBackend::with_faults(Isolation::Serializable, faults));
    let config = counter_config(scripts.path(), VALID_ANALYSIS)?;

    let verdict = grade(backend, &config, CancellationToken::new()).await;
    assert_eq!(verdict.status, VerdictStatus::Fail);
    let basic_append = verdict.unit_tests.get("basic_append");
    assert_eq!(basic_append.map(|r| r.passed), Some(false));
    assert!(basic_append
        .and_then(|r| r.failure.as_deref())
        .is_some_and(|failure| failure.starts_with("step 0")));
    // Every operation was rejected, so the history shows nothing either way.
    assert_eq!(verdict.inconclusive, vec!["no workload operation succeeded"]);
    assert_eq!(verdict.scores()[CONSISTENCY_SCORE], false);
    Ok(())
}

#[tokio::test]
async fn test_unknown_validity_does_not_pass() -> anyhow::Result<()> {
    let scripts = tempfile::tempdir()?;
    let backend = Arc::new(InMemoryBackend::new(Isolation::Serializable));
    let config = counter_config(scripts.path(), UNKNOWN_ANALYSIS)?;

    let verdict = grade(backend, &config, CancellationToken::new()).await;
    assert_eq!(verdict.status, VerdictStatus::Fail, "{verdict:?}");
    assert!(verdict.unit_tests.passed());
    assert_eq!(
        verdict.inconclusive,
        vec!["checker could not determine validity"]
    );
    assert_eq!(verdict.scores()[CONSISTENCY_SCORE], false);
    let report: serde_json::Value = serde_json::from_str(&verdict.to_json()?)?;
    assert_eq!(report["status"], "fail");
    assert_eq!(report["consistency"]["validity"], "unknown");
    Ok(())
}

#[tokio::test]
async fn test_run_without_successful_operations_does_not_pass() -> anyhow::Result<()> {
    let scripts = tempfile::tempdir()?;
    // Enough healthy calls for the unit test, none for the workload.
    let backend = Arc::new(GoesDark::new(2));
    let config = counter_config(scripts.path(), VALID_ANALYSIS)?;

    let verdict = grade(backend, &config, CancellationToken::new()).await;
    assert_eq!(verdict.status, VerdictStatus::Fail, "{verdict:?}");
    assert_eq!(verdict.unit_tests.get("basic_append").map(|r| r.passed), Some(true));
    assert_eq!(verdict.summary.as_ref().map(|s| s.ok), Some(0));
    assert!(verdict.consistency.as_ref().is_some_and(|c| c.is_clean()));
    assert_eq!(verdict.inconclusive, vec!["no workload operation succeeded"]);
    assert_eq!(verdict.scores()[CONSISTENCY_SCORE], false);
    Ok(())
}

#[tokio::test]
async fn test_cancelled_run_is_a_harness_error() -> anyhow::Result<()> {
    let scripts = tempfile::tempdir()?;
    let backend = Arc::new(InMemoryBackend::new(Isolation::Serializable));
    let config = counter_config(scripts.path(), VALID_ANALYSIS)?;
    let stop = CancellationToken::new();
    stop.cancel();

    let verdict = grade(backend, &config, stop).await;
    assert_eq!(verdict.status, VerdictStatus::HarnessError);
    assert_eq!(verdict.harness_error.as_ref().map(|e| e.stage), Some(Stage::Workload));
    Ok(())
}

#[tokio::test]
async fn test_invalid_workload_is_a_harness_error() -> anyhow::Result<()> {
    let scripts = tempfile::tempdir()?;
    let backend = Arc::new(InMemoryBackend::new(Isolation::Serializable));
    let mut config = counter_config(scripts.path(), VALID_ANALYSIS)?;
    config.workload.num_keys = 0;

    let verdict = grade(backend, &config, CancellationToken::new()).await;
    assert_eq!(verdict.harness_error.as_ref().map(|e| e.stage), Some(Stage::Workload));
    assert!(verdict.summary.is_none());
    Ok(())
}

#[tokio::test]
async fn test_list_append_over_http() -> anyhow::Result<()> {
    let scripts = tempfile::tempdir()?;
    let run_dir = tempfile::tempdir()?;
    let server = serve(Arc::new(InMemoryBackend::new(Isolation::Serializable))).await?;
    let backend: Arc<dyn Backend> =
        BackendConfig::fast_api(server.url.clone()).connect(&HttpOptions::default())?;

    let mut config = GradeConfig::new(WorkloadConfig::list_append());
    config.checker = checker_script(scripts.path(), VALID_ANALYSIS)?;
    config.run_dir = Some(run_dir.path().join("run"));

    let verdict = grade(backend, &config, CancellationToken::new()).await;
    assert_eq!(verdict.status, VerdictStatus::Pass, "{verdict:?}");
    // 4 sessions of 16 transactions, then one read per key.
    let summary = verdict.summary.as_ref().map(|s| s.operations);
    assert_eq!(summary, Some(64 + 8));
    let history = std::fs::read_to_string(run_dir.path().join("run").join(elle::HISTORY_FILE))?;
    assert!(history.starts_with("[\n{\"type\":\"invoke\",\"f\":\"txn\""));
    Ok(())
}
