use std::{
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use backend_client::{
    testing::{
        Faults,
        InMemoryBackend,
        Isolation,
    },
    Backend,
    BackendError,
};
use history::{
    EventKind,
    MicroOpResult,
    Operation,
    OperationKind,
    Outcome,
    SessionId,
};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;
use workload::{
    WorkloadConfig,
    WorkloadGenerator,
};

use crate::{
    Driver,
    DriverConfig,
};

/// Answers every call after a fixed delay.
struct SlowBackend {
    inner: InMemoryBackend,
    delay: Duration,
}

#[async_trait]
impl Backend for SlowBackend {
    fn name(&self) -> &str {
        "slow"
    }

    async fn invoke(&self, op: &Operation) -> Result<Vec<MicroOpResult>, BackendError> {
        tokio::time::sleep(self.delay).await;
        self.inner.invoke(op).await
    }
}

fn driver(
    backend: Arc<dyn Backend>,
    workload: WorkloadConfig,
    config: DriverConfig,
) -> anyhow::Result<Driver> {
    Driver::new(backend, Arc::new(WorkloadGenerator::new(workload)?), config)
}

fn final_read(outcome: &crate::RunOutcome, key: &str) -> Option<Vec<u64>> {
    let session = outcome.final_read_session?;
    outcome
        .history
        .session_events(session)
        .find_map(|event| match &event.kind {
            EventKind::Complete(Outcome::Ok { results }) => match results.first() {
                Some(MicroOpResult::Read { key: k, value }) if k == key => Some(value.clone()),
                _ => None,
            },
            _ => None,
        })
}

#[tokio::test]
async fn test_serializable_counter() -> anyhow::Result<()> {
    cmd_util::env::config_test();
    let backend = Arc::new(InMemoryBackend::new(Isolation::Serializable));
    let config = DriverConfig {
        num_sessions: 10,
        ..DriverConfig::default()
    };
    let outcome = driver(backend.clone(), WorkloadConfig::counter(50), config)?
        .run(CancellationToken::new())
        .await?;

    assert!(!outcome.cancelled);
    outcome.history.validate()?;
    let summary = outcome.history.summary();
    // 500 increments plus one final read of the single key.
    assert_eq!(summary.operations, 501);
    assert_eq!(summary.ok, 501);
    assert_eq!(final_read(&outcome, "0").map(|v| v.len()), Some(500));
    assert_eq!(backend.list("0").len(), 500);

    for session in 0..10 {
        let order = outcome.history.session_invoke_order(SessionId(session));
        let indexes: Vec<_> = order.iter().map(|id| id.index).collect();
        assert_eq!(indexes, (0..50).collect::<Vec<_>>());
    }
    Ok(())
}

#[tokio::test]
async fn test_failures_are_recorded_and_sessions_continue() -> anyhow::Result<()> {
    let faults = Faults {
        reject_every: Some(5),
        lose_ack_every: Some(7),
    };
    let backend = Arc::new(InMemoryBackend::with_faults(Isolation::Serializable, faults));
    let config = DriverConfig {
        num_sessions: 3,
        final_reads: false,
        ..DriverConfig::default()
    };
    let outcome = driver(backend, WorkloadConfig::counter(20), config)?
        .run(CancellationToken::new())
        .await?;
    outcome.history.validate()?;
    let summary = outcome.history.summary();
    assert_eq!(summary.operations, 60);
    assert_eq!(summary.fail, 12);
    assert!(summary.info > 0);
    assert_eq!(summary.ok + summary.fail + summary.info, 60);
    assert_eq!(outcome.final_read_session, None);
    Ok(())
}

#[tokio::test]
async fn test_hung_calls_become_info() -> anyhow::Result<()> {
    let backend = Arc::new(SlowBackend {
        inner: InMemoryBackend::new(Isolation::Serializable),
        delay: Duration::from_secs(60),
    });
    let config = DriverConfig {
        num_sessions: 2,
        op_timeout: Duration::from_millis(50),
        final_reads: false,
        ..DriverConfig::default()
    };
    let outcome = driver(backend, WorkloadConfig::counter(2), config)?
        .run(CancellationToken::new())
        .await?;
    outcome.history.validate()?;
    let summary = outcome.history.summary();
    assert_eq!(summary.operations, 4);
    assert_eq!(summary.info, 4);
    Ok(())
}

#[tokio::test]
async fn test_stop_signal_leaves_no_orphans() -> anyhow::Result<()> {
    let backend = Arc::new(SlowBackend {
        inner: InMemoryBackend::new(Isolation::Serializable),
        delay: Duration::from_millis(5),
    });
    let config = DriverConfig {
        num_sessions: 4,
        ..DriverConfig::default()
    };
    let driver = driver(backend, WorkloadConfig::counter(1_000_000), config)?;
    let stop = CancellationToken::new();
    let canceller = {
        let stop = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            stop.cancel();
        })
    };
    let outcome = driver.run(stop).await?;
    canceller.await?;

    assert!(outcome.cancelled);
    assert!(outcome.history.orphaned_invokes().is_empty());
    outcome.history.validate()?;
    let summary = outcome.history.summary();
    assert!(summary.operations > 0);
    assert!(summary.operations < 4_000_000);
    assert_eq!(outcome.final_read_session, None);
    Ok(())
}

#[tokio::test]
async fn test_duration_limit_ends_unbounded_workload() -> anyhow::Result<()> {
    let backend = Arc::new(SlowBackend {
        inner: InMemoryBackend::new(Isolation::Serializable),
        delay: Duration::from_millis(2),
    });
    let mut workload = WorkloadConfig::list_append();
    workload.ops_per_session = None;
    let config = DriverConfig {
        num_sessions: 2,
        duration: Some(Duration::from_millis(100)),
        max_think_time: Duration::from_millis(3),
        ..DriverConfig::default()
    };
    let outcome = driver(backend, workload, config)?
        .run(CancellationToken::new())
        .await?;
    assert!(!outcome.cancelled);
    outcome.history.validate()?;
    // The final reads still run once the duration expires.
    assert_eq!(outcome.final_read_session, Some(SessionId(2)));
    let reads = outcome
        .history
        .session_events(SessionId(2))
        .filter(|e| matches!(&e.kind, EventKind::Invoke(OperationKind::Read { .. })))
        .count();
    assert_eq!(reads, 8);
    Ok(())
}

#[test]
fn test_unbounded_workload_needs_duration() -> anyhow::Result<()> {
    let mut workload = WorkloadConfig::list_append();
    workload.ops_per_session = None;
    let backend = Arc::new(InMemoryBackend::new(Isolation::Serializable));
    assert!(driver(backend, workload, DriverConfig::default()).is_err());
    Ok(())
}
