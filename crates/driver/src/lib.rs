//! Runs a workload against a backend with many concurrent sessions and
//! records every operation into a shared history.

mod session;
#[cfg(test)]
mod tests;

use std::{
    sync::Arc,
    time::{
        Duration,
        Instant,
    },
};

use anyhow::Context;
use backend_client::Backend;
use history::{
    History,
    HistoryRecorder,
    SessionId,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use workload::{
    WorkloadGenerator,
    MAX_SESSIONS,
};

use crate::session::Session;

#[derive(Clone, Debug)]
pub struct DriverConfig {
    pub num_sessions: u32,
    /// Wall-clock limit. Sessions stop issuing operations once it expires.
    pub duration: Option<Duration>,
    /// Upper bound of the random pause between a session's operations.
    pub max_think_time: Duration,
    /// Calls still pending after this long are recorded as indeterminate.
    pub op_timeout: Duration,
    /// Whether to read every key once after the sessions finish.
    pub final_reads: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            num_sessions: 4,
            duration: None,
            max_think_time: Duration::ZERO,
            op_timeout: Duration::from_secs(30),
            final_reads: true,
        }
    }
}

pub struct RunOutcome {
    pub history: History,
    /// The external stop signal fired before the workload finished.
    pub cancelled: bool,
    pub elapsed: Duration,
    /// Session that issued the final reads, if they ran.
    pub final_read_session: Option<SessionId>,
}

pub struct Driver {
    backend: Arc<dyn Backend>,
    generator: Arc<WorkloadGenerator>,
    config: DriverConfig,
}

impl Driver {
    pub fn new(
        backend: Arc<dyn Backend>,
        generator: Arc<WorkloadGenerator>,
        config: DriverConfig,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(config.num_sessions >= 1, "need at least one session");
        anyhow::ensure!(
            config.num_sessions < MAX_SESSIONS,
            "at most {} sessions are supported",
            MAX_SESSIONS - 1
        );
        anyhow::ensure!(
            generator.config().ops_per_session.is_some() || config.duration.is_some(),
            "workload {} is unbounded and no duration was given",
            generator.config().name
        );
        anyhow::ensure!(!config.op_timeout.is_zero(), "op timeout must be nonzero");
        Ok(Self {
            backend,
            generator,
            config,
        })
    }

    /// Runs every session to completion, or until `stop` fires, and returns
    /// the frozen history. Any harness failure in a session stops the others
    /// and is returned once they have all wound down.
    pub async fn run(&self, stop: CancellationToken) -> anyhow::Result<RunOutcome> {
        let start = Instant::now();
        let recorder = HistoryRecorder::new();
        let workload_stop = stop.child_token();
        let streams = (0..self.config.num_sessions)
            .map(|i| self.generator.session(SessionId(i)))
            .collect::<anyhow::Result<Vec<_>>>()?;
        if let Some(warning) = self.generator.contention_warning(self.config.num_sessions) {
            tracing::warn!("{warning}");
        }

        let timer = self.config.duration.map(|duration| {
            let token = workload_stop.clone();
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                tracing::info!("Run duration of {duration:?} elapsed, stopping sessions");
                token.cancel();
            })
        });

        tracing::info!(
            "Running workload {} with {} sessions against {}",
            self.generator.config().name,
            self.config.num_sessions,
            self.backend.name(),
        );
        let mut join_set = JoinSet::new();
        for (i, ops) in (0..).zip(streams) {
            let session = Session {
                id: SessionId(i),
                backend: self.backend.clone(),
                recorder: recorder.clone(),
                stop: workload_stop.clone(),
                max_think_time: self.config.max_think_time,
                op_timeout: self.config.op_timeout,
            };
            join_set.spawn(session.run(ops));
        }
        let result = join_sessions(&mut join_set, &workload_stop).await;
        if let Some(timer) = timer {
            timer.abort();
        }
        result?;

        let mut final_read_session = None;
        if self.config.final_reads && !stop.is_cancelled() {
            let id = SessionId(self.config.num_sessions);
            tracing::info!("Reading final state of {} keys", self.generator.keys().len());
            let session = Session {
                id,
                backend: self.backend.clone(),
                recorder: recorder.clone(),
                stop: stop.clone(),
                max_think_time: Duration::ZERO,
                op_timeout: self.config.op_timeout,
            };
            session
                .run(self.generator.final_reads(id).into_iter())
                .await
                .context("Final reads failed")?;
            final_read_session = Some(id);
        }

        let history = recorder.freeze();
        let cancelled = stop.is_cancelled();
        let elapsed = start.elapsed();
        let summary = history.summary();
        tracing::info!(
            "Run finished in {elapsed:?}{}: {} operations ({} ok, {} fail, {} info)",
            if cancelled { " (cancelled)" } else { "" },
            summary.operations,
            summary.ok,
            summary.fail,
            summary.info,
        );
        Ok(RunOutcome {
            history,
            cancelled,
            elapsed,
            final_read_session,
        })
    }
}

async fn join_sessions(
    join_set: &mut JoinSet<anyhow::Result<()>>,
    stop: &CancellationToken,
) -> anyhow::Result<()> {
    let mut first_error = None;
    while let Some(result) = join_set.join_next().await {
        let error = match result {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e,
            Err(e) => anyhow::Error::new(e).context("Session task panicked"),
        };
        tracing::error!("Session failed, stopping the run: {error:#}");
        stop.cancel();
        first_error.get_or_insert(error);
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
