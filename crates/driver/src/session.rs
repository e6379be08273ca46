use std::{
    sync::Arc,
    time::Duration,
};

use backend_client::{
    Backend,
    BackendError,
};
use history::{
    HistoryRecorder,
    Operation,
    Outcome,
    SessionId,
};
use rand::Rng;
use tokio_util::sync::CancellationToken;

/// One simulated client. Issues its operations strictly one at a time.
pub(crate) struct Session {
    pub id: SessionId,
    pub backend: Arc<dyn Backend>,
    pub recorder: HistoryRecorder,
    pub stop: CancellationToken,
    pub max_think_time: Duration,
    pub op_timeout: Duration,
}

impl Session {
    pub async fn run(self, ops: impl Iterator<Item = Operation>) -> anyhow::Result<()> {
        let mut issued = 0u64;
        for op in ops {
            if self.stop.is_cancelled() {
                break;
            }
            self.recorder.invoke(&op)?;
            let outcome = match tokio::time::timeout(self.op_timeout, self.backend.invoke(&op)).await
            {
                Ok(Ok(results)) => Outcome::Ok { results },
                Ok(Err(BackendError::Definite(error))) => Outcome::Fail { error },
                Ok(Err(BackendError::Indefinite(error))) => Outcome::Info { error },
                Err(_) => Outcome::Info {
                    error: format!("no response within {:?}", self.op_timeout),
                },
            };
            tracing::debug!("{} {}: {outcome:?}", op.id, op.kind.label());
            self.recorder.complete(op.id, outcome)?;
            issued += 1;

            if !self.max_think_time.is_zero() {
                let think = rand::rng().random_range(Duration::ZERO..=self.max_think_time);
                tokio::select! {
                    _ = self.stop.cancelled() => break,
                    _ = tokio::time::sleep(think) => {},
                }
            }
        }
        tracing::debug!("Session {} finished after {issued} operations", self.id);
        Ok(())
    }
}
