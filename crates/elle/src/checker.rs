use std::{
    path::{
        Path,
        PathBuf,
    },
    process::ExitStatus,
    time::Duration,
};

use log_interleaver::LogInterleaver;
use tokio::{
    io::AsyncReadExt,
    process::Command,
};

use crate::{
    report::{
        parse_checker_output,
        AnomalyReport,
    },
    translate::TranslatedHistory,
};

pub const HISTORY_FILE: &str = "history.json";
pub const CHECKER_DIR: &str = "checker";

#[derive(thiserror::Error, Debug)]
pub enum CheckerError {
    #[error("failed to prepare {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to start checker: {0}")]
    Spawn(String),
    #[error("checker did not finish within {0:?}")]
    Timeout(Duration),
    #[error("checker exited with {status}: {output}")]
    Crashed { status: String, output: String },
    #[error("could not parse checker output: {0}")]
    MalformedOutput(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckerConfig {
    /// Program followed by any leading arguments, e.g. `["java", "-jar",
    /// "elle-cli.jar"]`.
    pub command: Vec<String>,
    pub model: String,
    /// Consistency models to check against. Empty leaves the checker's
    /// default.
    pub consistency_models: Vec<String>,
    pub timeout: Duration,
    /// Nonzero exit codes that mean "analysis finished and found anomalies"
    /// rather than a checker failure.
    pub anomaly_exit_codes: Vec<i32>,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            command: vec!["elle-cli".to_string()],
            model: "list-append".to_string(),
            consistency_models: vec![],
            timeout: Duration::from_secs(300),
            anomaly_exit_codes: vec![],
        }
    }
}

/// Runs the external checker as a subprocess over a translated history.
pub struct ElleChecker {
    config: CheckerConfig,
    logs: LogInterleaver,
}

impl ElleChecker {
    pub fn new(config: CheckerConfig) -> Self {
        Self {
            config,
            logs: LogInterleaver::new(),
        }
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Writes the history into `run_dir` and checks it. The checker writes
    /// its own artifacts into `run_dir/checker`.
    pub async fn check(
        &self,
        translated: &TranslatedHistory,
        run_dir: &Path,
    ) -> Result<AnomalyReport, CheckerError> {
        let history_path = run_dir.join(HISTORY_FILE);
        let checker_dir = run_dir.join(CHECKER_DIR);
        tokio::fs::write(&history_path, &translated.bytes)
            .await
            .map_err(|source| CheckerError::Io {
                path: history_path.clone(),
                source,
            })?;
        tokio::fs::create_dir_all(&checker_dir)
            .await
            .map_err(|source| CheckerError::Io {
                path: checker_dir.clone(),
                source,
            })?;

        let Some((program, leading_args)) = self.config.command.split_first() else {
            return Err(CheckerError::Spawn("empty checker command".to_string()));
        };
        let mut command = Command::new(program);
        command
            .args(leading_args)
            .arg("--model")
            .arg(&self.config.model)
            .arg("--format")
            .arg("json");
        if !self.config.consistency_models.is_empty() {
            command
                .arg("--consistency-models")
                .arg(self.config.consistency_models.join(","));
        }
        command
            .arg("--directory")
            .arg(&checker_dir)
            .arg(&history_path)
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        tracing::info!(
            "Checking {} records with {}",
            translated.len(),
            self.config.command.join(" ")
        );
        let (mut child, mut stderr_forwarder) = self
            .logs
            .spawn_with_prefixed_stderr("checker", &mut command)
            .map_err(|e| CheckerError::Spawn(format!("{e:#}")))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| CheckerError::Spawn("checker stdout was not captured".to_string()))?;
        let pid = child.id();
        let mut stdout_reader = tokio::spawn(async move {
            let mut out = String::new();
            stdout.read_to_string(&mut out).await.map(|_| out)
        });

        // Anything the checker forks inherits its pipes, so the deadline covers
        // draining them as well as the exit.
        let finished = async {
            let status = child
                .wait()
                .await
                .map_err(|e| CheckerError::Spawn(format!("failed to wait: {e}")))?;
            let stdout = match (&mut stdout_reader).await {
                Ok(Ok(out)) => out,
                Ok(Err(e)) => return Err(CheckerError::MalformedOutput(e.to_string())),
                Err(e) => return Err(CheckerError::MalformedOutput(e.to_string())),
            };
            let _ = (&mut stderr_forwarder).await;
            Ok((status, stdout))
        };
        let result = tokio::time::timeout(self.config.timeout, finished).await;
        let (status, stdout) = match result {
            Ok(finished) => finished?,
            Err(_) => {
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                if matches!(child.try_wait(), Ok(None)) {
                    if let Err(e) = child.kill().await {
                        tracing::warn!("Failed to kill checker: {e}");
                    }
                }
                stdout_reader.abort();
                stderr_forwarder.abort();
                return Err(CheckerError::Timeout(self.config.timeout));
            },
        };

        if !self.exit_ok(status) {
            return Err(CheckerError::Crashed {
                status: status.to_string(),
                output: tail(&stdout),
            });
        }
        let report = parse_checker_output(&stdout, translated)
            .map_err(|e| CheckerError::MalformedOutput(format!("{e:#}")))?;
        tracing::info!(
            "Checker finished with {:?}: {:?}",
            report.validity,
            report.anomaly_types()
        );
        Ok(report)
    }

    fn exit_ok(&self, status: ExitStatus) -> bool {
        status.success()
            || status
                .code()
                .is_some_and(|code| self.config.anomaly_exit_codes.contains(&code))
    }
}

/// Kills the checker along with anything it started. The checker leads its
/// own process group.
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    // SAFETY: `killpg` only sends a signal.
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        tracing::warn!(
            "Failed to kill checker process group {pid}: {}",
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

/// The last few lines of output, for error messages.
fn tail(output: &str) -> String {
    let lines: Vec<_> = output.lines().collect();
    lines[lines.len().saturating_sub(10)..].join("\n")
}
