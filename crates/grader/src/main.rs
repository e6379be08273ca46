use std::{
    path::PathBuf,
    time::Duration,
};

use anyhow::Context;
use backend_client::{
    BackendConfig,
    HttpOptions,
};
use clap::Parser;
use cmd_util::env::config_tool;
use elle::ProcessPolicy;
use grader::{
    grade,
    knobs::{
        HARNESS_HEALTH_CHECK_TIMEOUT,
        HARNESS_REQUEST_TIMEOUT,
    },
    GradeConfig,
    Stage,
    UnitTestReport,
    Verdict,
};
use health_check::wait_for_http_health;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use url::Url;
use workload::{
    parse_workload_config,
    WorkloadConfig,
    WorkloadPreset,
};

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum BackendKind {
    Convex,
    FastApi,
}

/// Grade a candidate backend for transactional consistency.
#[derive(Parser, Debug)]
struct Args {
    /// Backend family to talk to
    #[clap(long, value_enum, required_unless_present = "backend_config")]
    backend: Option<BackendKind>,
    /// Base URL of the candidate backend
    #[clap(long, required_unless_present = "backend_config")]
    url: Option<String>,
    /// Path to a JSON backend config, e.g. `{"kind": "convex", "url": ".."}`
    #[clap(long, value_parser = parse_backend_config, conflicts_with_all = ["backend", "url"])]
    backend_config: Option<BackendConfig>,
    /// Convex function that runs a transaction
    #[clap(long, default_value = "answer:append")]
    mutation_path: String,
    /// Convex query function for read-only transactions. Without it every
    /// transaction goes through the mutation.
    #[clap(long)]
    query_path: Option<String>,
    /// FastAPI endpoint under /api
    #[clap(long, default_value = "append")]
    endpoint: String,
    /// Path to a JSON workload config
    #[clap(long, value_parser = parse_workload, conflicts_with = "preset")]
    workload: Option<WorkloadConfig>,
    /// Built-in workload to run when no workload file is given
    #[clap(long, default_value_t = WorkloadPreset::ListAppend)]
    preset: WorkloadPreset,
    /// Overrides the workload's seed
    #[clap(long)]
    seed: Option<u64>,
    /// Overrides the workload's session count
    #[clap(long)]
    sessions: Option<u32>,
    /// Stop issuing operations after this many seconds
    #[clap(long)]
    duration_secs: Option<u64>,
    /// Upper bound of the random pause between a session's operations
    #[clap(long, default_value_t = 0)]
    max_think_time_ms: u64,
    /// Skip reading every key after the workload
    #[clap(long)]
    no_final_reads: bool,
    /// Checker program and leading arguments, space separated
    #[clap(long, default_value = "elle-cli", value_delimiter = ' ')]
    checker: Vec<String>,
    /// Consistency models to check against, comma separated
    #[clap(long, value_delimiter = ',')]
    consistency_models: Vec<String>,
    /// Checker exit codes that mean "anomalies found" rather than a crash
    #[clap(long, value_delimiter = ',')]
    anomaly_exit_codes: Vec<i32>,
    /// Give a session a fresh checker process after each indeterminate
    /// operation
    #[clap(long)]
    fresh_process_after_info: bool,
    /// Keep the history and checker output in this directory
    #[clap(long)]
    run_dir: Option<PathBuf>,
    /// Write the JSON report here instead of stdout
    #[clap(long)]
    output: Option<PathBuf>,
    /// Don't wait for the backend's health endpoint before grading
    #[clap(long)]
    skip_health_check: bool,
    #[clap(short, long)]
    verbose: bool,
}

fn parse_workload(path: &str) -> anyhow::Result<WorkloadConfig> {
    parse_workload_config(path)
}

fn parse_backend_config(path: &str) -> anyhow::Result<BackendConfig> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read backend config file at {path}"))?;
    let config = serde_json::from_str(&s)
        .with_context(|| format!("Failed to parse backend config at {path}"))?;
    Ok(config)
}

impl Args {
    fn backend_config(&self) -> anyhow::Result<BackendConfig> {
        if let Some(config) = &self.backend_config {
            return Ok(config.clone());
        }
        let (Some(kind), Some(url)) = (self.backend, self.url.clone()) else {
            anyhow::bail!("--backend and --url are required without --backend-config");
        };
        let config = match kind {
            BackendKind::Convex => BackendConfig::Convex {
                url,
                mutation_path: self.mutation_path.clone(),
                query_path: self.query_path.clone(),
            },
            BackendKind::FastApi => BackendConfig::FastApi {
                url,
                endpoint: self.endpoint.clone(),
            },
        };
        Ok(config)
    }

    fn grade_config(&self) -> GradeConfig {
        let mut workload = self
            .workload
            .clone()
            .unwrap_or_else(|| self.preset.config());
        if let Some(seed) = self.seed {
            workload.seed = seed;
        }
        let mut config = GradeConfig::new(workload);
        if let Some(sessions) = self.sessions {
            config.driver.num_sessions = sessions;
        }
        config.driver.duration = self.duration_secs.map(Duration::from_secs);
        config.driver.max_think_time = Duration::from_millis(self.max_think_time_ms);
        config.driver.final_reads = !self.no_final_reads;
        config.checker.command = self.checker.clone();
        config.checker.consistency_models = self.consistency_models.clone();
        config.checker.anomaly_exit_codes = self.anomaly_exit_codes.clone();
        if self.fresh_process_after_info {
            config.translate.process_policy = ProcessPolicy::FreshAfterInfo;
        }
        config.run_dir = self.run_dir.clone();
        config
    }
}

async fn run(args: &Args) -> Verdict {
    let backend_config = match args.backend_config() {
        Ok(config) => config,
        Err(e) => return Verdict::harness_error(Stage::Setup, &e, UnitTestReport::default(), None),
    };
    if !args.skip_health_check {
        if let Err(e) = wait_for_backend(&backend_config).await {
            return Verdict::harness_error(
                Stage::Setup,
                &e,
                UnitTestReport::default(),
                None,
            );
        }
    }
    let options = HttpOptions {
        request_timeout: *HARNESS_REQUEST_TIMEOUT,
        ..HttpOptions::default()
    };
    let backend = match backend_config.connect(&options) {
        Ok(backend) => backend,
        Err(e) => {
            return Verdict::harness_error(
                Stage::Setup,
                &e,
                UnitTestReport::default(),
                None,
            )
        },
    };

    let stop = CancellationToken::new();
    let ctrl_c = {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, stopping sessions");
                stop.cancel();
            }
        })
    };
    let verdict = grade(backend, &args.grade_config(), stop).await;
    ctrl_c.abort();
    verdict
}

async fn wait_for_backend(config: &BackendConfig) -> anyhow::Result<()> {
    let url: Url = config
        .url()
        .parse()
        .with_context(|| format!("Invalid backend url {}", config.url()))?;
    wait_for_http_health(
        &url,
        config.health_endpoint(),
        *HARNESS_HEALTH_CHECK_TIMEOUT,
        *HARNESS_REQUEST_TIMEOUT,
    )
    .await?;
    Ok(())
}

fn write_report(verdict: &Verdict, output: Option<&PathBuf>) -> anyhow::Result<()> {
    let report = verdict.to_json()?;
    match output {
        Some(path) => std::fs::write(path, report + "\n")
            .with_context(|| format!("Failed to write report to {}", path.display()))?,
        None => println!("{report}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let guard = config_tool(if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    });
    let verdict = run(&args).await;
    write_report(&verdict, args.output.as_ref())?;
    drop(guard);
    std::process::exit(verdict.status.exit_code());
}
