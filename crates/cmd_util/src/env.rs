use std::{
    env,
    fmt::Debug,
    fs::File,
    io,
    path::PathBuf,
    str::FromStr,
    sync::LazyLock,
    time::Duration,
};

use tracing::Level;
use tracing_subscriber::{
    fmt::{
        format::format,
        MakeWriter,
    },
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
    Layer,
};

/// Reads `name` from the environment, falling back to `default` when it is
/// unset or does not parse.
pub fn env_config<T: Debug + FromStr>(name: &str, default: T) -> T
where
    <T as FromStr>::Err: Debug,
{
    let var_s = match env::var(name) {
        Ok(s) => s,
        Err(env::VarError::NotPresent) => return default,
        Err(env::VarError::NotUnicode(..)) => {
            tracing::warn!("Invalid value for {name}, falling back to {default:?}.");
            return default;
        },
    };
    match T::from_str(&var_s) {
        Ok(v) => {
            tracing::info!("Overriding {name} to {v:?} from environment");
            v
        },
        Err(e) => {
            tracing::warn!("Invalid value {var_s} for {name}, falling back to {default:?}: {e:?}");
            default
        },
    }
}

/// Like [`env_config`] for a whole number of seconds.
pub fn env_config_secs(name: &str, default_secs: u64) -> Duration {
    Duration::from_secs(env_config(name, default_secs))
}

/// Target for a copy of the trace output, taken from `HARNESS_TRACE_FILE`.
/// An empty value names the file after the running executable, e.g.
/// `grade.log`.
pub static HARNESS_TRACE_FILE: LazyLock<Option<File>> = LazyLock::new(|| {
    let requested = env::var("HARNESS_TRACE_FILE").ok()?;
    let path = if requested.is_empty() {
        let exe_path = env::current_exe().ok()?;
        let exe_name = exe_path.file_name()?.to_str()?.to_owned();
        PathBuf::from(format!("{exe_name}.log"))
    } else {
        PathBuf::from(requested)
    };
    match File::create(&path) {
        Ok(file) => Some(file),
        Err(e) => {
            eprintln!("Could not create trace file {}: {e}", path.display());
            None
        },
    }
});

/// Guard object. Hold onto it for as long as you'd like to keep tracing to
/// the file named by `HARNESS_TRACE_FILE`.
pub struct TracingGuard {
    _guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Call this from command line tools at startup. Logs go to stderr so stdout
/// stays free for reports.
pub fn config_tool(level: Level) -> TracingGuard {
    config_tracing(io::stderr, level)
}

fn config_tracing<W>(writer: W, level: Level) -> TracingGuard
where
    W: Send + Sync + for<'writer> MakeWriter<'writer> + 'static,
{
    let mut layers = Vec::new();
    let color_disabled = env::var("NO_COLOR").is_ok();
    let format_layer = tracing_subscriber::fmt::layer()
        .with_ansi(!color_disabled)
        .with_writer(writer);
    let format_layer = match env::var("LOG_FORMAT") {
        Ok(s) if s == "json" => format_layer.event_format(format().json()).boxed(),
        Ok(s) if s == "pretty" => format_layer.event_format(format().pretty()).boxed(),
        _ => format_layer.event_format(format().compact()).boxed(),
    };
    let format_layer = format_layer
        .with_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str())),
        )
        .boxed();
    layers.push(format_layer);

    let guard = if let Some(ref file) = *HARNESS_TRACE_FILE {
        let (file_writer, guard) = tracing_appender::non_blocking(file);
        let file_writer_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_writer)
            .with_filter(EnvFilter::from_default_env().add_directive(Level::DEBUG.into()))
            .boxed();
        layers.push(file_writer_layer);
        Some(guard)
    } else {
        None
    };
    tracing_subscriber::registry().with(layers).init();

    TracingGuard { _guard: guard }
}

pub fn config_test() {
    // Ok if this fails: tests call it from many helpers and only the first
    // call wins.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .compact()
        .try_init();
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{
        env_config,
        env_config_secs,
    };

    #[test]
    fn test_env_config_falls_back_to_default() {
        assert_eq!(env_config("HARNESS_TEST_UNSET_KNOB", 17u32), 17);
        assert_eq!(
            env_config_secs("HARNESS_TEST_UNSET_SECS", 3),
            Duration::from_secs(3)
        );
    }
}
