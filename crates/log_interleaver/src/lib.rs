use std::{
    process::Stdio,
    sync::{
        atomic::{
            AtomicUsize,
            Ordering,
        },
        Arc,
    },
};

use anyhow::Context;
use colored::Colorize;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::{
    io::{
        AsyncBufReadExt,
        BufReader,
    },
    process::{
        Child,
        Command,
    },
    task::JoinHandle,
};

/// Forwards the stderr of child processes into `tracing`, one line at a time,
/// each prefixed with a colored tag naming the process. Stdout is left piped
/// for the caller to consume.
#[derive(Clone)]
pub struct LogInterleaver {
    inner: Arc<Mutex<LogInterleaverInner>>,
}

impl Default for LogInterleaver {
    fn default() -> Self {
        Self::new()
    }
}

impl LogInterleaver {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(LogInterleaverInner::new())),
        }
    }

    /// Spawns `c` with stdout piped and stderr forwarded under `prefix`.
    /// The returned handle finishes once the child closes its stderr.
    pub fn spawn_with_prefixed_stderr(
        &self,
        prefix: &str,
        c: &mut Command,
    ) -> anyhow::Result<(Child, JoinHandle<()>)> {
        self.inner.lock().spawn_with_prefixed_stderr(prefix, c)
    }
}

struct LogInterleaverInner {
    next_color: colored::Color,
    // Longest prefix seen so far; shorter ones are padded to line up.
    prefix_width: Arc<AtomicUsize>,
}

impl LogInterleaverInner {
    fn new() -> Self {
        Self {
            next_color: colored::Color::Yellow,
            prefix_width: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn spawn_with_prefixed_stderr(
        &mut self,
        prefix: &str,
        c: &mut Command,
    ) -> anyhow::Result<(Child, JoinHandle<()>)> {
        let prefix = prefix.to_string();
        let prefix_width = self.prefix_width.clone();
        prefix_width.fetch_max(prefix.len(), Ordering::SeqCst);
        let color = self.next_color;
        self.next_color = Self::next_color(self.next_color);

        let mut child = c
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn {prefix}"))?;
        let stderr = child
            .stderr
            .take()
            .context("Child stderr was not captured")?;
        let mut lines = tokio_stream::wrappers::LinesStream::new(BufReader::new(stderr).lines());

        let handle = tokio::spawn(async move {
            while let Some(maybe_line) = lines.next().await {
                let prefix_width = prefix_width.load(Ordering::SeqCst);
                tracing::info!(
                    "{} | {}",
                    pad_right(&prefix, prefix_width).color(color),
                    maybe_line
                        .unwrap_or_else(|e| format!("error reading from stderr: {e:?}"))
                        .trim_end(),
                );
            }
        });

        Ok((child, handle))
    }

    fn next_color(c: colored::Color) -> colored::Color {
        match c {
            // Red looks like errors and black is hard to read.
            colored::Color::Green => colored::Color::Yellow,
            colored::Color::Yellow => colored::Color::Blue,
            colored::Color::Blue => colored::Color::Magenta,
            colored::Color::Magenta => colored::Color::Cyan,
            colored::Color::Cyan => colored::Color::Green,
            _ => colored::Color::Yellow,
        }
    }
}

/// Pads `s` with spaces on the right to `l` characters. ASCII only.
fn pad_right(s: &str, l: usize) -> String {
    if s.len() >= l {
        return s.to_string();
    }
    s.to_string() + &" ".repeat(l - s.len())
}
