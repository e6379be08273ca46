//! Tunable limits for a grading run. Each can be overridden with an
//! environment variable of the same name.
#![deny(missing_docs)]

use std::{
    sync::LazyLock,
    time::Duration,
};

use cmd_util::env::env_config_secs;

/// Deadline for a single HTTP request to the candidate backend.
pub static HARNESS_REQUEST_TIMEOUT: LazyLock<Duration> =
    LazyLock::new(|| env_config_secs("HARNESS_REQUEST_TIMEOUT_SECS", 10));

/// Engine-level deadline for one operation, after which it is recorded as
/// indeterminate. Should exceed the request timeout.
pub static HARNESS_OP_TIMEOUT: LazyLock<Duration> =
    LazyLock::new(|| env_config_secs("HARNESS_OP_TIMEOUT_SECS", 30));

/// How long the checker subprocess may run before it is killed.
pub static HARNESS_CHECKER_TIMEOUT: LazyLock<Duration> =
    LazyLock::new(|| env_config_secs("HARNESS_CHECKER_TIMEOUT_SECS", 300));

/// How long to wait for the backend to come up before giving up on the run.
pub static HARNESS_HEALTH_CHECK_TIMEOUT: LazyLock<Duration> =
    LazyLock::new(|| env_config_secs("HARNESS_HEALTH_CHECK_TIMEOUT_SECS", 10));
