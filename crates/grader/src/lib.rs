//! Grades a candidate backend: unit tests, a concurrent list-append workload,
//! an audit of the final state, and the external consistency checker, folded
//! into a single [`Verdict`].

pub mod audit;
pub mod knobs;
mod pipeline;
mod unit_tests;
mod verdict;

#[cfg(test)]
mod tests;

pub use pipeline::{
    grade,
    GradeConfig,
};
pub use unit_tests::{
    default_unit_tests,
    run_unit_tests,
    UnitTest,
    UnitTestReport,
    UnitTestResult,
    UnitTestStep,
};
pub use verdict::{
    HarnessError,
    Stage,
    Verdict,
    VerdictStatus,
    CONSISTENCY_SCORE,
};
