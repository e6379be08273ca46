//! Bridges a recorded history to an Elle-compatible list-append checker:
//! translation into the checker's JSON history format, running the checker,
//! and reading its analysis back as an [`AnomalyReport`].

mod checker;
mod report;
mod translate;


pub use checker::{
    CheckerConfig,
    CheckerError,
    ElleChecker,
    CHECKER_DIR,
    HISTORY_FILE,
};
pub use report::{
    parse_checker_output,
    AnomalyReport,
    Validity,
    Witness,
    WitnessOp,
    UNSPECIFIED_ANOMALY,
};
pub use translate::{
    translate,
    ElleMop,
    ElleRecord,
    IndexEntry,
    ProcessPolicy,
    TranslateError,
    TranslateOptions,
    TranslatedHistory,
};
