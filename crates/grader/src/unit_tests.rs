use backend_client::Backend;
use history::{
    MicroOp,
    MicroOpResult,
    OpId,
    Operation,
    OperationKind,
    SessionId,
};
use serde::Serialize;

/// Unit-test requests are issued outside any workload session.
const UNIT_TEST_SESSION: SessionId = SessionId(u32::MAX);

/// One request and the exact response it must produce.
#[derive(Clone, Debug)]
pub struct UnitTestStep {
    pub request: Vec<MicroOp>,
    pub expected: Vec<MicroOpResult>,
}

#[derive(Clone, Debug)]
pub struct UnitTest {
    pub name: String,
    pub steps: Vec<UnitTestStep>,
}

impl UnitTest {
    /// Appends to a fresh key twice, reading it before the first append and
    /// after the second.
    pub fn basic_append() -> Self {
        let key = "foo".to_string();
        let read = || MicroOp::Read { key: key.clone() };
        let append = |value| MicroOp::Append {
            key: key.clone(),
            value,
        };
        let observed = |value| MicroOpResult::Read {
            key: key.clone(),
            value,
        };
        let appended = |value| MicroOpResult::Append {
            key: key.clone(),
            value,
        };
        Self {
            name: "basic_append".to_string(),
            steps: vec![
                UnitTestStep {
                    request: vec![read(), append(1)],
                    expected: vec![observed(vec![]), appended(1)],
                },
                UnitTestStep {
                    request: vec![append(2), read()],
                    expected: vec![appended(2), observed(vec![1, 2])],
                },
            ],
        }
    }
}

pub fn default_unit_tests() -> Vec<UnitTest> {
    vec![UnitTest::basic_append()]
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UnitTestResult {
    pub name: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct UnitTestReport {
    pub results: Vec<UnitTestResult>,
}

impl UnitTestReport {
    pub fn passed(&self) -> bool {
        self.results.iter().all(|result| result.passed)
    }

    pub fn get(&self, name: &str) -> Option<&UnitTestResult> {
        self.results.iter().find(|result| result.name == name)
    }
}

/// Runs each test's steps in order through `backend`, stopping a test at its
/// first mismatch. Backend errors fail the test rather than the run.
pub async fn run_unit_tests(backend: &dyn Backend, tests: &[UnitTest]) -> UnitTestReport {
    let mut results = Vec::with_capacity(tests.len());
    let mut next_index = 0;
    for test in tests {
        let mut failure = None;
        for (i, step) in test.steps.iter().enumerate() {
            let op = Operation::new(
                OpId::new(UNIT_TEST_SESSION, next_index),
                OperationKind::Transaction {
                    ops: step.request.clone(),
                },
            );
            next_index += 1;
            match backend.invoke(&op).await {
                Ok(results) if results == step.expected => {},
                Ok(results) => {
                    failure = Some(format!(
                        "step {i}: expected {:?}, got {results:?}",
                        step.expected
                    ));
                    break;
                },
                Err(e) => {
                    failure = Some(format!("step {i}: {e}"));
                    break;
                },
            }
        }
        match &failure {
            None => tracing::info!("Unit test {} passed", test.name),
            Some(failure) => tracing::warn!("Unit test {} failed: {failure}", test.name),
        }
        results.push(UnitTestResult {
            name: test.name.clone(),
            passed: failure.is_none(),
            failure,
        });
    }
    UnitTestReport { results }
}
