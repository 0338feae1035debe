//! Runtime data model shared by the suite loader, the pipeline and reporting.

use crate::error::ExecError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Node name used when a test does not declare any.
pub const LOCAL_NODE: &str = "local";

/// A fully resolved test case, ready to be handed to the runtime.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TestCase {
    pub title: String,
    pub command: CommandUnderTest,
    pub expected: Expected,
    /// Filled in by the executor on its own copy of the test case.
    pub result: CommandResult,
    /// Target nodes in declared order; empty means the implicit local node.
    pub nodes: Vec<String>,
    pub skip: bool,
    /// Suite file the test came from, when running a directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl TestCase {
    /// Nodes this test runs on, falling back to the local node.
    pub fn target_nodes(&self) -> Vec<String> {
        if self.nodes.is_empty() {
            vec![LOCAL_NODE.to_string()]
        } else {
            self.nodes.clone()
        }
    }
}

/// The command under test and the effective configuration it runs with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandUnderTest {
    pub cmd: String,
    pub dir: String,
    pub env: BTreeMap<String, String>,
    pub inherit_env: bool,
    /// Duration string such as `500ms`; empty means no deadline.
    pub timeout: String,
    /// Stored value; zero is treated as one attempt.
    pub retries: u32,
    /// Duration string slept between attempts.
    pub interval: String,
}

impl CommandUnderTest {
    /// Number of attempts, never less than one.
    pub fn effective_retries(&self) -> u32 {
        self.retries.max(1)
    }
}

/// Expected outcome of a command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Expected {
    pub stdout: ExpectedOut,
    pub stderr: ExpectedOut,
    pub exit_code: i32,
}

/// Assertions on one output stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExpectedOut {
    pub exactly: Option<String>,
    pub contains: Vec<String>,
    pub not_contains: Vec<String>,
    /// 1-indexed line number to expected line content.
    pub lines: BTreeMap<usize, String>,
    /// Zero means unset.
    pub line_count: usize,
    pub json: BTreeMap<String, String>,
    pub xml: BTreeMap<String, String>,
    /// Reference file, relative to the test's working directory.
    pub file: Option<PathBuf>,
}

/// What actually happened when the command ran.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Set only when the command could not be run at all.
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_error"
    )]
    pub error: Option<ExecError>,
}

fn serialize_error<S>(error: &Option<ExecError>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match error {
        Some(e) => serializer.serialize_str(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

/// The property a failed validation is reported against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Property {
    Stdout,
    Stderr,
    ExitCode,
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Property::Stdout => "Stdout",
            Property::Stderr => "Stderr",
            Property::ExitCode => "ExitCode",
        };
        f.write_str(name)
    }
}

/// Outcome of validating a command result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub success: bool,
    pub diff: String,
}

/// Result of one test case on one node.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TestResult {
    pub test_case: TestCase,
    pub validation_result: ValidationResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_property: Option<Property>,
    /// Attempt (1-based) that produced this result; zero for skipped tests.
    pub tries: u32,
    pub node: String,
    pub skipped: bool,
}

impl TestResult {
    /// A result for a test that is skipped on `node`.
    pub fn skipped(test: TestCase, node: &str) -> Self {
        Self {
            test_case: test,
            node: node.to_string(),
            skipped: true,
            ..Default::default()
        }
    }

    pub fn success(&self) -> bool {
        self.validation_result.success
    }

    /// The execution error, if the command could not be run.
    pub fn error(&self) -> Option<&ExecError> {
        self.test_case.result.error.as_ref()
    }

    /// Whether this result counts against the run.
    pub fn failed(&self) -> bool {
        !self.skipped && !self.success()
    }
}

/// Aggregate over one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunResult {
    pub test_results: Vec<TestResult>,
    pub failed: usize,
    pub skipped: usize,
    #[serde(serialize_with = "serialize_duration")]
    pub duration: Duration,
}

impl RunResult {
    /// Fold a result into the aggregate.
    pub fn record(&mut self, result: TestResult) {
        if result.skipped {
            self.skipped += 1;
        } else if !result.success() {
            self.failed += 1;
        }
        self.test_results.push(result);
    }

    /// Merge the results of another run (used when testing a directory).
    pub fn converge(&mut self, other: RunResult) {
        self.test_results.extend(other.test_results);
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.duration += other.duration;
    }

    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(success: bool, skipped: bool) -> TestResult {
        TestResult {
            validation_result: ValidationResult {
                success,
                diff: String::new(),
            },
            skipped,
            ..Default::default()
        }
    }

    #[test]
    fn zero_retries_means_one_attempt() {
        let cmd = CommandUnderTest::default();
        assert_eq!(cmd.effective_retries(), 1);

        let cmd = CommandUnderTest {
            retries: 3,
            ..Default::default()
        };
        assert_eq!(cmd.effective_retries(), 3);
    }

    #[test]
    fn target_nodes_default_to_local() {
        let mut test = TestCase::default();
        assert_eq!(test.target_nodes(), vec!["local"]);

        test.nodes = vec!["a".into(), "b".into()];
        assert_eq!(test.target_nodes(), vec!["a", "b"]);
    }

    #[test]
    fn record_counts_failures_and_skips() {
        let mut run = RunResult::default();
        run.record(result(true, false));
        run.record(result(false, false));
        run.record(result(false, true));

        assert_eq!(run.test_results.len(), 3);
        assert_eq!(run.failed, 1);
        assert_eq!(run.skipped, 1);
        assert!(!run.success());
    }

    #[test]
    fn converge_adds_counts_and_duration() {
        let mut a = RunResult {
            duration: Duration::from_millis(10),
            ..Default::default()
        };
        a.record(result(false, false));

        let mut b = RunResult {
            duration: Duration::from_millis(5),
            ..Default::default()
        };
        b.record(result(true, true));

        a.converge(b);
        assert_eq!(a.test_results.len(), 2);
        assert_eq!(a.failed, 1);
        assert_eq!(a.skipped, 1);
        assert_eq!(a.duration, Duration::from_millis(15));
    }

    #[test]
    fn property_names() {
        assert_eq!(Property::Stdout.to_string(), "Stdout");
        assert_eq!(Property::Stderr.to_string(), "Stderr");
        assert_eq!(Property::ExitCode.to_string(), "ExitCode");
    }
}
