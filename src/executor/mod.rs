//! Command execution backends.
//!
//! Every backend runs one test case's command to completion and hands the
//! captured result to the validator. Failing to run the command is not an
//! error of the run: it is recorded on the result and the test fails.

pub mod docker;
pub mod local;
pub mod process;
pub mod ssh;

pub use docker::DockerExecutor;
pub use local::LocalExecutor;
pub use ssh::SshExecutor;

use crate::env::expand_env;
use crate::error::{Error, ExecError};
use crate::model::{CommandResult, CommandUnderTest, TestCase, TestResult};
use crate::validator;
use std::collections::BTreeMap;
use std::time::Duration;

/// A backend that can run a test case.
///
/// `Err` is reserved for configuration problems that make the whole run
/// meaningless; anything that only prevents this one command from running is
/// reported through [`CommandResult::error`].
pub trait Executor: Send {
    fn execute(&self, test: &TestCase) -> Result<TestResult, Error>;
}

/// Variables declared by the test, with `$VAR` references expanded against
/// the host environment.
pub fn declared_env(command: &CommandUnderTest) -> BTreeMap<String, String> {
    command
        .env
        .iter()
        .map(|(k, v)| (k.clone(), expand_env(v)))
        .collect()
}

/// Full environment for a child process: the parent environment when
/// `inherit_env` is set, overlaid with the declared variables.
pub fn build_env(command: &CommandUnderTest) -> BTreeMap<String, String> {
    let mut env: BTreeMap<String, String> = if command.inherit_env {
        std::env::vars().collect()
    } else {
        BTreeMap::new()
    };
    env.extend(declared_env(command));
    env
}

/// Parse a test timeout. An empty string or a zero duration means no
/// deadline.
pub fn parse_timeout(value: &str) -> Result<Option<Duration>, ExecError> {
    if value.trim().is_empty() {
        return Ok(None);
    }
    let timeout = parse_duration(value).map_err(|reason| ExecError::InvalidTimeout {
        value: value.to_string(),
        reason,
    })?;
    Ok((!timeout.is_zero()).then_some(timeout))
}

/// Parse a duration such as `300ms`, `1.5s` or `1m30s`.
///
/// Accepted units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`. A bare
/// `0` is allowed; any other number needs a unit.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let s = value.trim();
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut nanos = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let number: f64 = rest[..number_end]
            .parse()
            .map_err(|_| format!("invalid duration \"{s}\""))?;
        rest = &rest[number_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_end] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => return Err(format!("missing unit in duration \"{s}\"")),
            unit => return Err(format!("unknown unit \"{unit}\" in duration \"{s}\"")),
        };
        nanos += number * scale;
        rest = &rest[unit_end..];
    }

    Ok(Duration::from_nanos(nanos.round() as u64))
}

/// Fold CRLF line endings to LF and drop trailing blank lines.
pub fn normalize_output(s: &str) -> String {
    let unified = s.replace("\r\n", "\n");
    let mut lines: Vec<&str> = unified.split('\n').collect();
    while lines.last().is_some_and(|line| line.trim().is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

/// Attach a captured result to a copy of `test` and validate it.
pub(crate) fn finish(test: &TestCase, result: CommandResult) -> Result<TestResult, Error> {
    let mut test = test.clone();
    test.result = result;
    validator::validate(&test)
}

/// Record that `test` could not be executed.
pub(crate) fn could_not_execute(test: &TestCase, error: ExecError) -> Result<TestResult, Error> {
    tracing::debug!(title = %test.title, %error, "could not execute");
    finish(
        test,
        CommandResult {
            error: Some(error),
            ..Default::default()
        },
    )
}
