//! Applies the assertions of a test case to its captured result.

use crate::error::{ConfigError, Error};
use crate::matcher::{self, MatcherResult};
use crate::model::{ExpectedOut, Property, TestCase, TestResult, ValidationResult};
use std::path::Path;

/// Validate the captured result of `test`.
///
/// Stdout is checked first, then stderr, then the exit code; the first
/// failing property is reported with its diff. A test whose command could not
/// be executed is unsuccessful without a failed property.
pub fn validate(test: &TestCase) -> Result<TestResult, Error> {
    let mut result = TestResult {
        test_case: test.clone(),
        ..Default::default()
    };

    if test.result.error.is_some() {
        return Ok(result);
    }

    let dir = Path::new(&test.command.dir);
    let streams = [
        (Property::Stdout, &test.result.stdout, &test.expected.stdout),
        (Property::Stderr, &test.result.stderr, &test.expected.stderr),
    ];
    for (property, got, expected) in streams {
        let outcome = validate_expected_out(got, expected, dir)
            .map_err(|e| e.into_error(test, property))?;
        if !outcome.success {
            result.validation_result = ValidationResult {
                success: false,
                diff: outcome.diff,
            };
            result.failed_property = Some(property);
            return Ok(result);
        }
    }

    let outcome = matcher::equal(test.result.exit_code, test.expected.exit_code);
    if !outcome.success {
        result.failed_property = Some(Property::ExitCode);
    }
    result.validation_result = ValidationResult {
        success: outcome.success,
        diff: outcome.diff,
    };
    Ok(result)
}

/// A line assertion that cannot be evaluated against the actual output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineError {
    ZeroLine,
    OutOfRange { line: usize, available: usize },
}

impl LineError {
    fn into_error(self, test: &TestCase, property: Property) -> Error {
        let err = match self {
            LineError::ZeroLine => ConfigError::InvalidLineNumber {
                test: test.title.clone(),
                line: 0,
            },
            LineError::OutOfRange { line, available } => ConfigError::LineOutOfRange {
                test: test.title.clone(),
                property: property.to_string(),
                line,
                available,
            },
        };
        err.into()
    }
}

/// Check one output stream. Assertions run in a fixed order and the first
/// failure short-circuits.
pub fn validate_expected_out(
    got: &str,
    expected: &ExpectedOut,
    dir: &Path,
) -> Result<MatcherResult, LineError> {
    if let Some(exactly) = &expected.exactly {
        let r = matcher::text(got, exactly);
        if !r.success {
            return Ok(r);
        }
    }

    if let Some(file) = &expected.file {
        let r = matcher::file(got, &dir.join(file));
        if !r.success {
            return Ok(r);
        }
    }

    for want in &expected.contains {
        let r = matcher::contains(got, want);
        if !r.success {
            return Ok(r);
        }
    }

    if expected.line_count != 0 {
        let r = matcher::equal(count_lines(got), expected.line_count);
        if !r.success {
            return Ok(r);
        }
    }

    if !expected.lines.is_empty() {
        let actual: Vec<&str> = got.split('\n').collect();
        for (&line, want) in &expected.lines {
            let index = line.checked_sub(1).ok_or(LineError::ZeroLine)?;
            let Some(&got_line) = actual.get(index) else {
                return Err(LineError::OutOfRange {
                    line,
                    available: actual.len(),
                });
            };
            let r = matcher::text(got_line, want);
            if !r.success {
                return Ok(r);
            }
        }
    }

    for unwanted in &expected.not_contains {
        let r = matcher::not_contains(got, unwanted);
        if !r.success {
            return Ok(r);
        }
    }

    if !expected.json.is_empty() {
        let r = matcher::json(got, &expected.json);
        if !r.success {
            return Ok(r);
        }
    }

    if !expected.xml.is_empty() {
        let r = matcher::xml(got, &expected.xml);
        if !r.success {
            return Ok(r);
        }
    }

    Ok(MatcherResult {
        success: true,
        diff: String::new(),
    })
}

/// Number of lines in normalized output; empty output has none.
pub fn count_lines(s: &str) -> usize {
    if s.is_empty() {
        0
    } else {
        s.matches('\n').count() + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecError;
    use crate::model::CommandResult;

    fn test_case(stdout: &str, stderr: &str, exit_code: i32) -> TestCase {
        TestCase {
            title: "t".into(),
            result: CommandResult {
                stdout: stdout.into(),
                stderr: stderr.into(),
                exit_code,
                error: None,
            },
            ..Default::default()
        }
    }

    fn out(f: impl FnOnce(&mut ExpectedOut)) -> ExpectedOut {
        let mut e = ExpectedOut::default();
        f(&mut e);
        e
    }

    // ==================== Ordering ====================

    #[test]
    fn all_pass() {
        let mut t = test_case("hello\nworld", "", 0);
        t.expected.stdout = out(|e| {
            e.exactly = Some("hello\nworld".into());
            e.contains = vec!["world".into()];
            e.line_count = 2;
            e.lines.insert(2, "world".into());
            e.not_contains = vec!["bye".into()];
        });

        let r = validate(&t).unwrap();
        assert!(r.success(), "diff: {}", r.validation_result.diff);
        assert_eq!(r.failed_property, None);
    }

    #[test]
    fn stdout_checked_before_exit_code() {
        let mut t = test_case("hello", "", 1);
        t.expected.stdout = out(|e| e.contains = vec!["missing".into()]);

        let r = validate(&t).unwrap();
        assert!(!r.success());
        assert_eq!(r.failed_property, Some(Property::Stdout));
    }

    #[test]
    fn stderr_checked_before_exit_code() {
        let mut t = test_case("", "boom", 2);
        t.expected.stderr = out(|e| e.exactly = Some("bang".into()));

        let r = validate(&t).unwrap();
        assert_eq!(r.failed_property, Some(Property::Stderr));
    }

    #[test]
    fn exactly_reported_before_contains() {
        let got = "a";
        let expected = out(|e| {
            e.exactly = Some("b".into());
            e.contains = vec!["c".into()];
        });

        let r = validate_expected_out(got, &expected, Path::new("")).unwrap();
        assert!(!r.success);
        assert!(r.diff.contains("--- Got"), "diff: {}", r.diff);
    }

    #[test]
    fn contains_reported_before_not_contains() {
        let expected = out(|e| {
            e.contains = vec!["x".into()];
            e.not_contains = vec!["a".into()];
        });

        let r = validate_expected_out("a", &expected, Path::new("")).unwrap();
        assert!(r.diff.contains("to contain"), "diff: {}", r.diff);
        assert!(!r.diff.contains("to not contain"), "diff: {}", r.diff);
    }

    // ==================== Exit Code ====================

    #[test]
    fn exit_code_mismatch() {
        let t = test_case("", "", 1);

        let r = validate(&t).unwrap();
        assert!(!r.success());
        assert_eq!(r.failed_property, Some(Property::ExitCode));
        assert!(r.validation_result.diff.contains("-1"));
        assert!(r.validation_result.diff.contains("+0"));
    }

    #[test]
    fn execution_error_has_no_property() {
        let mut t = test_case("", "", 0);
        t.result.error = Some(ExecError::Timeout("5ms".into()));

        let r = validate(&t).unwrap();
        assert!(!r.success());
        assert_eq!(r.failed_property, None);
        assert!(r.error().is_some());
    }

    // ==================== Lines ====================

    #[test]
    fn count_lines_edge_cases() {
        assert_eq!(count_lines(""), 0);
        assert_eq!(count_lines("a"), 1);
        assert_eq!(count_lines("a\nb"), 2);
    }

    #[test]
    fn line_count_mismatch() {
        let expected = out(|e| e.line_count = 3);
        let r = validate_expected_out("a\nb", &expected, Path::new("")).unwrap();
        assert!(!r.success);
    }

    #[test]
    fn line_out_of_range_aborts() {
        let mut t = test_case("only one", "", 0);
        t.expected.stdout = out(|e| {
            e.lines.insert(5, "x".into());
        });

        let err = validate(&t).unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::LineOutOfRange {
                line: 5,
                available: 1,
                ..
            })
        ));
    }

    #[test]
    fn line_content_mismatch() {
        let expected = out(|e| {
            e.lines.insert(1, "first".into());
        });
        let r = validate_expected_out("second", &expected, Path::new("")).unwrap();
        assert!(!r.success);
    }

    // ==================== File ====================

    #[test]
    fn file_relative_to_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("out.txt"), "hello\n").unwrap();

        let mut t = test_case("hello", "", 0);
        t.command.dir = dir.path().to_string_lossy().into_owned();
        t.expected.stdout = out(|e| e.file = Some("out.txt".into()));

        let r = validate(&t).unwrap();
        assert!(r.success(), "diff: {}", r.validation_result.diff);
    }
}
