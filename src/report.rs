//! Rendering of results: live human output, the closing summary, JSON and
//! JUnit XML.

use crate::model::{RunResult, TestResult};
use crate::runtime::EventHandler;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::{self, Write};

/// Prints one line per result as the run progresses.
pub struct HumanReporter<W: Write> {
    out: W,
}

impl<W: Write> HumanReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> EventHandler for HumanReporter<W> {
    fn test_finished(&mut self, result: &TestResult) {
        let mark = if result.success() { "✓" } else { "✗" };
        let mut line = format!(
            "{mark}{} [{}] {}",
            file_tag(result),
            result.node,
            result.test_case.title
        );
        if result.tries > 1 {
            let _ = write!(line, ", retries {}", result.tries);
        }
        let _ = writeln!(self.out, "{line}");
    }

    fn test_skipped(&mut self, result: &TestResult) {
        let _ = writeln!(
            self.out,
            "-{} [{}] {}, was skipped",
            file_tag(result),
            result.node,
            result.test_case.title
        );
    }
}

fn file_tag(result: &TestResult) -> String {
    match &result.test_case.file_name {
        Some(name) => format!(" [{name}]"),
        None => String::new(),
    }
}

/// Write the failure details and the closing counts.
pub fn write_summary<W: Write>(out: &mut W, run: &RunResult) -> io::Result<()> {
    if run.failed > 0 {
        writeln!(out)?;
        writeln!(out, "Results")?;
        writeln!(out)?;

        for result in run.test_results.iter().filter(|r| r.failed()) {
            let tag = file_tag(result);
            let title = &result.test_case.title;
            if let Some(error) = result.error() {
                writeln!(
                    out,
                    "✗{tag} [{}] '{title}' could not be executed with error message:",
                    result.node
                )?;
                writeln!(out, "{error}")?;
                continue;
            }

            let property = result
                .failed_property
                .map(|p| p.to_string())
                .unwrap_or_default();
            writeln!(
                out,
                "✗{tag} [{}] '{title}', on property '{property}'",
                result.node
            )?;
            writeln!(out, "{}", result.validation_result.diff)?;
        }
    }

    writeln!(out)?;
    writeln!(out, "Duration: {:.3}s", run.duration.as_secs_f64())?;
    writeln!(
        out,
        "Count: {}, Failed: {}, Skipped: {}",
        run.test_results.len(),
        run.failed,
        run.skipped
    )
}

/// Results as pretty-printed JSON.
pub fn format_json(run: &RunResult) -> serde_json::Result<String> {
    serde_json::to_string_pretty(run)
}

/// Results as JUnit XML, one `<testsuite>` per suite file.
pub fn format_junit_xml(run: &RunResult, timestamp: DateTime<Utc>) -> String {
    let mut suites: BTreeMap<&str, Vec<&TestResult>> = BTreeMap::new();
    for result in &run.test_results {
        let name = result.test_case.file_name.as_deref().unwrap_or("commander");
        suites.entry(name).or_default().push(result);
    }
    let timestamp = timestamp.to_rfc3339_opts(SecondsFormat::Secs, true);

    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = writeln!(
        xml,
        "<testsuites tests=\"{}\" failures=\"{}\" skipped=\"{}\" time=\"{:.3}\">",
        run.test_results.len(),
        run.failed,
        run.skipped,
        run.duration.as_secs_f64()
    );

    for (name, results) in suites {
        let failures = results.iter().filter(|r| r.failed()).count();
        let skipped = results.iter().filter(|r| r.skipped).count();
        let _ = writeln!(
            xml,
            "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{failures}\" skipped=\"{skipped}\" timestamp=\"{timestamp}\">",
            escape_xml(name),
            results.len()
        );

        for result in results {
            let _ = writeln!(
                xml,
                "    <testcase name=\"{}\" classname=\"{}\">",
                escape_xml(&result.test_case.title),
                escape_xml(&result.node)
            );

            if result.skipped {
                xml.push_str("      <skipped/>\n");
            } else if let Some(error) = result.error() {
                let _ = writeln!(
                    xml,
                    "      <error message=\"{}\"/>",
                    escape_xml(&error.to_string())
                );
            } else if !result.success() {
                let property = result
                    .failed_property
                    .map(|p| p.to_string())
                    .unwrap_or_default();
                let _ = writeln!(
                    xml,
                    "      <failure message=\"on property '{}'\">",
                    escape_xml(&property)
                );
                let _ = writeln!(xml, "{}", escape_xml(&result.validation_result.diff));
                xml.push_str("      </failure>\n");
            }

            xml.push_str("    </testcase>\n");
        }

        xml.push_str("  </testsuite>\n");
    }

    xml.push_str("</testsuites>\n");
    xml
}

/// Escape special XML characters.
fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
