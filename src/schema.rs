//! Schema definitions for commander suite files.
//!
//! A suite is written in YAML (or TOML with the same keys) and deserialized
//! into these types before being resolved into runnable test cases.

use crate::config::TestConfig;
use crate::model::ExpectedOut;
use crate::node::Node;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// A suite file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SuiteFile {
    /// Configuration applied to every test in the file.
    #[serde(default)]
    pub config: TestConfig,

    /// Named execution targets.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub nodes: BTreeMap<String, Node>,

    /// Tests keyed by title.
    #[serde(default)]
    pub tests: BTreeMap<String, TestDecl>,
}

/// A single test.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TestDecl {
    /// Shell command to run. Defaults to the test title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Expected exit code.
    #[serde(default)]
    pub exit_code: i32,

    /// Assertions on standard output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<ExpectedOutDecl>,

    /// Assertions on standard error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<ExpectedOutDecl>,

    /// Configuration for this test only.
    #[serde(default)]
    pub config: TestConfig,

    /// Report the test as skipped without running it.
    #[serde(default)]
    pub skip: bool,
}

/// Assertions on one output stream.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ExpectedOutDecl {
    /// Shorthand: the stream must contain this text.
    Contains(String),

    /// Full set of assertions.
    Assertions(OutputAssertions),
}

impl From<ExpectedOutDecl> for ExpectedOut {
    fn from(decl: ExpectedOutDecl) -> Self {
        match decl {
            ExpectedOutDecl::Contains(text) => ExpectedOut {
                contains: vec![text],
                ..Default::default()
            },
            ExpectedOutDecl::Assertions(a) => ExpectedOut {
                exactly: a.exactly,
                contains: a.contains,
                not_contains: a.not_contains,
                lines: a.lines.into_iter().map(|(k, v)| (k.0, v)).collect(),
                line_count: a.line_count,
                json: a.json,
                xml: a.xml,
                file: a.file,
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct OutputAssertions {
    /// The whole stream must equal this text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exactly: Option<String>,

    /// Substrings that must appear.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contains: Vec<String>,

    /// Substrings that must not appear.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_contains: Vec<String>,

    /// Expected content of individual lines, numbered from 1.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub lines: BTreeMap<LineNumber, String>,

    /// Expected number of lines.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub line_count: usize,

    /// JSON paths and the values they must resolve to.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub json: BTreeMap<String, String>,

    /// XPath queries and the text they must resolve to.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub xml: BTreeMap<String, String>,

    /// Reference file the stream must equal, relative to the test directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

/// Key of a `lines` entry.
///
/// YAML writes these as integers and TOML as strings, so both are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct LineNumber(pub usize);

impl<'de> Deserialize<'de> for LineNumber {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct LineNumberVisitor;

        impl serde::de::Visitor<'_> for LineNumberVisitor {
            type Value = LineNumber;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a line number")
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<LineNumber, E> {
                usize::try_from(v)
                    .map(LineNumber)
                    .map_err(|_| E::custom(format!("line number {v} is too large")))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<LineNumber, E> {
                usize::try_from(v)
                    .map(LineNumber)
                    .map_err(|_| E::custom(format!("invalid line number {v}")))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<LineNumber, E> {
                v.trim()
                    .parse()
                    .map(LineNumber)
                    .map_err(|_| E::custom(format!("invalid line number '{v}'")))
            }
        }

        deserializer.deserialize_any(LineNumberVisitor)
    }
}

/// Generate the JSON Schema for suite files.
pub fn generate_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(SuiteFile)
}
