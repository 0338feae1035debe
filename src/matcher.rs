//! Assertion primitives.
//!
//! Every matcher is a pure function from the actual value and the expected
//! value to a [`MatcherResult`]. Matchers never decide which assertion runs
//! next; ordering belongs to the validator.

use crate::executor::normalize_output;
use serde_json::Value as JsonValue;
use similar::TextDiff;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::Path;
use sxd_xpath::{Context, Factory, Value as XPathValue};

/// Outcome of a single matcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatcherResult {
    pub success: bool,
    pub diff: String,
}

impl MatcherResult {
    fn pass() -> Self {
        Self {
            success: true,
            diff: String::new(),
        }
    }

    fn fail(diff: impl Into<String>) -> Self {
        Self {
            success: false,
            diff: diff.into(),
        }
    }
}

/// Unified diff of two texts with three lines of context.
pub fn unified_diff(got: &str, expected: &str) -> String {
    TextDiff::from_lines(got, expected)
        .unified_diff()
        .context_radius(3)
        .header("Got", "Expected")
        .to_string()
}

/// Exact text equality.
pub fn text(got: &str, expected: &str) -> MatcherResult {
    if got == expected {
        MatcherResult::pass()
    } else {
        MatcherResult::fail(unified_diff(got, expected))
    }
}

/// Equality of two displayable values, diffed by their text form.
pub fn equal<T>(got: T, expected: T) -> MatcherResult
where
    T: PartialEq + Display,
{
    if got == expected {
        MatcherResult::pass()
    } else {
        MatcherResult::fail(unified_diff(
            &format!("{got}\n"),
            &format!("{expected}\n"),
        ))
    }
}

/// `got` must contain `expected`.
pub fn contains(got: &str, expected: &str) -> MatcherResult {
    if got.contains(expected) {
        MatcherResult::pass()
    } else {
        MatcherResult::fail(format!(
            "\nExpected\n\n{got}\n\nto contain\n\n{expected}\n"
        ))
    }
}

/// `got` must not contain `expected`.
pub fn not_contains(got: &str, expected: &str) -> MatcherResult {
    if got.contains(expected) {
        MatcherResult::fail(format!(
            "\nExpected\n\n{got}\n\nto not contain\n\n{expected}\n"
        ))
    } else {
        MatcherResult::pass()
    }
}

/// Compare `got` with the contents of a reference file.
///
/// The file goes through the same normalization as captured output, so a
/// trailing newline in the reference does not count as a difference.
pub fn file(got: &str, path: &Path) -> MatcherResult {
    match std::fs::read_to_string(path) {
        Ok(contents) => text(got, &normalize_output(&contents)),
        Err(e) => MatcherResult::fail(format!(
            "Could not read reference file {}: {e}",
            path.display()
        )),
    }
}

/// Query `got` as JSON; every path must resolve to the expected value.
pub fn json(got: &str, expected: &BTreeMap<String, String>) -> MatcherResult {
    let document: JsonValue = match serde_json::from_str(got) {
        Ok(doc) => doc,
        Err(e) => return MatcherResult::fail(format!("Could not parse output as JSON: {e}")),
    };

    for (query, want) in expected {
        let value = match json_path(&document, query) {
            Some(v) if !v.is_null() => v,
            _ => return MatcherResult::fail(format!(r#"Query "{query}" did not match a path"#)),
        };

        let actual = json_text(&value);
        if actual != *want {
            return MatcherResult::fail(format!(
                "Expected json path \"{query}\" with result\n\n{actual}\n\nto be equal to\n\n{want}"
            ));
        }
    }

    MatcherResult::pass()
}

/// Resolve a dotted path (`a.b.0`, `items.#`) against a JSON document.
fn json_path(document: &JsonValue, query: &str) -> Option<JsonValue> {
    let mut current = document.clone();
    for segment in split_path(query) {
        current = match current {
            JsonValue::Array(items) if segment == "#" => JsonValue::from(items.len()),
            JsonValue::Array(mut items) => {
                let index: usize = segment.parse().ok()?;
                if index >= items.len() {
                    return None;
                }
                items.swap_remove(index)
            }
            JsonValue::Object(mut map) => map.remove(&segment)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Split on dots, honouring `\.` as a literal dot.
fn split_path(query: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = query.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'.') => {
                current.push('.');
                chars.next();
            }
            '.' => segments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    segments.push(current);
    segments
}

fn json_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Query `got` as XML with XPath; every query must resolve to the expected text.
pub fn xml(got: &str, expected: &BTreeMap<String, String>) -> MatcherResult {
    let package = match sxd_document::parser::parse(got) {
        Ok(p) => p,
        Err(e) => return MatcherResult::fail(format!("Could not parse output as XML: {e:?}")),
    };
    let document = package.as_document();
    let factory = Factory::new();
    let context = Context::new();

    for (query, want) in expected {
        let xpath = match factory.build(query) {
            Ok(Some(xpath)) => xpath,
            Ok(None) => return MatcherResult::fail(format!(r#"Query "{query}" is empty"#)),
            Err(e) => {
                return MatcherResult::fail(format!(r#"Error occurred in query "{query}": {e:?}"#));
            }
        };

        let value = match xpath.evaluate(&context, document.root()) {
            Ok(v) => v,
            Err(e) => {
                return MatcherResult::fail(format!(r#"Error occurred in query "{query}": {e:?}"#));
            }
        };

        let actual = match value {
            XPathValue::Nodeset(nodes) => match nodes.document_order_first() {
                Some(node) => node.string_value(),
                None => {
                    return MatcherResult::fail(format!(r#"Query "{query}" did not match a path"#));
                }
            },
            other => other.string(),
        };

        if actual != *want {
            return MatcherResult::fail(format!(
                "Expected xml path \"{query}\" with result\n\n{actual}\n\nto be equal to\n\n{want}"
            ));
        }
    }

    MatcherResult::pass()
}
