//! Environment variable expansion utilities.

use regex::{Captures, Regex};
use std::sync::LazyLock;

static VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([^}]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)").expect("valid variable pattern")
});

/// Expand `$VAR` and `${VAR}` references against the host environment.
///
/// Unset variables expand to the empty string, the same way a shell does.
///
/// # Examples
///
/// ```
/// // SAFETY: doc test runs single-threaded
/// unsafe { std::env::set_var("COMMANDER_DOC_VAR", "hello") };
/// assert_eq!(commander::env::expand_env("${COMMANDER_DOC_VAR} world"), "hello world");
/// assert_eq!(commander::env::expand_env("$COMMANDER_DOC_VAR"), "hello");
/// ```
pub fn expand_env(s: &str) -> String {
    expand_env_with(s, |name| std::env::var(name).ok())
}

/// Expand variables using a custom lookup.
pub fn expand_env_with<F>(s: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if !s.contains('$') {
        return s.to_string();
    }

    VAR_PATTERN
        .replace_all(s, |caps: &Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            lookup(name).unwrap_or_default()
        })
        .into_owned()
}

/// Whether a value contains a variable reference.
pub fn has_reference(s: &str) -> bool {
    VAR_PATTERN.is_match(s)
}
