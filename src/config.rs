//! Test configuration and how its layers combine.
//!
//! A test's effective configuration is assembled from three layers, highest
//! precedence first: the test's own `config:` block, the suite's global
//! `config:` block and the override file passed with `--config`.

use crate::error::ConfigError;
use crate::executor::parse_duration;
use crate::model::CommandUnderTest;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One layer of configuration. Unset fields defer to lower layers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TestConfig {
    /// Variables for the command; values may reference host variables.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,

    /// Per-attempt deadline, e.g. `500ms` or `1m30s`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// Attempts before a test is reported as failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,

    /// Pause between attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,

    /// Pass the runner's own environment to the command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inherit_env: Option<bool>,

    /// Nodes to run on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<String>,
}

impl TestConfig {
    /// Layer `self` over `base`.
    ///
    /// Fields set on `self` win. `env` maps merge with `self` winning on a
    /// key clash; `nodes` lists concatenate with duplicates dropped, keeping
    /// the first occurrence.
    pub fn merge(&self, base: &TestConfig) -> TestConfig {
        let mut env = base.env.clone();
        env.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut nodes: Vec<String> = Vec::with_capacity(self.nodes.len() + base.nodes.len());
        for node in self.nodes.iter().chain(&base.nodes) {
            if !nodes.contains(node) {
                nodes.push(node.clone());
            }
        }

        TestConfig {
            env,
            dir: self.dir.clone().or_else(|| base.dir.clone()),
            timeout: self.timeout.clone().or_else(|| base.timeout.clone()),
            retries: self.retries.or(base.retries),
            interval: self.interval.clone().or_else(|| base.interval.clone()),
            inherit_env: self.inherit_env.or(base.inherit_env),
            nodes,
        }
    }
}

/// The effective configuration of one test.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolved {
    pub command: CommandUnderTest,
    pub nodes: Vec<String>,
}

/// Combine the layers for the test titled `title` running `cmd`.
///
/// The retry interval is checked here; timeouts are checked when the test
/// runs and only fail that test.
pub fn resolve(
    title: &str,
    cmd: &str,
    test: &TestConfig,
    global: &TestConfig,
    overrides: &TestConfig,
) -> Result<Resolved, ConfigError> {
    let effective = test.merge(&global.merge(overrides));

    let interval = effective.interval.unwrap_or_default();
    if !interval.is_empty() {
        parse_duration(&interval).map_err(|reason| ConfigError::InvalidInterval {
            test: title.to_string(),
            interval: interval.clone(),
            reason,
        })?;
    }

    Ok(Resolved {
        command: CommandUnderTest {
            cmd: cmd.to_string(),
            dir: effective.dir.unwrap_or_default(),
            env: effective.env,
            inherit_env: effective.inherit_env.unwrap_or(false),
            timeout: effective.timeout.unwrap_or_default(),
            retries: effective.retries.unwrap_or(1),
            interval,
        },
        nodes: effective.nodes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn nodes(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    // ==================== Merge ====================

    #[test]
    fn set_fields_win() {
        let top = TestConfig {
            timeout: Some("1s".into()),
            retries: Some(3),
            ..Default::default()
        };
        let base = TestConfig {
            timeout: Some("5s".into()),
            dir: Some("/tmp".into()),
            inherit_env: Some(true),
            ..Default::default()
        };

        let merged = top.merge(&base);
        assert_eq!(merged.timeout.as_deref(), Some("1s"));
        assert_eq!(merged.retries, Some(3));
        assert_eq!(merged.dir.as_deref(), Some("/tmp"));
        assert_eq!(merged.inherit_env, Some(true));
    }

    #[test]
    fn explicit_false_overrides_true() {
        let top = TestConfig {
            inherit_env: Some(false),
            ..Default::default()
        };
        let base = TestConfig {
            inherit_env: Some(true),
            ..Default::default()
        };
        assert_eq!(top.merge(&base).inherit_env, Some(false));
    }

    #[test]
    fn env_maps_merge() {
        let top = TestConfig {
            env: env(&[("A", "top"), ("B", "top")]),
            ..Default::default()
        };
        let base = TestConfig {
            env: env(&[("B", "base"), ("C", "base")]),
            ..Default::default()
        };

        let merged = top.merge(&base);
        assert_eq!(merged.env, env(&[("A", "top"), ("B", "top"), ("C", "base")]));
    }

    #[test]
    fn node_lists_deduplicate_keeping_first_position() {
        let top = TestConfig {
            nodes: nodes(&["b", "a"]),
            ..Default::default()
        };
        let base = TestConfig {
            nodes: nodes(&["a", "c", "b"]),
            ..Default::default()
        };
        assert_eq!(top.merge(&base).nodes, nodes(&["b", "a", "c"]));
    }

    // ==================== Resolve ====================

    #[test]
    fn precedence_test_then_global_then_override() {
        let test = TestConfig {
            env: env(&[("KEY", "test")]),
            ..Default::default()
        };
        let global = TestConfig {
            env: env(&[("KEY", "global"), ("G", "1")]),
            timeout: Some("2s".into()),
            ..Default::default()
        };
        let overrides = TestConfig {
            env: env(&[("O", "1")]),
            timeout: Some("9s".into()),
            dir: Some("/srv".into()),
            ..Default::default()
        };

        let r = resolve("t", "echo", &test, &global, &overrides).unwrap();
        assert_eq!(r.command.cmd, "echo");
        assert_eq!(
            r.command.env,
            env(&[("G", "1"), ("KEY", "test"), ("O", "1")])
        );
        assert_eq!(r.command.timeout, "2s");
        assert_eq!(r.command.dir, "/srv");
    }

    #[test]
    fn defaults() {
        let empty = TestConfig::default();
        let r = resolve("t", "true", &empty, &empty, &empty).unwrap();
        assert_eq!(r.command.retries, 1);
        assert!(!r.command.inherit_env);
        assert!(r.command.timeout.is_empty());
        assert!(r.nodes.is_empty());
    }

    #[test]
    fn invalid_interval_is_rejected() {
        let test = TestConfig {
            interval: Some("sometimes".into()),
            ..Default::default()
        };
        let empty = TestConfig::default();

        let err = resolve("flaky", "true", &test, &empty, &empty).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidInterval { ref test, .. } if test == "flaky"));
    }

    #[test]
    fn invalid_timeout_is_not_checked_here() {
        let test = TestConfig {
            timeout: Some("whenever".into()),
            ..Default::default()
        };
        let empty = TestConfig::default();

        let r = resolve("t", "true", &test, &empty, &empty).unwrap();
        assert_eq!(r.command.timeout, "whenever");
    }

    #[test]
    fn unknown_keys_fail_to_parse() {
        let yaml = "timeout: 1s\nretry: 3\n";
        assert!(serde_yaml::from_str::<TestConfig>(yaml).is_err());
    }

    #[test]
    fn kebab_case_keys() {
        let yaml = "inherit-env: true\nnodes: [a]\n";
        let config: TestConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.inherit_env, Some(true));
        assert_eq!(config.nodes, nodes(&["a"]));
    }
}
