//! Turns parsed suite files into resolved test cases and a node registry.

use crate::config::{self, TestConfig};
use crate::error::ConfigError;
use crate::model::{Expected, TestCase};
use crate::node::{NodeRegistry, NodeType};
use crate::schema::{SuiteFile, TestDecl};
use regex::Regex;

/// A loaded suite: every test fully resolved, every node known.
#[derive(Debug, Clone, Default)]
pub struct Suite {
    tests: Vec<TestCase>,
    registry: NodeRegistry,
}

impl Suite {
    /// Resolve `file`, layering `overrides` (from `--config`) underneath it.
    ///
    /// Every configuration problem that can be found without running a
    /// command is reported here.
    pub fn new(
        file: SuiteFile,
        overrides: Option<&SuiteFile>,
        file_name: Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut registry = NodeRegistry::new();
        let override_nodes = overrides.into_iter().flat_map(|o| o.nodes.clone());
        for (name, mut node) in file.nodes.into_iter().chain(override_nodes) {
            node.name = name;
            node.expand_env();
            registry.add(node);
        }

        let empty = TestConfig::default();
        let override_config = overrides.map_or(&empty, |o| &o.config);

        let mut tests = Vec::with_capacity(file.tests.len());
        for (title, decl) in file.tests {
            let test = build_test(title, decl, &file.config, override_config, &registry)?;
            tests.push(TestCase {
                file_name: file_name.clone(),
                ..test
            });
        }

        Ok(Self { tests, registry })
    }

    pub fn tests(&self) -> &[TestCase] {
        &self.tests
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    #[cfg(test)]
    fn get_test_by_title(&self, title: &str) -> Option<&TestCase> {
        self.tests.iter().find(|t| t.title == title)
    }

    /// Keep only tests whose title matches one of `filters`.
    ///
    /// No filters keeps everything.
    pub fn retain_matching(&mut self, filters: &[Regex]) {
        if filters.is_empty() {
            return;
        }
        self.tests
            .retain(|t| filters.iter().any(|f| f.is_match(&t.title)));
    }

    pub fn into_parts(self) -> (Vec<TestCase>, NodeRegistry) {
        (self.tests, self.registry)
    }
}

/// Compile `--filter` patterns.
pub fn compile_filters(patterns: &[String]) -> Result<Vec<Regex>, ConfigError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|source| ConfigError::InvalidFilter {
                filter: p.clone(),
                source,
            })
        })
        .collect()
}

fn build_test(
    title: String,
    decl: TestDecl,
    global: &TestConfig,
    overrides: &TestConfig,
    registry: &NodeRegistry,
) -> Result<TestCase, ConfigError> {
    let cmd = decl.command.unwrap_or_else(|| title.clone());
    let resolved = config::resolve(&title, &cmd, &decl.config, global, overrides)?;

    let expected = Expected {
        stdout: decl.stdout.map(Into::into).unwrap_or_default(),
        stderr: decl.stderr.map(Into::into).unwrap_or_default(),
        exit_code: decl.exit_code,
    };
    for out in [&expected.stdout, &expected.stderr] {
        if out.lines.contains_key(&0) {
            return Err(ConfigError::InvalidLineNumber {
                test: title.clone(),
                line: 0,
            });
        }
    }

    let test = TestCase {
        title,
        command: resolved.command,
        expected,
        nodes: resolved.nodes,
        skip: decl.skip,
        ..Default::default()
    };

    // Skipped tests never reach an executor, so their nodes are not checked.
    if !test.skip {
        check_nodes(&test, registry)?;
    }
    Ok(test)
}

fn check_nodes(test: &TestCase, registry: &NodeRegistry) -> Result<(), ConfigError> {
    for name in test.target_nodes() {
        if !registry.contains(&name) {
            return Err(ConfigError::UnknownNode {
                test: test.title.clone(),
                node: name,
            });
        }
        let is_ssh = registry
            .get(&name)
            .is_some_and(|n| n.node_type == NodeType::Ssh);
        if is_ssh && test.command.inherit_env {
            return Err(ConfigError::InheritEnvOverSsh {
                test: test.title.clone(),
                node: name,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> SuiteFile {
        serde_yaml::from_str(yaml).unwrap()
    }

    // ==================== Resolution ====================

    #[test]
    fn command_defaults_to_title() {
        let suite = Suite::new(parse("tests:\n  echo hello:\n    exit-code: 0\n"), None, None).unwrap();
        let test = suite.get_test_by_title("echo hello").unwrap();
        assert_eq!(test.command.cmd, "echo hello");
        assert_eq!(test.command.retries, 1);
        assert!(test.nodes.is_empty());
    }

    #[test]
    fn per_test_config_beats_global_beats_override() {
        let file = parse(
            r#"
config:
  env: {A: global, B: global}
  timeout: 2s
tests:
  t:
    config:
      env: {A: test}
"#,
        );
        let overrides = parse(
            r#"
config:
  env: {C: override}
  timeout: 9s
  dir: /tmp
"#,
        );

        let suite = Suite::new(file, Some(&overrides), None).unwrap();
        let test = suite.get_test_by_title("t").unwrap();
        assert_eq!(test.command.env["A"], "test");
        assert_eq!(test.command.env["B"], "global");
        assert_eq!(test.command.env["C"], "override");
        assert_eq!(test.command.timeout, "2s");
        assert_eq!(test.command.dir, "/tmp");
    }

    #[test]
    fn file_name_is_recorded() {
        let suite = Suite::new(
            parse("tests:\n  t:\n    exit-code: 0\n"),
            None,
            Some("a.yaml".into()),
        )
        .unwrap();
        assert_eq!(suite.tests()[0].file_name.as_deref(), Some("a.yaml"));
    }

    // ==================== Nodes ====================

    #[test]
    fn override_nodes_are_appended_and_file_wins() {
        let file = parse(
            r#"
nodes:
  shared:
    type: ssh
    addr: file:22
tests: {}
"#,
        );
        let overrides = parse(
            r#"
nodes:
  shared:
    type: ssh
    addr: override:22
  extra:
    type: docker
    image: alpine
"#,
        );

        let suite = Suite::new(file, Some(&overrides), None).unwrap();
        let registry = suite.registry();
        assert_eq!(registry.get("shared").unwrap().addr, "file:22");
        assert_eq!(registry.get("extra").unwrap().image, "alpine");
        assert_eq!(registry.get("extra").unwrap().name, "extra");
    }

    #[test]
    fn unknown_node_fails_at_load() {
        let err = Suite::new(
            parse("tests:\n  t:\n    config:\n      nodes: [missing]\n"),
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownNode { ref node, .. } if node == "missing"));
    }

    #[test]
    fn skipped_test_may_name_unknown_nodes() {
        let suite = Suite::new(
            parse("tests:\n  t:\n    skip: true\n    config:\n      nodes: [missing]\n"),
            None,
            None,
        )
        .unwrap();
        assert!(suite.tests()[0].skip);
    }

    #[test]
    fn inherit_env_over_ssh_fails_at_load() {
        let yaml = r#"
nodes:
  remote:
    type: ssh
    addr: host:22
tests:
  t:
    config:
      inherit-env: true
      nodes: [remote]
"#;
        let err = Suite::new(parse(yaml), None, None).unwrap_err();
        assert!(matches!(err, ConfigError::InheritEnvOverSsh { .. }));
    }

    // ==================== Validation ====================

    #[test]
    fn line_zero_is_rejected() {
        let yaml = "tests:\n  t:\n    stdout:\n      lines:\n        0: nope\n";
        let err = Suite::new(parse(yaml), None, None).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLineNumber { line: 0, .. }));
    }

    #[test]
    fn bad_interval_is_rejected() {
        let yaml = "tests:\n  t:\n    config:\n      retries: 2\n      interval: often\n";
        let err = Suite::new(parse(yaml), None, None).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidInterval { .. }));
    }

    // ==================== Filters ====================

    #[test]
    fn filters_keep_matching_titles() {
        let yaml = "tests:\n  echo one: {}\n  echo two: {}\n  ls: {}\n";
        let mut suite = Suite::new(parse(yaml), None, None).unwrap();

        let filters = compile_filters(&["^echo".to_string(), "two$".to_string()]).unwrap();
        suite.retain_matching(&filters);
        let titles: Vec<&str> = suite.tests().iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["echo one", "echo two"]);

        suite.retain_matching(&[]);
        assert_eq!(suite.tests().len(), 2);
    }

    #[test]
    fn invalid_filter_is_an_error() {
        let err = compile_filters(&["(".to_string()]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFilter { .. }));
    }
}
