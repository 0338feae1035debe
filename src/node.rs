//! Named execution targets and the registry that resolves them to executors.

use crate::env::{expand_env, has_reference};
use crate::executor::{DockerExecutor, Executor, LocalExecutor, SshExecutor};
use crate::model::LOCAL_NODE;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Backend a node runs its commands on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum NodeType {
    #[default]
    #[serde(alias = "")]
    Local,
    #[serde(alias = "remote-shell")]
    Ssh,
    #[serde(alias = "container")]
    Docker,
}

/// A named target declared under `nodes:` in a suite.
///
/// For docker nodes `user` and `pass` are registry credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Node {
    /// Filled from the key the node is declared under.
    #[serde(skip)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub addr: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pass: String,
    #[serde(default)]
    pub identity_file: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub docker_exec_user: String,
}

impl Node {
    /// Expand `$VAR`/`${VAR}` in every string field.
    ///
    /// A password written out literally is still used, but draws a warning.
    pub fn expand_env(&mut self) {
        self.addr = expand_env(&self.addr);
        self.user = expand_env(&self.user);
        self.identity_file = expand_env(&self.identity_file);
        self.image = expand_env(&self.image);
        self.docker_exec_user = expand_env(&self.docker_exec_user);

        if !self.pass.is_empty() && !has_reference(&self.pass) {
            warn!(
                node = %self.name,
                "consider using env variables with $VAR or ${{VAR}} instead of adding passwords to config files"
            );
        }
        self.pass = expand_env(&self.pass);
    }

    /// Build the executor for this node.
    pub fn executor(&self) -> Box<dyn Executor> {
        match self.node_type {
            NodeType::Local => Box::new(LocalExecutor),
            NodeType::Ssh => Box::new(SshExecutor {
                addr: self.addr.clone(),
                user: self.user.clone(),
                pass: self.pass.clone(),
                identity_file: self.identity_file.clone(),
            }),
            NodeType::Docker => Box::new(DockerExecutor {
                image: self.image.clone(),
                privileged: self.privileged,
                exec_user: self.docker_exec_user.clone(),
                registry_user: self.user.clone(),
                registry_pass: self.pass.clone(),
            }),
        }
    }
}

/// Nodes known to a run, keyed by name.
///
/// `local` always resolves, to the declared node of that name if there is
/// one and to a plain local executor otherwise.
#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    nodes: BTreeMap<String, Node>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `node` unless one with the same name exists.
    ///
    /// Returns whether the node was added.
    pub fn add(&mut self, node: Node) -> bool {
        if self.nodes.contains_key(&node.name) {
            return false;
        }
        self.nodes.insert(node.name.clone(), node);
        true
    }

    pub fn get(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        name == LOCAL_NODE || self.nodes.contains_key(name)
    }

    /// Resolve `name` to an executor, or `None` if it is not known.
    pub fn executor(&self, name: &str) -> Option<Box<dyn Executor>> {
        match self.nodes.get(name) {
            Some(node) => Some(node.executor()),
            None if name == LOCAL_NODE => Some(Box::new(LocalExecutor)),
            None => None,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
