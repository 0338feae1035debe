//! Two-stage execution pipeline.
//!
//! A producer thread hands test cases one at a time to a single consumer
//! thread, which fans each case out over its nodes, retries failures and
//! sends every result downstream. Dropping a sender is the only completion
//! signal: when the producer is done the consumer drains and exits, which in
//! turn ends iteration over the returned receiver.

use crate::error::{ConfigError, Error};
use crate::executor::parse_duration;
use crate::model::{CommandUnderTest, TestCase, TestResult};
use crate::node::NodeRegistry;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use tracing::{debug, warn};

/// Executes test cases against the nodes of a registry.
#[derive(Debug, Clone, Default)]
pub struct Runner {
    registry: NodeRegistry,
}

impl Runner {
    pub fn new(registry: NodeRegistry) -> Self {
        Self { registry }
    }

    /// Start the pipeline over `tests`.
    ///
    /// Yields exactly one result per (test, node) pair, in input order and
    /// then declared node order. A configuration error is sent as the last
    /// item and stops the pipeline.
    pub fn run(&self, tests: Vec<TestCase>) -> Receiver<Result<TestResult, Error>> {
        let (test_tx, test_rx) = mpsc::sync_channel::<TestCase>(0);
        let (result_tx, result_rx) = mpsc::channel();

        thread::spawn(move || {
            for test in tests {
                if test_tx.send(test).is_err() {
                    break;
                }
            }
        });

        let registry = self.registry.clone();
        thread::spawn(move || {
            for test in test_rx {
                for node in test.target_nodes() {
                    let result = run_on_node(&registry, &test, &node);
                    let fatal = result.is_err();
                    if result_tx.send(result).is_err() || fatal {
                        return;
                    }
                }
            }
        });

        result_rx
    }
}

fn run_on_node(registry: &NodeRegistry, test: &TestCase, node: &str) -> Result<TestResult, Error> {
    if test.skip {
        return Ok(TestResult::skipped(test.clone(), node));
    }

    let executor = registry
        .executor(node)
        .ok_or_else(|| ConfigError::UnknownNode {
            test: test.title.clone(),
            node: node.to_string(),
        })?;

    let retries = test.command.effective_retries();
    let mut tries = 1;
    loop {
        let mut result = executor.execute(test)?;
        result.tries = tries;
        result.node = node.to_string();

        if result.success() || tries >= retries {
            return Ok(result);
        }

        debug!(title = %test.title, node, tries, "attempt failed, retrying");
        wait_interval(&test.command);
        tries += 1;
    }
}

fn wait_interval(command: &CommandUnderTest) {
    if command.effective_retries() <= 1 || command.interval.is_empty() {
        return;
    }
    match parse_duration(&command.interval) {
        Ok(interval) => thread::sleep(interval),
        Err(reason) => warn!(interval = %command.interval, %reason, "ignoring retry interval"),
    }
}
