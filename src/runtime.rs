//! Drives a run: orders the tests, feeds the pipeline, notifies the caller
//! and aggregates the results.

use crate::error::Error;
use crate::model::{RunResult, TestCase, TestResult};
use crate::node::NodeRegistry;
use crate::runner::Runner;
use std::time::Instant;

/// Callbacks invoked once per result, before it is aggregated.
pub trait EventHandler {
    fn test_finished(&mut self, result: &TestResult);
    fn test_skipped(&mut self, result: &TestResult);
}

/// Handler that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl EventHandler for NoopHandler {
    fn test_finished(&mut self, _result: &TestResult) {}
    fn test_skipped(&mut self, _result: &TestResult) {}
}

#[derive(Debug, Clone, Default)]
pub struct Runtime {
    runner: Runner,
}

impl Runtime {
    pub fn new(registry: NodeRegistry) -> Self {
        Self {
            runner: Runner::new(registry),
        }
    }

    /// Run `tests` sorted by title and return the aggregate.
    pub fn start(
        &self,
        mut tests: Vec<TestCase>,
        handler: &mut dyn EventHandler,
    ) -> Result<RunResult, Error> {
        let start = Instant::now();
        tests.sort_by(|a, b| a.title.cmp(&b.title));

        let mut run = RunResult::default();
        for result in self.runner.run(tests) {
            let result = result?;
            if result.skipped {
                handler.test_skipped(&result);
            } else {
                handler.test_finished(&result);
            }
            run.record(result);
        }

        run.duration = start.elapsed();
        Ok(run)
    }
}
