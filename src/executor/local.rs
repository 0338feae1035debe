//! Runs commands in a shell on this machine.

use super::{
    Executor, build_env, could_not_execute, finish, normalize_output, parse_timeout, process,
};
use crate::error::Error;
use crate::model::{CommandResult, TestCase, TestResult};
use std::process::Command;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalExecutor;

impl Executor for LocalExecutor {
    fn execute(&self, test: &TestCase) -> Result<TestResult, Error> {
        let timeout = match parse_timeout(&test.command.timeout) {
            Ok(t) => t,
            Err(e) => return could_not_execute(test, e),
        };

        let mut cmd = shell(&test.command.cmd);
        if !test.command.dir.is_empty() {
            cmd.current_dir(&test.command.dir);
        }
        let env = build_env(&test.command);
        cmd.env_clear();
        cmd.envs(&env);

        debug!(
            title = %test.title,
            command = %test.command.cmd,
            dir = %test.command.dir,
            env = ?test.command.env,
            "running locally"
        );

        let output = match process::run(cmd, timeout) {
            Ok(output) => output,
            Err(e) => return could_not_execute(test, e),
        };

        let result = CommandResult {
            stdout: normalize_output(&output.stdout),
            stderr: normalize_output(&output.stderr),
            exit_code: output.exit_code,
            error: None,
        };
        debug!(
            title = %test.title,
            exit_code = result.exit_code,
            stdout = %result.stdout,
            stderr = %result.stderr,
            "finished"
        );

        finish(test, result)
    }
}

#[cfg(unix)]
fn shell(script: &str) -> Command {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(script);
    cmd
}

#[cfg(windows)]
fn shell(script: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(script);
    cmd
}
