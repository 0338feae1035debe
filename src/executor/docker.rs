//! Runs commands inside a fresh container, driven through the `docker` CLI.

use super::{
    Executor, could_not_execute, declared_env, finish, normalize_output, parse_timeout, process,
};
use crate::error::{Error, ExecError};
use crate::model::{CommandResult, TestCase, TestResult};
use std::collections::BTreeMap;
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};

const DOCKER: &str = "docker";

#[derive(Debug, Clone, Default)]
pub struct DockerExecutor {
    pub image: String,
    pub privileged: bool,
    /// User the command runs as inside the container.
    pub exec_user: String,
    pub registry_user: String,
    pub registry_pass: String,
}

impl Executor for DockerExecutor {
    fn execute(&self, test: &TestCase) -> Result<TestResult, Error> {
        let timeout = match parse_timeout(&test.command.timeout) {
            Ok(t) => t,
            Err(e) => return could_not_execute(test, e),
        };

        warn_ignored_inherit_env(test);

        match self.run(test, timeout) {
            Ok(result) => {
                debug!(
                    title = %test.title,
                    exit_code = result.exit_code,
                    stdout = %result.stdout,
                    stderr = %result.stderr,
                    "finished"
                );
                finish(test, result)
            }
            Err(e) => could_not_execute(test, e),
        }
    }
}

impl DockerExecutor {
    fn run(&self, test: &TestCase, timeout: Option<Duration>) -> Result<CommandResult, ExecError> {
        self.pull()?;

        let args = self.create_args(test, &declared_env(&test.command));
        info!(image = %self.image, "creating container");
        let created = docker(&args, None)?;
        let container = Container {
            id: created.stdout.trim().to_string(),
        };

        debug!(
            title = %test.title,
            container = %container.id,
            command = %test.command.cmd,
            dir = %test.command.dir,
            env = ?test.command.env,
            "starting container"
        );
        docker(&["start".to_string(), container.id.clone()], None)?;

        let waited = docker(&["wait".to_string(), container.id.clone()], timeout)?;
        let exit_code = waited.stdout.trim().parse::<i32>().map_err(|e| {
            ExecError::Docker(format!(
                "unexpected exit status '{}' from docker wait: {e}",
                waited.stdout.trim()
            ))
        })?;

        let logs = docker(&["logs".to_string(), container.id.clone()], None)?;

        Ok(CommandResult {
            stdout: normalize_output(&logs.stdout),
            stderr: normalize_output(&logs.stderr),
            exit_code,
            error: None,
        })
    }

    fn pull(&self) -> Result<(), ExecError> {
        if !self.registry_user.is_empty() {
            self.login()?;
        }

        info!(image = %self.image, "pulling image");
        docker(&["pull".to_string(), self.image.clone()], None).map_err(|e| {
            ExecError::Docker(format!(
                "could not pull image '{}' with error: '{e}'",
                self.image
            ))
        })?;
        Ok(())
    }

    fn login(&self) -> Result<(), ExecError> {
        let mut cmd = Command::new(DOCKER);
        cmd.args(["login", "--username", &self.registry_user, "--password-stdin"]);
        if let Some(registry) = registry(&self.image) {
            cmd.arg(registry);
        }
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| ExecError::Spawn(e.to_string()))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(self.registry_pass.as_bytes())
                .map_err(|e| ExecError::Io(format!("failed to pass registry password: {e}")))?;
        }
        let output = child
            .wait_with_output()
            .map_err(|e| ExecError::Io(format!("failed to wait for docker login: {e}")))?;

        if !output.status.success() {
            return Err(ExecError::Docker(format!(
                "docker login failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    fn create_args(&self, test: &TestCase, env: &BTreeMap<String, String>) -> Vec<String> {
        let mut args = vec!["create".to_string()];
        if self.privileged {
            args.push("--privileged".to_string());
        }
        if !self.exec_user.is_empty() {
            args.push("--user".to_string());
            args.push(self.exec_user.clone());
        }
        if !test.command.dir.is_empty() {
            args.push("--workdir".to_string());
            args.push(test.command.dir.clone());
        }
        for (key, value) in env {
            args.push("--env".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(self.image.clone());
        args.push("/bin/sh".to_string());
        args.push("-c".to_string());
        args.push(test.command.cmd.clone());
        args
    }
}

/// Containers only see the variables the test declares.
fn warn_ignored_inherit_env(test: &TestCase) -> bool {
    if !test.command.inherit_env {
        return false;
    }
    warn!(title = %test.title, "inherit-env has no effect inside a container");
    true
}

/// A created container, removed again when this value goes out of scope.
struct Container {
    id: String,
}

impl Drop for Container {
    fn drop(&mut self) {
        match docker(&["rm".to_string(), "-f".to_string(), self.id.clone()], None) {
            Ok(_) => debug!(container = %self.id, "removed container"),
            Err(e) => warn!(container = %self.id, error = %e, "failed to remove container"),
        }
    }
}

/// Run a docker CLI subcommand; a non-zero exit becomes an error.
fn docker(args: &[String], timeout: Option<Duration>) -> Result<process::Output, ExecError> {
    let mut cmd = Command::new(DOCKER);
    cmd.args(args);
    let output = process::run(cmd, timeout)?;
    if output.exit_code != 0 {
        let subcommand = args.first().map(String::as_str).unwrap_or_default();
        return Err(ExecError::Docker(format!(
            "docker {subcommand} failed: {}",
            output.stderr.trim()
        )));
    }
    Ok(output)
}

/// Registry host of an image reference, if it names one explicitly.
fn registry(image: &str) -> Option<&str> {
    let (first, _) = image.split_once('/')?;
    (first.contains('.') || first.contains(':') || first == "localhost").then_some(first)
}
