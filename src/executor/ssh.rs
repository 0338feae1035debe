//! Runs commands on a remote host over SSH.

use super::{
    Executor, could_not_execute, declared_env, finish, normalize_output, parse_timeout,
};
use crate::error::{ConfigError, Error, ExecError};
use crate::model::{CommandResult, TestCase, TestResult};
use ssh2::{ErrorCode, Session};
use std::io::{ErrorKind, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// libssh2's code for a blocking call that ran past the session timeout.
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;

#[derive(Debug, Clone, Default)]
pub struct SshExecutor {
    /// `host:port`
    pub addr: String,
    pub user: String,
    pub pass: String,
    pub identity_file: String,
}

impl Executor for SshExecutor {
    fn execute(&self, test: &TestCase) -> Result<TestResult, Error> {
        if test.command.inherit_env {
            return Err(ConfigError::InheritEnvOverSsh {
                test: test.title.clone(),
                node: self.addr.clone(),
            }
            .into());
        }

        let timeout = match parse_timeout(&test.command.timeout) {
            Ok(t) => t,
            Err(e) => return could_not_execute(test, e),
        };

        debug!(
            title = %test.title,
            addr = %self.addr,
            command = %test.command.cmd,
            dir = %test.command.dir,
            "running over ssh"
        );

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

impl SshExecutor {
    fn run(&self, test: &TestCase, timeout: Option<Duration>) -> Result<CommandResult, ExecError> {
        let session = self.connect()?;

        // Zero disables the libssh2 timeout.
        let millis = timeout.map_or(0, |t| u32::try_from(t.as_millis()).unwrap_or(u32::MAX));
        session.set_timeout(millis);

        let ssh_err = |e: ssh2::Error| map_error(e, timeout);
        let mut channel = session.channel_session().map_err(ssh_err)?;

        for (key, value) in declared_env(&test.command) {
            channel
                .setenv(&key, &value)
                .map_err(|e| ExecError::EnvRejected {
                    key: key.clone(),
                    reason: e.to_string(),
                })?;
        }

        channel
            .exec(&remote_command(&test.command.cmd, &test.command.dir))
            .map_err(ssh_err)?;

        // Both streams are read in turn so a full stderr window cannot stall
        // stdout, and the deadline is checked against the clock rather than
        // per blocking call.
        session.set_blocking(false);
        let mut out_stream = channel.stream(0);
        let mut err_stream = channel.stderr();
        let read = read_interleaved(&mut out_stream, &mut err_stream, || channel.eof(), timeout);
        let (stdout, stderr) = match read {
            Ok(streams) => streams,
            Err(e) => {
                let _ = channel.close();
                return Err(e);
            }
        };

        session.set_blocking(true);
        channel.wait_close().map_err(ssh_err)?;
        let exit_code = channel.exit_status().map_err(ssh_err)?;

        Ok(CommandResult {
            stdout: normalize_output(&String::from_utf8_lossy(&stdout)),
            stderr: normalize_output(&String::from_utf8_lossy(&stderr)),
            exit_code,
            error: None,
        })
    }

    fn connect(&self) -> Result<Session, ExecError> {
        let connection_err = |reason: String| ExecError::Connection {
            addr: self.addr.clone(),
            reason,
        };

        let addr = self
            .addr
            .to_socket_addrs()
            .map_err(|e| connection_err(e.to_string()))?
            .next()
            .ok_or_else(|| connection_err("address did not resolve".to_string()))?;
        let tcp = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
            .map_err(|e| connection_err(e.to_string()))?;

        let mut session = Session::new().map_err(|e| ExecError::Ssh(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(CONNECT_TIMEOUT.as_millis() as u32);
        session
            .handshake()
            .map_err(|e| connection_err(e.to_string()))?;

        // Host keys are not verified.
        if !self.identity_file.is_empty() {
            let key = expand_home(&self.identity_file);
            if let Err(e) = session.userauth_pubkey_file(&self.user, None, &key, None) {
                debug!(addr = %self.addr, error = %e, "public key authentication failed");
            }
        }
        if !session.authenticated()
            && !self.pass.is_empty()
            && let Err(e) = session.userauth_password(&self.user, &self.pass)
        {
            debug!(addr = %self.addr, error = %e, "password authentication failed");
        }
        if !session.authenticated() {
            return Err(ExecError::Authentication(self.user.clone()));
        }

        Ok(session)
    }
}

/// Read `stdout` and `stderr` alternately until both are drained and
/// `finished` reports that the remote side sent EOF.
///
/// The readers are expected to be non-blocking; `WouldBlock` just means no
/// data yet.
fn read_interleaved(
    stdout: &mut impl Read,
    stderr: &mut impl Read,
    mut finished: impl FnMut() -> bool,
    timeout: Option<Duration>,
) -> Result<(Vec<u8>, Vec<u8>), ExecError> {
    let start = Instant::now();
    let mut out = Vec::new();
    let mut err = Vec::new();
    let mut buf = [0u8; 16 * 1024];

    loop {
        if let Some(limit) = timeout
            && start.elapsed() >= limit
        {
            return Err(timed_out(timeout));
        }

        let read_err = |e: std::io::Error| ExecError::Io(format!("failed to read output: {e}"));
        let got_out = read_available(stdout, &mut out, &mut buf).map_err(read_err)?;
        let got_err = read_available(stderr, &mut err, &mut buf).map_err(read_err)?;

        if !got_out && !got_err {
            if finished() {
                return Ok((out, err));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Read whatever is available. Returns whether anything was read.
fn read_available(
    stream: &mut impl Read,
    sink: &mut Vec<u8>,
    buf: &mut [u8],
) -> std::io::Result<bool> {
    match stream.read(buf) {
        Ok(0) => Ok(false),
        Ok(n) => {
            sink.extend_from_slice(&buf[..n]);
            Ok(true)
        }
        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Remote shells have no working directory option, so change into it first.
fn remote_command(cmd: &str, dir: &str) -> String {
    if dir.is_empty() {
        cmd.to_string()
    } else {
        format!("cd {dir}; {cmd}")
    }
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}

fn map_error(e: ssh2::Error, timeout: Option<Duration>) -> ExecError {
    match e.code() {
        ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT) => timed_out(timeout),
        _ => ExecError::Ssh(e.to_string()),
    }
}

fn timed_out(timeout: Option<Duration>) -> ExecError {
    ExecError::Timeout(timeout.map_or_else(String::new, |t| format!("{t:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor(addr: &str) -> SshExecutor {
        SshExecutor {
            addr: addr.to_string(),
            user: "root".to_string(),
            pass: "secret".to_string(),
            identity_file: String::new(),
        }
    }

    #[test]
    fn inherit_env_is_rejected_before_connecting() {
        let mut test = TestCase {
            title: "inherit".into(),
            ..Default::default()
        };
        test.command.cmd = "true".into();
        test.command.inherit_env = true;

        // Nothing listens here; reaching the network would record an
        // execution error instead of returning Err.
        let err = executor("127.0.0.1:1").execute(&test).unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::InheritEnvOverSsh { .. })
        ));
    }

    #[test]
    fn refused_connection_is_execution_error() {
        let mut test = TestCase {
            title: "refused".into(),
            ..Default::default()
        };
        test.command.cmd = "true".into();

        let r = executor("127.0.0.1:1").execute(&test).unwrap();
        assert!(!r.success());
        assert!(matches!(r.error(), Some(ExecError::Connection { .. })));
    }

    // ==================== Output ====================

    /// Non-blocking reader fed from a script of chunks; `None` is a
    /// `WouldBlock`, and an exhausted script reads as EOF.
    struct Scripted(std::collections::VecDeque<Option<&'static [u8]>>);

    impl Scripted {
        fn new(script: &[Option<&'static [u8]>]) -> Self {
            Self(script.iter().copied().collect())
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.0.pop_front() {
                Some(Some(chunk)) => {
                    buf[..chunk.len()].copy_from_slice(chunk);
                    Ok(chunk.len())
                }
                Some(None) => Err(ErrorKind::WouldBlock.into()),
                None => Ok(0),
            }
        }
    }

    /// Reader that never runs dry.
    struct Chatty;

    impl Read for Chatty {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            buf[0] = b'.';
            Ok(1)
        }
    }

    #[test]
    fn stderr_is_drained_while_stdout_waits() {
        let mut stdout = Scripted::new(&[None, None, Some(&b"out"[..])]);
        let mut stderr = Scripted::new(&[Some(&b"err1 "[..]), Some(&b"err2"[..]), None]);

        let (out, err) = read_interleaved(&mut stdout, &mut stderr, || true, None).unwrap();
        assert_eq!(out, b"out");
        assert_eq!(err, b"err1 err2");
    }

    #[test]
    fn keeps_reading_until_remote_eof() {
        let mut stdout = Scripted::new(&[None, None, None]);
        let mut stderr = Scripted::new(&[]);
        let mut polls = 0;

        let (out, err) = read_interleaved(
            &mut stdout,
            &mut stderr,
            || {
                polls += 1;
                polls > 3
            },
            None,
        )
        .unwrap();
        assert!(out.is_empty() && err.is_empty());
        assert_eq!(polls, 4);
    }

    #[test]
    fn silent_remote_hits_deadline() {
        let mut stdout = Scripted::new(&[None; 1000]);
        let mut stderr = Scripted::new(&[None; 1000]);

        let err = read_interleaved(
            &mut stdout,
            &mut stderr,
            || false,
            Some(Duration::from_millis(50)),
        )
        .unwrap_err();
        assert_eq!(err, ExecError::Timeout("50ms".to_string()));
    }

    #[test]
    fn chatty_remote_still_hits_deadline() {
        let start = Instant::now();
        let err = read_interleaved(
            &mut Chatty,
            &mut Chatty,
            || false,
            Some(Duration::from_millis(50)),
        )
        .unwrap_err();
        assert!(err.is_timeout());
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn remote_command_changes_directory() {
        assert_eq!(remote_command("ls", ""), "ls");
        assert_eq!(remote_command("ls", "/tmp"), "cd /tmp; ls");
    }

    #[test]
    fn home_is_expanded_in_identity_file() {
        let path = expand_home("/abs/key");
        assert_eq!(path, PathBuf::from("/abs/key"));

        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(
                expand_home("~/.ssh/id_rsa"),
                PathBuf::from(home).join(".ssh/id_rsa")
            );
        }
    }
}
