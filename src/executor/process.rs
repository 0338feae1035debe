//! Child process driver with an optional deadline.

use crate::error::ExecError;
use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Raw output of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Spawn `cmd`, capture both streams and wait for it to exit.
///
/// Both pipes are drained on their own threads so a chatty child cannot block
/// on a full pipe while we poll. The deadline covers the whole run, including
/// draining output still held open by background processes. On unix the child
/// leads its own process group and the whole group is killed when `timeout`
/// elapses.
pub fn run(mut cmd: Command, timeout: Option<Duration>) -> Result<Output, ExecError> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = cmd.spawn().map_err(|e| ExecError::Spawn(e.to_string()))?;
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let deadline = timeout.map(|limit| (Instant::now() + limit, limit));
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if let Some((at, limit)) = deadline
                    && Instant::now() >= at
                {
                    kill(&mut child)?;
                    return Err(timed_out(limit));
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => return Err(ExecError::Io(format!("failed to wait: {e}"))),
        }
    };

    let at = deadline.map(|(at, _)| at);
    let stdout = collect(stdout, at)?;
    let stderr = collect(stderr, at)?;
    // `None` only happens with a deadline: the child exited but something it
    // started still holds a pipe open.
    let (Some(stdout), Some(stderr)) = (stdout, stderr) else {
        kill(&mut child)?;
        let limit = deadline.map_or(Duration::ZERO, |(_, limit)| limit);
        return Err(timed_out(limit));
    };

    Ok(Output {
        stdout,
        stderr,
        exit_code: exit_code(status),
    })
}

fn timed_out(limit: Duration) -> ExecError {
    ExecError::Timeout(format!("{limit:?}"))
}

/// Kill the child and everything in its process group.
#[cfg(unix)]
fn kill(child: &mut Child) -> Result<(), ExecError> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = Pid::from_raw(child.id() as i32);
    match killpg(pgid, Signal::SIGKILL) {
        // The group already emptied on its own.
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => return Err(ExecError::KillFailed(e.to_string())),
    }
    let _ = child.wait();
    Ok(())
}

#[cfg(not(unix))]
fn kill(child: &mut Child) -> Result<(), ExecError> {
    child
        .kill()
        .map_err(|e| ExecError::KillFailed(e.to_string()))?;
    let _ = child.wait();
    Ok(())
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> Receiver<io::Result<Vec<u8>>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let read = reader.read_to_end(&mut buf).map(|_| buf);
        let _ = tx.send(read);
    });
    rx
}

/// Wait for a drained stream. `None` means the deadline passed first.
fn collect(
    reader: Option<Receiver<io::Result<Vec<u8>>>>,
    deadline: Option<Instant>,
) -> Result<Option<String>, ExecError> {
    let Some(reader) = reader else {
        return Ok(Some(String::new()));
    };
    let stopped = || ExecError::Io("output reader stopped unexpectedly".to_string());

    let read = match deadline {
        Some(at) => match reader.recv_timeout(at.saturating_duration_since(Instant::now())) {
            Ok(read) => read,
            Err(RecvTimeoutError::Timeout) => return Ok(None),
            Err(RecvTimeoutError::Disconnected) => return Err(stopped()),
        },
        None => reader.recv().map_err(|_| stopped())?,
    };
    let bytes = read.map_err(|e| ExecError::Io(format!("failed to read output: {e}")))?;
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
