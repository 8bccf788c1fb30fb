//! Supervision of the log-tailing subprocess
//!
//! A [`TailProcess`] owns one child process. Its stdout is consumed line by line with
//! [`TailProcess::next_line`]; cancelling the shared token ends the line sequence and
//! [`TailProcess::shutdown`] makes sure the child is gone and reaped.

use std::{
    process::{ExitStatus, Stdio},
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, ChildStdout, Command},
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::StreamError;

/// How the child process came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailExit {
    /// Output ended and the process exited successfully on its own.
    Completed,
    /// The process exited after a termination request.
    Terminated,
    /// The process ignored the termination request and was killed.
    Killed,
}

#[derive(Debug)]
pub struct TailProcess {
    program: String,
    child: Child,
    stdout: BufReader<ChildStdout>,
    cancel: CancellationToken,
    pid: Option<u32>,
    buf: Vec<u8>,
    eof: bool,
}

impl TailProcess {
    pub fn spawn(
        program: &str,
        args: &[String],
        cancel: CancellationToken,
    ) -> Result<Self, StreamError> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| StreamError::Launch {
            program: program.to_string(),
            source,
        })?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.start_kill();
            return Err(StreamError::Launch {
                program: program.to_string(),
                source: std::io::Error::other("stdout was not captured"),
            });
        };

        let pid = child.id();
        debug!(program, pid, args = ?args, "log tail started");

        Ok(Self {
            program: program.to_string(),
            child,
            stdout: BufReader::new(stdout),
            cancel,
            pid,
            buf: Vec::with_capacity(1024),
            eof: false,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Next line of output, without its line terminator.
    ///
    /// Returns `None` at end of output, on a read error or once cancelled.
    pub async fn next_line(&mut self) -> Option<String> {
        if self.eof || self.cancel.is_cancelled() {
            return None;
        }

        self.buf.clear();
        let read = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            read = self.stdout.read_until(b'\n', &mut self.buf) => read,
        };

        match read {
            Ok(0) => {
                self.eof = true;
                None
            }
            Ok(_) => {
                if self.buf.last() == Some(&b'\n') {
                    self.buf.pop();
                    if self.buf.last() == Some(&b'\r') {
                        self.buf.pop();
                    }
                }
                Some(String::from_utf8_lossy(&self.buf).into_owned())
            }
            Err(err) => {
                warn!(program = %self.program, pid = self.pid, error = %err, "failed to read log output");
                self.eof = true;
                None
            }
        }
    }

    /// Stops the process if needed and reaps it.
    ///
    /// After a natural end of output the process gets `stop_timeout` to exit on its own.
    /// Otherwise it is asked to terminate and killed if still alive after `stop_timeout`.
    pub async fn shutdown(mut self, stop_timeout: Duration) -> Result<TailExit, StreamError> {
        if self.eof && !self.cancel.is_cancelled() {
            if let Ok(waited) = timeout(stop_timeout, self.child.wait()).await {
                let status = waited.map_err(|source| self.reap_error(source))?;
                return self.natural_exit(status);
            }
        }
        self.cancel.cancel();

        match self.child.try_wait() {
            Ok(Some(status)) => return self.natural_exit(status),
            Ok(None) => {}
            Err(source) => return Err(self.reap_error(source)),
        }

        self.signal_terminate();
        match timeout(stop_timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(program = %self.program, pid = self.pid, %status, "log tail terminated");
                Ok(TailExit::Terminated)
            }
            Ok(Err(source)) => Err(self.reap_error(source)),
            Err(_) => {
                warn!(
                    program = %self.program,
                    pid = self.pid,
                    timeout_ms = stop_timeout.as_millis(),
                    "log tail ignored termination request, killing"
                );
                self.signal_kill();
                let status = self
                    .child
                    .wait()
                    .await
                    .map_err(|source| self.reap_error(source))?;
                debug!(program = %self.program, pid = self.pid, %status, "log tail killed");
                Ok(TailExit::Killed)
            }
        }
    }

    fn natural_exit(&self, status: ExitStatus) -> Result<TailExit, StreamError> {
        if status.success() {
            Ok(TailExit::Completed)
        } else {
            Err(StreamError::AbnormalExit {
                program: self.program.clone(),
                status,
            })
        }
    }

    fn reap_error(&self, source: std::io::Error) -> StreamError {
        StreamError::Reap {
            program: self.program.clone(),
            source,
        }
    }

    #[cfg(unix)]
    fn signal_terminate(&mut self) {
        self.signal_group(nix::sys::signal::Signal::SIGTERM);
    }

    #[cfg(not(unix))]
    fn signal_terminate(&mut self) {
        let _ = self.child.start_kill();
    }

    fn signal_kill(&mut self) {
        #[cfg(unix)]
        self.signal_group(nix::sys::signal::Signal::SIGKILL);
        let _ = self.child.start_kill();
    }

    /// Signals the whole process group the child leads.
    #[cfg(unix)]
    fn signal_group(&self, signal: nix::sys::signal::Signal) {
        use nix::{sys::signal::kill, unistd::Pid};

        let Some(pid) = self.pid.and_then(|pid| i32::try_from(pid).ok()) else {
            return;
        };
        if let Err(err) = kill(Pid::from_raw(-pid), signal) {
            debug!(program = %self.program, pid, ?signal, error = %err, "failed to signal log tail");
        }
    }
}

/// Fails when the tailing program cannot be run at all.
pub async fn ensure_program_available(program: &str) -> Result<(), StreamError> {
    let status = Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|source| StreamError::Launch {
            program: program.to_string(),
            source,
        })?;

    if !status.success() {
        return Err(StreamError::AbnormalExit {
            program: program.to_string(),
            status,
        });
    }
    Ok(())
}

#[cfg(all(test, unix))]
pub(crate) mod tests {
    use std::time::Instant;

    use nix::{sys::signal::kill, unistd::Pid};

    use super::*;

    pub(crate) fn shell(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    pub(crate) fn is_running(pid: u32) -> bool {
        kill(Pid::from_raw(pid as i32), None).is_ok()
    }

    #[tokio::test]
    async fn yields_lines_then_completes() {
        let mut tail = TailProcess::spawn(
            "sh",
            &shell("printf 'one\\ntwo\\r\\nthree'"),
            CancellationToken::new(),
        )
        .expect("spawn sh");

        let mut lines = Vec::new();
        while let Some(line) = tail.next_line().await {
            lines.push(line);
        }

        assert_eq!(lines, ["one", "two", "three"]);
        assert_eq!(tail.next_line().await, None);
        let exit = tail.shutdown(Duration::from_secs(2)).await.expect("clean exit");
        assert_eq!(exit, TailExit::Completed);
    }

    #[tokio::test]
    async fn cancel_ends_sequence_and_reaps() {
        let cancel = CancellationToken::new();
        let mut tail = TailProcess::spawn(
            "sh",
            &shell("while :; do echo tick; sleep 0.05; done"),
            cancel.clone(),
        )
        .expect("spawn sh");
        let pid = tail.pid().expect("pid");

        assert_eq!(tail.next_line().await.as_deref(), Some("tick"));
        cancel.cancel();
        assert_eq!(tail.next_line().await, None);

        let started = Instant::now();
        let exit = tail.shutdown(Duration::from_secs(2)).await.expect("reaped");
        assert_eq!(exit, TailExit::Terminated);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!is_running(pid));
    }

    #[tokio::test]
    async fn ignoring_sigterm_escalates_to_kill() {
        let mut tail = TailProcess::spawn(
            "sh",
            &shell("trap '' TERM; echo ready; while :; do sleep 0.05; done"),
            CancellationToken::new(),
        )
        .expect("spawn sh");
        let pid = tail.pid().expect("pid");
        assert_eq!(tail.next_line().await.as_deref(), Some("ready"));

        let exit = tail
            .shutdown(Duration::from_millis(200))
            .await
            .expect("reaped");

        assert_eq!(exit, TailExit::Killed);
        assert!(!is_running(pid));
    }

    #[tokio::test]
    async fn launch_failure_is_distinct() {
        let err = TailProcess::spawn(
            "/nonexistent/journalctl",
            &[],
            CancellationToken::new(),
        )
        .expect_err("missing program");

        assert!(matches!(err, StreamError::Launch { .. }));
    }

    #[tokio::test]
    async fn non_zero_exit_is_abnormal() {
        let mut tail = TailProcess::spawn("sh", &shell("echo x; exit 3"), CancellationToken::new())
            .expect("spawn sh");
        while tail.next_line().await.is_some() {}

        let err = tail
            .shutdown(Duration::from_secs(2))
            .await
            .expect_err("abnormal exit");
        assert!(matches!(err, StreamError::AbnormalExit { .. }));
    }

    #[tokio::test]
    async fn invalid_utf8_is_replaced() {
        let mut tail = TailProcess::spawn("sh", &shell("printf 'a\\377b\\n'"), CancellationToken::new())
            .expect("spawn sh");

        assert_eq!(tail.next_line().await.as_deref(), Some("a\u{FFFD}b"));
    }

    #[tokio::test]
    async fn availability_check() {
        ensure_program_available("true")
            .await
            .expect("true accepts --version");
        assert!(matches!(
            ensure_program_available("/nonexistent/journalctl").await,
            Err(StreamError::Launch { .. })
        ));
    }
}
