//! Binding of one WebSocket connection to one `journalctl` process
//!
//! Two activities run per session: the output pump, which forwards every line as one
//! text message, and a client watcher, which notices close frames and dropped
//! connections. Both share one [`CancellationToken`]; whichever side ends first cancels
//! it and the other follows.

use std::fmt::Display;

use axum::extract::ws::{close_code, CloseFrame, Message};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::{task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    tail::{TailExit, TailProcess},
    JournalSettings,
};

pub const LAUNCH_FAILED_REASON: &str = "failed to start log stream";
pub const STREAM_ENDED_REASON: &str = "log stream ended";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Streaming,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client closed the connection or it failed.
    ClientClosed,
    /// The log process stopped producing output.
    ProcessEnded,
    /// A message could not be delivered to the client in time.
    WriteFailed,
    /// The log process could not be started.
    LaunchFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub end: SessionEnd,
    pub lines_forwarded: u64,
    pub pid: Option<u32>,
    pub exit: Option<TailExit>,
}

struct StreamSession {
    state: SessionState,
    cancel: CancellationToken,
}

impl StreamSession {
    fn new() -> Self {
        Self {
            state: SessionState::Connecting,
            cancel: CancellationToken::new(),
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = ?self.state, to = ?next, "session state change");
        self.state = next;
    }
}

/// Runs a session to completion.
///
/// `sender` and `receiver` are the two halves of the client connection. The returned
/// summary is produced only after the log process has been reaped.
pub async fn run<Tx, Rx, E>(
    mut sender: Tx,
    receiver: Rx,
    args: Vec<String>,
    settings: &JournalSettings,
) -> SessionSummary
where
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
    Rx: Stream<Item = Result<Message, E>> + Send + Unpin + 'static,
    E: Display + Send + 'static,
{
    let mut session = StreamSession::new();

    let mut tail = match TailProcess::spawn(&settings.program, &args, session.cancel.clone()) {
        Ok(tail) => tail,
        Err(err) => {
            warn!(error = %err, "failed to start log stream");
            session.transition(SessionState::Closing);
            close_client(
                &mut sender,
                close_code::ERROR,
                LAUNCH_FAILED_REASON,
                settings,
            )
            .await;
            session.transition(SessionState::Closed);
            return SessionSummary {
                end: SessionEnd::LaunchFailed,
                lines_forwarded: 0,
                pid: None,
                exit: None,
            };
        }
    };
    let pid = tail.pid();

    let watcher = watch_client(receiver, session.cancel.clone());
    session.transition(SessionState::Streaming);
    info!(pid, "log stream started");

    let mut lines_forwarded = 0u64;
    let end = loop {
        let Some(line) = tail.next_line().await else {
            break if session.cancel.is_cancelled() {
                SessionEnd::ClientClosed
            } else {
                SessionEnd::ProcessEnded
            };
        };

        let delivery = tokio::select! {
            biased;
            _ = session.cancel.cancelled() => break SessionEnd::ClientClosed,
            delivery = timeout(settings.write_timeout, sender.send(Message::Text(line.into()))) => delivery,
        };

        match delivery {
            Ok(Ok(())) => lines_forwarded += 1,
            Ok(Err(err)) => {
                debug!(pid, error = %err, "failed to forward log line");
                break SessionEnd::WriteFailed;
            }
            Err(_) => {
                warn!(
                    pid,
                    timeout_secs = settings.write_timeout.as_secs_f64(),
                    "client stalled, dropping log stream"
                );
                break SessionEnd::WriteFailed;
            }
        }
    };

    session.transition(SessionState::Closing);

    let exit = match tail.shutdown(settings.stop_timeout).await {
        Ok(exit) => Some(exit),
        Err(err) => {
            warn!(pid, error = %err, "log process ended with error");
            None
        }
    };
    session.cancel.cancel();

    match end {
        SessionEnd::ProcessEnded => {
            close_client(&mut sender, close_code::NORMAL, STREAM_ENDED_REASON, settings).await;
        }
        SessionEnd::ClientClosed => {
            let _ = timeout(settings.write_timeout, sender.close()).await;
        }
        SessionEnd::WriteFailed | SessionEnd::LaunchFailed => {}
    }

    watcher.abort();
    session.transition(SessionState::Closed);
    info!(pid, end = ?end, lines_forwarded, exit = ?exit, "log stream closed");

    SessionSummary {
        end,
        lines_forwarded,
        pid,
        exit,
    }
}

fn watch_client<Rx, E>(mut receiver: Rx, cancel: CancellationToken) -> JoinHandle<()>
where
    Rx: Stream<Item = Result<Message, E>> + Send + Unpin + 'static,
    E: Display + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => return,
                frame = receiver.next() => frame,
            };

            match frame {
                Some(Ok(Message::Close(frame))) => {
                    debug!(frame = ?frame, "client sent close frame");
                    break;
                }
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    debug!(error = %err, "client connection failed");
                    break;
                }
                None => {
                    debug!("client connection ended");
                    break;
                }
            }
        }
        cancel.cancel();
    })
}

async fn close_client<Tx>(sender: &mut Tx, code: u16, reason: &'static str, settings: &JournalSettings)
where
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
{
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    match timeout(settings.write_timeout, sender.send(Message::Close(Some(frame)))).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => debug!(error = %err, "failed to send close frame"),
        Err(_) => debug!("timed out sending close frame"),
    }
    let _ = timeout(settings.write_timeout, sender.close()).await;
}

#[cfg(all(test, unix))]
mod tests {
    use std::{convert::Infallible, time::Duration};

    use futures::channel::mpsc;

    use super::*;
    use crate::journal::tail::tests::{is_running, shell};

    fn settings(program: &str) -> JournalSettings {
        JournalSettings {
            program: program.to_string(),
            write_timeout: Duration::from_millis(200),
            stop_timeout: Duration::from_millis(500),
            ..JournalSettings::default()
        }
    }

    fn text(message: &Message) -> Option<&str> {
        match message {
            Message::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn process_exit_closes_connection() {
        let (out_tx, out_rx) = mpsc::unbounded::<Message>();
        let (_client_tx, client_rx) = mpsc::unbounded::<Result<Message, Infallible>>();

        let summary = run(
            out_tx,
            client_rx,
            shell("echo one; echo two; echo three"),
            &settings("sh"),
        )
        .await;

        assert_eq!(summary.end, SessionEnd::ProcessEnded);
        assert_eq!(summary.lines_forwarded, 3);
        assert_eq!(summary.exit, Some(TailExit::Completed));

        let messages: Vec<Message> = out_rx.collect().await;
        let lines: Vec<&str> = messages.iter().filter_map(text).collect();
        assert_eq!(lines, ["one", "two", "three"]);
        match messages.last() {
            Some(Message::Close(Some(frame))) => {
                assert_eq!(frame.code, close_code::NORMAL);
                assert_eq!(frame.reason.as_str(), STREAM_ENDED_REASON);
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn client_disconnect_stops_process() {
        let (out_tx, mut out_rx) = mpsc::unbounded::<Message>();
        let (client_tx, client_rx) = mpsc::unbounded::<Result<Message, Infallible>>();

        let session = tokio::spawn(async move {
            run(
                out_tx,
                client_rx,
                shell("while :; do echo tick; sleep 0.05; done"),
                &settings("sh"),
            )
            .await
        });

        let first = out_rx.next().await.expect("first line");
        assert_eq!(text(&first), Some("tick"));
        drop(client_tx);

        let summary = tokio::time::timeout(Duration::from_secs(2), session)
            .await
            .expect("session ends within 2s")
            .expect("session task");

        assert_eq!(summary.end, SessionEnd::ClientClosed);
        assert!(summary.lines_forwarded >= 1);
        assert!(!is_running(summary.pid.expect("pid")));
    }

    #[tokio::test]
    async fn close_frame_stops_process() {
        let (out_tx, mut out_rx) = mpsc::unbounded::<Message>();
        let (client_tx, client_rx) = mpsc::unbounded::<Result<Message, Infallible>>();

        let session = tokio::spawn(async move {
            run(
                out_tx,
                client_rx,
                shell("while :; do echo tick; sleep 1; done"),
                &settings("sh"),
            )
            .await
        });

        out_rx.next().await.expect("first line");
        client_tx
            .unbounded_send(Ok(Message::Text("hello".into())))
            .expect("client send");
        client_tx
            .unbounded_send(Ok(Message::Close(None)))
            .expect("client close");

        let summary = tokio::time::timeout(Duration::from_secs(2), session)
            .await
            .expect("close does not wait for the next line")
            .expect("session task");

        assert_eq!(summary.end, SessionEnd::ClientClosed);
        assert_eq!(summary.lines_forwarded, 1);
        assert!(!is_running(summary.pid.expect("pid")));
    }

    #[tokio::test]
    async fn stalled_client_is_dropped() {
        let (out_tx, _out_rx) = mpsc::channel::<Message>(0);
        let (_client_tx, client_rx) = mpsc::unbounded::<Result<Message, Infallible>>();

        let summary = tokio::time::timeout(
            Duration::from_secs(2),
            run(
                out_tx,
                client_rx,
                shell("while :; do echo flood; done"),
                &settings("sh"),
            ),
        )
        .await
        .expect("stalled write is bounded");

        assert_eq!(summary.end, SessionEnd::WriteFailed);
        assert!(!is_running(summary.pid.expect("pid")));
    }

    #[tokio::test]
    async fn launch_failure_closes_with_error() {
        let (out_tx, out_rx) = mpsc::unbounded::<Message>();
        let (_client_tx, client_rx) = mpsc::unbounded::<Result<Message, Infallible>>();

        let summary = run(
            out_tx,
            client_rx,
            Vec::new(),
            &settings("/nonexistent/journalctl"),
        )
        .await;

        assert_eq!(summary.end, SessionEnd::LaunchFailed);
        assert_eq!(summary.pid, None);

        let messages: Vec<Message> = out_rx.collect().await;
        match messages.as_slice() {
            [Message::Close(Some(frame))] => {
                assert_eq!(frame.code, close_code::ERROR);
                assert_eq!(frame.reason.as_str(), LAUNCH_FAILED_REASON);
            }
            other => panic!("expected a single close frame, got {other:?}"),
        }
    }
}
