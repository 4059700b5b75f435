//! Per-job worker: owns one external process and forwards its output
//!
//! The worker reads stdout and stderr line by line on the runtime and sends
//! everything over a channel. It never touches job state; the tracker drains
//! the channel from the thread that owns the UI.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::process::Child;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::time::{Sleep, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[cfg(unix)]
use nix::sys::signal::{Signal, killpg};
#[cfg(unix)]
use nix::unistd::Pid;

use crate::error::{Error, Result};
use crate::tool::Invocation;

/// Called after every event so an idle UI wakes up and polls
pub type Wakeup = Arc<dyn Fn() + Send + Sync>;

/// What a worker reports about its process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// One line from stdout or stderr, without the line terminator
    Output(String),
    /// Reading an output stream failed
    ReadFailed(String),
    /// The process exited; `None` when it was ended by a signal
    Exited(Option<i32>),
}

/// The tracker's side of a running worker
#[derive(Debug)]
pub struct WorkerHandle {
    cancel: CancellationToken,
    events: UnboundedReceiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Ask the worker to terminate its process. Safe to call more than once.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn events(&mut self) -> &mut UnboundedReceiver<WorkerEvent> {
        &mut self.events
    }

    /// A handle driven by hand instead of by a process
    #[cfg(test)]
    pub(crate) fn scripted() -> (Self, UnboundedSender<WorkerEvent>, CancellationToken) {
        let (tx, rx) = unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = Self {
            cancel: cancel.clone(),
            events: rx,
        };
        (handle, tx, cancel)
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        // a dropped tracker must not leave processes running
        self.cancel.cancel();
    }
}

/// How long output is still read once the process has exited. Descendants
/// that outlive it (ffmpeg) can hold the pipes open indefinitely.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Spawn the process for `invocation` and a task that streams its output.
///
/// Spawning happens before this returns so a missing executable surfaces as
/// [`Error::ToolNotFound`] right away. On unix the process leads its own
/// process group, and cancellation signals the whole group.
pub fn spawn_download(
    invocation: &Invocation,
    runtime: &Handle,
    cancel_grace: Duration,
    wakeup: Option<Wakeup>,
) -> Result<WorkerHandle> {
    let child = {
        let _guard = runtime.enter();
        let mut cmd = invocation.command();
        cmd.kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd.spawn()
            .map_err(|e| Error::from_spawn(e, invocation.program().display().to_string()))?
    };
    debug!(pid = ?child.id(), program = %invocation.program().display(), "spawned download process");

    let (tx, rx) = unbounded_channel();
    let cancel = CancellationToken::new();
    runtime.spawn(run_worker(
        child,
        tx,
        cancel.clone(),
        cancel_grace,
        wakeup,
    ));
    Ok(WorkerHandle { cancel, events: rx })
}

async fn run_worker(
    mut child: Child,
    tx: UnboundedSender<WorkerEvent>,
    cancel: CancellationToken,
    cancel_grace: Duration,
    wakeup: Option<Wakeup>,
) {
    let send = |event: WorkerEvent| {
        let delivered = tx.send(event).is_ok();
        if let Some(wake) = &wakeup {
            wake();
        }
        delivered
    };

    // the child leads its group, so its pid is the group id
    let group = child.id();
    let mut stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
    let mut stderr = child.stderr.take().map(|s| BufReader::new(s).lines());
    let mut termination_requested = false;
    let mut killed = false;
    let mut escalation: Option<Pin<Box<Sleep>>> = None;

    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            _ = cancel.cancelled(), if !termination_requested => {
                termination_requested = true;
                request_termination(group, &mut child);
                escalation = Some(Box::pin(sleep(cancel_grace)));
            }
            _ = expire(&mut escalation), if !killed => {
                killed = true;
                escalation = None;
                warn!(pid = ?group, "process ignored termination request, killing it");
                force_kill(group, &mut child);
            }
            line = next_line(&mut stdout) => {
                if !forward(line, &mut stdout, &send) {
                    force_kill(group, &mut child);
                    return;
                }
            }
            line = next_line(&mut stderr) => {
                if !forward(line, &mut stderr, &send) {
                    force_kill(group, &mut child);
                    return;
                }
            }
        }
    };

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while stdout.is_some() || stderr.is_some() {
            tokio::select! {
                line = next_line(&mut stdout) => {
                    if !forward(line, &mut stdout, &send) {
                        return;
                    }
                }
                line = next_line(&mut stderr) => {
                    if !forward(line, &mut stderr, &send) {
                        return;
                    }
                }
            }
        }
    })
    .await;
    if drained.is_err() {
        debug!(pid = ?group, "output still open after exit, held by a leftover process");
    }

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            warn!(error = %e, "waiting for download process failed");
            None
        }
    };
    debug!(code = ?code, "download process exited");
    send(WorkerEvent::Exited(code));
}

/// Send one read result; returns false once the receiver is gone
fn forward<R>(
    line: std::io::Result<Option<String>>,
    reader: &mut Option<Lines<R>>,
    send: &impl Fn(WorkerEvent) -> bool,
) -> bool {
    match line {
        Ok(Some(line)) => send(WorkerEvent::Output(line)),
        Ok(None) => {
            *reader = None;
            true
        }
        Err(e) => {
            *reader = None;
            send(WorkerEvent::ReadFailed(e.to_string()))
        }
    }
}

async fn next_line<R>(reader: &mut Option<Lines<R>>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    match reader {
        Some(lines) => lines.next_line().await,
        None => pending().await,
    }
}

async fn expire(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

#[cfg(unix)]
fn signal_group(group: Option<u32>, signal: Signal) {
    let Some(pgid) = group.and_then(|id| i32::try_from(id).ok()) else {
        debug!(?signal, "no process group to signal");
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pgid), signal) {
        debug!(pgid, ?signal, error = %e, "signalling process group failed, already gone");
    }
}

#[cfg(unix)]
fn request_termination(group: Option<u32>, _child: &mut Child) {
    signal_group(group, Signal::SIGTERM);
}

#[cfg(unix)]
fn force_kill(group: Option<u32>, child: &mut Child) {
    signal_group(group, Signal::SIGKILL);
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "kill failed, process already gone");
    }
}

#[cfg(not(unix))]
fn request_termination(_group: Option<u32>, child: &mut Child) {
    force_kill(None, child);
}

#[cfg(not(unix))]
fn force_kill(_group: Option<u32>, child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "kill failed, process already gone");
    }
}
