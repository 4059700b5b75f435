//! Download job tracker
//!
//! [`JobTracker`] owns the active-jobs mapping, keyed by source URL. It is
//! meant to live on the thread that owns the UI and is only ever mutated
//! through `&mut self` from there: `start` inserts, the finalization step of
//! `poll_all` removes. Workers run on the tokio runtime and only talk to the
//! tracker through their event channels, so no lock is needed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, info, warn};

use crate::config::TrackerConfig;
use crate::downloader::{WorkerEvent, WorkerHandle, Wakeup, spawn_download};
use crate::error::{Error, Result};
use crate::model::{Failure, JobPhase, JobUpdate, Outcome, UpdateSink};
use crate::progress::{OutputTail, parse_progress_from_line};
use crate::tool::Invocation;

const STATUS_QUEUED: &str = "Queued";
const STATUS_DOWNLOADING: &str = "Downloading…";
const STATUS_CANCELLING: &str = "Cancelling…";

struct Job {
    identifier: String,
    worker: WorkerHandle,
    phase: JobPhase,
    status_text: String,
    progress: f32,
    cancel_requested: bool,
    tail: OutputTail,
    last_published: Option<Instant>,
    dirty: bool,
}

impl Job {
    fn new(identifier: &str, worker: WorkerHandle, tail_capacity: usize) -> Self {
        Self {
            identifier: identifier.to_string(),
            worker,
            phase: JobPhase::Queued,
            status_text: STATUS_QUEUED.to_string(),
            progress: 0.0,
            cancel_requested: false,
            tail: OutputTail::new(tail_capacity),
            last_published: None,
            dirty: false,
        }
    }

    fn snapshot(&self) -> JobUpdate {
        JobUpdate {
            identifier: self.identifier.clone(),
            phase: self.phase,
            status_text: self.status_text.clone(),
            progress: self.progress,
        }
    }

    fn advance(&mut self, next: JobPhase) {
        if self.phase.can_advance_to(next) {
            self.phase = next;
        }
    }

    fn on_output(&mut self, line: String) {
        if self.phase == JobPhase::Queued {
            self.advance(JobPhase::Downloading);
            self.status_text = STATUS_DOWNLOADING.to_string();
            self.dirty = true;
        }
        let trimmed = line.trim();
        if self.phase == JobPhase::Downloading && !trimmed.is_empty() {
            if let Some(fraction) = parse_progress_from_line(trimmed) {
                self.progress = self.progress.max(fraction);
            }
            self.status_text = trimmed.to_string();
            self.dirty = true;
        }
        self.tail.push(line);
    }

    fn finish(&mut self, outcome: &Outcome) {
        self.advance(outcome.phase());
        self.status_text = outcome.status_text();
        self.progress = outcome.progress();
        self.dirty = false;
    }
}

/// Decide how a job ended from its exit code and retained output.
///
/// A cancelled job is always `Cancelled`. Otherwise success needs both a zero
/// exit code and a completion marker among the retained lines.
pub fn classify_exit(code: Option<i32>, cancel_requested: bool, tail: &OutputTail) -> Outcome {
    if cancel_requested {
        return Outcome::Cancelled;
    }
    if code == Some(0) && tail.has_completion_marker() {
        return Outcome::Completed;
    }
    let message = tail.failure_message().unwrap_or_else(|| match code {
        Some(code) => format!("yt-dlp exited with code {code}"),
        None => "yt-dlp was terminated".to_string(),
    });
    let message = if code == Some(0) {
        format!("finished without a completion marker ({message})")
    } else {
        message
    };
    Outcome::Failed(Failure {
        cause: tail.failure_cause(),
        message,
    })
}

/// Tracks in-flight downloads and turns their output into UI updates
pub struct JobTracker {
    jobs: HashMap<String, Job>,
    runtime: Handle,
    config: TrackerConfig,
    wakeup: Option<Wakeup>,
}

impl JobTracker {
    /// `runtime` runs the per-job workers; the tracker itself stays on the
    /// caller's thread.
    pub fn new(runtime: Handle, config: TrackerConfig) -> Self {
        Self {
            jobs: HashMap::new(),
            runtime,
            config,
            wakeup: None,
        }
    }

    /// Hook called from worker tasks whenever a job has new output, e.g. the
    /// toolkit's thread-safe "request repaint"
    pub fn with_wakeup(mut self, wakeup: impl Fn() + Send + Sync + 'static) -> Self {
        self.wakeup = Some(Arc::new(wakeup));
        self
    }

    /// Start a job for `identifier`.
    ///
    /// Starting an identifier that is already active does nothing and
    /// returns the running job's current state.
    pub fn start(&mut self, identifier: &str, invocation: &Invocation) -> Result<JobUpdate> {
        if identifier.trim().is_empty() {
            return Err(Error::EmptyIdentifier);
        }
        if let Some(job) = self.jobs.get(identifier) {
            debug!(url = %identifier, "job already active, ignoring start");
            return Ok(job.snapshot());
        }

        let worker = spawn_download(
            invocation,
            &self.runtime,
            self.config.cancel_grace,
            self.wakeup.clone(),
        )?;
        info!(url = %identifier, "download started");
        Ok(self.attach(identifier, worker))
    }

    fn attach(&mut self, identifier: &str, worker: WorkerHandle) -> JobUpdate {
        let job = Job::new(identifier, worker, self.config.tail_capacity);
        let snapshot = job.snapshot();
        self.jobs.insert(identifier.to_string(), job);
        snapshot
    }

    /// Drain buffered output of every job, publish throttled updates and
    /// finalize jobs whose process has exited.
    pub fn poll_all(&mut self, sink: &mut impl UpdateSink) {
        let now = Instant::now();
        let interval = self.config.update_interval;
        let mut finished = Vec::new();

        for job in self.jobs.values_mut() {
            let mut exit = None;
            loop {
                match job.worker.events().try_recv() {
                    Ok(WorkerEvent::Output(line)) => job.on_output(line),
                    Ok(WorkerEvent::ReadFailed(message)) => {
                        warn!(url = %job.identifier, error = %message, "reading tool output failed");
                        job.tail.push(format!("ERROR: {message}"));
                    }
                    Ok(WorkerEvent::Exited(code)) => {
                        exit = Some(code);
                        break;
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        job.tail.push("ERROR: download worker stopped unexpectedly");
                        exit = Some(None);
                        break;
                    }
                }
            }

            if let Some(code) = exit {
                let outcome = classify_exit(code, job.cancel_requested, &job.tail);
                match &outcome {
                    Outcome::Completed => info!(url = %job.identifier, "download completed"),
                    Outcome::Cancelled => info!(url = %job.identifier, "download cancelled"),
                    Outcome::Failed(failure) => warn!(
                        url = %job.identifier,
                        cause = ?failure.cause,
                        code = ?code,
                        message = %failure.message,
                        "download failed"
                    ),
                }
                job.finish(&outcome);
                sink.publish(job.snapshot());
                finished.push(job.identifier.clone());
                continue;
            }

            let due = job
                .last_published
                .is_none_or(|at| now.duration_since(at) >= interval);
            if job.dirty && due {
                sink.publish(job.snapshot());
                job.last_published = Some(now);
                job.dirty = false;
            }
        }

        for identifier in finished {
            self.jobs.remove(&identifier);
        }
    }

    /// Request cancellation of one job.
    ///
    /// Publishes "Cancelling…" right away; the job is finalized by the
    /// `poll_all` that sees its process exit. Unknown identifiers and repeated
    /// calls are ignored.
    pub fn cancel(&mut self, identifier: &str, sink: &mut impl UpdateSink) {
        let Some(job) = self.jobs.get_mut(identifier) else {
            return;
        };
        if job.cancel_requested {
            return;
        }
        job.cancel_requested = true;
        job.worker.cancel();
        job.advance(JobPhase::Cancelling);
        job.status_text = STATUS_CANCELLING.to_string();
        job.progress = 0.0;
        job.dirty = false;
        job.last_published = Some(Instant::now());
        info!(url = %identifier, "cancelling download");
        sink.publish(job.snapshot());
    }

    /// Cancel every active job
    pub fn cancel_all(&mut self, sink: &mut impl UpdateSink) {
        let identifiers: Vec<String> = self.jobs.keys().cloned().collect();
        for identifier in &identifiers {
            self.cancel(identifier, sink);
        }
    }

    pub fn has_active_jobs(&self) -> bool {
        !self.jobs.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_active(&self, identifier: &str) -> bool {
        self.jobs.contains_key(identifier)
    }

    /// Current state of an active job
    pub fn snapshot(&self, identifier: &str) -> Option<JobUpdate> {
        self.jobs.get(identifier).map(Job::snapshot)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FailureCause;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedSender;
    use tokio_util::sync::CancellationToken;

    struct Scripted {
        tx: UnboundedSender<WorkerEvent>,
        cancel: CancellationToken,
    }

    impl Scripted {
        fn line(&self, line: &str) {
            self.tx.send(WorkerEvent::Output(line.to_string())).unwrap();
        }

        fn exit(&self, code: Option<i32>) {
            self.tx.send(WorkerEvent::Exited(code)).unwrap();
        }
    }

    fn tracker(update_interval: Duration) -> JobTracker {
        let config = TrackerConfig {
            update_interval,
            ..TrackerConfig::default()
        };
        JobTracker::new(Handle::current(), config)
    }

    fn attach(tracker: &mut JobTracker, url: &str) -> Scripted {
        let (handle, tx, cancel) = WorkerHandle::scripted();
        tracker.attach(url, handle);
        Scripted { tx, cancel }
    }

    fn tail_of(lines: &[&str]) -> OutputTail {
        let mut tail = OutputTail::new(20);
        for line in lines {
            tail.push(*line);
        }
        tail
    }

    #[test]
    fn classify_requires_exit_code_and_marker() {
        let done = tail_of(&["[download] 100% of 10.50MiB"]);
        assert_eq!(classify_exit(Some(0), false, &done), Outcome::Completed);

        let no_marker = tail_of(&["[download]  50.0% of 10.50MiB"]);
        assert!(matches!(
            classify_exit(Some(0), false, &no_marker),
            Outcome::Failed(_)
        ));

        assert!(matches!(
            classify_exit(Some(1), false, &done),
            Outcome::Failed(_)
        ));
    }

    #[test]
    fn classify_exit_one_without_output_is_network_or_source() {
        let outcome = classify_exit(Some(1), false, &OutputTail::new(20));
        match outcome {
            Outcome::Failed(Failure { cause, message }) => {
                assert_eq!(cause, FailureCause::Other);
                assert_eq!(message, "yt-dlp exited with code 1");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn classify_cancel_wins_over_exit_status() {
        let done = tail_of(&["[download] 100% of 1MiB"]);
        assert_eq!(classify_exit(Some(0), true, &done), Outcome::Cancelled);
        assert_eq!(classify_exit(None, true, &OutputTail::new(1)), Outcome::Cancelled);
    }

    #[tokio::test]
    async fn nothing_active_before_start() {
        let tracker = tracker(Duration::ZERO);
        assert!(!tracker.has_active_jobs());
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn empty_identifier_is_rejected() {
        let mut tracker = tracker(Duration::ZERO);
        let invocation = Invocation::new("/bin/true", Vec::<String>::new());
        assert!(matches!(
            tracker.start("  ", &invocation),
            Err(Error::EmptyIdentifier)
        ));
        assert!(!tracker.has_active_jobs());
    }

    #[tokio::test]
    async fn starting_an_active_identifier_is_a_no_op() {
        let mut tracker = tracker(Duration::ZERO);
        let _job = attach(&mut tracker, "https://youtu.be/a");
        let invocation = Invocation::new("/nonexistent/yt-dlp", ["x"]);
        // would fail with ToolNotFound if it tried to spawn again
        let snapshot = tracker.start("https://youtu.be/a", &invocation).unwrap();
        assert_eq!(snapshot.phase, JobPhase::Queued);
        assert_eq!(tracker.active_count(), 1);
    }

    #[tokio::test]
    async fn missing_executable_is_tool_not_found() {
        let mut tracker = tracker(Duration::ZERO);
        let invocation = Invocation::new("/nonexistent/dir/yt-dlp", ["https://youtu.be/a"]);
        let err = tracker.start("https://youtu.be/a", &invocation).unwrap_err();
        assert!(err.is_tool_not_found(), "got {err:?}");
        assert!(!tracker.has_active_jobs());
    }

    #[tokio::test]
    async fn progress_and_completion_flow() {
        let mut tracker = tracker(Duration::ZERO);
        let job = attach(&mut tracker, "u");
        let mut updates = Vec::new();

        job.line("[download]  25.5% of 10.50MiB at 1.20MiB/s ETA 00:06");
        tracker.poll_all(&mut updates);
        let last = updates.last().unwrap();
        assert_eq!(last.phase, JobPhase::Downloading);
        assert!((last.progress - 0.255).abs() < 1e-6);

        job.line("[download] 100% of 10.50MiB");
        job.exit(Some(0));
        tracker.poll_all(&mut updates);
        let last = updates.last().unwrap();
        assert_eq!(last.phase, JobPhase::Completed);
        assert_eq!(last.status_text, "Completed");
        assert_eq!(last.progress, 1.0);
        assert!(!tracker.has_active_jobs());
    }

    #[tokio::test]
    async fn non_progress_lines_update_status_but_not_fraction() {
        let mut tracker = tracker(Duration::ZERO);
        let job = attach(&mut tracker, "u");
        let mut updates = Vec::new();

        job.line("[download]  40.0% of 1MiB");
        tracker.poll_all(&mut updates);
        job.line("[Merger] Merging formats into \"a.mkv\"");
        tracker.poll_all(&mut updates);

        let last = updates.last().unwrap();
        assert_eq!(last.status_text, "[Merger] Merging formats into \"a.mkv\"");
        assert!((last.progress - 0.4).abs() < 1e-6);
    }

    #[tokio::test]
    async fn progress_never_decreases_while_downloading() {
        let mut tracker = tracker(Duration::ZERO);
        let job = attach(&mut tracker, "u");
        let mut updates = Vec::new();

        job.line("[download]  80.0% of 1MiB");
        job.line("[download]  10.0% of 2MiB");
        tracker.poll_all(&mut updates);
        assert!((updates.last().unwrap().progress - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn failure_without_markers_reports_error_status() {
        let mut tracker = tracker(Duration::ZERO);
        let job = attach(&mut tracker, "u");
        let mut updates = Vec::new();

        job.line("ERROR: [youtube] abc: Video unavailable");
        job.exit(Some(1));
        tracker.poll_all(&mut updates);

        let last = updates.last().unwrap();
        assert_eq!(last.phase, JobPhase::Failed);
        assert_eq!(last.status_text, "Error: [youtube] abc: Video unavailable");
        assert_eq!(last.progress, 0.0);
        assert!(!tracker.has_active_jobs());
    }

    #[tokio::test]
    async fn updates_are_throttled_but_terminal_update_is_not() {
        let mut tracker = tracker(Duration::from_secs(3600));
        let job = attach(&mut tracker, "u");
        let mut updates = Vec::new();

        for i in 0..50 {
            job.line(&format!("[download] {:>5.1}% of 10MiB", i as f32));
        }
        tracker.poll_all(&mut updates);
        assert_eq!(updates.len(), 1);

        job.line("[download]  99.0% of 10MiB");
        tracker.poll_all(&mut updates);
        assert_eq!(updates.len(), 1, "second update inside the interval");

        job.line("[download] 100% of 10MiB");
        job.exit(Some(0));
        tracker.poll_all(&mut updates);
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1].phase, JobPhase::Completed);
    }

    #[tokio::test]
    async fn cancel_publishes_immediately_and_finalizes_on_exit() {
        let mut tracker = tracker(Duration::ZERO);
        let job = attach(&mut tracker, "u");
        let mut updates = Vec::new();

        job.line("[download]  30.0% of 1MiB");
        tracker.poll_all(&mut updates);

        tracker.cancel("u", &mut updates);
        assert!(job.cancel.is_cancelled());
        let last = updates.last().unwrap();
        assert_eq!(last.phase, JobPhase::Cancelling);
        assert_eq!(last.status_text, "Cancelling…");
        assert_eq!(last.progress, 0.0);
        assert!(tracker.has_active_jobs(), "still active until the exit is seen");

        job.line("[download]  31.0% of 1MiB");
        tracker.poll_all(&mut updates);
        assert_eq!(updates.last().unwrap().phase, JobPhase::Cancelling);

        job.exit(None);
        tracker.poll_all(&mut updates);
        let last = updates.last().unwrap();
        assert_eq!(last.phase, JobPhase::Cancelled);
        assert_eq!(last.status_text, "Cancelled");
        assert!(!tracker.has_active_jobs());
    }

    #[tokio::test]
    async fn cancel_twice_equals_cancel_once() {
        let mut tracker = tracker(Duration::ZERO);
        let _job = attach(&mut tracker, "u");
        let mut once = Vec::new();
        tracker.cancel("u", &mut once);
        let mut again = Vec::new();
        tracker.cancel("u", &mut again);
        assert_eq!(once.len(), 1);
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn cancel_of_unknown_identifier_is_ignored() {
        let mut tracker = tracker(Duration::ZERO);
        let mut updates = Vec::new();
        tracker.cancel("nope", &mut updates);
        assert!(updates.is_empty());
    }

    #[tokio::test]
    async fn cancel_all_addresses_each_job() {
        let mut tracker = tracker(Duration::ZERO);
        let urls = ["https://youtu.be/a", "https://youtu.be/b", "https://youtu.be/c"];
        let jobs: Vec<Scripted> = urls.iter().map(|u| attach(&mut tracker, u)).collect();
        let mut updates = Vec::new();

        tracker.cancel_all(&mut updates);

        assert_eq!(updates.len(), urls.len());
        let addressed: HashSet<&str> = updates.iter().map(|u| u.identifier.as_str()).collect();
        assert_eq!(addressed, urls.iter().copied().collect::<HashSet<_>>());
        assert!(updates.iter().all(|u| u.status_text == "Cancelling…"));
        assert!(jobs.iter().all(|j| j.cancel.is_cancelled()));

        for job in &jobs {
            job.exit(Some(143));
        }
        tracker.poll_all(&mut updates);
        assert!(!tracker.has_active_jobs());
        let cancelled: HashSet<&str> = updates
            .iter()
            .filter(|u| u.phase == JobPhase::Cancelled)
            .map(|u| u.identifier.as_str())
            .collect();
        assert_eq!(cancelled.len(), urls.len());
    }

    #[tokio::test]
    async fn phases_never_regress_across_polls() {
        let mut tracker = tracker(Duration::ZERO);
        let job = attach(&mut tracker, "u");
        let mut updates = Vec::new();

        job.line("[youtube] abc: Downloading webpage");
        tracker.poll_all(&mut updates);
        job.line("[download]  10.0% of 1MiB");
        tracker.poll_all(&mut updates);
        tracker.cancel("u", &mut updates);
        job.line("late line");
        tracker.poll_all(&mut updates);
        job.exit(Some(1));
        tracker.poll_all(&mut updates);
        tracker.poll_all(&mut updates);

        let mut previous = JobPhase::Queued;
        for update in &updates {
            assert!(
                previous == update.phase || previous.can_advance_to(update.phase),
                "{previous:?} -> {:?}",
                update.phase
            );
            previous = update.phase;
        }
        assert_eq!(previous, JobPhase::Cancelled);
    }

    #[tokio::test]
    async fn vanished_worker_counts_as_failure() {
        let mut tracker = tracker(Duration::ZERO);
        let job = attach(&mut tracker, "u");
        drop(job);
        let mut updates = Vec::new();
        tracker.poll_all(&mut updates);
        assert_eq!(updates.last().unwrap().phase, JobPhase::Failed);
        assert!(!tracker.has_active_jobs());
    }

    #[tokio::test]
    async fn the_same_url_can_run_again_after_finishing() {
        let mut tracker = tracker(Duration::ZERO);
        let job = attach(&mut tracker, "u");
        job.exit(Some(1));
        let mut updates = Vec::new();
        tracker.poll_all(&mut updates);
        assert!(!tracker.is_active("u"));

        let _again = attach(&mut tracker, "u");
        assert!(tracker.is_active("u"));
        assert_eq!(tracker.snapshot("u").unwrap().phase, JobPhase::Queued);
    }
}
