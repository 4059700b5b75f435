/// Where a job is in its lifecycle
///
/// Phases only move forward: Queued, Downloading, Cancelling, then one of the
/// terminal phases. A job may skip phases but never returns to an earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobPhase {
    /// Process spawned, no output seen yet
    Queued,
    /// Output is arriving
    Downloading,
    /// Termination requested, exit not yet observed
    Cancelling,
    /// Finished with a completion marker and exit code 0
    Completed,
    /// Finished without success
    Failed,
    /// Finished after a cancel request
    Cancelled,
}

impl JobPhase {
    fn rank(self) -> u8 {
        match self {
            JobPhase::Queued => 0,
            JobPhase::Downloading => 1,
            JobPhase::Cancelling => 2,
            JobPhase::Completed | JobPhase::Failed | JobPhase::Cancelled => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 3
    }

    /// Whether a job in this phase may move to `next`.
    ///
    /// Staying in the same non-terminal phase is allowed (progress updates).
    pub fn can_advance_to(self, next: JobPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.rank() >= self.rank()
    }
}

/// One visible change of a job, addressed to that job by value
#[derive(Debug, Clone, PartialEq)]
pub struct JobUpdate {
    /// Source URL of the job the update belongs to
    pub identifier: String,
    pub phase: JobPhase,
    pub status_text: String,
    /// Fraction in `[0, 1]`
    pub progress: f32,
}

/// Receives job updates on the thread that owns the UI
pub trait UpdateSink {
    fn publish(&mut self, update: JobUpdate);
}

impl UpdateSink for Vec<JobUpdate> {
    fn publish(&mut self, update: JobUpdate) {
        self.push(update);
    }
}

/// Rough category of a failed download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    Network,
    Unavailable,
    Unsupported,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub cause: FailureCause,
    pub message: String,
}


/// How a finished job ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed(Failure),
    /// Never presented as an error
    Cancelled,
}

impl Outcome {
    pub fn phase(&self) -> JobPhase {
        match self {
            Outcome::Completed => JobPhase::Completed,
            Outcome::Failed(_) => JobPhase::Failed,
            Outcome::Cancelled => JobPhase::Cancelled,
        }
    }

    pub fn status_text(&self) -> String {
        match self {
            Outcome::Completed => "Completed".to_string(),
            Outcome::Failed(failure) => format!("Error: {}", failure.message),
            Outcome::Cancelled => "Cancelled".to_string(),
        }
    }

    pub fn progress(&self) -> f32 {
        match self {
            Outcome::Completed => 1.0,
            Outcome::Failed(_) | Outcome::Cancelled => 0.0,
        }
    }
}

/// Data structure for tracking a playlist entry's download in a front end
#[derive(Debug, Clone)]
pub struct DownloadTask {
    /// Human-readable title
    pub title: String,
    /// Source URL, also the job identifier
    pub url: String,
    /// Video ID from the listing, used for thumbnails
    pub video_id: Option<String>,
    /// Thumbnail URL from the listing, if any
    pub thumbnail: Option<String>,
    /// Last phase received for this entry; `None` until a job was started
    pub phase: Option<JobPhase>,
    pub status_text: String,
    /// Progress percentage (0.0 to 1.0)
    pub progress: f32,
    /// Extract audio instead of keeping the video
    pub audio_only: bool,
}

impl DownloadTask {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            video_id: None,
            thumbnail: None,
            phase: None,
            status_text: String::new(),
            progress: 0.0,
            audio_only: false,
        }
    }

    /// Whether a job for this entry is currently running
    pub fn is_active(&self) -> bool {
        self.phase.is_some_and(|p| !p.is_terminal())
    }

    /// Apply an update addressed to this entry.
    ///
    /// A finished entry can be started again, so a `Queued` update is always
    /// accepted after a terminal phase. Anything else that would move the
    /// entry backwards is ignored. Returns whether the update was applied.
    pub fn apply(&mut self, update: &JobUpdate) -> bool {
        if update.identifier != self.url {
            return false;
        }
        let accepted = match self.phase {
            None => true,
            Some(current) if current.is_terminal() => update.phase == JobPhase::Queued,
            Some(current) => current.can_advance_to(update.phase),
        };
        if accepted {
            self.phase = Some(update.phase);
            self.status_text = update.status_text.clone();
            self.progress = update.progress;
        }
        accepted
    }

    /// Record a failure that happened before any job existed
    pub fn reject(&mut self, message: impl Into<String>) {
        self.phase = Some(JobPhase::Failed);
        self.status_text = format!("Error: {}", message.into());
        self.progress = 0.0;
    }
}
