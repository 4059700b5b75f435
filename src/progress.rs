//! Progress parsing for yt-dlp's line-oriented output

use std::collections::VecDeque;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::FailureCause;

static PROGRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[download\]\s+(\d{1,3}(?:\.\d+)?)%").expect("progress pattern is valid")
});

static COMPLETION_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\[download\]\s+100(?:\.0+)?%",
        r"\[download\] .+ has already been downloaded",
        r"\[ExtractAudio\] Destination:",
        r"\[ffmpeg\] Destination:",
        r"\[Merger\] Merging formats into",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("completion pattern is valid"))
    .collect()
});

/// Extract the download percentage from a line as a fraction in `[0, 1]`.
///
/// Matches `[download]  25.5% of 10.50MiB at 1.20MiB/s ETA 00:06` and the
/// integer form `[download] 100% of 10.50MiB`.
pub fn parse_progress_from_line(line: &str) -> Option<f32> {
    let caps = PROGRESS_RE.captures(line)?;
    let percent: f32 = caps[1].parse().ok()?;
    Some((percent / 100.0).clamp(0.0, 1.0))
}

/// Whether `line` shows that a download or post-processing step finished
pub fn is_completion_marker(line: &str) -> bool {
    COMPLETION_RES.iter().any(|re| re.is_match(line))
}

/// The last few output lines of a job
///
/// Only kept to explain a failed job once its process exits.
#[derive(Debug, Clone)]
pub struct OutputTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl OutputTail {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Oldest line first
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    /// Whether any retained line is a completion marker
    pub fn has_completion_marker(&self) -> bool {
        self.iter().any(is_completion_marker)
    }

    /// Best single line describing why the tool failed.
    ///
    /// Prefers the last `ERROR:` line (without the prefix), then the last
    /// non-empty line.
    pub fn failure_message(&self) -> Option<String> {
        let last_error = self
            .iter()
            .rev()
            .find_map(|line| line.trim().strip_prefix("ERROR:").map(str::trim));
        if let Some(message) = last_error.filter(|m| !m.is_empty()) {
            return Some(message.to_string());
        }
        self.iter()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
    }

    /// Rough category of a failure based on the retained lines
    pub fn failure_cause(&self) -> FailureCause {
        let text = self.iter().collect::<Vec<_>>().join("\n").to_lowercase();
        if text.contains("unsupported url") {
            FailureCause::Unsupported
        } else if text.contains("private")
            || text.contains("unavailable")
            || text.contains("has been removed")
        {
            FailureCause::Unavailable
        } else if text.contains("network")
            || text.contains("connection")
            || text.contains("timed out")
            || text.contains("unable to download")
        {
            FailureCause::Network
        } else {
            FailureCause::Other
        }
    }
}
