//! End-to-end runs of the tracker and the listing against scripted stand-ins
//! for yt-dlp (`/bin/sh -c <script>`).
#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use playlist_downloader::config::TrackerConfig;
use playlist_downloader::{
    DownloadOptions, Error, JobPhase, JobTracker, JobUpdate, YtDlp, fetch_playlist,
};
use tokio::runtime::Handle;

const URL: &str = "https://www.youtube.com/watch?v=aaa";

/// The script sees yt-dlp's arguments as `$1…`
fn fake_tool(script: &str) -> YtDlp {
    YtDlp::new("/bin/sh").with_extra_args(vec![
        "-c".to_string(),
        script.to_string(),
        "yt-dlp".to_string(),
    ])
}

fn options() -> DownloadOptions {
    DownloadOptions {
        output_dir: Path::new("/tmp").to_path_buf(),
        output_template: "%(title)s.%(ext)s".to_string(),
        audio_format: None,
    }
}

fn tracker(cancel_grace: Duration) -> JobTracker {
    let config = TrackerConfig {
        update_interval: Duration::ZERO,
        cancel_grace,
        ..TrackerConfig::default()
    };
    JobTracker::new(Handle::current(), config)
}

fn start(tracker: &mut JobTracker, url: &str, script: &str) -> JobUpdate {
    let invocation = fake_tool(script).download_invocation(url, &options());
    tracker.start(url, &invocation).unwrap()
}

/// Poll until `done` holds for the collected updates
async fn poll_until(
    tracker: &mut JobTracker,
    updates: &mut Vec<JobUpdate>,
    done: impl Fn(&JobTracker, &[JobUpdate]) -> bool,
) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        tracker.poll_all(&mut *updates);
        if done(tracker, updates) {
            return;
        }
        assert!(Instant::now() < deadline, "timed out, updates so far: {updates:?}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn run_until_idle(tracker: &mut JobTracker) -> Vec<JobUpdate> {
    let mut updates = Vec::new();
    poll_until(tracker, &mut updates, |t, _| !t.has_active_jobs()).await;
    updates
}

fn last_for<'a>(updates: &'a [JobUpdate], url: &str) -> &'a JobUpdate {
    updates
        .iter()
        .rev()
        .find(|u| u.identifier == url)
        .expect("no update for url")
}

#[tokio::test]
async fn download_with_completion_marker_completes() {
    let mut tracker = tracker(Duration::from_secs(5));
    let first = start(
        &mut tracker,
        URL,
        r#"echo "[download]  50.0% of 1.00MiB"; echo "[download] 100% of 1.00MiB"; exit 0"#,
    );
    assert_eq!(first.phase, JobPhase::Queued);
    assert!(tracker.has_active_jobs());

    let updates = run_until_idle(&mut tracker).await;
    let last = last_for(&updates, URL);
    assert_eq!(last.phase, JobPhase::Completed);
    assert_eq!(last.status_text, "Completed");
    assert_eq!(last.progress, 1.0);
    assert!(!tracker.has_active_jobs());
}

#[tokio::test]
async fn exit_zero_without_marker_is_a_failure() {
    let mut tracker = tracker(Duration::from_secs(5));
    start(&mut tracker, URL, r#"echo "[download]  50.0% of 1.00MiB"; exit 0"#);

    let updates = run_until_idle(&mut tracker).await;
    let last = last_for(&updates, URL);
    assert_eq!(last.phase, JobPhase::Failed);
    assert!(
        last.status_text.contains("finished without a completion marker"),
        "{}",
        last.status_text
    );
}

#[tokio::test]
async fn stderr_error_line_becomes_the_status() {
    let mut tracker = tracker(Duration::from_secs(5));
    start(
        &mut tracker,
        URL,
        r#"echo "ERROR: [youtube] aaa: Video unavailable" >&2; exit 1"#,
    );

    let updates = run_until_idle(&mut tracker).await;
    let last = last_for(&updates, URL);
    assert_eq!(last.phase, JobPhase::Failed);
    assert_eq!(last.status_text, "Error: [youtube] aaa: Video unavailable");
    assert_eq!(last.progress, 0.0);
}

#[tokio::test]
async fn silent_exit_one_reports_the_exit_code() {
    let mut tracker = tracker(Duration::from_secs(5));
    start(&mut tracker, URL, "exit 1");

    let updates = run_until_idle(&mut tracker).await;
    let last = last_for(&updates, URL);
    assert_eq!(last.phase, JobPhase::Failed);
    assert_eq!(last.status_text, "Error: yt-dlp exited with code 1");
}

#[tokio::test]
async fn cancel_ends_a_running_download_as_cancelled() {
    let mut tracker = tracker(Duration::from_secs(5));
    start(
        &mut tracker,
        URL,
        r#"echo "[download]   1.0% of 1.00MiB"; while true; do sleep 0.1; done"#,
    );

    let mut updates = Vec::new();
    poll_until(&mut tracker, &mut updates, |_, u| {
        u.iter().any(|u| u.phase == JobPhase::Downloading)
    })
    .await;
    assert!((last_for(&updates, URL).progress - 0.01).abs() < 1e-6);

    tracker.cancel(URL, &mut updates);
    assert_eq!(last_for(&updates, URL).phase, JobPhase::Cancelling);
    assert_eq!(last_for(&updates, URL).status_text, "Cancelling…");

    poll_until(&mut tracker, &mut updates, |t, _| !t.has_active_jobs()).await;
    let last = last_for(&updates, URL);
    assert_eq!(last.phase, JobPhase::Cancelled);
    assert_eq!(last.status_text, "Cancelled");
}

#[tokio::test]
async fn process_ignoring_sigterm_is_killed_after_grace() {
    let mut tracker = tracker(Duration::from_millis(200));
    start(
        &mut tracker,
        URL,
        r#"trap "" TERM; echo started; while true; do sleep 0.1; done"#,
    );

    let mut updates = Vec::new();
    poll_until(&mut tracker, &mut updates, |_, u| {
        u.iter().any(|u| u.phase == JobPhase::Downloading)
    })
    .await;

    let cancelled_at = Instant::now();
    tracker.cancel(URL, &mut updates);
    poll_until(&mut tracker, &mut updates, |t, _| !t.has_active_jobs()).await;

    assert!(cancelled_at.elapsed() >= Duration::from_millis(200));
    assert_eq!(last_for(&updates, URL).phase, JobPhase::Cancelled);
}

#[tokio::test]
async fn cancel_all_reaches_every_job() {
    let mut tracker = tracker(Duration::from_secs(5));
    let urls = [
        "https://www.youtube.com/watch?v=a1",
        "https://www.youtube.com/watch?v=b2",
        "https://www.youtube.com/watch?v=c3",
    ];
    for url in urls {
        start(&mut tracker, url, "while true; do sleep 0.1; done");
    }
    assert_eq!(tracker.active_count(), urls.len());

    let mut updates = Vec::new();
    tracker.cancel_all(&mut updates);
    poll_until(&mut tracker, &mut updates, |t, _| !t.has_active_jobs()).await;

    for url in urls {
        assert_eq!(last_for(&updates, url).phase, JobPhase::Cancelled, "{url}");
    }
}

#[tokio::test]
async fn exit_is_seen_while_a_leftover_process_holds_the_output() {
    let mut tracker = tracker(Duration::from_secs(5));
    let started = Instant::now();
    start(
        &mut tracker,
        URL,
        r#"sleep 4 & echo "ERROR: postprocessing failed"; exit 1"#,
    );

    let updates = run_until_idle(&mut tracker).await;
    assert!(
        started.elapsed() < Duration::from_secs(3),
        "finalized after {:?}",
        started.elapsed()
    );
    let last = last_for(&updates, URL);
    assert_eq!(last.phase, JobPhase::Failed);
    assert_eq!(last.status_text, "Error: postprocessing failed");
}

#[tokio::test]
async fn cancel_reaches_processes_started_by_the_tool() {
    let mut tracker = tracker(Duration::from_millis(200));
    start(&mut tracker, URL, "sleep 4 & echo started; wait");

    let mut updates = Vec::new();
    poll_until(&mut tracker, &mut updates, |_, u| {
        u.iter().any(|u| u.phase == JobPhase::Downloading)
    })
    .await;

    let cancelled_at = Instant::now();
    tracker.cancel(URL, &mut updates);
    poll_until(&mut tracker, &mut updates, |t, _| !t.has_active_jobs()).await;

    assert!(
        cancelled_at.elapsed() < Duration::from_secs(3),
        "cancel took {:?}",
        cancelled_at.elapsed()
    );
    assert_eq!(last_for(&updates, URL).phase, JobPhase::Cancelled);
}

#[tokio::test]
async fn wakeup_hook_fires_for_worker_events() {
    let wakeups = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&wakeups);
    let mut tracker = tracker(Duration::from_secs(5)).with_wakeup(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    start(&mut tracker, URL, r#"echo "[download] 100% of 1.00MiB""#);

    run_until_idle(&mut tracker).await;
    assert!(wakeups.load(Ordering::SeqCst) >= 2, "one output line plus the exit");
}

#[tokio::test]
async fn missing_tool_is_reported_before_any_job_exists() {
    let mut tracker = tracker(Duration::from_secs(5));
    let invocation = YtDlp::new("/nonexistent/bin/yt-dlp").download_invocation(URL, &options());
    let err = tracker.start(URL, &invocation).unwrap_err();
    assert!(matches!(err, Error::ToolNotFound { .. }), "got {err:?}");
    assert!(!tracker.has_active_jobs());
}

#[tokio::test]
async fn listing_passes_the_url_last() {
    // echo the final argument back as the entry URL
    let tool = fake_tool(
        r#"for last; do :; done
printf '{"id": "aaa", "title": "First", "url": "%s", "playlist_title": "Mix"}\n' "$last"
printf 'not json\n'
printf '{"id": "bbb", "url": "https://www.youtube.com/watch?v=bbb"}\n'"#,
    );
    let url = "https://www.youtube.com/playlist?list=PL123";

    let playlist = fetch_playlist(&tool, url).await.unwrap();
    assert_eq!(playlist.title, "Mix");
    assert_eq!(playlist.len(), 2);
    assert_eq!(playlist.entries[0].url, url);
    assert_eq!(playlist.entries[1].title, "Untitled Video");
}

#[tokio::test]
async fn listing_failure_is_classified() {
    let tool = fake_tool(r#"echo "ERROR: [youtube:tab] PL123: This playlist is private" >&2; exit 1"#);
    let err = fetch_playlist(&tool, "https://www.youtube.com/playlist?list=PL123")
        .await
        .unwrap_err();
    match err {
        Error::NetworkOrSource { message } => {
            assert_eq!(message, "Playlist or video is private or unavailable");
        }
        other => panic!("expected NetworkOrSource, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_listing_is_empty_playlist() {
    let tool = fake_tool("exit 0");
    let err = fetch_playlist(&tool, "https://www.youtube.com/playlist?list=PL123")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EmptyPlaylist), "got {err:?}");
}

#[tokio::test]
async fn listing_with_missing_tool_is_tool_not_found() {
    let tool = YtDlp::new("/nonexistent/bin/yt-dlp");
    let err = fetch_playlist(&tool, "https://www.youtube.com/playlist?list=PL123")
        .await
        .unwrap_err();
    assert!(err.is_tool_not_found(), "got {err:?}");
}
