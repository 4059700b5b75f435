//! Local URL check run before any fetch or download is started

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static WATCH_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:https?://)?(?:www\.)?youtube\.com/watch\?(\S*)$")
        .expect("watch URL pattern is valid")
});

static PLAYLIST_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:https?://)?(?:www\.)?youtube\.com/playlist\?(\S*)$")
        .expect("playlist URL pattern is valid")
});

static SHORT_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:https?://)?(?:www\.)?youtu\.be/[\w-]+(?:\?\S*)?$")
        .expect("short URL pattern is valid")
});

static VIDEO_PARAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"v=[\w-]+").expect("video parameter pattern is valid"));

static LIST_PARAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"list=[\w-]+").expect("list parameter pattern is valid"));

/// Why a URL was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UrlError {
    #[error("URL cannot be empty.")]
    Empty,
    #[error("URL is not a YouTube URL. Please provide a valid YouTube link.")]
    NotYoutube,
    #[error("YouTube URL is missing a video ID.")]
    MissingVideoId,
    #[error("YouTube playlist URL is missing a playlist ID.")]
    MissingPlaylistId,
    #[error("YouTube URL format is invalid. Please check the URL and try again.")]
    Malformed,
}

/// Shape of an accepted URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlKind {
    /// `youtube.com/watch?v=...`
    Watch,
    /// `youtube.com/playlist?list=...`
    Playlist,
    /// `youtu.be/...`
    Short,
}

/// Check `input` and return the trimmed URL together with its kind.
///
/// Only the shape is checked; whether the video or playlist exists is left to
/// the external tool.
pub fn validate_url(input: &str) -> Result<(&str, UrlKind), UrlError> {
    let url = input.trim();
    if url.is_empty() {
        return Err(UrlError::Empty);
    }

    if let Some(caps) = WATCH_URL.captures(url) {
        if VIDEO_PARAM.is_match(&caps[1]) {
            return Ok((url, UrlKind::Watch));
        }
    } else if let Some(caps) = PLAYLIST_URL.captures(url) {
        if LIST_PARAM.is_match(&caps[1]) {
            return Ok((url, UrlKind::Playlist));
        }
    } else if SHORT_URL.is_match(url) {
        return Ok((url, UrlKind::Short));
    }

    Err(explain(url))
}

fn explain(url: &str) -> UrlError {
    let lower = url.to_ascii_lowercase();
    if !(lower.contains("youtube.com") || lower.contains("youtu.be")) {
        return UrlError::NotYoutube;
    }
    if url.contains("watch?") && (!url.contains("v=") || url.ends_with("v=")) {
        return UrlError::MissingVideoId;
    }
    if url.contains("playlist?") && (!url.contains("list=") || url.ends_with("list=")) {
        return UrlError::MissingPlaylistId;
    }
    UrlError::Malformed
}
