//! Playlist listing through `yt-dlp --flat-playlist -j`

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::tool::YtDlp;

const UNTITLED: &str = "Untitled Video";
const UNKNOWN_UPLOADER: &str = "Unknown";
const UNKNOWN_PLAYLIST: &str = "Unknown Playlist";

/// One line of yt-dlp's flat JSON listing. Only the fields we use.
#[derive(Debug, Default, Deserialize)]
struct RawEntry {
    id: Option<String>,
    title: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    duration: Option<f64>,
    playlist_title: Option<String>,
    thumbnails: Option<Vec<RawThumbnail>>,
}

#[derive(Debug, Deserialize)]
struct RawThumbnail {
    url: Option<String>,
}

/// A video found in a playlist
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaylistEntry {
    pub title: String,
    /// What gets passed to the download step; also the job identifier
    pub url: String,
    pub id: Option<String>,
    pub uploader: String,
    /// Length in seconds, when the listing knows it
    pub duration: Option<f64>,
    pub thumbnail: Option<String>,
}

impl PlaylistEntry {
    fn from_raw(raw: &RawEntry) -> Option<Self> {
        let url = raw
            .url
            .clone()
            .or_else(|| raw.webpage_url.clone())
            .filter(|u| !u.trim().is_empty())?;
        Some(Self {
            title: raw.title.clone().unwrap_or_else(|| UNTITLED.to_string()),
            url,
            id: raw.id.clone(),
            uploader: raw
                .uploader
                .clone()
                .or_else(|| raw.channel.clone())
                .unwrap_or_else(|| UNKNOWN_UPLOADER.to_string()),
            duration: raw.duration,
            // yt-dlp orders thumbnails from worst to best
            thumbnail: raw
                .thumbnails
                .iter()
                .flatten()
                .rev()
                .find_map(|t| t.url.clone()),
        })
    }

    /// Duration as `m:ss`, or `h:mm:ss` past an hour
    pub fn length_label(&self) -> Option<String> {
        let total = self.duration.filter(|d| d.is_finite() && *d >= 0.0)?.round() as u64;
        let (hours, minutes, seconds) = (total / 3600, total / 60 % 60, total % 60);
        Some(if hours > 0 {
            format!("{hours}:{minutes:02}:{seconds:02}")
        } else {
            format!("{minutes}:{seconds:02}")
        })
    }
}

/// Result of a listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Playlist {
    pub title: String,
    pub entries: Vec<PlaylistEntry>,
}

impl Playlist {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse the JSON-lines output of a flat listing.
///
/// Lines that are not JSON objects and objects without any URL are skipped.
pub fn parse_listing(stdout: &str) -> Playlist {
    let mut first: Option<RawEntry> = None;
    let mut entries = Vec::new();

    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let raw: RawEntry = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(error = %e, "skipping non-JSON listing line");
                continue;
            }
        };
        if let Some(entry) = PlaylistEntry::from_raw(&raw) {
            entries.push(entry);
        }
        if first.is_none() {
            first = Some(raw);
        }
    }

    let first = first.unwrap_or_default();
    let title = first
        .playlist_title
        .or(first.title)
        .or_else(|| entries.first().map(|e| e.title.clone()))
        .unwrap_or_else(|| UNKNOWN_PLAYLIST.to_string());

    Playlist { title, entries }
}

/// Turn a failed listing into a user-facing error
fn classify_failure(stderr: &str, code: Option<i32>) -> Error {
    let stderr = stderr.trim();
    let lower = stderr.to_lowercase();
    let message = if lower.contains("private") {
        "Playlist or video is private or unavailable".to_string()
    } else if lower.contains("unavailable") {
        "Video or playlist is unavailable".to_string()
    } else if lower.contains("network") || lower.contains("connection") {
        "Network error: Unable to connect to YouTube".to_string()
    } else if !stderr.is_empty() {
        stderr.to_string()
    } else {
        match code {
            Some(code) => format!("Failed to fetch playlist (exit code: {code})"),
            None => "Failed to fetch playlist (terminated)".to_string(),
        }
    };
    Error::NetworkOrSource { message }
}

/// List the entries of `url` without downloading anything
pub async fn fetch_playlist(tool: &YtDlp, url: &str) -> Result<Playlist> {
    let invocation = tool.listing_invocation(url);
    let output = invocation
        .command()
        .output()
        .await
        .map_err(|e| Error::from_spawn(e, tool.name()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(url, status = %output.status, "playlist listing failed");
        return Err(classify_failure(&stderr, output.status.code()));
    }

    let playlist = parse_listing(&String::from_utf8_lossy(&output.stdout));
    if playlist.is_empty() {
        return Err(Error::EmptyPlaylist);
    }
    info!(url, title = %playlist.title, count = playlist.len(), "playlist loaded");
    Ok(playlist)
}
