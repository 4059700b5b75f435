//! Playlist downloader built around yt-dlp
//!
//! The crate lists a playlist with one blocking call to yt-dlp, then runs one
//! yt-dlp process per entry and tracks them with [`JobTracker`]: progress
//! extraction, throttled UI updates, cooperative cancellation and outcome
//! classification. Both front ends (`playlist-downloader`, the egui app, and
//! `playlist-cli`) are thin layers over this library.

pub mod config;
pub mod downloader;
pub mod error;
pub mod logging;
pub mod model;
pub mod playlist;
pub mod progress;
pub mod selection;
pub mod tool;
pub mod tracker;
pub mod validation;

pub use config::Config;
pub use error::{Error, Result};
pub use model::{DownloadTask, JobPhase, JobUpdate, Outcome, UpdateSink};
pub use playlist::{Playlist, PlaylistEntry, fetch_playlist};
pub use tool::{DownloadOptions, Invocation, YtDlp};
pub use tracker::JobTracker;
