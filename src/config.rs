//! Configuration types for the playlist downloader
//!
//! Every field has a default, so an empty JSON object (or no file at all)
//! yields a working configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Environment variable naming a JSON config file
pub const CONFIG_ENV: &str = "PLAYLIST_DOWNLOADER_CONFIG";

/// Top-level configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tool: ToolConfig,

    #[serde(default)]
    pub download: DownloadConfig,

    #[serde(default)]
    pub tracker: TrackerConfig,

    #[serde(default)]
    pub ui: UiConfig,
}

/// How the external tool is found and invoked
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Executable name or path (default: "yt-dlp")
    #[serde(default = "default_program")]
    pub program: String,

    /// Search path used instead of `PATH` (None = inherit `PATH`)
    ///
    /// An empty string leaves nothing to search, which is how a missing tool
    /// is simulated.
    #[serde(default)]
    pub search_path: Option<String>,

    /// Options passed before the mode flags on every invocation
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            search_path: None,
            extra_args: Vec::new(),
        }
    }
}

/// Where and how files are written
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Download directory (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// yt-dlp output template relative to `download_dir`
    #[serde(default = "default_output_template")]
    pub output_template: String,

    /// Audio format used for audio-only downloads (default: "mp3")
    #[serde(default = "default_audio_format")]
    pub audio_format: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            output_template: default_output_template(),
            audio_format: default_audio_format(),
        }
    }
}

/// Job tracker tuning
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Minimum time between two visible updates of the same job (default: 100 ms)
    #[serde(
        default = "default_update_interval",
        rename = "update_interval_ms",
        with = "millis_serde"
    )]
    pub update_interval: Duration,

    /// Output lines retained per job for failure messages (default: 20)
    #[serde(default = "default_tail_capacity")]
    pub tail_capacity: usize,

    /// Time a cancelled process gets to exit before it is killed (default: 5 s)
    #[serde(
        default = "default_cancel_grace",
        rename = "cancel_grace_secs",
        with = "secs_serde"
    )]
    pub cancel_grace: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            update_interval: default_update_interval(),
            tail_capacity: default_tail_capacity(),
            cancel_grace: default_cancel_grace(),
        }
    }
}

/// Front-end cadence
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UiConfig {
    /// How often the tracker is polled (default: 250 ms)
    #[serde(
        default = "default_poll_interval",
        rename = "poll_interval_ms",
        with = "millis_serde"
    )]
    pub poll_interval: Duration,

    /// Delay between starts when downloading everything (default: 200 ms)
    #[serde(
        default = "default_start_stagger",
        rename = "start_stagger_ms",
        with = "millis_serde"
    )]
    pub start_stagger: Duration,

    /// Fetch and show thumbnails in the desktop front end
    #[serde(default = "default_true")]
    pub thumbnails: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            start_stagger: default_start_stagger(),
            thumbnails: true,
        }
    }
}

impl Config {
    /// Read a JSON config file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else the file named by [`CONFIG_ENV`], else defaults
    pub fn discover(path: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        match path.map(Path::to_path_buf).or(from_env) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading configuration");
                Self::load(&path)
            }
            None => Ok(Self::default()),
        }
    }

    /// Reject values the tracker or front ends cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.tool.program.trim().is_empty() {
            return Err(config_error("program must not be empty", "tool.program"));
        }
        if self.download.output_template.trim().is_empty() {
            return Err(config_error(
                "output template must not be empty",
                "download.output_template",
            ));
        }
        if self.tracker.tail_capacity == 0 {
            return Err(config_error(
                "at least one output line must be retained",
                "tracker.tail_capacity",
            ));
        }
        if self.ui.poll_interval.is_zero() {
            return Err(config_error(
                "poll interval must be positive",
                "ui.poll_interval_ms",
            ));
        }
        Ok(())
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

fn default_program() -> String {
    "yt-dlp".to_string()
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_output_template() -> String {
    "%(title)s.%(ext)s".to_string()
}

fn default_audio_format() -> String {
    "mp3".to_string()
}

fn default_update_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_tail_capacity() -> usize {
    20
}

fn default_cancel_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_start_stagger() -> Duration {
    Duration::from_millis(200)
}

fn default_true() -> bool {
    true
}

mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod secs_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
