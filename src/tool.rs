//! Locating yt-dlp and building its argument vectors
//!
//! Every invocation is a literal argument vector handed to the OS. Nothing is
//! ever joined into a shell string, and the target URL always comes last,
//! after a `--` so it cannot be mistaken for an option.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::config::{DownloadConfig, ToolConfig};
use crate::error::{Error, Result};

/// A fully specified external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: PathBuf,
    args: Vec<OsString>,
}

impl Invocation {
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Command with stdin closed and both output streams piped
    pub(crate) fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

/// Per-download choices
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub output_dir: PathBuf,
    pub output_template: String,
    /// `Some(format)` extracts audio in that format
    pub audio_format: Option<String>,
}

impl DownloadOptions {
    pub fn from_config(config: &DownloadConfig, audio_only: bool) -> Self {
        Self {
            output_dir: config.download_dir.clone(),
            output_template: config.output_template.clone(),
            audio_format: audio_only.then(|| config.audio_format.clone()),
        }
    }
}

/// A resolved yt-dlp executable
#[derive(Debug, Clone)]
pub struct YtDlp {
    binary: PathBuf,
    extra_args: Vec<String>,
}

impl YtDlp {
    /// Use an explicit binary path without searching
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            extra_args: Vec::new(),
        }
    }

    /// Options inserted before the mode flags of every invocation
    pub fn with_extra_args(mut self, extra_args: Vec<String>) -> Self {
        self.extra_args = extra_args;
        self
    }

    /// Resolve the configured program on the search path.
    ///
    /// Uses `config.search_path` when set, otherwise the inherited `PATH`.
    /// Empty entries are ignored, so a blank search path finds nothing. A
    /// program given as a path is checked directly.
    pub fn locate(config: &ToolConfig) -> Result<Self> {
        let cwd = std::env::current_dir()?;
        Self::locate_in(config, &cwd)
    }

    pub(crate) fn locate_in(config: &ToolConfig, cwd: &Path) -> Result<Self> {
        let not_found = || Error::ToolNotFound {
            tool: config.program.clone(),
        };
        let search_path: OsString = match &config.search_path {
            Some(path) => path.trim().into(),
            None => std::env::var_os("PATH").unwrap_or_default(),
        };
        // an empty entry would mean the current directory
        let dirs: Vec<PathBuf> = std::env::split_paths(&search_path)
            .filter(|dir| !dir.as_os_str().is_empty())
            .collect();
        let is_path = Path::new(&config.program).components().count() > 1;
        if dirs.is_empty() && !is_path {
            tracing::debug!(program = %config.program, "search path is empty");
            return Err(not_found());
        }
        let search_path = std::env::join_paths(dirs).map_err(|err| {
            tracing::debug!(error = %err, "search path cannot be joined");
            not_found()
        })?;

        let binary = which::which_in(&config.program, Some(search_path), cwd).map_err(|err| {
            tracing::debug!(program = %config.program, error = %err, "tool lookup failed");
            not_found()
        })?;
        tracing::debug!(binary = %binary.display(), "resolved external tool");
        Ok(Self::new(binary).with_extra_args(config.extra_args.clone()))
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Run `--version` to make sure the binary actually works
    pub async fn version(&self) -> Result<String> {
        let output = Command::new(&self.binary)
            .args(&self.extra_args)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::from_spawn(e, self.name()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::ToolBroken {
                tool: self.name(),
                message: match stderr.trim() {
                    "" => format!("--version exited with {}", output.status),
                    msg => msg.to_string(),
                },
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Flat JSON listing of a playlist (one object per line)
    pub fn listing_invocation(&self, url: &str) -> Invocation {
        let mut args = self.base_args();
        args.extend(["--flat-playlist", "-j", "--no-warnings", "--"].map(OsString::from));
        args.push(url.into());
        Invocation::new(&self.binary, args)
    }

    /// Download of a single entry with one progress line per update
    pub fn download_invocation(&self, url: &str, options: &DownloadOptions) -> Invocation {
        let mut args = self.base_args();
        args.extend(["--progress", "--newline", "-o"].map(OsString::from));
        args.push(options.output_dir.join(&options.output_template).into_os_string());
        if let Some(format) = &options.audio_format {
            args.extend(["--extract-audio", "--audio-format"].map(OsString::from));
            args.push(format.into());
            args.push("--no-playlist".into());
        }
        args.push("--".into());
        args.push(url.into());
        Invocation::new(&self.binary, args)
    }

    pub(crate) fn name(&self) -> String {
        self.binary
            .file_name()
            .unwrap_or_else(|| OsStr::new("yt-dlp"))
            .to_string_lossy()
            .into_owned()
    }

    fn base_args(&self) -> Vec<OsString> {
        self.extra_args.iter().map(OsString::from).collect()
    }
}
