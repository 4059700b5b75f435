//! Terminal front end: list a playlist, pick entries, download them

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::runtime::Handle;
use tracing::warn;

use playlist_downloader::selection::parse_selection;
use playlist_downloader::validation::validate_url;
use playlist_downloader::{
    Config, DownloadOptions, JobPhase, JobTracker, JobUpdate, PlaylistEntry, Result,
    UpdateSink, YtDlp, fetch_playlist, logging,
};

/// Output template for downloads started from the terminal
const OUTPUT_TEMPLATE: &str = "%(title)s [%(id)s].%(ext)s";

const INSTALL_ADVICE: &str =
    "Please install it (e.g., 'pip install yt-dlp') and ensure it's accessible.";

#[derive(Debug, Parser)]
#[command(
    name = "playlist-cli",
    version,
    about = "Download videos from a YouTube playlist with yt-dlp"
)]
struct Cli {
    /// Playlist or video URL. Prompted for interactively when omitted.
    url: Option<String>,

    /// JSON configuration file (defaults to $PLAYLIST_DOWNLOADER_CONFIG)
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Download directory, overriding the configuration
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Videos to download, e.g. "1, 5, 8-10" or "all". Prompted for when omitted.
    #[arg(short = 's', long = "select")]
    select: Option<String>,

    /// Extract audio instead of keeping the video
    #[arg(long = "audio")]
    audio: bool,

    /// yt-dlp output template, relative to the download directory
    #[arg(long = "template", default_value = OUTPUT_TEMPLATE)]
    template: String,

    /// Number of downloads to run at the same time
    #[arg(short = 'j', long = "jobs", default_value_t = 1)]
    jobs: usize,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_tracing("playlist_downloader=warn,playlist_cli=warn");

    let mut config = match Config::discover(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(dir) = &cli.output {
        config.download.download_dir = dir.clone();
    }
    config.download.output_template = cli.template.clone();

    // Pre-run check: the tool must exist and answer --version
    let tool = match check_tool(&config).await {
        Ok(tool) => tool,
        Err(e) => {
            eprintln!("Error: {e}");
            if e.is_tool_not_found() {
                eprintln!("{INSTALL_ADVICE}");
            }
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = std::fs::create_dir_all(&config.download.download_dir) {
        eprintln!(
            "Error: cannot create {}: {e}",
            config.download.download_dir.display()
        );
        return ExitCode::FAILURE;
    }

    println!("=============================================");
    println!("=      YouTube Playlist Downloader (CLI)    =");
    println!("=============================================");

    let mut session = Session {
        options: DownloadOptions::from_config(&config.download, cli.audio),
        tracker: JobTracker::new(Handle::current(), config.tracker.clone()),
        poll_interval: config.ui.poll_interval,
        select: cli.select,
        jobs: cli.jobs.max(1),
        prompt: Prompt::new(),
        quit: false,
        tool,
    };

    match session.run(cli.url).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e}");
            if e.is_tool_not_found() {
                eprintln!("{INSTALL_ADVICE}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn check_tool(config: &Config) -> Result<YtDlp> {
    let tool = YtDlp::locate(&config.tool)?;
    let version = tool.version().await?;
    println!("Using yt-dlp {version} ({})", tool.binary().display());
    Ok(tool)
}

/// Line reader on stdin that gives up on Ctrl-C or end of input
struct Prompt {
    lines: Lines<BufReader<Stdin>>,
}

impl Prompt {
    fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    /// `None` when the user pressed Ctrl-C or closed stdin
    async fn ask(&mut self, message: &str) -> Result<Option<String>> {
        print!("{message}");
        std::io::stdout().flush()?;
        tokio::select! {
            line = self.lines.next_line() => Ok(line?.map(|l| l.trim().to_string())),
            _ = tokio::signal::ctrl_c() => {
                println!("\n\nProgram interrupted by user. Exiting.");
                Ok(None)
            }
        }
    }
}

/// Result of asking which entries to download
enum Choice {
    Entries(Vec<usize>),
    /// `--select` did not fit the listing
    Invalid,
    Quit,
}

struct Session {
    tool: YtDlp,
    options: DownloadOptions,
    tracker: JobTracker,
    poll_interval: Duration,
    select: Option<String>,
    jobs: usize,
    prompt: Prompt,
    /// Set on Ctrl-C or end of input; ends the prompt loop
    quit: bool,
}

impl Session {
    /// Process `url`, or prompt for URLs until the user quits.
    ///
    /// Returns whether every selected download completed.
    async fn run(&mut self, url: Option<String>) -> Result<bool> {
        if let Some(url) = url {
            return self.process(&url).await;
        }

        let mut all_completed = true;
        loop {
            let Some(input) = self
                .prompt
                .ask("\nEnter YouTube Playlist URL (or 'exit' to quit): ")
                .await?
            else {
                break;
            };
            if input.eq_ignore_ascii_case("exit") {
                println!("Exiting.");
                break;
            }
            if input.is_empty() {
                continue;
            }
            match self.process(&input).await {
                Ok(completed) => all_completed &= completed,
                Err(e) if e.is_tool_not_found() => return Err(e),
                Err(e) => {
                    eprintln!("Error: {e}");
                    println!("Please check the URL and try again.");
                }
            }
            if self.quit {
                break;
            }
        }
        Ok(all_completed)
    }

    async fn process(&mut self, url: &str) -> Result<bool> {
        let (url, _) = validate_url(url)?;

        println!("\nFetching playlist info...");
        let playlist = tokio::select! {
            playlist = fetch_playlist(&self.tool, url) => playlist?,
            _ = tokio::signal::ctrl_c() => {
                println!("\n\nProgram interrupted by user. Exiting.");
                self.quit = true;
                return Ok(true);
            }
        };

        println!("\n{}", playlist.title);
        println!("------------------ Videos Found ------------------");
        for (i, entry) in playlist.entries.iter().enumerate() {
            match entry.length_label() {
                Some(length) => println!(
                    "[{:2}] {} ({}, {length})",
                    i + 1,
                    entry.title,
                    entry.uploader
                ),
                None => println!("[{:2}] {} ({})", i + 1, entry.title, entry.uploader),
            }
        }
        println!("--------------------------------------------------");

        let indices = match self.choose(playlist.len()).await? {
            Choice::Entries(indices) => indices,
            Choice::Invalid => return Ok(false),
            Choice::Quit => return Ok(true),
        };
        let selected: Vec<&PlaylistEntry> = indices
            .into_iter()
            .filter_map(|i| playlist.entries.get(i))
            .collect();
        Ok(self.download(selected).await)
    }

    async fn choose(&mut self, count: usize) -> Result<Choice> {
        if let Some(select) = &self.select {
            return Ok(match parse_selection(select, count) {
                Ok(indices) => Choice::Entries(indices),
                Err(e) => {
                    eprintln!("Error: --select: {e}");
                    Choice::Invalid
                }
            });
        }

        loop {
            let Some(input) = self
                .prompt
                .ask("\nEnter video numbers to download (e.g., 1, 5, 8-10), or 'all': ")
                .await?
            else {
                self.quit = true;
                return Ok(Choice::Quit);
            };
            if input.is_empty() {
                println!("No input received. Please try again.");
                continue;
            }
            match parse_selection(&input, count) {
                Ok(indices) => return Ok(Choice::Entries(indices)),
                Err(e) => println!("Error: {e}. Please try again."),
            }
        }
    }

    /// Run the selected downloads, at most `jobs` at a time.
    ///
    /// Ctrl-C cancels everything that is running and drops the rest.
    async fn download(&mut self, selected: Vec<&PlaylistEntry>) -> bool {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<&PlaylistEntry> = selected
            .into_iter()
            .filter(|&entry| seen.insert(entry.url.as_str()))
            .collect();
        let total = queue.len();
        println!("\n--- Starting Download of {total} Video(s) ---");

        let mut console = Console {
            titles: HashMap::new(),
            show_titles: self.jobs > 1,
            completed: 0,
            failed: 0,
            cancelled: 0,
        };
        let mut started = 0;
        let mut interrupted = false;
        let mut watch_signal = true;
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut tick = tokio::time::interval(self.poll_interval);

        loop {
            while !interrupted && self.tracker.active_count() < self.jobs {
                let Some(entry) = queue.pop_front() else {
                    break;
                };
                started += 1;
                println!("\n[{started}/{total}] Downloading: {}", entry.title);
                console.titles.insert(entry.url.clone(), entry.title.clone());

                let invocation = self.tool.download_invocation(&entry.url, &self.options);
                match self.tracker.start(&entry.url, &invocation) {
                    Ok(update) => console.publish(update),
                    Err(e) => {
                        eprintln!("✘ Error downloading '{}': {e}", entry.title);
                        console.failed += 1;
                        if e.is_tool_not_found() {
                            eprintln!("{INSTALL_ADVICE}");
                            queue.clear();
                        }
                    }
                }
            }

            if !self.tracker.has_active_jobs() && (interrupted || queue.is_empty()) {
                break;
            }

            tokio::select! {
                _ = tick.tick() => self.tracker.poll_all(&mut console),
                result = &mut ctrl_c, if watch_signal => {
                    watch_signal = false;
                    match result {
                        Ok(()) => {
                            println!("\n\nInterrupted, cancelling downloads...");
                            interrupted = true;
                            self.quit = true;
                            queue.clear();
                            self.tracker.cancel_all(&mut console);
                        }
                        Err(e) => warn!(error = %e, "cannot listen for Ctrl-C"),
                    }
                }
            }
        }

        println!(
            "\n--- Finished: {} completed, {} failed, {} cancelled ---",
            console.completed, console.failed, console.cancelled
        );
        console.completed == total
    }
}

/// Prints job updates as they arrive
struct Console {
    titles: HashMap<String, String>,
    /// Prefix progress lines with the title when jobs overlap
    show_titles: bool,
    completed: usize,
    failed: usize,
    cancelled: usize,
}

impl UpdateSink for Console {
    fn publish(&mut self, update: JobUpdate) {
        let title = self
            .titles
            .get(&update.identifier)
            .map_or(update.identifier.as_str(), String::as_str);
        match update.phase {
            JobPhase::Queued => {}
            JobPhase::Downloading if self.show_titles => {
                println!("  {title}: {}", update.status_text);
            }
            JobPhase::Downloading => println!("  {}", update.status_text),
            JobPhase::Cancelling => println!("  Cancelling '{title}'..."),
            JobPhase::Completed => {
                println!("✔ Successfully downloaded '{title}'.");
                self.completed += 1;
            }
            JobPhase::Failed => {
                eprintln!("✘ Error downloading '{title}'. {}", update.status_text);
                self.failed += 1;
            }
            JobPhase::Cancelled => {
                println!("- Cancelled '{title}'.");
                self.cancelled += 1;
            }
        }
    }
}
