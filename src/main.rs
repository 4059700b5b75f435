//! Main application for the Playlist Downloader GUI

// Thumbnail fetching module
mod thumbnail;

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

// eframe/egui for GUI application framework
use eframe::{App, Frame, egui};
use egui::{ColorImage, TextureOptions, Visuals};
// FileDialog for folder selection dialogs
use rfd::FileDialog;
use tokio::runtime::Runtime;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing::{error, warn};

use playlist_downloader::validation::validate_url;
use playlist_downloader::{
    Config, DownloadOptions, DownloadTask, Error, JobPhase, JobTracker, JobUpdate, Playlist,
    UpdateSink, YtDlp, fetch_playlist, logging,
};

/// Program entry point: initializes logging and the runtime, then launches the GUI
fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_tracing("playlist_downloader=info");

    let (config, config_error) = match Config::discover(None) {
        Ok(config) => (config, None),
        Err(e) => {
            error!(error = %e, "invalid configuration, falling back to defaults");
            (Config::default(), Some(e.to_string()))
        }
    };

    // Runtime for download workers, playlist fetches and thumbnails; owned by the app
    let runtime = Runtime::new()?;

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([800.0, 600.0]),
        ..Default::default()
    };
    eframe::run_native(
        "Playlist Downloader",
        options,
        Box::new(move |cc| Box::new(PlaylistApp::new(cc, config, runtime, config_error))),
    )?;
    Ok(())
}

/// Applies tracker updates to the matching rows
struct Rows<'a>(&'a mut [DownloadTask]);

impl UpdateSink for Rows<'_> {
    fn publish(&mut self, update: JobUpdate) {
        for task in self.0.iter_mut().filter(|t| t.url == update.identifier) {
            task.apply(&update);
        }
    }
}

/// Row button presses, applied after the list is drawn
enum RowAction {
    Download(String),
    Cancel(String),
}

/// Application state for the GUI
struct PlaylistApp {
    config: Config,
    runtime: Runtime,
    /// `None` when yt-dlp could not be found
    tool: Option<YtDlp>,
    /// Shown in red above everything else; set when the tool is missing
    tool_error: Option<String>,
    /// Input field for the playlist URL
    url_input: String,
    /// Destination folder for downloads
    download_folder: String,
    /// General status line (fetching, ready, errors)
    status: String,
    /// One row per playlist entry
    downloads: Vec<DownloadTask>,
    tracker: JobTracker,
    /// In-flight playlist fetch
    fetch: Option<oneshot::Receiver<playlist_downloader::Result<Playlist>>>,
    /// Rows waiting to be started by "Download All"
    pending_starts: VecDeque<String>,
    next_start: Instant,
    last_poll: Option<Instant>,
    cancelling_all: bool,
    /// Cached textures for video thumbnails, keyed by entry URL
    thumbnails: HashMap<String, egui::TextureHandle>,
    /// Incoming thumbnail fetch results (entry URL, image)
    thumbnail_results: Arc<Mutex<Vec<(String, ColorImage)>>>,
}

impl PlaylistApp {
    fn new(
        cc: &eframe::CreationContext<'_>,
        config: Config,
        runtime: Runtime,
        config_error: Option<String>,
    ) -> Self {
        // Use dark theme visuals
        cc.egui_ctx.set_visuals(Visuals::dark());

        let (tool, tool_error) = match YtDlp::locate(&config.tool) {
            Ok(tool) => (Some(tool), None),
            Err(e) => {
                warn!(error = %e, "yt-dlp unavailable");
                (None, Some(e.to_string()))
            }
        };

        let ctx = cc.egui_ctx.clone();
        let tracker = JobTracker::new(runtime.handle().clone(), config.tracker.clone())
            .with_wakeup(move || ctx.request_repaint());

        let status = match config_error {
            Some(e) => format!("Using default settings: {e}"),
            None => "Paste a playlist URL and click 'Load Playlist'.".to_string(),
        };

        Self {
            url_input: String::new(),
            download_folder: config.download.download_dir.display().to_string(),
            status,
            downloads: Vec::new(),
            tracker,
            fetch: None,
            pending_starts: VecDeque::new(),
            next_start: Instant::now(),
            last_poll: None,
            cancelling_all: false,
            thumbnails: HashMap::new(),
            thumbnail_results: Arc::new(Mutex::new(Vec::new())),
            tool,
            tool_error,
            runtime,
            config,
        }
    }

    fn mark_tool_missing(&mut self, error: &Error) {
        self.tool_error = Some(error.to_string());
        self.tool = None;
        self.pending_starts.clear();
    }

    fn start_fetch(&mut self, ctx: &egui::Context) {
        let Some(tool) = self.tool.clone() else {
            return;
        };
        let url = match validate_url(&self.url_input) {
            Ok((url, _)) => url.to_string(),
            Err(e) => {
                self.status = e.to_string();
                return;
            }
        };

        self.status = "Fetching playlist titles...".to_string();
        self.downloads.clear();
        let (tx, rx) = oneshot::channel();
        let ctx = ctx.clone();
        self.runtime.spawn(async move {
            let result = fetch_playlist(&tool, &url).await;
            let _ = tx.send(result);
            ctx.request_repaint();
        });
        self.fetch = Some(rx);
    }

    fn poll_fetch(&mut self, ctx: &egui::Context) {
        let Some(rx) = self.fetch.as_mut() else {
            return;
        };
        let result = match rx.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => return,
            Err(TryRecvError::Closed) => Err(Error::NetworkOrSource {
                message: "playlist fetch stopped unexpectedly".to_string(),
            }),
        };
        self.fetch = None;

        match result {
            Ok(playlist) => self.show_playlist(playlist, ctx),
            Err(e) if e.is_tool_not_found() => {
                self.status = "Failed to fetch playlist.".to_string();
                self.mark_tool_missing(&e);
            }
            Err(e) => self.status = format!("Failed to fetch playlist: {e}"),
        }
    }

    fn show_playlist(&mut self, playlist: Playlist, ctx: &egui::Context) {
        self.status = format!(
            "{}: found {} videos. Ready to download.",
            playlist.title,
            playlist.len()
        );
        self.downloads = playlist
            .entries
            .into_iter()
            .map(|entry| {
                let mut task = DownloadTask::new(entry.title, entry.url);
                task.video_id = entry.id;
                task.thumbnail = entry.thumbnail;
                task
            })
            .collect();

        if !self.config.ui.thumbnails {
            return;
        }
        // Spawn thumbnail fetches in blocking tasks
        for task in &self.downloads {
            if self.thumbnails.contains_key(&task.url) {
                continue;
            }
            let key = task.url.clone();
            let thumbnail_url = task.thumbnail.clone();
            let video_id = task.video_id.clone();
            let results = Arc::clone(&self.thumbnail_results);
            let ctx = ctx.clone();
            self.runtime.spawn_blocking(move || {
                if let Some(img) =
                    thumbnail::fetch_thumbnail(thumbnail_url.as_deref(), video_id.as_deref())
                {
                    if let Ok(mut pending) = results.lock() {
                        pending.push((key, img));
                    }
                    ctx.request_repaint();
                }
            });
        }
    }

    fn start_download(&mut self, url: &str) {
        let Some(audio_only) = self
            .downloads
            .iter()
            .find(|t| t.url == url)
            .map(|t| t.audio_only)
        else {
            return;
        };
        let Some(tool) = &self.tool else {
            return;
        };

        let mut options = DownloadOptions::from_config(&self.config.download, audio_only);
        options.output_dir = PathBuf::from(&self.download_folder);
        let invocation = tool.download_invocation(url, &options);

        match self.tracker.start(url, &invocation) {
            Ok(update) => Rows(&mut self.downloads).publish(update),
            Err(e) => {
                for task in self.downloads.iter_mut().filter(|t| t.url == url) {
                    task.reject(e.to_string());
                }
                if e.is_tool_not_found() {
                    self.mark_tool_missing(&e);
                }
            }
        }
    }

    fn download_all(&mut self) {
        self.pending_starts = self
            .downloads
            .iter()
            .filter(|t| !t.is_active() && t.phase != Some(JobPhase::Completed))
            .map(|t| t.url.clone())
            .collect();
        self.next_start = Instant::now();
    }

    fn cancel_all(&mut self) {
        self.pending_starts.clear();
        if self.tracker.has_active_jobs() {
            self.status = "Cancelling all downloads...".to_string();
            self.cancelling_all = true;
        }
        self.tracker.cancel_all(&mut Rows(&mut self.downloads));
    }

    /// Poll the tracker on the configured cadence and start staggered downloads
    fn drive_jobs(&mut self) {
        let now = Instant::now();
        let poll_interval = self.config.ui.poll_interval;
        if self
            .last_poll
            .is_none_or(|at| now.duration_since(at) >= poll_interval)
        {
            self.tracker.poll_all(&mut Rows(&mut self.downloads));
            self.last_poll = Some(now);
        }

        if now >= self.next_start {
            if let Some(url) = self.pending_starts.pop_front() {
                self.start_download(&url);
                self.next_start = now + self.config.ui.start_stagger;
            }
        }

        if self.cancelling_all && !self.tracker.has_active_jobs() {
            self.cancelling_all = false;
            self.status = "All downloads finished or cancelled.".to_string();
        }
    }
}

/// GUI update loop: called each frame to redraw and handle interactions
impl App for PlaylistApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut Frame) {
        // 1. Playlist fetch result, tracker poll, staggered starts
        self.poll_fetch(ctx);
        self.drive_jobs();

        // 2. Handle completed thumbnail fetches
        if let Ok(mut pending) = self.thumbnail_results.lock() {
            for (key, img) in pending.drain(..) {
                // Load image into egui texture and cache it
                let tex = ctx.load_texture(&key, img, TextureOptions::default());
                self.thumbnails.insert(key, tex);
            }
        }

        // 3. Top panel: URL input, folder selection and status
        let mut load_clicked = false;
        egui::TopBottomPanel::top("controls").show(ctx, |ui| {
            ui.heading("Playlist Downloader");
            ui.horizontal(|ui| {
                ui.label("Playlist URL:");
                ui.text_edit_singleline(&mut self.url_input);
                let can_load = self.tool.is_some()
                    && self.fetch.is_none()
                    && !self.tracker.has_active_jobs();
                if ui
                    .add_enabled(can_load, egui::Button::new("Load Playlist"))
                    .clicked()
                {
                    load_clicked = true;
                }
            });
            ui.horizontal(|ui| {
                ui.label(format!("Save to: {}", self.download_folder));
                if ui.button("Change Folder").clicked() {
                    if let Some(folder) = FileDialog::new()
                        .set_directory(&self.download_folder)
                        .pick_folder()
                    {
                        self.download_folder = folder.display().to_string();
                    }
                }
            });
            if let Some(err) = &self.tool_error {
                ui.colored_label(egui::Color32::RED, err);
            }
            ui.label(&self.status);
        });
        if load_clicked {
            self.start_fetch(ctx);
        }

        // 4. Bottom panel: bulk actions
        let mut download_all = false;
        let mut cancel_all = false;
        egui::TopBottomPanel::bottom("bulk_actions").show(ctx, |ui| {
            ui.horizontal(|ui| {
                let active = self.tracker.has_active_jobs();
                let starting = !self.pending_starts.is_empty();
                let can_download_all =
                    self.tool.is_some() && !active && !starting && !self.downloads.is_empty();
                if ui
                    .add_enabled(can_download_all, egui::Button::new("Download All"))
                    .clicked()
                {
                    download_all = true;
                }
                let cancel_button = egui::Button::new("Cancel All").fill(egui::Color32::DARK_RED);
                if ui.add_enabled(active || starting, cancel_button).clicked() {
                    cancel_all = true;
                }
            });
        });
        if download_all {
            self.download_all();
        }
        if cancel_all {
            self.cancel_all();
        }

        // 5. Central panel: one row per playlist entry
        let mut actions = Vec::new();
        let can_start = self.tool.is_some();
        egui::CentralPanel::default().show(ctx, |ui| {
            egui::ScrollArea::vertical()
                .auto_shrink([false; 2])
                .show(ui, |ui| {
                    for task in &mut self.downloads {
                        let active = task.is_active();
                        ui.group(|ui| {
                            ui.horizontal(|ui| {
                                // Show thumbnail if available
                                if let Some(tex) = self.thumbnails.get(&task.url) {
                                    ui.add(egui::Image::from_texture(tex).max_width(120.0));
                                }
                                ui.vertical(|ui| {
                                    ui.label(&task.title);
                                    ui.label(&task.status_text);
                                    ui.add(egui::ProgressBar::new(task.progress).show_percentage());
                                    ui.horizontal(|ui| {
                                        ui.add_enabled(
                                            !active,
                                            egui::Checkbox::new(&mut task.audio_only, "MP3"),
                                        );
                                        if ui
                                            .add_enabled(
                                                can_start && !active,
                                                egui::Button::new("Download"),
                                            )
                                            .clicked()
                                        {
                                            actions.push(RowAction::Download(task.url.clone()));
                                        }
                                        let cancel = egui::Button::new("Cancel")
                                            .fill(egui::Color32::DARK_RED);
                                        if ui.add_enabled(active, cancel).clicked() {
                                            actions.push(RowAction::Cancel(task.url.clone()));
                                        }
                                        // When done, provide a shortcut to the folder
                                        if task.phase == Some(JobPhase::Completed)
                                            && ui.button("Open Folder").clicked()
                                        {
                                            open_folder(Path::new(&self.download_folder));
                                        }
                                    });
                                });
                            });
                        });
                    }
                });
        });

        for action in actions {
            match action {
                RowAction::Download(url) => self.start_download(&url),
                RowAction::Cancel(url) => {
                    self.tracker.cancel(&url, &mut Rows(&mut self.downloads));
                }
            }
        }

        // Request periodic repaint for progress updates
        ctx.request_repaint_after(self.config.ui.poll_interval);
    }
}

/// Open `folder` in the platform's file manager without blocking the UI
fn open_folder(folder: &Path) {
    let folder = folder.to_path_buf();
    std::thread::spawn(move || {
        #[cfg(target_os = "windows")]
        let opener = "explorer";
        #[cfg(target_os = "macos")]
        let opener = "open";
        #[cfg(all(unix, not(target_os = "macos")))]
        let opener = "xdg-open";

        if let Err(e) = std::process::Command::new(opener).arg(&folder).spawn() {
            warn!(folder = %folder.display(), error = %e, "could not open folder");
        }
    });
}
