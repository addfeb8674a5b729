// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use console::Emoji;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use podshelf::{
    Config, JsonFileIndex, NoopReporter, ProgressEvent, ProgressReporter, ReqwestClient,
    ScanOptions, ScanReport, Scanner, SharedProgressReporter,
};

// Emoji with fallback for terminals without Unicode support
static MICROPHONE: Emoji<'_, '_> = Emoji("🎙️  ", "");
static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[~] ");
static HEADPHONES: Emoji<'_, '_> = Emoji("🎧 ", "[i] ");
static DOWNLOAD: Emoji<'_, '_> = Emoji("📥 ", "[v] ");
static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "[+] ");
static FAILURE: Emoji<'_, '_> = Emoji("❌ ", "[!] ");
static WARNING: Emoji<'_, '_> = Emoji("⚠️  ", "[?] ");
static PARTY: Emoji<'_, '_> = Emoji("🎉 ", "[*] ");
static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");
static CROSS: Emoji<'_, '_> = Emoji("✗ ", "x ");

/// Archive podcast episodes from RSS feeds into a tagged library
#[derive(Parser, Debug)]
#[command(name = "podshelf")]
#[command(about = "Archive podcast episodes from RSS feeds into a tagged library")]
#[command(version)]
struct Args {
    /// Configuration file listing the archive root and subscribed feeds
    #[arg(long, default_value = "podshelf.toml")]
    config: PathBuf,

    /// Maximum number of concurrent episode pipelines (overrides config)
    #[arg(short = 'c', long)]
    concurrent: Option<usize>,

    /// Maximum number of new episodes per feed (overrides config)
    #[arg(short, long)]
    limit: Option<usize>,

    /// Quiet mode - suppress progress output
    #[arg(short, long)]
    quiet: bool,

    /// Log debug detail to stderr
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,
}

/// Progress reporter using indicatif for terminal output
struct IndicatifReporter {
    multi: MultiProgress,
    bars: Mutex<HashMap<usize, ProgressBar>>,
    main_bar: ProgressBar,
}

impl IndicatifReporter {
    fn new() -> Self {
        let multi = MultiProgress::new();

        let main_bar = multi.add(ProgressBar::new_spinner());
        if let Ok(style) = ProgressStyle::default_bar().template("{spinner:.green} {wide_msg}") {
            main_bar.set_style(style);
        }
        main_bar.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            multi,
            bars: Mutex::new(HashMap::new()),
            main_bar,
        }
    }

    fn get_or_create_bar(&self, download_id: usize) -> ProgressBar {
        let Ok(mut bars) = self.bars.lock() else {
            return ProgressBar::hidden();
        };

        if let Some(bar) = bars.get(&download_id) {
            return bar.clone();
        }

        let bar = self.multi.add(ProgressBar::new(0));
        if let Ok(style) = ProgressStyle::default_bar().template(&format!(
            "  {DOWNLOAD}[{{bar:30.cyan/blue}}] {{bytes}}/{{total_bytes}} {{wide_msg}}"
        )) {
            bar.set_style(style.progress_chars("█▓░"));
        }
        bars.insert(download_id, bar.clone());
        bar
    }

    fn take_bar(&self, download_id: usize) -> Option<ProgressBar> {
        self.bars.lock().ok()?.remove(&download_id)
    }
}

impl ProgressReporter for IndicatifReporter {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::FetchingFeed { url } => {
                self.main_bar
                    .set_message(format!("{SEARCH}Fetching feed: {}", url.cyan()));
            }

            ProgressEvent::FeedParsed {
                feed_title,
                series_count,
                total_episodes,
                new_episodes,
                ..
            } => {
                self.main_bar.println(format!(
                    "{HEADPHONES}{} • {} series, {} episodes total, {} new",
                    feed_title.bold().green(),
                    series_count.to_string().cyan(),
                    total_episodes.to_string().cyan(),
                    new_episodes.to_string().yellow()
                ));
            }

            ProgressEvent::FeedFailed { url, error } => {
                self.main_bar
                    .println(format!("{FAILURE}{} - {}", url.red(), error.red()));
            }

            ProgressEvent::StaleFilesCleanedUp { count } => {
                self.main_bar.println(format!(
                    "{FOLDER}Removed {} stale temporary files",
                    count.to_string().yellow()
                ));
            }

            ProgressEvent::StageChanged {
                download_id,
                episode_title,
                stage,
            } => {
                let bar = self.get_or_create_bar(download_id);
                bar.set_message(format!(
                    "{} {}",
                    truncate_title(&episode_title, 40),
                    format!("({stage})").dimmed()
                ));
            }

            ProgressEvent::DownloadStarting {
                download_id,
                episode_title,
                episode_index,
                total_to_download,
                content_length,
                resumed_from,
            } => {
                let bar = self.get_or_create_bar(download_id);
                bar.set_length(content_length.unwrap_or(0));
                bar.set_position(resumed_from);
                bar.set_message(format!(
                    "[{}/{}] {}",
                    (episode_index + 1).to_string().cyan(),
                    total_to_download.to_string().cyan(),
                    truncate_title(&episode_title, 40)
                ));
            }

            ProgressEvent::DownloadProgress {
                download_id,
                bytes_downloaded,
                total_bytes,
                ..
            } => {
                let bar = self.get_or_create_bar(download_id);
                if let Some(total) = total_bytes {
                    bar.set_length(total);
                }
                bar.set_position(bytes_downloaded);
            }

            ProgressEvent::DownloadCompleted {
                download_id,
                bytes_downloaded,
                ..
            } => {
                self.get_or_create_bar(download_id)
                    .set_position(bytes_downloaded);
            }

            ProgressEvent::EpisodeArchived {
                download_id,
                episode_title,
                ..
            } => {
                if let Some(bar) = self.take_bar(download_id) {
                    bar.finish_and_clear();
                }
                self.main_bar.println(format!(
                    "  {SUCCESS}{}",
                    truncate_title(&episode_title, 60).green()
                ));
            }

            ProgressEvent::EpisodeFailed {
                download_id,
                episode_title,
                error,
            } => {
                if let Some(bar) = self.take_bar(download_id) {
                    bar.finish_and_clear();
                }
                self.main_bar.println(format!(
                    "  {FAILURE}{} - {}",
                    truncate_title(&episode_title, 30).red(),
                    error.red()
                ));
            }

            ProgressEvent::Warning { message } => {
                self.main_bar
                    .println(format!("  {WARNING}{}", message.yellow()));
            }

            ProgressEvent::ScanCompleted { .. } => {
                self.main_bar.finish_and_clear();
            }
        }
    }
}

fn truncate_title(title: &str, max_len: usize) -> String {
    if title.chars().count() <= max_len {
        title.to_string()
    } else {
        let kept: String = title.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

/// Log to stderr, honouring RUST_LOG over the verbosity flag
fn init_logging(verbose: bool, quiet: bool) {
    let default_level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("podshelf={default_level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn print_summary(report: &ScanReport, archive_root: &std::path::Path) {
    let summary = &report.summary;
    println!(
        "\n{PARTY}{} {} archived, {} skipped, {} deferred, {} failed, {} cancelled",
        "Scan complete:".bold().green(),
        summary.episodes_succeeded.to_string().green().bold(),
        summary.episodes_skipped.to_string().yellow(),
        summary.episodes_deferred.to_string().yellow(),
        if summary.episodes_failed > 0 {
            summary.episodes_failed.to_string().red().bold()
        } else {
            summary.episodes_failed.to_string().green()
        },
        summary.episodes_cancelled.to_string().yellow(),
    );

    if summary.feeds_failed > 0 {
        println!(
            "{} of {} feeds could not be read",
            summary.feeds_failed.to_string().red().bold(),
            (summary.feeds_failed + summary.feeds_processed).to_string().cyan()
        );
    }

    if !report.failed.is_empty() {
        println!("\n{}", "Failed episodes:".red().bold());
        for failed in &report.failed {
            println!(
                "  {}{} - {}",
                CROSS,
                failed.title.yellow(),
                failed.error.dimmed()
            );
        }
    }

    println!(
        "\n{FOLDER}Archive: {}\n",
        archive_root.display().to_string().cyan()
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config {}", args.config.display()))?;
    if let Some(workers) = args.concurrent {
        config.workers = workers.max(1);
    }
    if args.limit.is_some() {
        config.limit = args.limit;
    }

    if !args.quiet {
        println!(
            "\n{}{} {}\n",
            MICROPHONE,
            "podshelf".bold().magenta(),
            "- Podcast Archiver".dimmed()
        );
    }

    let index_path = config.index_path();
    let index = JsonFileIndex::open(&index_path)
        .with_context(|| format!("Failed to open index {}", index_path.display()))?;

    let reporter: SharedProgressReporter = if args.quiet {
        NoopReporter::shared()
    } else {
        Arc::new(IndicatifReporter::new())
    };

    let scanner = Scanner::new(
        ReqwestClient::new(),
        Arc::new(index),
        ScanOptions::from_config(&config),
    )
    .with_reporter(reporter);

    let cancel = scanner.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, finishing in-flight work");
            cancel.cancel();
        }
    });

    info!(feeds = config.feeds.len(), root = %config.archive_root.display(), "starting scan");
    let report = scanner
        .scan(&config.feeds)
        .await
        .context("Scan aborted")?;

    if !args.quiet {
        print_summary(&report, &config.archive_root);
    }

    if report.summary.all_failed() {
        std::process::exit(1);
    }

    Ok(())
}
