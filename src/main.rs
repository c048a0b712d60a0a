use anyhow::Result;
use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use mangamirror::config::Config;
use mangamirror::models::SeriesHandle;
use mangamirror::progress::{ProgressStore, VolumeState};
use mangamirror::registry::{SiteBundle, SiteRegistry};
use mangamirror::Series;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "mangamirror")]
#[command(about = "Resumable manga series mirroring tool")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "mangamirror.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init,
    /// Search the catalog by title
    Search {
        /// Title to search for
        title: String,
    },
    /// Show the volume and chapter tree of a series
    Volumes {
        /// Series URL
        url: String,
    },
    /// Mirror a series to local storage, resuming what is already there
    Download {
        /// Series URL
        url: String,
        /// Target directory (defaults to storage.base_path)
        #[arg(short, long)]
        path: Option<PathBuf>,
        /// Volume indices to mirror, as listed by `volumes` (default: all)
        #[arg(short = 'V', long = "volume")]
        volumes: Vec<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose)?;

    match cli.command {
        Commands::Init => {
            Config::default().save(&cli.config)?;
            info!("📝 Wrote default configuration to {}", cli.config);
        }
        Commands::Search { title } => {
            let (config, site) = load_site(&cli.config)?;
            run_search(&config, &site, &title).await?;
        }
        Commands::Volumes { url } => {
            let (config, site) = load_site(&cli.config)?;
            run_volumes(&config, &site, &url).await?;
        }
        Commands::Download { url, path, volumes } => {
            let (config, site) = load_site(&cli.config)?;
            run_download(&config, site, &url, path, &volumes).await?;
        }
    }

    Ok(())
}

/// Loads configuration and picks the configured site implementation.
fn load_site(config_path: &str) -> Result<(Config, SiteBundle)> {
    let config = Config::load(config_path)?;
    let registry = SiteRegistry::new(&config.site)?;
    let site = registry.get(&config.site.site_type)?;
    Ok((config, site))
}

fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(format!("mangamirror={}", level))
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .init();

    Ok(())
}

async fn run_search(config: &Config, site: &SiteBundle, title: &str) -> Result<()> {
    let results = site.searcher.search(title).await?;

    println!("🔍 Results for '{}' on {}", title, config.site.name);
    println!("{:<35} {:<25} {:<50}", "Title", "Author", "URL");
    println!("{}", "-".repeat(110));

    for result in results {
        println!("{:<35} {:<25} {:<50}", result.name, result.author, result.url);
    }

    Ok(())
}

async fn run_volumes(config: &Config, site: &SiteBundle, url: &str) -> Result<()> {
    let handle = SeriesHandle::new(url, None)?;
    let mut series = Series::new(handle, site.discoverer.clone(), site.resolver.clone(), config);
    let volumes = series.discover().await?;

    println!("📚 {} ({})", url, config.site.name);
    println!("{:<6} {:<10} {:<10} {:<30}", "Index", "Volume", "Chapters", "Range");
    println!("{}", "-".repeat(60));

    for (index, volume) in volumes.iter().enumerate() {
        let range = match (volume.chapters.first(), volume.chapters.last()) {
            (Some(first), Some(last)) => format!("{} - {}", first, last),
            _ => "No chapters".to_string(),
        };
        println!("{:<6} {:<10} {:<10} {:<30}", index, volume.label(), volume.chapters.len(), range);
    }

    Ok(())
}

async fn run_download(
    config: &Config,
    site: SiteBundle,
    url: &str,
    path: Option<PathBuf>,
    volumes: &[usize],
) -> Result<()> {
    let root = path.unwrap_or_else(|| PathBuf::from(&config.storage.base_path));
    let handle = SeriesHandle::new(url, Some(root))?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("⏹️ Interrupted, stopping downloads...");
            trigger.cancel();
        }
    });

    let mut series = Series::new(handle, site.discoverer, site.resolver, config)
        .with_cancellation(cancel);
    series.discover().await?;

    let stop = CancellationToken::new();
    let display = tokio::spawn(show_progress(
        series.progress(),
        Duration::from_millis(config.download.progress_interval_ms.max(100)),
        stop.clone(),
    ));

    let selection = (!volumes.is_empty()).then_some(volumes);
    let report = series.save_volumes(selection).await;

    stop.cancel();
    let _ = display.await;
    let report = report?;

    for label in &report.completed {
        info!("✅ Volume {} finished", label);
    }
    for (label, reason) in &report.failed {
        warn!("❌ Volume {} failed: {}", label, reason);
    }

    if !report.is_success() {
        anyhow::bail!("{} volume(s) failed", report.failed.len());
    }

    Ok(())
}

/// Polls the progress store and mirrors it into one bar per volume.
async fn show_progress(store: Arc<ProgressStore>, interval: Duration, stop: CancellationToken) {
    let multi = MultiProgress::new();
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("#>-");
    let mut bars: HashMap<usize, ProgressBar> = HashMap::new();

    loop {
        let stopping = stop.is_cancelled();

        for (index, label, state) in store.states() {
            match state {
                VolumeState::NotStarted => {}
                VolumeState::InProgress(counters) => {
                    let snapshot = counters.snapshot();
                    let bar = bars.entry(index).or_insert_with(|| {
                        let bar = multi.add(ProgressBar::new(0));
                        bar.set_style(style.clone());
                        bar
                    });
                    bar.set_length(snapshot.discovered);
                    bar.set_position(snapshot.completed);
                    bar.set_message(format!("Volume {} ({} buffered)", label, snapshot.buffered));
                }
                VolumeState::Completed(snapshot) => {
                    if let Some(bar) = bars.get(&index) {
                        bar.set_length(snapshot.discovered);
                        bar.set_position(snapshot.completed);
                        bar.finish_with_message(format!("Volume {} finished", label));
                    }
                }
                VolumeState::Failed { reason, .. } => {
                    if let Some(bar) = bars.get(&index) {
                        bar.abandon_with_message(format!("Volume {} failed: {}", label, reason));
                    }
                }
            }
        }

        if stopping {
            break;
        }

        tokio::select! {
            _ = stop.cancelled() => {}
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
