use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use library_updater::config::Config;
use library_updater::covers::DiskCoverCache;
use library_updater::database::Database;
use library_updater::download::DownloadManager;
use library_updater::events::UpdateEvent;
use library_updater::followups::LoggingFollowUps;
use library_updater::models::UpdateTarget;
use library_updater::notify::ConsoleNotifier;
use library_updater::scheduler::{HostDeviceState, UpdateScheduler};
use library_updater::sources::SourceRegistry;
use library_updater::storage::StorageManager;
use library_updater::sync::SourceChapterSync;
use library_updater::tracking::TrackManager;
use library_updater::traits::{DownloadGateway, LibraryStore};
use library_updater::update::{self, Collaborators, RunReport, StartOutcome, UpdateManager, UpdateRequest};
use library_updater::wake::LockFileWakeLock;

#[derive(Parser)]
#[command(name = "libupdater")]
#[command(about = "Keeps a manga library up to date with its sources")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration (if missing) and create the database
    Init,
    /// Add a manga to the library
    Add {
        /// Site name as configured under [sites]
        site: String,
        /// Manga page URL
        url: String,
        /// Manga title
        title: String,
        /// Category to file the manga under
        #[arg(short, long)]
        category: Option<String>,
    },
    /// Check the library for new chapters
    Update {
        /// Only update this category id
        #[arg(long)]
        category: Option<i32>,
        /// Only update these manga ids
        #[arg(long = "manga", num_args = 1..)]
        manga: Vec<i64>,
    },
    /// Refresh manga metadata and covers
    Details,
    /// Refresh tracker progress
    Tracking,
    /// Show the library
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run periodic updates until interrupted
    Schedule,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;

    match cli.command {
        Commands::Init => run_init(&cli.config).await,
        command => run_command(&cli.config, command).await,
    }
}

async fn run_command(config_path: &str, command: Commands) -> Result<()> {
    let config = Config::load(config_path).with_context(|| format!("loading {}", config_path))?;
    let db = Arc::new(Database::new(&config.database.url, config.database.max_connections).await?);

    match command {
        Commands::Init => run_init(config_path).await?,
        Commands::Add { site, url, title, category } => {
            run_add(&config, &db, &site, &url, &title, category.as_deref()).await?;
        }
        Commands::Update { category, manga } => {
            let mut request = UpdateRequest::chapters();
            if let Some(category) = category {
                request = request.with_category(category);
            }
            if !manga.is_empty() {
                request = request.with_manga(manga);
            }
            run_update(&config, db, request).await?;
        }
        Commands::Details => run_update(&config, db, UpdateRequest::new(UpdateTarget::Details)).await?,
        Commands::Tracking => run_update(&config, db, UpdateRequest::new(UpdateTarget::Tracking)).await?,
        Commands::Status { json } => show_status(&config, &db, json).await?,
        Commands::Schedule => run_schedule(&config, db).await?,
    }

    Ok(())
}

fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(format!("libupdater={level},library_updater={level}"))
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .init();

    Ok(())
}

async fn run_init(config_path: &str) -> Result<()> {
    info!("Initializing library updater...");

    if !Path::new(config_path).exists() {
        Config::default().save(config_path)?;
        info!("Wrote default configuration to {}", config_path);
    }
    let config = Config::load(config_path)?;

    for dir in [&config.storage.downloads_path, &config.storage.covers_path, &config.storage.reports_path] {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir))?;
    }

    let db = Database::new(&config.database.url, config.database.max_connections).await?;
    db.init().await?;

    info!("Library updater initialized");
    Ok(())
}

async fn run_add(
    config: &Config,
    db: &Database,
    site: &str,
    url: &str,
    title: &str,
    category: Option<&str>,
) -> Result<()> {
    let site_config = config
        .get_site_config(site)
        .ok_or_else(|| anyhow::anyhow!("Site '{}' not configured", site))?;

    let manga_id = match db.get_manga_id_by_url(site_config.id, url).await? {
        Some(id) => {
            info!("Manga '{}' already in library", title);
            id
        }
        None => {
            let id = db.create_manga(site_config.id, url, title).await?;
            info!("➕ Added '{}' from {}", title, site_config.name);
            id
        }
    };

    if let Some(name) = category {
        let category_id = db.create_category(name).await?;
        db.set_manga_category(manga_id, category_id).await?;
        info!("Filed '{}' under '{}'", title, name);
    }

    println!("{}", manga_id);
    Ok(())
}

struct Service {
    manager: UpdateManager,
    downloads: DownloadManager,
}

fn build_service(config: &Config, db: Arc<Database>) -> Result<Service> {
    let sources = Arc::new(SourceRegistry::from_config(config)?);
    let downloads = DownloadManager::new(StorageManager::new(&config.storage.downloads_path), Arc::clone(&sources));
    let covers = DiskCoverCache::new(&config.storage.covers_path, config.storage.thumbnail_size)?;

    let deps = Collaborators {
        store: db,
        sources,
        chapter_sync: Arc::new(SourceChapterSync),
        downloads: Arc::new(downloads.clone()),
        covers: Arc::new(covers),
        notifier: Arc::new(ConsoleNotifier::new(config.notifications.clone())),
        trackers: Arc::new(TrackManager::new()),
        follow_ups: Arc::new(LoggingFollowUps),
        wake_lock: Arc::new(LockFileWakeLock::new(config.reports_dir())),
    };

    Ok(Service {
        manager: UpdateManager::new(deps, config.library.clone(), config.reports_dir()),
        downloads,
    })
}

fn log_events(manager: &UpdateManager) {
    let mut events = manager.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            let run_id = event.run_id();
            match event {
                UpdateEvent::Started { target, total, .. } => {
                    info!("📡 Updating {} of {} manga ({})", target, total, run_id)
                }
                UpdateEvent::MangaUpdated { manga_id, .. } => debug!("[{}] Manga {} changed", run_id, manga_id),
                UpdateEvent::Finished { cancelled, .. } => debug!("[{}] Finished, cancelled: {}", run_id, cancelled),
            }
        }
    });
}

async fn run_update(config: &Config, db: Arc<Database>, request: UpdateRequest) -> Result<()> {
    let service = build_service(config, db)?;
    log_events(&service.manager);

    let manager = service.manager.clone();
    let mut run = tokio::spawn(async move { manager.start(request).await });

    let outcome = tokio::select! {
        outcome = &mut run => outcome?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping update...");
            service.manager.stop().await;
            run.await?
        }
    };

    match outcome {
        StartOutcome::Finished(report) => print_report(&report),
        StartOutcome::Merged | StartOutcome::Busy => info!("Another update is already running"),
    }

    while service.downloads.is_running() {
        info!("⬇️ Waiting for {} queued downloads...", service.downloads.queue_len());
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    if !report.updates.is_empty() {
        println!("📚 New chapters:");
        println!("{:<40} {:<10} {:<20}", "Manga", "New", "Latest");
        println!("{}", "-".repeat(70));
        for (manga, chapters) in &report.updates {
            let latest = chapters.last().map(|c| c.name.as_str()).unwrap_or("-");
            println!("{:<40} {:<10} {:<20}", manga.title, chapters.len(), latest);
        }
    }
    if !report.failed.is_empty() {
        println!("❌ {} manga failed, see {}", report.failed.len(), report.errors_report.display());
    }
    if !report.skipped.is_empty() {
        println!("⏭️ {} manga skipped, see {}", report.skipped.len(), report.skipped_report.display());
    }
    if report.cancelled {
        println!("⏹️ Update was cancelled");
    }
}

async fn show_status(config: &Config, db: &Database, json: bool) -> Result<()> {
    // Rows come back once per category.
    let library = update::distinct(&db.library_manga().await?);

    if json {
        println!("{}", serde_json::to_string_pretty(&library)?);
        return Ok(());
    }

    let sources = SourceRegistry::from_config(config)?;
    println!("📚 Library:");
    println!(
        "{:<30} {:<15} {:<10} {:<10} {:<10} {:<15}",
        "Title", "Source", "Category", "Chapters", "Unread", "Status"
    );
    println!("{}", "-".repeat(95));
    for manga in library {
        println!(
            "{:<30} {:<15} {:<10} {:<10} {:<10} {:<15}",
            manga.title,
            sources.name_or_stub(manga.source),
            manga.category,
            manga.total_chapters,
            manga.unread,
            manga.status.to_string()
        );
    }

    Ok(())
}

async fn run_schedule(config: &Config, db: Arc<Database>) -> Result<()> {
    let service = build_service(config, db)?;
    log_events(&service.manager);

    let scheduler = UpdateScheduler::new(
        service.manager.clone(),
        Arc::new(HostDeviceState::default()),
        config.library.device_restrictions.clone(),
    );
    if !scheduler.setup_periodic(config.library.interval_hours) {
        warn!("library.interval_hours is not positive; nothing to schedule");
        return Ok(());
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down scheduler...");
    scheduler.shutdown().await;
    Ok(())
}
