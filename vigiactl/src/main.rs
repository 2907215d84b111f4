//! # vigiactl
//!
//! CLI for the vigia filesystem tracker.
//!
//! - `scan <path>` - initial crawl of a document tree into the event log
//! - `watch <path>` - live watcher, runs until ctrl-c or `--timeout`
//! - `reconcile <path>` - detect and correct drift between disk and log
//! - `monitor` - tail the stored event log
//! - `db migrate` - apply database migrations and exit

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use crossterm::style::Stylize;
use humansize::{DECIMAL, format_size};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vigia_core::store::{EventStore, FileStore};
use vigia_core::{
    FileSystemEvent, Pipeline, PostgresDatabase, Reconciler, Scanner, StoredEvent, VigiaConfig,
    Watcher, WatcherOptions, standard_chain,
};

#[derive(Parser, Debug)]
#[command(name = "vigiactl")]
#[command(about = "Event-sourced filesystem tracker for engineering document trees")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(ClapArgs, Debug, Clone)]
struct CommonArgs {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Projector configuration file (defaults apply when absent)
    #[arg(long, env = "VIGIA_CONFIG", default_value = "vigia.toml")]
    config: PathBuf,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the initial filesystem scan
    Scan {
        /// The path to scan
        path: PathBuf,

        /// Disable progress output
        #[arg(long)]
        no_progress: bool,
    },
    /// Watch the filesystem for real-time changes
    Watch {
        /// The path to watch
        path: PathBuf,

        /// Stop watching after N seconds (0 = run until ctrl-c)
        #[arg(long, default_value_t = 0)]
        timeout: u64,
    },
    /// Reconcile the filesystem against the event log
    Reconcile {
        /// The path to reconcile
        path: PathBuf,

        /// Skip content hashing, compare metadata only
        #[arg(long)]
        skip_scan: bool,
    },
    /// Tail the stored event log
    Monitor {
        /// Seconds to wait after displaying an event
        #[arg(long, default_value_t = 1.0)]
        delay: f64,

        /// Display the last N events before monitoring
        #[arg(long, default_value_t = 5)]
        last: i64,
    },
    #[command(subcommand)]
    Db(DbCommand),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Apply database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Scan { path, no_progress } => run_scan(&cli.common, &path, no_progress).await,
        Command::Watch { path, timeout } => run_watch(&cli.common, &path, timeout).await,
        Command::Reconcile { path, skip_scan } => {
            run_reconcile(&cli.common, &path, skip_scan).await
        }
        Command::Monitor { delay, last } => run_monitor(&cli.common, delay, last).await,
        Command::Db(DbCommand::Migrate) => run_db_migrate(&cli.common).await,
    }
}

struct Runtime {
    db: PostgresDatabase,
    pipeline: Arc<Pipeline>,
    config: VigiaConfig,
}

async fn connect(common: &CommonArgs) -> anyhow::Result<Runtime> {
    let config = VigiaConfig::load(&common.config).context("failed to load configuration")?;
    let db = PostgresDatabase::connect(&common.database_url)
        .await
        .context("failed to connect to PostgreSQL")?;

    let chain = standard_chain(
        Arc::new(db.files().clone()),
        Arc::new(db.masters().clone()),
        Arc::new(db.parts().clone()),
        &config,
    );
    let pipeline = Arc::new(Pipeline::new(Arc::new(db.events().clone()), chain));

    Ok(Runtime {
        db,
        pipeline,
        config,
    })
}

async fn run_db_migrate(common: &CommonArgs) -> anyhow::Result<()> {
    let db = PostgresDatabase::connect(&common.database_url)
        .await
        .context("failed to connect to PostgreSQL")?;
    db.migrate().await.context("database migration failed")?;
    info!("database migrations applied successfully");
    Ok(())
}

async fn run_scan(common: &CommonArgs, path: &Path, no_progress: bool) -> anyhow::Result<()> {
    let runtime = connect(common).await?;

    println!("Starting initial file system scan...");
    println!("Path: {}", path.display());
    println!();

    let events_before = runtime.db.events().max_id().await?;
    let started = Instant::now();

    let mut progress = |done: u64, total: u64, current: &Path| {
        let name = current
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        eprint!("\r  {done}/{total}  {name:<40.40}");
    };
    let progress: Option<&mut dyn FnMut(u64, u64, &Path)> =
        if no_progress { None } else { Some(&mut progress) };
    let stats = Scanner::new(path)
        .scan(&runtime.pipeline, progress)
        .await
        .context("scan failed")?;
    if !no_progress {
        eprintln!();
    }

    let duration = started.elapsed();
    let events_created = runtime.db.events().max_id().await? - events_before;
    let per_second = if duration.as_secs_f64() > 0.0 {
        (stats.total_items() as f64 / duration.as_secs_f64()).round()
    } else {
        0.0
    };

    println!("Scan completed successfully");
    println!();
    println!("  Directories found  {}", stats.directories);
    println!("  Files found        {}", stats.files);
    println!("  Total size         {}", format_size(stats.total_bytes, DECIMAL));
    println!("  Errors             {}", stats.errors);
    println!("  Events created     {events_created}");
    println!("  Duration           {:.2} seconds", duration.as_secs_f64());
    println!("  Items per second   {per_second}");

    Ok(())
}

async fn run_watch(common: &CommonArgs, path: &Path, timeout: u64) -> anyhow::Result<()> {
    let runtime = connect(common).await?;

    println!("Starting file system watcher...");
    println!("Watching: {}", path.display());
    if timeout > 0 {
        println!("Timeout: {timeout} seconds");
    } else {
        println!("Running indefinitely (ctrl-c to stop)");
    }
    println!();

    let options = WatcherOptions {
        timeout: (timeout > 0).then(|| Duration::from_secs(timeout)),
        settings: runtime.config.watcher.clone(),
    };
    let files: Arc<dyn FileStore> = Arc::new(runtime.db.files().clone());
    let watcher = Watcher::new(path, runtime.pipeline.clone(), files, options);

    watcher
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("watcher failed")?;

    println!("Watcher stopped.");
    Ok(())
}

async fn run_reconcile(common: &CommonArgs, path: &Path, skip_scan: bool) -> anyhow::Result<()> {
    let runtime = connect(common).await?;

    println!("Reconciling file system against the event log...");
    println!("Path: {}", path.display());
    println!();

    let report = Reconciler::new(path)
        .with_skip_hashes(skip_scan)
        .reconcile(&runtime.pipeline)
        .await
        .context("reconciliation failed")?;

    println!("Reconciliation completed");
    println!();
    println!("  Items scanned        {}", report.scanned);
    println!("  Discrepancies found  {}", report.discrepancies);
    println!("  Events created       {}", report.events_created);

    if report.events_created < report.discrepancies {
        println!(
            "  {} corrective events failed; see the log",
            report.discrepancies - report.events_created
        );
    }

    Ok(())
}

async fn run_monitor(common: &CommonArgs, delay: f64, last: i64) -> anyhow::Result<()> {
    let runtime = connect(common).await?;
    let store = runtime.db.events();
    let delay = Duration::from_secs_f64(delay.max(0.5));

    let mut last_id = store.max_id().await?;
    println!("Monitoring stored events. Press ctrl-c to exit.");
    println!("Initial last event id: {last_id}");
    println!("{}", "-".repeat(60));

    if last > 0 {
        let history = store.latest(last).await?;
        if history.is_empty() {
            println!("No historical events found");
        }
        for stored in &history {
            print_event(stored, true);
        }
        println!("{}", "-".repeat(60));
    }

    loop {
        let batch = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            batch = async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                store.events_since(last_id, 256).await
            } => batch?,
        };

        for stored in batch {
            print_event(&stored, false);
            last_id = stored.id;
            tokio::time::sleep(delay).await;
        }
    }

    println!();
    println!("Monitoring stopped.");
    Ok(())
}

fn print_event(stored: &StoredEvent, historical: bool) {
    let prefix = if historical { "[HIST]" } else { "[LIVE]" };
    let time = stored.recorded_at.format("%H:%M:%S");
    let (icon, label) = describe(&stored.event);
    println!(
        "{prefix} [{time}] {icon} {label} [{}]: {}",
        stored.event.origin(),
        stored.event.path()
    );
}

fn describe(event: &FileSystemEvent) -> (&'static str, crossterm::style::StyledContent<&'static str>) {
    match event {
        FileSystemEvent::FileCreated { .. } => ("📄", "FILE CREATED".green()),
        FileSystemEvent::FileModified { .. } => ("🔄", "FILE MODIFIED".blue()),
        FileSystemEvent::FileDeleted { .. } => ("❌", "FILE DELETED".red()),
        FileSystemEvent::FileRenamed { .. } => ("📄", "FILE RENAMED".blue()),
        FileSystemEvent::DirectoryCreated { .. } => ("📁", "DIR CREATED".green()),
        FileSystemEvent::DirectoryDeleted { .. } => ("🗑", "DIR DELETED".red()),
        FileSystemEvent::DirectoryRenamed { .. } => ("📁", "DIR RENAMED".blue()),
    }
}
