use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use url::Url;

use gleaner_client::{HttpFetcher, OaiBatchReader};
use gleaner_core::registry::ParserRegistry;
use gleaner_core::scheduler::{HarvestScheduler, SchedulerConfig, listed_sources, unloaded_sources};
use gleaner_core::surrogate::FileSurrogateStore;
use gleaner_core::traits::{CachePolicy, Fetcher};
use gleaner_parsers::default_plugins;

#[derive(Parser)]
#[command(name = "gleaner", version, about = "Content acquisition engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve and run parsers on one resource, printing the document
    Parse {
        /// Resource URL (used for extension-based resolution)
        #[arg(short, long)]
        url: String,

        /// Read bytes from a local file instead of fetching the URL
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Declared content type (as a server would advertise it)
        #[arg(short, long)]
        content_type: Option<String>,

        /// Transport-level charset hint
        #[arg(long)]
        charset: Option<String>,
    },

    /// Dry-run admission check: can this resource be parsed at all?
    Supports {
        /// Resource URL
        #[arg(short, long)]
        url: String,

        /// Declared content type
        #[arg(short, long)]
        content_type: Option<String>,
    },

    /// Harvest metadata sources into surrogate storage
    Harvest {
        /// Source endpoint URLs
        #[arg(short, long)]
        source: Vec<String>,

        /// CSV source registry (endpoint URL in the third column)
        #[arg(short, long)]
        list: Option<PathBuf>,

        /// Directory for surrogate batch files
        #[arg(long, default_value = "surrogates")]
        surrogates: PathBuf,

        /// Concurrency ceiling for running jobs
        #[arg(long, default_value_t = 10)]
        max_running: usize,

        /// Skip hosts harvested within this many days
        #[arg(long, default_value_t = 30)]
        stale_days: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("gleaner=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Parse {
            url,
            file,
            content_type,
            charset,
        } => cmd_parse(&url, file, content_type.as_deref(), charset.as_deref()).await,
        Commands::Supports { url, content_type } => cmd_supports(&url, content_type.as_deref()),
        Commands::Harvest {
            source,
            list,
            surrogates,
            max_running,
            stale_days,
        } => cmd_harvest(source, list, surrogates, max_running, stale_days).await,
    }
}

async fn cmd_parse(
    url: &str,
    file: Option<PathBuf>,
    content_type: Option<&str>,
    charset: Option<&str>,
) -> Result<()> {
    let location = Url::parse(url).context("invalid resource URL")?;
    let bytes = match file {
        Some(path) => std::fs::read(&path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => {
            HttpFetcher::new()?
                .fetch(&location, CachePolicy::IfFresh)
                .await?
        }
    };

    let registry = ParserRegistry::with_plugins(default_plugins());
    let cancel = CancellationToken::new();
    let document = registry.parse(&location, content_type, charset, &bytes, &cancel)?;
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

fn cmd_supports(url: &str, content_type: Option<&str>) -> Result<()> {
    let location = Url::parse(url).context("invalid resource URL")?;
    let registry = ParserRegistry::with_plugins(default_plugins());
    match registry.supports(&location, content_type) {
        None => {
            println!("supported");
            Ok(())
        }
        Some(reason) => {
            println!("not supported: {reason}");
            std::process::exit(1);
        }
    }
}

async fn cmd_harvest(
    sources: Vec<String>,
    list: Option<PathBuf>,
    surrogates: PathBuf,
    max_running: usize,
    stale_days: i64,
) -> Result<()> {
    let mut candidates = Vec::new();
    for source in &sources {
        candidates.push(Url::parse(source).with_context(|| format!("invalid source '{source}'"))?);
    }
    if let Some(path) = list {
        let file = std::fs::File::open(&path)
            .with_context(|| format!("opening source list {}", path.display()))?;
        candidates.extend(listed_sources(file));
    }
    if candidates.is_empty() {
        bail!("no sources given; use --source or --list");
    }

    let store = FileSurrogateStore::new(&surrogates)?;
    let eligible = unloaded_sources(
        &candidates,
        store.dir(),
        chrono::Duration::days(stale_days),
        Utc::now(),
    )?;
    if eligible.is_empty() {
        println!(
            "all {} candidate hosts were harvested within the last {stale_days} days",
            candidates.len()
        );
        return Ok(());
    }
    tracing::info!(
        candidates = candidates.len(),
        eligible = eligible.len(),
        "starting harvest"
    );

    let scheduler = HarvestScheduler::new(
        HttpFetcher::new()?,
        OaiBatchReader::new(),
        store,
        SchedulerConfig {
            max_running,
            ..SchedulerConfig::default()
        },
    );
    for source in &eligible {
        scheduler.submit(source)?;
    }

    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let queued = scheduler.queued().len();
        let running = scheduler.running();
        if queued == 0 && running.is_empty() {
            break;
        }
        for job in &running {
            tracing::info!(
                serial = job.serial(),
                records = job.count(),
                chunks = job.chunk_count(),
                status = %job.status(),
                "running"
            );
        }
    }

    for job in scheduler.finished() {
        println!(
            "#{} {}: {} records in {} chunks, {:.1} records/s, {}",
            job.serial(),
            job.source(),
            job.count(),
            job.chunk_count(),
            job.speed(),
            job.status()
        );
    }
    Ok(())
}
