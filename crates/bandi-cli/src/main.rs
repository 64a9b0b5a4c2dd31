use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use bandi_adapters::{adapter_for_source, SOURCE_IDS};
use bandi_core::LinkStatus;
use bandi_storage::{LinkLedger, PageFetcher, PageRequest, TieredFetcher};
use bandi_sync::{
    discover, dismiss_failed, retry_failed, run_scrape, LocalFileFetcher, RetrySettings,
    ScrapeConfig, SourceRegistry, DEFAULT_DISCOVER_LIMIT,
};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "bandi")]
#[command(about = "Scraper for Italian public grants and tenders")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scrape every enabled source, or one with --source.
    Scrape(ScrapeArgs),
    /// List the registered sources.
    Sources {
        #[arg(long)]
        sources_file: Option<PathBuf>,
    },
    /// Fetch one URL through the fetch tiers and print the body.
    Fetch { url: String },
    /// Queue new links found on an index page into the ledger.
    Discover {
        url: String,
        #[arg(long)]
        valid_prefix: Option<String>,
        #[arg(long, default_value_t = DEFAULT_DISCOVER_LIMIT)]
        limit: usize,
    },
    /// Re-fetch pending ledger links.
    RetryFailed {
        #[arg(long, default_value_t = 10)]
        batch_size: usize,
        /// Seconds to wait between batches.
        #[arg(long, default_value_t = 60)]
        batch_delay: u64,
    },
    /// Mark every pending ledger link as failed.
    DismissFailed,
}

#[derive(Debug, Default, Args)]
struct ScrapeArgs {
    #[arg(long)]
    source: Option<String>,
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Seconds between requests.
    #[arg(long)]
    delay: Option<f64>,
    #[arg(long)]
    max_records: Option<usize>,
    #[arg(long)]
    sources_file: Option<PathBuf>,
}

impl ScrapeArgs {
    fn apply(self, mut config: ScrapeConfig) -> ScrapeConfig {
        if let Some(dir) = self.output_dir {
            config.output_dir = dir;
        }
        if let Some(secs) = self.delay.filter(|s| s.is_finite() && *s >= 0.0) {
            config.delay = Duration::from_secs_f64(secs);
        }
        if let Some(max) = self.max_records {
            config.max_records = Some(max);
        }
        if let Some(file) = self.sources_file {
            config.sources_file = file;
        }
        config
    }
}

fn fetcher(config: &ScrapeConfig) -> Result<LocalFileFetcher> {
    let tiered = TieredFetcher::new(config.http_config()).context("building http clients")?;
    Ok(LocalFileFetcher::new(Box::new(tiered)))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = ScrapeConfig::from_env();

    match cli.command.unwrap_or(Commands::Scrape(ScrapeArgs::default())) {
        Commands::Scrape(args) => {
            let source = args.source.clone();
            let config = args.apply(config);
            let summaries = run_scrape(config, source.as_deref()).await?;
            let mut written = 0;
            for summary in &summaries {
                match &summary.files {
                    Some(files) => {
                        written += 1;
                        println!(
                            "{}: {} records ({} detail errors) -> {}, {}",
                            summary.source_id,
                            summary.records,
                            summary.detail_errors,
                            files.json_path.display(),
                            files.csv_path.display()
                        );
                    }
                    None => println!("{}: no records found, nothing written", summary.source_id),
                }
            }
            if written == 0 {
                println!("scrape complete: no records extracted");
            }
        }
        Commands::Sources { sources_file } => {
            let path = sources_file.unwrap_or(config.sources_file);
            let registry = SourceRegistry::load(&path).await?;
            for source in &registry.sources {
                let adapter = adapter_for_source(&source.source_id);
                let listing = source
                    .listing_url
                    .as_deref()
                    .or(adapter.as_ref().map(|a| a.default_listing_url()))
                    .unwrap_or("-");
                println!(
                    "{:<16} {:<8} {:<34} {}",
                    source.source_id,
                    if source.enabled { "enabled" } else { "disabled" },
                    source.dataset,
                    listing
                );
            }
            let unregistered: Vec<_> = SOURCE_IDS
                .iter()
                .filter(|id| registry.get(id).is_none())
                .collect();
            if !unregistered.is_empty() {
                println!("adapters without registry entry: {unregistered:?}");
            }
        }
        Commands::Fetch { url } => {
            let page = fetcher(&config)?
                .fetch_page(&PageRequest::get(url.as_str()))
                .await
                .with_context(|| format!("fetching {url}"))?;
            eprintln!(
                "method={} attempts={} status={}",
                page.metadata.method_used.map(|m| m.as_str()).unwrap_or("local"),
                page.metadata.attempts,
                page.metadata
                    .final_status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".into())
            );
            println!("{}", page.body);
        }
        Commands::Discover {
            url,
            valid_prefix,
            limit,
        } => {
            let mut ledger = LinkLedger::load(config.ledger_path.clone()).await?;
            let fetcher = fetcher(&config)?;
            let queued =
                discover(&fetcher, &mut ledger, &url, valid_prefix.as_deref(), limit).await?;
            ledger.save().await?;
            for link in &queued {
                println!("{link}");
            }
            println!(
                "queued {} links ({} pending in {})",
                queued.len(),
                ledger.count(LinkStatus::Pending),
                ledger.path().display()
            );
        }
        Commands::RetryFailed {
            batch_size,
            batch_delay,
        } => {
            let mut ledger = LinkLedger::load(config.ledger_path.clone()).await?;
            let settings = RetrySettings {
                batch_size,
                batch_delay: Duration::from_secs(batch_delay),
                ..RetrySettings::default()
            };
            let report = retry_failed(&fetcher(&config)?, &mut ledger, &settings).await?;
            println!(
                "retried {} links: {} recovered, {} failed",
                report.attempted, report.recovered, report.failed
            );
        }
        Commands::DismissFailed => {
            let mut ledger = LinkLedger::load(config.ledger_path.clone()).await?;
            let dismissed = dismiss_failed(&mut ledger).await?;
            println!("marked {dismissed} pending links as failed");
        }
    }

    Ok(())
}
