//! Scrape orchestration: listing walk, detail merge, normalization and the
//! per-run snapshot, plus maintenance of the `to_scrape` ledger.

pub mod config;
pub mod links;
pub mod normalize;
pub mod paginate;
pub mod pipeline;

pub use config::{SchemaKind, ScrapeConfig, SourceConfig, SourceRegistry};
pub use links::{
    discover, dismiss_failed, retry_failed, RetryReport, RetrySettings, DEFAULT_DISCOVER_LIMIT,
};
pub use normalize::{build_table, classify_section, normalize, RunRecord, BUCKET_RULES};
pub use paginate::{fetch_all, PaginationOutcome, PaginationSettings};
pub use pipeline::{run_scrape, LocalFileFetcher, RunSummary, ScrapePipeline};

pub const CRATE_NAME: &str = "bandi-sync";
