//! HTTP fetch tiers, run snapshots and the `to_scrape` ledger.

pub mod http;
pub mod ledger;
pub mod sink;

pub use http::{
    is_challenge_page, BackoffPolicy, FetchError, FetchMetadata, FetchMethod, FetchedPage,
    HttpClientConfig, PageFetcher, PageRequest, RawResponse, ReqwestTransport, RetryDisposition,
    TieredFetcher, Transport, DEFAULT_USER_AGENTS,
};
pub use ledger::LinkLedger;
pub use sink::{CsvTable, PersistenceError, RunFiles, RunSink};

pub const CRATE_NAME: &str = "bandi-storage";
