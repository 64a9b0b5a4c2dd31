//! Field extraction and per-source adapters.

pub mod dates;
pub mod detail;
pub mod links;
pub mod locate;
pub mod sections;
pub mod sources;
pub mod status;
pub mod text;

use async_trait::async_trait;
use bandi_core::{DetailRecord, ListingRecord};
use bandi_storage::{PageFetcher, PageRequest};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use thiserror::Error;

pub use sources::{
    incentivi::IncentiviAdapter, interno::InternoAdapter, italia_domani::ItaliaDomaniAdapter,
    obiettivo_europa::ObiettivoEuropaAdapter,
};

pub const CRATE_NAME: &str = "bandi-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("malformed listing payload: {0}")]
    Payload(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// How a source's listing is walked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pagination {
    /// Offset-addressed pages of `page_size` rows.
    Offset { page_size: usize },
    /// Zero-based page numbers; `page_size` is the expected rows per page.
    PageNumber { page_size: usize },
    /// The whole listing arrives in one response.
    Single,
}

impl Pagination {
    pub fn page_size(&self) -> Option<usize> {
        match self {
            Self::Offset { page_size } | Self::PageNumber { page_size } => Some(*page_size),
            Self::Single => None,
        }
    }

    /// Same mode, different expected page size.
    pub fn with_page_size(self, size: usize) -> Self {
        match self {
            Self::Offset { .. } => Self::Offset { page_size: size },
            Self::PageNumber { .. } => Self::PageNumber { page_size: size },
            Self::Single => Self::Single,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageCursor {
    pub page_index: usize,
    pub offset: usize,
}

/// Per-run state discovered before paging starts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListingContext {
    pub listing_url: String,
    pub view_token: Option<String>,
    /// Search filters sent with every listing request.
    pub filters: IndexMap<String, String>,
}

impl ListingContext {
    pub fn new(listing_url: impl Into<String>) -> Self {
        Self {
            listing_url: listing_url.into(),
            ..Default::default()
        }
    }

    pub fn filter(&self, name: &str) -> Option<&str> {
        self.filters.get(name).map(String::as_str)
    }
}

/// Rows parsed from one listing response. `raw_count` counts every row the
/// page carried, before validation and dedup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPage {
    pub rows: Vec<ListingRecord>,
    pub raw_count: usize,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &'static str;

    fn default_listing_url(&self) -> &'static str;

    fn pagination(&self) -> Pagination;

    /// Whether `parse_detail` has anything to add for this source.
    fn follows_details(&self) -> bool {
        true
    }

    /// Upper bound on listing pages walked in one run.
    fn max_pages(&self) -> Option<usize> {
        None
    }

    async fn prepare(
        &self,
        _fetcher: &dyn PageFetcher,
        listing_url: &str,
    ) -> Result<ListingContext, AdapterError> {
        Ok(ListingContext::new(listing_url))
    }

    fn listing_request(&self, ctx: &ListingContext, cursor: PageCursor) -> PageRequest;

    fn parse_listing(&self, body: &str, page_url: &str) -> Result<ListingPage, AdapterError>;

    fn parse_detail(&self, html: &str, url: &str, fetched_at: DateTime<Utc>) -> DetailRecord;
}

pub const SOURCE_IDS: &[&str] = &["italiadomani", "incentivi", "obiettivoeuropa", "interno"];

pub fn adapter_for_source(source_id: &str) -> Option<Box<dyn SourceAdapter>> {
    match source_id {
        "italiadomani" => Some(Box::new(ItaliaDomaniAdapter)),
        "incentivi" => Some(Box::new(IncentiviAdapter)),
        "obiettivoeuropa" => Some(Box::new(ObiettivoEuropaAdapter)),
        "interno" => Some(Box::new(InternoAdapter)),
        _ => None,
    }
}
