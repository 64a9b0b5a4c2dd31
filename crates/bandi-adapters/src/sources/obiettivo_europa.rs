//! obiettivoeuropa.com: a JSON index of calls, each followed to an
//! H2-sectioned detail page.

use bandi_core::{DetailRecord, ListingRecord};
use bandi_storage::PageRequest;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::detail::{extract_detail, DetailProfile, DEFAULT_TITLE_CHAIN};
use crate::sources::{parse_base, resolve};
use crate::text::clean_text;
use crate::{AdapterError, ListingContext, ListingPage, PageCursor, Pagination, SourceAdapter};

pub const BASE_URL: &str = "https://www.obiettivoeuropa.com";
pub const INDEX_URL: &str = "bandi_obiettivoeuropa_api.json";

const PROFILE: DetailProfile = DetailProfile {
    title_chain: DEFAULT_TITLE_CHAIN,
    content_scope: &["body"],
    deepest_heading: 2,
};

#[derive(Debug, Deserialize)]
struct IndexEntry {
    #[serde(default)]
    id: Option<JsonValue>,
    #[serde(default)]
    titolo: Option<String>,
    #[serde(default)]
    scadenza: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

fn id_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ObiettivoEuropaAdapter;

#[async_trait::async_trait]
impl SourceAdapter for ObiettivoEuropaAdapter {
    fn source_id(&self) -> &'static str {
        "obiettivoeuropa"
    }

    /// The index is produced upstream and usually read from disk.
    fn default_listing_url(&self) -> &'static str {
        INDEX_URL
    }

    fn pagination(&self) -> Pagination {
        Pagination::Single
    }

    fn listing_request(&self, ctx: &ListingContext, _cursor: PageCursor) -> PageRequest {
        PageRequest::get(ctx.listing_url.clone())
    }

    fn parse_listing(&self, body: &str, _page_url: &str) -> Result<ListingPage, AdapterError> {
        let entries: Vec<IndexEntry> =
            serde_json::from_str(body).map_err(|e| AdapterError::Payload(e.to_string()))?;
        let base = parse_base(BASE_URL)?;

        let rows = entries
            .iter()
            .map(|entry| {
                let mut record = ListingRecord {
                    identifier: entry.id.as_ref().and_then(id_to_string),
                    title: entry.titolo.as_deref().map(clean_text).unwrap_or_default(),
                    close_date: entry.scadenza.as_deref().map(clean_text).unwrap_or_default(),
                    ..Default::default()
                };
                if let Some(href) = entry.url.as_deref().filter(|u| !u.trim().is_empty()) {
                    match resolve(&base, href) {
                        Ok(url) => record.detail_url = url,
                        Err(err) => record.error = Some(err.to_string()),
                    }
                }
                record
            })
            .collect();
        Ok(ListingPage {
            raw_count: entries.len(),
            rows,
        })
    }

    fn parse_detail(&self, html: &str, url: &str, fetched_at: DateTime<Utc>) -> DetailRecord {
        extract_detail(html, url, fetched_at, &PROFILE)
    }
}
