//! incentivi.gov.it: a single catalog page linking every measure's detail page.

use std::collections::HashSet;

use bandi_core::{DetailRecord, ListingRecord};
use bandi_storage::PageRequest;
use chrono::{DateTime, Utc};
use scraper::Html;
use tracing::{debug, warn};

use crate::detail::{extract_detail, DetailProfile, DEFAULT_TITLE_CHAIN};
use crate::locate::select_all;
use crate::sources::{parse_base, resolve};
use crate::text::{capitalize, element_text};
use crate::{AdapterError, ListingContext, ListingPage, PageCursor, Pagination, SourceAdapter};

pub const BASE_URL: &str = "https://www.incentivi.gov.it";
pub const CATALOG_URL: &str = "https://www.incentivi.gov.it/it/catalogo";
const CATALOG_ROOT: &str = "/it/catalogo";
const LABEL_PREFIX: &str = "vai alla scheda";

const PROFILE: DetailProfile = DetailProfile {
    title_chain: DEFAULT_TITLE_CHAIN,
    content_scope: &["main"],
    deepest_heading: 4,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct IncentiviAdapter;

fn catalog_label(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    if lowered.contains(LABEL_PREFIX) {
        capitalize(lowered.replace(LABEL_PREFIX, "").trim())
    } else {
        raw.to_string()
    }
}

fn is_catalog_entry(href: &str) -> bool {
    let href = href.trim().trim_end_matches('/');
    href.contains("/catalogo/") && !href.ends_with(CATALOG_ROOT)
}

#[async_trait::async_trait]
impl SourceAdapter for IncentiviAdapter {
    fn source_id(&self) -> &'static str {
        "incentivi"
    }

    fn default_listing_url(&self) -> &'static str {
        CATALOG_URL
    }

    fn pagination(&self) -> Pagination {
        Pagination::Single
    }

    fn listing_request(&self, ctx: &ListingContext, _cursor: PageCursor) -> PageRequest {
        PageRequest::get(ctx.listing_url.clone())
    }

    fn parse_listing(&self, body: &str, page_url: &str) -> Result<ListingPage, AdapterError> {
        let base = parse_base(page_url).or_else(|_| parse_base(BASE_URL))?;
        let document = Html::parse_document(body);
        let mut seen = HashSet::new();
        let mut page = ListingPage::default();

        for anchor in select_all(document.root_element(), "a[href]") {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            if !is_catalog_entry(href) {
                continue;
            }
            let text = element_text(anchor);
            if text.is_empty() {
                continue;
            }
            page.raw_count += 1;
            let link = match resolve(&base, href) {
                Ok(link) => link,
                Err(err) => {
                    warn!(href, error = %err, "skipping catalog link");
                    continue;
                }
            };
            if !seen.insert(link.clone()) {
                continue;
            }
            page.rows.push(ListingRecord {
                identifier: Some(link.clone()),
                title: catalog_label(&text),
                detail_url: link,
                ..Default::default()
            });
        }
        debug!(entries = page.rows.len(), "incentivi catalog parsed");
        Ok(page)
    }

    fn parse_detail(&self, html: &str, url: &str, fetched_at: DateTime<Utc>) -> DetailRecord {
        extract_detail(html, url, fetched_at, &PROFILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_links_are_filtered_labelled_and_deduplicated() {
        let html = r#"<ul>
            <li><a href="/it/catalogo">Catalogo</a></li>
            <li><a href="/it/catalogo/voucher-3i">VAI ALLA SCHEDA Voucher 3I</a></li>
            <li><a href="/it/catalogo/voucher-3i">Voucher 3I</a></li>
            <li><a href="https://www.incentivi.gov.it/it/catalogo/resto-al-sud">Resto al Sud</a></li>
            <li><a href="/it/notizie/uno">Notizia</a></li>
            <li><a href="/it/catalogo/vuoto"> </a></li>
        </ul>"#;
        let page = IncentiviAdapter.parse_listing(html, CATALOG_URL).unwrap();

        let titles: Vec<_> = page.rows.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, ["Voucher 3i", "Resto al Sud"]);
        assert_eq!(page.rows[0].detail_url, "https://www.incentivi.gov.it/it/catalogo/voucher-3i");
        assert_eq!(page.raw_count, 3);
    }
}
