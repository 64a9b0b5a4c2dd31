//! interno.gov.it tenders: a Drupal view paged through `/it/views/ajax`.
//!
//! The landing page is fetched once to learn the view's DOM id; every page
//! is then a form POST whose JSON command list carries the rows as HTML in
//! its `insert` command.

use bandi_core::{DetailRecord, LinkEntry, ListingRecord, SectionValue};
use bandi_storage::{PageFetcher, PageRequest};
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};
use url::Url;

use crate::detail::{extract_detail, DetailProfile};
use crate::locate::{locate_first, select_all, select_first, Locator};
use crate::sources::{parse_base, resolve};
use crate::text::{element_text, text_or_none};
use crate::{AdapterError, ListingContext, ListingPage, PageCursor, Pagination, SourceAdapter};

pub const BASE_URL: &str = "https://www.interno.gov.it";
pub const LANDING_URL: &str =
    "https://www.interno.gov.it/it/amministrazione-trasparente/bandi-gara-e-contratti";
const AJAX_PATH: &str = "/it/views/ajax";
const VIEW_DOM_ID_PREFIX: &str = "js-view-dom-id-";
pub const PAGE_SIZE: usize = 10;
pub const MAX_PAGES: usize = 10;

/// Exposed filters of the view, with the values that list every tender.
/// A source's configured filters replace these by name.
pub const DEFAULT_FILTERS: &[(&str, &str)] = &[
    ("field_codice_cig_value", ""),
    ("field_tender_notice_source_target_id", "All"),
    ("combine", ""),
];

const TITLE: Locator = Locator::Text("div.views-field-title a");
const LINK: Locator = Locator::Attr("div.views-field-title a", "href");
const ACT_DATE: Locator = Locator::Attr("div.views-field-field-data-atto time", "datetime");
const END_DATE: Locator = Locator::Attr("div.views-field-field-end-date time", "datetime");

/// `views-field-*` class -> zone name, read from the inner `.field-content`.
const CONTENT_ZONES: &[(&str, &str)] = &[
    ("div.views-field-field-tender-notice-source .field-content", "origine"),
    ("div.views-field-field-ufficio-riferimento .field-content", "ufficio"),
    ("div.views-field-field-codice-cig .field-content", "cig"),
];

const DETAIL_TITLE_CHAIN: &[Locator] = &[Locator::Text("h1.page-title"), Locator::Text("h1")];

const PROFILE: DetailProfile = DetailProfile {
    title_chain: DETAIL_TITLE_CHAIN,
    content_scope: &["main", "body"],
    deepest_heading: 4,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct InternoAdapter;

/// DOM id suffix of the first element carrying a `js-view-dom-id-*` class.
pub fn find_view_dom_id(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let id = select_all(document.root_element(), "[class]")
        .into_iter()
        .flat_map(|el| el.value().classes())
        .find_map(|class| {
            class
                .strip_prefix(VIEW_DOM_ID_PREFIX)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
        });
    id
}

/// HTML carried by the first `insert` command that has a `data` payload.
pub fn insert_payload(body: &str) -> Result<Option<String>, AdapterError> {
    let commands: JsonValue =
        serde_json::from_str(body).map_err(|e| AdapterError::Payload(e.to_string()))?;
    let Some(commands) = commands.as_array() else {
        return Err(AdapterError::Payload("expected a JSON array of commands".into()));
    };
    Ok(commands.iter().find_map(|cmd| {
        if cmd.get("command").and_then(JsonValue::as_str) != Some("insert") {
            return None;
        }
        cmd.get("data").and_then(JsonValue::as_str).map(str::to_string)
    }))
}

fn ajax_url(listing_url: &str) -> String {
    Url::parse(listing_url)
        .and_then(|u| u.join(AJAX_PATH))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| format!("{BASE_URL}{AJAX_PATH}"))
}

fn parse_row(row: ElementRef<'_>, base: &Url) -> ListingRecord {
    let mut record = ListingRecord {
        title: TITLE.locate(row).unwrap_or_default(),
        ..Default::default()
    };
    if let Some(href) = LINK.locate(row) {
        match resolve(base, &href) {
            Ok(url) => {
                record.identifier = Some(url.clone());
                record.detail_url = url;
            }
            Err(err) => record.error = Some(err.to_string()),
        }
    }
    if let Some(act_date) = ACT_DATE.locate(row) {
        record.open_date = act_date.clone();
        record.extra_columns.insert("data_atto".into(), act_date);
    }
    if let Some(end) = END_DATE.locate(row) {
        record.close_date = end;
    }
    for &(css, zone) in CONTENT_ZONES {
        if let Some(value) = Locator::Text(css).locate(row) {
            record.extra_columns.insert(zone.to_string(), value);
        }
    }
    if let Some(anac) = Locator::Attr("div.views-field-field-link-anac a", "href").locate(row) {
        record.extra_columns.insert("link_anac".into(), anac);
    }
    record
}

fn attachments(root: ElementRef<'_>, base: &Url) -> Vec<LinkEntry> {
    select_all(root, "div.field--name-field-allegati a[href]")
        .into_iter()
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            let url = resolve(base, href).ok()?;
            let label = text_or_none(element_text(a)).unwrap_or_else(|| url.clone());
            Some(LinkEntry { label, url })
        })
        .collect()
}

#[async_trait::async_trait]
impl SourceAdapter for InternoAdapter {
    fn source_id(&self) -> &'static str {
        "interno"
    }

    fn default_listing_url(&self) -> &'static str {
        LANDING_URL
    }

    fn pagination(&self) -> Pagination {
        Pagination::PageNumber { page_size: PAGE_SIZE }
    }

    fn max_pages(&self) -> Option<usize> {
        Some(MAX_PAGES)
    }

    async fn prepare(
        &self,
        fetcher: &dyn PageFetcher,
        listing_url: &str,
    ) -> Result<ListingContext, AdapterError> {
        let mut ctx = ListingContext::new(listing_url);
        match fetcher.fetch_page(&PageRequest::get(listing_url)).await {
            Ok(page) => {
                ctx.view_token = find_view_dom_id(&page.body);
                if ctx.view_token.is_none() {
                    warn!(listing_url, "no view dom id on landing page");
                }
            }
            Err(err) => warn!(
                listing_url,
                error = %err,
                "landing page unavailable, paging without view dom id"
            ),
        }
        debug!(view_token = ?ctx.view_token, "interno listing prepared");
        Ok(ctx)
    }

    fn listing_request(&self, ctx: &ListingContext, cursor: PageCursor) -> PageRequest {
        let mut form: Vec<(String, String)> = [
            ("view_name", "alalbo_pretorio".to_string()),
            ("view_display_id", "blocco_bandi_2".to_string()),
            ("view_args", String::new()),
            ("view_path", "/node/949".to_string()),
            ("view_base_path", String::new()),
            ("view_dom_id", ctx.view_token.clone().unwrap_or_default()),
            ("pager_element", "0".to_string()),
            ("page", cursor.page_index.to_string()),
            ("_drupal_ajax", "1".to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        for &(name, default) in DEFAULT_FILTERS {
            let value = ctx.filter(name).unwrap_or(default);
            form.push((name.to_string(), value.to_string()));
        }
        form.extend(
            ctx.filters
                .iter()
                .filter(|(name, _)| !DEFAULT_FILTERS.iter().any(|(d, _)| d == name))
                .map(|(name, value)| (name.clone(), value.clone())),
        );

        PageRequest::post_form(ajax_url(&ctx.listing_url), form)
            .with_header("X-Requested-With", "XMLHttpRequest")
            .with_header("Accept", "application/json, text/javascript, */*; q=0.01")
    }

    fn parse_listing(&self, body: &str, _page_url: &str) -> Result<ListingPage, AdapterError> {
        let Some(html) = insert_payload(body)? else {
            debug!("no insert command in ajax response");
            return Ok(ListingPage::default());
        };
        let base = parse_base(BASE_URL)?;
        let document = Html::parse_fragment(&html);
        let rows = select_all(document.root_element(), "div.views-row");
        Ok(ListingPage {
            raw_count: rows.len(),
            rows: rows.into_iter().map(|row| parse_row(row, &base)).collect(),
        })
    }

    fn parse_detail(&self, html: &str, url: &str, fetched_at: DateTime<Utc>) -> DetailRecord {
        let mut detail = extract_detail(html, url, fetched_at, &PROFILE);
        let document = Html::parse_document(html);
        let root = document.root_element();
        let base = Url::parse(url).or_else(|_| Url::parse(BASE_URL)).ok();

        if let Some(body) =
            select_first(root, "div.field--name-body").and_then(|b| text_or_none(element_text(b)))
        {
            detail
                .sections
                .entry("Descrizione".to_string())
                .or_insert(SectionValue::Text(body));
        }
        if let Some(base) = base {
            let files = attachments(root, &base);
            if !files.is_empty() {
                detail.sections.insert("Allegati".to_string(), SectionValue::Links(files));
            }
        }
        if detail.page_title.is_none() {
            detail.page_title = locate_first(root, DETAIL_TITLE_CHAIN);
        }
        detail
    }
}
