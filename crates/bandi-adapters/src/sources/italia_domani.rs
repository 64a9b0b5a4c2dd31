//! Italia Domani search results: offset-paged HTML fragments of
//! `div.item-wrapper` rows.

use bandi_core::{DetailRecord, ListingRecord};
use bandi_storage::PageRequest;
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html};
use tracing::debug;
use url::Url;

use crate::detail::{extract_detail, DetailProfile};
use crate::locate::{locate_first, select_all, select_first, Locator};
use crate::sources::{parse_base, resolve, with_query_param};
use crate::status::{looks_like_status, LISTING_STATUS_CHAIN};
use crate::text::{clean_text, element_text, text_or_none};
use crate::{AdapterError, ListingContext, ListingPage, PageCursor, Pagination, SourceAdapter};

pub const BASE_URL: &str = "https://www.italiadomani.gov.it";
pub const LISTING_URL: &str = "https://www.italiadomani.gov.it/content/sogei-ng/it/it/opportunita/bandi-amministrazioni-titolari/jcr:content/root/container/newnoticessearch.searchResults.html?orderby=%40jcr%3Acontent%2Fstatus&sort=asc";
const REFERER: &str =
    "https://www.italiadomani.gov.it/content/sogei-ng/it/it/opportunita/bandi-amministrazioni-titolari.html";
pub const PAGE_SIZE: usize = 20;

const ID_CHAIN: &[Locator] = &[Locator::OwnAttr("id"), Locator::OwnAttr("data-id")];

const TITLE_CHAIN: &[Locator] = &[
    Locator::Text("div.col-lg-5.column .title"),
    Locator::Text("div.col-lg-5.column h3"),
    Locator::Attr("div.col-lg-5.column a", "title"),
    Locator::Text("div.col-lg-5.column a"),
];

const LINK_CHAIN: &[Locator] = &[
    Locator::Attr("div.col-lg-5.column a", "href"),
    Locator::Attr("a", "href"),
];

const DESCRIPTION: Locator = Locator::Text("p.text.ellipsis");
const ADMINISTRATION: Locator = Locator::Text("div.col-lg-3.column p.text.ellipsis");

/// Accordion label -> zone name.
const ACCORDION_FIELDS: &[(&str, &str)] = &[
    ("data_apertura", "data di apertura"),
    ("area_geografica", "area geografica"),
    ("destinatari", "destinatari"),
    ("tipologia", "tipologia"),
];

/// Accordion lines that are UI chrome rather than values.
const ACCORDION_CHROME: &[&str] = &["focus", "pnrr", "mostra", "nascondi", "vai"];

#[derive(Debug, Clone, Copy, Default)]
pub struct ItaliaDomaniAdapter;

impl ItaliaDomaniAdapter {
    fn parse_row(&self, row: ElementRef<'_>, base: &Url) -> ListingRecord {
        let mut record = ListingRecord {
            identifier: locate_first(row, ID_CHAIN),
            title: locate_first(row, TITLE_CHAIN).unwrap_or_default(),
            ..Default::default()
        };

        if let Some(href) = locate_first(row, LINK_CHAIN) {
            match resolve(base, &href) {
                Ok(url) => record.detail_url = url,
                Err(err) => record.error = Some(err.to_string()),
            }
        }
        if let Some(description) = DESCRIPTION.locate(row) {
            record.extra_columns.insert("descrizione".into(), description);
        }
        if let Some(admin) = ADMINISTRATION.locate(row) {
            record.extra_columns.insert("amministrazione_titolare".into(), admin);
        }

        read_status_columns(row, &mut record);
        read_accordion(row, &mut record);
        record
    }
}

/// `col-lg-2` columns carry the status and/or the closing date.
fn read_status_columns(row: ElementRef<'_>, record: &mut ListingRecord) {
    for column in select_all(row, "div.col-lg-2.column") {
        if let Some(status) = locate_first(column, LISTING_STATUS_CHAIN) {
            if record.raw_status.is_none() {
                record.raw_status = Some(status);
            }
            continue;
        }
        let Some(date_text) = select_first(column, "p.text").map(element_text) else {
            continue;
        };
        if !date_text.is_empty() && !looks_like_status(&date_text) && record.close_date.is_empty() {
            record.close_date = date_text;
        }
    }
}

fn read_accordion(row: ElementRef<'_>, record: &mut ListingRecord) {
    let Some(accordion) = select_first(row, "div.col-12.column div.accordion") else {
        return;
    };

    let text = accordion.text().collect::<Vec<_>>().join("\n");
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    for pair in lines.windows(2) {
        let (label, value) = (pair[0].to_lowercase(), pair[1]);
        for (zone, pattern) in ACCORDION_FIELDS {
            if !label.contains(pattern) || zone_is_set(record, zone) {
                continue;
            }
            let lowered = value.to_lowercase();
            if !ACCORDION_CHROME.iter().any(|c| lowered.contains(c)) {
                set_zone(record, zone, clean_text(value));
                break;
            }
        }
    }

    if let Some(focus) = select_first(accordion, "div.focus-item") {
        if let Some(title) = select_first(focus, "h5.item-title").map(element_text) {
            record.extra_columns.insert("focus_pnrr".into(), title);
        }
        if let Some(info) = select_first(focus, "div.focus-info-content div.single-info p")
            .and_then(|p| text_or_none(element_text(p)))
        {
            record.extra_columns.insert("descrizione_fondo_pnrr".into(), info);
        }
    }
}

fn zone_is_set(record: &ListingRecord, zone: &str) -> bool {
    match zone {
        "data_apertura" => !record.open_date.is_empty(),
        other => record.extra_columns.contains_key(other),
    }
}

fn set_zone(record: &mut ListingRecord, zone: &str, value: String) {
    match zone {
        "data_apertura" => record.open_date = value,
        other => {
            record.extra_columns.insert(other.to_string(), value);
        }
    }
}

#[async_trait::async_trait]
impl SourceAdapter for ItaliaDomaniAdapter {
    fn source_id(&self) -> &'static str {
        "italiadomani"
    }

    fn default_listing_url(&self) -> &'static str {
        LISTING_URL
    }

    fn pagination(&self) -> Pagination {
        Pagination::Offset { page_size: PAGE_SIZE }
    }

    fn listing_request(&self, ctx: &ListingContext, cursor: PageCursor) -> PageRequest {
        let url = if cursor.offset == 0 {
            ctx.listing_url.clone()
        } else {
            with_query_param(&ctx.listing_url, "resultsOffset", cursor.offset)
        };
        PageRequest::get(url).with_header("Referer", REFERER)
    }

    fn parse_listing(&self, body: &str, _page_url: &str) -> Result<ListingPage, AdapterError> {
        let base = parse_base(BASE_URL)?;
        let document = Html::parse_document(body);
        let rows = select_all(document.root_element(), "div.item-wrapper");
        debug!(rows = rows.len(), "italiadomani rows found");
        Ok(ListingPage {
            raw_count: rows.len(),
            rows: rows.into_iter().map(|row| self.parse_row(row, &base)).collect(),
        })
    }

    fn parse_detail(&self, html: &str, url: &str, fetched_at: DateTime<Utc>) -> DetailRecord {
        extract_detail(html, url, fetched_at, &DetailProfile::default())
    }
}
