use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use bandi_adapters::{adapter_for_source, PageCursor, SourceAdapter};
use bandi_core::{LinkEntry, SectionValue};
use bandi_storage::{FetchError, FetchMetadata, FetchedPage, PageFetcher, PageRequest};
use chrono::Utc;

const DETAIL_URL: &str =
    "https://www.interno.gov.it/it/amministrazione-trasparente/bandi-gara-e-contratti/procedura-aperta-servizi-pulizia";

fn fixture(rel: &str) -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures").join(rel);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("reading {}: {e}", path.display()))
}

fn adapter() -> Box<dyn SourceAdapter> {
    adapter_for_source("interno").expect("adapter")
}

/// Serves one canned body and records the requested URLs.
struct CannedFetcher {
    body: Option<String>,
    requested: Mutex<Vec<String>>,
}

#[async_trait]
impl PageFetcher for CannedFetcher {
    async fn fetch_page(&self, request: &PageRequest) -> Result<FetchedPage, FetchError> {
        self.requested.lock().unwrap().push(request.url.clone());
        match &self.body {
            Some(body) => Ok(FetchedPage {
                final_url: request.url.clone(),
                body: body.clone(),
                metadata: FetchMetadata::start(&request.url),
            }),
            None => Err(FetchError::HttpStatus {
                status: 503,
                url: request.url.clone(),
            }),
        }
    }
}

#[tokio::test]
async fn landing_page_yields_view_dom_id_for_ajax_paging() {
    let adapter = adapter();
    let fetcher = CannedFetcher {
        body: Some(fixture("interno/landing.html")),
        requested: Mutex::new(Vec::new()),
    };
    let ctx = adapter
        .prepare(&fetcher, adapter.default_listing_url())
        .await
        .expect("prepare");
    assert_eq!(ctx.view_token.as_deref(), Some("9c1f5e0d2b7a4e31"));
    assert_eq!(*fetcher.requested.lock().unwrap(), [adapter.default_listing_url()]);

    let request = adapter.listing_request(&ctx, PageCursor { page_index: 1, offset: 10 });
    let form = request.form.expect("form");
    assert!(form.contains(&("view_dom_id".to_string(), "9c1f5e0d2b7a4e31".to_string())));
    assert!(form.contains(&("page".to_string(), "1".to_string())));
}

#[tokio::test]
async fn unreachable_landing_page_still_allows_paging() {
    let adapter = adapter();
    let fetcher = CannedFetcher {
        body: None,
        requested: Mutex::new(Vec::new()),
    };
    let ctx = adapter
        .prepare(&fetcher, adapter.default_listing_url())
        .await
        .expect("prepare degrades");
    assert_eq!(ctx.view_token, None);
}

#[test]
fn ajax_rows_carry_procurement_fields() {
    let page = adapter()
        .parse_listing(&fixture("interno/ajax_page_0.json"), "")
        .expect("ajax page");
    assert_eq!(page.raw_count, 2);

    let full = &page.rows[0];
    assert_eq!(full.title, "Procedura aperta per i servizi di pulizia delle sedi centrali");
    assert_eq!(full.detail_url, DETAIL_URL);
    assert_eq!(full.identifier.as_deref(), Some(DETAIL_URL));
    assert_eq!(full.open_date, "2025-03-10T12:00:00Z");
    assert_eq!(full.close_date, "2025-04-30T12:00:00Z");
    assert_eq!(full.extra("data_atto"), Some("2025-03-10T12:00:00Z"));
    assert_eq!(full.extra("origine"), Some("Dipartimento per l'amministrazione generale"));
    assert_eq!(full.extra("ufficio"), Some("Ufficio contratti"));
    assert_eq!(full.extra("cig"), Some("A01B2C3D4E"));
    assert!(full.extra("link_anac").is_some_and(|l| l.ends_with("cig=A01B2C3D4E")));

    let sparse = &page.rows[1];
    assert_eq!(sparse.title, "Fornitura di veicoli per le Prefetture");
    assert_eq!(sparse.close_date, "");
    assert_eq!(sparse.extra("cig"), None);
}

#[test]
fn detail_page_adds_body_and_attachments() {
    let html = fixture("interno/dettaglio_pulizia.html");
    let detail = adapter().parse_detail(&html, DETAIL_URL, Utc::now());

    assert_eq!(
        detail.page_title.as_deref(),
        Some("Procedura aperta per i servizi di pulizia delle sedi centrali")
    );
    assert!(matches!(
        &detail.sections["Descrizione"],
        SectionValue::Text(body) if body.starts_with("Procedura aperta ai sensi del d.lgs. 36/2023")
    ));
    assert_eq!(
        detail.sections["Allegati"],
        SectionValue::Links(vec![
            LinkEntry {
                label: "Bando di gara".into(),
                url: "https://www.interno.gov.it/sites/default/files/2025-03/bando.pdf".into(),
            },
            LinkEntry {
                label: "Disciplinare".into(),
                url: "https://www.interno.gov.it/sites/default/files/2025-03/disciplinare.pdf".into(),
            },
        ])
    );
}
