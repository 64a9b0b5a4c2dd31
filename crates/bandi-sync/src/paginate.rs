//! Listing walk: fetch pages in order, drop invalid rows and repeats, stop
//! when the listing runs dry.

use std::collections::HashSet;
use std::time::Duration;

use bandi_adapters::{ListingContext, ListingPage, PageCursor, Pagination, SourceAdapter};
use bandi_core::ListingRecord;
use bandi_storage::PageFetcher;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct PaginationSettings {
    pub delay: Duration,
    /// Consecutive empty or failed fetches tolerated before giving up.
    pub max_empty_pages: usize,
    pub max_records: Option<usize>,
    /// Distinct listing pages walked at most; retries of a page don't count.
    pub max_pages: Option<usize>,
}

impl Default for PaginationSettings {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            max_empty_pages: 3,
            max_records: None,
            max_pages: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaginationOutcome {
    /// Unique valid rows in listing order.
    pub records: Vec<ListingRecord>,
    pub pages_fetched: usize,
    pub skipped_invalid: usize,
    pub duplicates: usize,
}

async fn fetch_listing_page(
    fetcher: &dyn PageFetcher,
    adapter: &dyn SourceAdapter,
    ctx: &ListingContext,
    cursor: PageCursor,
) -> Option<ListingPage> {
    let request = adapter.listing_request(ctx, cursor);
    let fetched = match fetcher.fetch_page(&request).await {
        Ok(fetched) => fetched,
        Err(err) => {
            warn!(url = %request.url, error = %err, "listing page fetch failed");
            return None;
        }
    };
    match adapter.parse_listing(&fetched.body, &fetched.final_url) {
        Ok(page) => Some(page),
        Err(err) => {
            warn!(url = %request.url, error = %err, "listing page unreadable");
            None
        }
    }
}

/// Walk every page of `adapter`'s listing. A page advances the cursor by one
/// page size; the walk continues only while a full page still brings new rows.
pub async fn fetch_all(
    fetcher: &dyn PageFetcher,
    adapter: &dyn SourceAdapter,
    ctx: &ListingContext,
    pagination: Pagination,
    settings: &PaginationSettings,
) -> PaginationOutcome {
    let mut outcome = PaginationOutcome::default();
    let mut seen = HashSet::new();
    let mut cursor = PageCursor::default();
    let mut empty_streak = 0usize;

    loop {
        outcome.pages_fetched += 1;
        let page = fetch_listing_page(fetcher, adapter, ctx, cursor)
            .await
            .filter(|page| page.raw_count > 0);

        let Some(page) = page else {
            empty_streak += 1;
            warn!(
                source = adapter.source_id(),
                offset = cursor.offset,
                empty_streak,
                max = settings.max_empty_pages,
                "no rows returned"
            );
            if pagination == Pagination::Single || empty_streak >= settings.max_empty_pages {
                break;
            }
            tokio::time::sleep(settings.delay.saturating_mul(2)).await;
            continue;
        };
        empty_streak = 0;

        let raw_count = page.raw_count;
        let mut new_rows = 0usize;
        for row in page.rows {
            if !row.is_valid() {
                outcome.skipped_invalid += 1;
                debug!(identifier = ?row.identifier, "skipping row without title");
                continue;
            }
            let Some(key) = row.dedup_key().map(str::to_string) else {
                outcome.skipped_invalid += 1;
                continue;
            };
            if !seen.insert(key) {
                outcome.duplicates += 1;
                continue;
            }
            outcome.records.push(row);
            new_rows += 1;

            if settings.max_records.is_some_and(|max| outcome.records.len() >= max) {
                info!(
                    source = adapter.source_id(),
                    records = outcome.records.len(),
                    "record cap reached"
                );
                return outcome;
            }
        }

        info!(
            source = adapter.source_id(),
            page = cursor.page_index,
            offset = cursor.offset,
            raw_count,
            new_rows,
            "listing page"
        );

        let Some(page_size) = pagination.page_size() else {
            break;
        };
        if new_rows == 0 || raw_count < page_size {
            break;
        }
        if settings.max_pages.is_some_and(|max| cursor.page_index + 1 >= max) {
            info!(source = adapter.source_id(), pages = cursor.page_index + 1, "page cap reached");
            break;
        }
        cursor.offset += page_size;
        cursor.page_index += 1;
        tokio::time::sleep(settings.delay).await;
    }

    info!(
        source = adapter.source_id(),
        records = outcome.records.len(),
        pages = outcome.pages_fetched,
        "listing complete"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bandi_adapters::AdapterError;
    use bandi_core::DetailRecord;
    use bandi_storage::{FetchError, FetchMetadata, FetchedPage, PageRequest};
    use chrono::{DateTime, Utc};

    /// Rows are `id|title` lines; page URLs are `page-<offset>`.
    struct LineAdapter {
        pagination: Pagination,
    }

    #[async_trait]
    impl SourceAdapter for LineAdapter {
        fn source_id(&self) -> &'static str {
            "lines"
        }

        fn default_listing_url(&self) -> &'static str {
            "page"
        }

        fn pagination(&self) -> Pagination {
            self.pagination
        }

        fn listing_request(&self, ctx: &ListingContext, cursor: PageCursor) -> PageRequest {
            PageRequest::get(format!("{}-{}", ctx.listing_url, cursor.offset))
        }

        fn parse_listing(&self, body: &str, _page_url: &str) -> Result<ListingPage, AdapterError> {
            if body == "garbage" {
                return Err(AdapterError::Payload("garbage".into()));
            }
            let rows: Vec<ListingRecord> = body
                .lines()
                .filter(|l| !l.is_empty())
                .map(|line| {
                    let (id, title) = line.split_once('|').unwrap_or((line, ""));
                    ListingRecord {
                        identifier: Some(id.to_string()),
                        title: title.to_string(),
                        ..Default::default()
                    }
                })
                .collect();
            Ok(ListingPage {
                raw_count: rows.len(),
                rows,
            })
        }

        fn parse_detail(&self, _html: &str, url: &str, fetched_at: DateTime<Utc>) -> DetailRecord {
            DetailRecord {
                url: url.to_string(),
                page_title: None,
                status: None,
                open_date: None,
                close_date: None,
                sections: Default::default(),
                full_text: String::new(),
                fetched_at,
            }
        }
    }

    /// Serves each URL's queued responses in order; the last one repeats.
    struct ScriptedPages {
        pages: Mutex<HashMap<String, Vec<Result<String, FetchError>>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedPages {
        fn new(pages: Vec<(&str, Vec<Result<String, FetchError>>)>) -> Self {
            Self {
                pages: Mutex::new(pages.into_iter().map(|(k, v)| (k.to_string(), v)).collect()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageFetcher for ScriptedPages {
        async fn fetch_page(&self, request: &PageRequest) -> Result<FetchedPage, FetchError> {
            self.calls.lock().unwrap().push(request.url.clone());
            let mut pages = self.pages.lock().unwrap();
            let queue = pages.entry(request.url.clone()).or_default();
            let next = if queue.len() > 1 {
                queue.remove(0)
            } else {
                queue.first().cloned().unwrap_or_else(|| Ok(String::new()))
            };
            next.map(|body| FetchedPage {
                final_url: request.url.clone(),
                body,
                metadata: FetchMetadata::start(&request.url),
            })
        }
    }

    fn rows(range: std::ops::Range<usize>) -> String {
        range.map(|i| format!("b{i}|Bando {i}\n")).collect()
    }

    fn settings() -> PaginationSettings {
        PaginationSettings {
            delay: Duration::ZERO,
            max_empty_pages: 3,
            max_records: None,
            max_pages: None,
        }
    }

    async fn walk(
        fetcher: &ScriptedPages,
        adapter: &LineAdapter,
        settings: &PaginationSettings,
    ) -> PaginationOutcome {
        let ctx = ListingContext::new("page");
        fetch_all(fetcher, adapter, &ctx, adapter.pagination, settings).await
    }

    fn offset_adapter(page_size: usize) -> LineAdapter {
        LineAdapter {
            pagination: Pagination::Offset { page_size },
        }
    }

    #[tokio::test]
    async fn short_second_page_ends_the_walk() {
        let fetcher = ScriptedPages::new(vec![
            ("page-0", vec![Ok(rows(0..20))]),
            ("page-20", vec![Ok(rows(20..23))]),
        ]);
        let adapter = offset_adapter(20);
        let ctx = ListingContext::new("page");

        let outcome = fetch_all(&fetcher, &adapter, &ctx, adapter.pagination, &settings()).await;

        assert_eq!(fetcher.calls(), ["page-0", "page-20"]);
        assert_eq!(outcome.pages_fetched, 2);
        assert_eq!(outcome.records.len(), 23);
        assert_eq!(outcome.records[22].title, "Bando 22");
    }

    #[tokio::test]
    async fn repeated_identifiers_are_kept_once() {
        let mut second = rows(2..4);
        second.push_str("b0|Bando 0 ripetuto\n");
        let fetcher = ScriptedPages::new(vec![
            ("page-0", vec![Ok(rows(0..3))]),
            ("page-3", vec![Ok(second)]),
        ]);
        let adapter = offset_adapter(3);

        let outcome = walk(&fetcher, &adapter, &settings()).await;

        let ids: Vec<_> = outcome.records.iter().filter_map(|r| r.dedup_key()).collect();
        assert_eq!(ids, ["b0", "b1", "b2", "b3"]);
        assert_eq!(outcome.duplicates, 2);
        // page-6 is empty: retried until the empty-page limit.
        assert_eq!(fetcher.calls(), ["page-0", "page-3", "page-6", "page-6", "page-6"]);
    }

    #[tokio::test]
    async fn full_page_of_repeats_stops_the_walk() {
        let fetcher = ScriptedPages::new(vec![
            ("page-0", vec![Ok(rows(0..2))]),
            ("page-2", vec![Ok(rows(0..2))]),
        ]);
        let adapter = offset_adapter(2);

        let outcome = walk(&fetcher, &adapter, &settings()).await;

        assert_eq!(fetcher.calls(), ["page-0", "page-2"]);
        assert_eq!(outcome.records.len(), 2);
    }

    #[tokio::test]
    async fn empty_or_failed_pages_are_retried_up_to_the_limit() {
        let fetcher = ScriptedPages::new(vec![(
            "page-0",
            vec![
                Err(FetchError::Timeout { url: "page-0".into() }),
                Ok("garbage".into()),
                Ok(String::new()),
            ],
        )]);
        let adapter = offset_adapter(20);

        let outcome = walk(&fetcher, &adapter, &settings()).await;

        assert_eq!(fetcher.calls(), ["page-0", "page-0", "page-0"]);
        assert!(outcome.records.is_empty());
    }

    #[tokio::test]
    async fn retry_after_empty_page_resumes_the_same_cursor() {
        let fetcher = ScriptedPages::new(vec![("page-0", vec![Ok(String::new()), Ok(rows(0..5))])]);
        let adapter = offset_adapter(20);

        let outcome = walk(&fetcher, &adapter, &settings()).await;

        assert_eq!(fetcher.calls(), ["page-0", "page-0"]);
        assert_eq!(outcome.records.len(), 5);
    }

    #[tokio::test]
    async fn rows_without_title_are_dropped() {
        let fetcher =
            ScriptedPages::new(vec![("page-0", vec![Ok("b1|Bando 1\nb2|\nb3|  \n".into())])]);
        let adapter = offset_adapter(20);

        let outcome = walk(&fetcher, &adapter, &settings()).await;

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.skipped_invalid, 2);
    }

    #[tokio::test]
    async fn record_cap_truncates_mid_page() {
        let fetcher = ScriptedPages::new(vec![("page-0", vec![Ok(rows(0..20))])]);
        let adapter = offset_adapter(20);
        let settings = PaginationSettings {
            max_records: Some(7),
            ..settings()
        };

        let outcome = walk(&fetcher, &adapter, &settings).await;

        assert_eq!(outcome.records.len(), 7);
        assert_eq!(fetcher.calls(), ["page-0"]);
    }

    #[tokio::test]
    async fn page_cap_stops_a_listing_that_keeps_going() {
        let fetcher = ScriptedPages::new(vec![
            ("page-0", vec![Ok(rows(0..2))]),
            ("page-2", vec![Ok(String::new()), Ok(rows(2..4))]),
            ("page-4", vec![Ok(rows(4..6))]),
        ]);
        let adapter = offset_adapter(2);
        let settings = PaginationSettings {
            max_pages: Some(2),
            ..settings()
        };

        let outcome = walk(&fetcher, &adapter, &settings).await;

        assert_eq!(fetcher.calls(), ["page-0", "page-2", "page-2"]);
        assert_eq!(outcome.records.len(), 4);
    }

    #[tokio::test]
    async fn single_page_listing_is_fetched_once() {
        let fetcher = ScriptedPages::new(vec![("page-0", vec![Ok(rows(0..40))])]);
        let adapter = LineAdapter {
            pagination: Pagination::Single,
        };

        let outcome = walk(&fetcher, &adapter, &settings()).await;

        assert_eq!(outcome.records.len(), 40);
        assert_eq!(fetcher.calls(), ["page-0"]);
    }
}
