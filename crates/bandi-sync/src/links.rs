//! News-link discovery and maintenance of the `to_scrape` ledger.

use std::time::Duration;

use anyhow::{Context, Result};
use bandi_adapters::links::page_links;
use bandi_core::LinkStatus;
use bandi_storage::{LinkLedger, PageFetcher, PageRequest};
use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};

pub const DEFAULT_DISCOVER_LIMIT: usize = 3;

/// Collect up to `limit` new links from `index_url` and queue them as
/// pending. Only links starting with `valid_prefix` (the index URL when
/// unset) are kept; links already in the ledger are skipped.
pub async fn discover(
    fetcher: &dyn PageFetcher,
    ledger: &mut LinkLedger,
    index_url: &str,
    valid_prefix: Option<&str>,
    limit: usize,
) -> Result<Vec<String>> {
    let page = fetcher
        .fetch_page(&PageRequest::get(index_url))
        .await
        .with_context(|| format!("fetching index {index_url}"))?;
    let prefix = valid_prefix.unwrap_or(index_url);

    let selected: Vec<String> = page_links(&page.body, &page.final_url)
        .into_iter()
        .filter(|link| !ledger.contains(link))
        .filter(|link| link.starts_with(prefix))
        .take(limit)
        .collect();

    for link in &selected {
        ledger.insert_pending(link.clone());
    }
    info!(index_url, prefix, queued = selected.len(), "links discovered");
    Ok(selected)
}

#[derive(Debug, Clone, Copy)]
pub struct RetrySettings {
    pub batch_size: usize,
    pub batch_delay: Duration,
    /// Pause after each request, drawn uniformly from this range.
    pub request_delay: (Duration, Duration),
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_delay: Duration::from_secs(60),
            request_delay: (Duration::from_secs(1), Duration::from_secs(3)),
        }
    }
}

impl RetrySettings {
    fn pause(&self) -> Duration {
        let (low, high) = self.request_delay;
        if high <= low {
            return low;
        }
        let low_ms = low.as_millis() as u64;
        let high_ms = high.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(low_ms..=high_ms))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetryReport {
    pub attempted: usize,
    pub recovered: usize,
    pub failed: usize,
}

/// Re-fetch every pending link in batches. A fetched link moves to
/// `to_summarize`, one that still fails to `failed`. The ledger is saved
/// after every link.
pub async fn retry_failed(
    fetcher: &dyn PageFetcher,
    ledger: &mut LinkLedger,
    settings: &RetrySettings,
) -> Result<RetryReport> {
    let pending = ledger.pending();
    let mut report = RetryReport::default();
    info!(pending = pending.len(), "retrying pending links");

    let batch_size = settings.batch_size.max(1);
    let batches: Vec<&[String]> = pending.chunks(batch_size).collect();
    for (index, batch) in batches.iter().enumerate() {
        info!(batch = index + 1, size = batch.len(), "processing batch");
        for url in batch.iter() {
            report.attempted += 1;
            match fetcher.fetch_page(&PageRequest::get(url.as_str())).await {
                Ok(page) => {
                    info!(
                        url = %url,
                        method = ?page.metadata.method_used,
                        attempts = page.metadata.attempts,
                        "link recovered"
                    );
                    ledger.set_status(url, LinkStatus::ToSummarize);
                    report.recovered += 1;
                }
                Err(err) => {
                    warn!(url = %url, kind = err.kind(), error = %err, "link still failing");
                    ledger.set_status(url, LinkStatus::Failed);
                    report.failed += 1;
                }
            }
            ledger.save().await.context("saving link ledger")?;
            tokio::time::sleep(settings.pause()).await;
        }
        if index + 1 < batches.len() {
            info!(seconds = settings.batch_delay.as_secs(), "waiting before next batch");
            tokio::time::sleep(settings.batch_delay).await;
        }
    }
    Ok(report)
}

/// Give up on every pending link.
pub async fn dismiss_failed(ledger: &mut LinkLedger) -> Result<usize> {
    let dismissed = ledger.dismiss_pending();
    ledger.save().await.context("saving link ledger")?;
    info!(dismissed, "pending links marked failed");
    Ok(dismissed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use async_trait::async_trait;
    use bandi_storage::{FetchError, FetchMetadata, FetchedPage};
    use tempfile::tempdir;

    struct StaticSite {
        pages: HashMap<String, String>,
    }

    #[async_trait]
    impl PageFetcher for StaticSite {
        async fn fetch_page(&self, request: &PageRequest) -> Result<FetchedPage, FetchError> {
            match self.pages.get(&request.url) {
                Some(body) => Ok(FetchedPage {
                    final_url: request.url.clone(),
                    body: body.clone(),
                    metadata: FetchMetadata::start(&request.url),
                }),
                None => Err(FetchError::HttpStatus {
                    status: 404,
                    url: request.url.clone(),
                }),
            }
        }
    }

    const INDEX: &str = "https://www.example.it/news/";

    fn site(extra: &[&str]) -> StaticSite {
        let mut pages = HashMap::new();
        pages.insert(
            INDEX.to_string(),
            r#"<ul>
                <li><a href="/news/uno">Uno</a></li>
                <li><a href="/chi-siamo">Chi siamo</a></li>
                <li><a href="/news/due">Due</a></li>
                <li><a href="https://altro.example/news/x">Esterno</a></li>
                <li><a href="/news/tre">Tre</a></li>
                <li><a href="/news/quattro">Quattro</a></li>
            </ul>"#
                .to_string(),
        );
        for url in extra {
            pages.insert(url.to_string(), "<p>ok</p>".to_string());
        }
        StaticSite { pages }
    }

    fn quick() -> RetrySettings {
        RetrySettings {
            batch_size: 2,
            batch_delay: Duration::ZERO,
            request_delay: (Duration::ZERO, Duration::ZERO),
        }
    }

    #[tokio::test]
    async fn discovery_skips_known_and_foreign_links_and_caps() {
        let dir = tempdir().unwrap();
        let mut ledger = LinkLedger::empty(dir.path().join("to_scrape.json"));
        ledger.set_status("https://www.example.it/news/uno", LinkStatus::Summarized);

        let queued = discover(&site(&[]), &mut ledger, INDEX, None, DEFAULT_DISCOVER_LIMIT)
            .await
            .unwrap();

        assert_eq!(
            queued,
            [
                "https://www.example.it/news/due",
                "https://www.example.it/news/tre",
                "https://www.example.it/news/quattro",
            ]
        );
        assert_eq!(ledger.count(LinkStatus::Pending), 3);
        assert_eq!(
            ledger.status("https://www.example.it/news/uno"),
            Some(LinkStatus::Summarized)
        );
    }

    #[tokio::test]
    async fn explicit_prefix_widens_the_filter() {
        let dir = tempdir().unwrap();
        let mut ledger = LinkLedger::empty(dir.path().join("to_scrape.json"));

        let queued = discover(&site(&[]), &mut ledger, INDEX, Some("https://www.example.it/"), 10)
            .await
            .unwrap();
        assert!(queued.contains(&"https://www.example.it/chi-siamo".to_string()));
        assert!(!queued.iter().any(|l| l.contains("altro.example")));
    }

    #[tokio::test]
    async fn retry_moves_links_to_summarize_or_failed_and_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("to_scrape.json");
        let mut ledger = LinkLedger::empty(&path);
        ledger.insert_pending("https://www.example.it/news/ok");
        ledger.insert_pending("https://www.example.it/news/rotta");
        ledger.insert_pending("https://www.example.it/news/ok2");
        ledger.set_status("https://www.example.it/news/vecchia", LinkStatus::Summarized);

        let fetcher = site(&["https://www.example.it/news/ok", "https://www.example.it/news/ok2"]);
        let report = retry_failed(&fetcher, &mut ledger, &quick()).await.unwrap();

        assert_eq!(
            report,
            RetryReport {
                attempted: 3,
                recovered: 2,
                failed: 1,
            }
        );
        let reloaded = LinkLedger::load(&path).await.unwrap();
        assert_eq!(
            reloaded.status("https://www.example.it/news/ok"),
            Some(LinkStatus::ToSummarize)
        );
        assert_eq!(
            reloaded.status("https://www.example.it/news/rotta"),
            Some(LinkStatus::Failed)
        );
        assert_eq!(
            reloaded.status("https://www.example.it/news/vecchia"),
            Some(LinkStatus::Summarized)
        );
    }

    #[tokio::test]
    async fn dismiss_marks_pending_failed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("to_scrape.json");
        let mut ledger = LinkLedger::empty(&path);
        ledger.insert_pending("https://a");
        ledger.insert_pending("https://b");
        ledger.set_status("https://c", LinkStatus::ToSummarize);

        assert_eq!(dismiss_failed(&mut ledger).await.unwrap(), 2);
        let reloaded = LinkLedger::load(&path).await.unwrap();
        assert_eq!(reloaded.count(LinkStatus::Failed), 2);
        assert_eq!(reloaded.count(LinkStatus::ToSummarize), 1);
    }
}
