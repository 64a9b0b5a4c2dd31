//! One scrape run per source: listing walk, detail pages, normalization,
//! snapshot.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bandi_adapters::{adapter_for_source, SourceAdapter};
use bandi_core::ScrapedRecord;
use bandi_storage::{
    FetchError, FetchMetadata, FetchedPage, PageFetcher, PageRequest, RunFiles, RunSink,
    TieredFetcher,
};
use chrono::{Local, Utc};
use serde::Serialize;
use tokio::fs;
use tracing::{info, info_span, warn, Instrument};

use crate::config::{ScrapeConfig, SourceConfig, SourceRegistry};
use crate::normalize::{build_table, normalize, RunRecord};
use crate::paginate::{fetch_all, PaginationSettings};

/// Reads non-http(s) URLs from disk and hands everything else to `remote`.
/// Lets a listing (the obiettivoeuropa index) live in a local file.
pub struct LocalFileFetcher {
    remote: Box<dyn PageFetcher>,
}

impl LocalFileFetcher {
    pub fn new(remote: Box<dyn PageFetcher>) -> Self {
        Self { remote }
    }
}

fn is_remote(url: &str) -> bool {
    let lowered = url.trim_start().to_ascii_lowercase();
    lowered.starts_with("http://") || lowered.starts_with("https://")
}

#[async_trait]
impl PageFetcher for LocalFileFetcher {
    async fn fetch_page(&self, request: &PageRequest) -> Result<FetchedPage, FetchError> {
        if is_remote(&request.url) {
            return self.remote.fetch_page(request).await;
        }
        let path = request.url.strip_prefix("file://").unwrap_or(&request.url);
        let body = fs::read_to_string(path)
            .await
            .map_err(|e| FetchError::Unexpected {
                url: request.url.clone(),
                message: e.to_string(),
            })?;
        let mut metadata = FetchMetadata::start(&request.url);
        metadata.attempts = 1;
        Ok(FetchedPage {
            final_url: request.url.clone(),
            body,
            metadata,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub source_id: String,
    pub dataset: String,
    pub pages_fetched: usize,
    pub records: usize,
    pub skipped_invalid: usize,
    pub duplicates: usize,
    pub detail_errors: usize,
    /// `None` when the run found nothing and wrote nothing.
    pub files: Option<RunFiles>,
}

pub struct ScrapePipeline {
    config: ScrapeConfig,
    fetcher: Box<dyn PageFetcher>,
    sink: RunSink,
}

impl ScrapePipeline {
    pub fn new(config: ScrapeConfig) -> Result<Self> {
        let tiered = TieredFetcher::new(config.http_config()).context("building http clients")?;
        let fetcher = LocalFileFetcher::new(Box::new(tiered));
        Ok(Self::with_fetcher(config, Box::new(fetcher)))
    }

    pub fn with_fetcher(config: ScrapeConfig, fetcher: Box<dyn PageFetcher>) -> Self {
        let sink = RunSink::new(config.output_dir.clone());
        Self {
            config,
            fetcher,
            sink,
        }
    }

    pub fn config(&self) -> &ScrapeConfig {
        &self.config
    }

    pub fn fetcher(&self) -> &dyn PageFetcher {
        self.fetcher.as_ref()
    }

    pub async fn run_source(&self, source: &SourceConfig) -> Result<RunSummary> {
        let adapter = adapter_for_source(&source.source_id)
            .with_context(|| format!("no adapter registered for {}", source.source_id))?;
        let span = info_span!("scrape", source = %source.source_id);
        self.run_with_adapter(source, adapter.as_ref()).instrument(span).await
    }

    async fn run_with_adapter(
        &self,
        source: &SourceConfig,
        adapter: &dyn SourceAdapter,
    ) -> Result<RunSummary> {
        let listing_url = source
            .listing_url
            .as_deref()
            .unwrap_or_else(|| adapter.default_listing_url());
        let pagination = match source.page_size {
            Some(size) => adapter.pagination().with_page_size(size),
            None => adapter.pagination(),
        };
        info!(listing_url, ?pagination, "starting listing walk");

        let mut ctx = adapter
            .prepare(self.fetcher(), listing_url)
            .await
            .with_context(|| format!("preparing listing for {}", source.source_id))?;
        ctx.filters
            .extend(source.filters.iter().map(|(k, v)| (k.clone(), v.clone())));
        let settings = PaginationSettings {
            delay: self.config.delay,
            max_empty_pages: self.config.max_empty_pages,
            max_records: self.config.max_records,
            max_pages: source.max_pages.or(adapter.max_pages()),
        };
        let mut outcome = fetch_all(self.fetcher(), adapter, &ctx, pagination, &settings).await;
        if let Some(prefix) = source.valid_prefix.as_deref() {
            let before = outcome.records.len();
            outcome
                .records
                .retain(|r| r.detail_url.is_empty() || r.detail_url.starts_with(prefix));
            let dropped = before - outcome.records.len();
            if dropped > 0 {
                info!(prefix, dropped, "dropped rows linking outside the source");
                outcome.skipped_invalid += dropped;
            }
        }

        let mut summary = RunSummary {
            source_id: source.source_id.clone(),
            dataset: source.dataset.clone(),
            pages_fetched: outcome.pages_fetched,
            records: outcome.records.len(),
            skipped_invalid: outcome.skipped_invalid,
            duplicates: outcome.duplicates,
            detail_errors: 0,
            files: None,
        };
        if outcome.records.is_empty() {
            info!("no records found, nothing written");
            return Ok(summary);
        }

        let listed_at = Utc::now();
        let mut records: Vec<ScrapedRecord> = outcome
            .records
            .into_iter()
            .map(|listing| ScrapedRecord::from_listing(&source.source_id, listing, listed_at))
            .collect();

        if source.follow_details && adapter.follows_details() {
            summary.detail_errors = self.fetch_details(adapter, &mut records).await;
        }

        let rows: Vec<_> = records
            .iter()
            .enumerate()
            .map(|(index, record)| normalize(record, index + 1))
            .collect();
        let table = build_table(&rows, source.schema);
        let dump: Vec<RunRecord<'_>> = rows
            .iter()
            .zip(&records)
            .map(|(normalized, raw)| RunRecord { normalized, raw })
            .collect();

        let files = self
            .sink
            .persist(&source.dataset, Local::now().naive_local(), &dump, &table)
            .await
            .with_context(|| format!("persisting {}", source.dataset))?;
        summary.files = Some(files);
        Ok(summary)
    }

    /// Follow every record's detail link; a failed fetch is recorded on the
    /// record and the batch carries on. Returns the number of failures.
    async fn fetch_details(
        &self,
        adapter: &dyn SourceAdapter,
        records: &mut [ScrapedRecord],
    ) -> usize {
        let mut failures = 0;
        for record in records.iter_mut() {
            let url = record.listing.detail_url.clone();
            if url.is_empty() {
                continue;
            }
            tokio::time::sleep(self.config.delay).await;
            match self.fetcher.fetch_page(&PageRequest::get(url.as_str())).await {
                Ok(page) => {
                    // Links resolve against where the page ended up; the
                    // record stays keyed by the listing's URL.
                    let mut detail = adapter.parse_detail(&page.body, &page.final_url, Utc::now());
                    detail.url = url;
                    record.merge_detail(detail);
                }
                Err(err) => {
                    warn!(url = %url, kind = err.kind(), error = %err, "detail page failed");
                    record.record_error(format!("{}: {err}", err.kind()));
                    failures += 1;
                }
            }
        }
        failures
    }

    /// Run every enabled source, or only `only` when given. One source
    /// failing does not stop the others.
    pub async fn run_registry(
        &self,
        registry: &SourceRegistry,
        only: Option<&str>,
    ) -> Result<Vec<RunSummary>> {
        let selected: Vec<&SourceConfig> = match only {
            Some(id) => vec![registry
                .get(id)
                .with_context(|| format!("source {id} is not in the registry"))?],
            None => registry.enabled().collect(),
        };

        let mut summaries = Vec::new();
        for source in selected {
            match self.run_source(source).await {
                Ok(summary) => summaries.push(summary),
                Err(err) => warn!(
                    source = %source.source_id,
                    error = %format!("{err:#}"),
                    "source run failed"
                ),
            }
        }
        Ok(summaries)
    }
}

/// Load the registry named by `config` and run it.
pub async fn run_scrape(config: ScrapeConfig, only: Option<&str>) -> Result<Vec<RunSummary>> {
    let registry = SourceRegistry::load(Path::new(&config.sources_file)).await?;
    let pipeline = ScrapePipeline::new(config)?;
    pipeline.run_registry(&registry, only).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crate::config::SchemaKind;
    use tempfile::tempdir;

    fn fixture_path(rel: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures").join(rel)
    }

    fn fixture(rel: &str) -> String {
        std::fs::read_to_string(fixture_path(rel)).unwrap()
    }

    /// Canned remote site; unknown URLs answer 404.
    struct CannedSite {
        pages: HashMap<String, String>,
    }

    #[async_trait]
    impl PageFetcher for CannedSite {
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

    fn config(output_dir: &Path) -> ScrapeConfig {
        ScrapeConfig {
            output_dir: output_dir.to_path_buf(),
            delay: Duration::ZERO,
            ..ScrapeConfig::default()
        }
    }

    fn source(id: &str, dataset: &str, schema: SchemaKind) -> SourceConfig {
        SourceConfig {
            source_id: id.into(),
            display_name: id.into(),
            enabled: true,
            dataset: dataset.into(),
            listing_url: None,
            page_size: None,
            follow_details: true,
            schema,
            max_pages: None,
            filters: Default::default(),
            valid_prefix: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn local_index_with_remote_details_is_snapshotted() {
        let dir = tempdir().unwrap();
        let site = CannedSite {
            pages: HashMap::from([(
                "https://www.obiettivoeuropa.com/bandi/horizon-europe-cluster-5".to_string(),
                fixture("obiettivoeuropa/dettaglio_horizon.html"),
            )]),
        };
        let pipeline = ScrapePipeline::with_fetcher(
            config(dir.path()),
            Box::new(LocalFileFetcher::new(Box::new(site))),
        );
        let mut oe = source(
            "obiettivoeuropa",
            "bandi_obiettivoeuropa_dettaglio",
            SchemaKind::Dynamic,
        );
        oe.listing_url = Some(
            fixture_path("obiettivoeuropa/bandi_obiettivoeuropa_api.json")
                .display()
                .to_string(),
        );

        let summary = pipeline.run_source(&oe).await.unwrap();

        assert_eq!(summary.records, 2);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.detail_errors, 1);
        let files = summary.files.expect("files written");
        assert!(files
            .json_path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| {
                n.starts_with("bandi_obiettivoeuropa_dettaglio_") && n.ends_with(".json")
            }));

        let csv = std::fs::read_to_string(&files.csv_path).unwrap();
        let header = csv.lines().next().unwrap();
        assert!(header
            .starts_with("id_progressivo,titolo,stato,data_apertura,data_chiusura,descrizione"));
        assert!(header.contains("Link e Documenti"));
        assert!(header.ends_with(",errore"));

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&files.json_path).unwrap()).unwrap();
        let first = &json[0];
        assert_eq!(first["data_chiusura"], "16/09/2025");
        assert_eq!(
            first["descrizione"],
            "Sostenere la transizione verso un sistema energetico climaticamente neutro. Priorità Batterie, idrogeno, mobilità pulita."
        );
        assert_eq!(
            first["beneficiari"],
            "Enti pubblici, imprese, università e centri di ricerca."
        );
        assert!(first.get("errore").is_none());
        assert!(json[1]["errore"].as_str().is_some_and(|e| e.starts_with("http_status")));
    }

    /// Answers every remote URL with `body`, as if redirected to `final_url`.
    struct Redirected {
        final_url: String,
        body: String,
    }

    #[async_trait]
    impl PageFetcher for Redirected {
        async fn fetch_page(&self, request: &PageRequest) -> Result<FetchedPage, FetchError> {
            Ok(FetchedPage {
                final_url: self.final_url.clone(),
                body: self.body.clone(),
                metadata: FetchMetadata::start(&request.url),
            })
        }
    }

    #[tokio::test]
    async fn detail_links_resolve_against_the_redirect_target() {
        let dir = tempdir().unwrap();
        let site = Redirected {
            final_url: "https://archivio.obiettivoeuropa.it/bandi/horizon".into(),
            body: fixture("obiettivoeuropa/dettaglio_horizon.html"),
        };
        let pipeline = ScrapePipeline::with_fetcher(
            config(dir.path()),
            Box::new(LocalFileFetcher::new(Box::new(site))),
        );
        let mut oe = source("obiettivoeuropa", "bandi_oe", SchemaKind::Dynamic);
        oe.listing_url = Some(
            fixture_path("obiettivoeuropa/bandi_obiettivoeuropa_api.json")
                .display()
                .to_string(),
        );

        let summary = pipeline.run_source(&oe).await.unwrap();

        assert_eq!(summary.detail_errors, 0);
        let files = summary.files.expect("files written");
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&files.json_path).unwrap()).unwrap();
        let detail = &json[0]["raw"]["detail"];
        assert_eq!(
            detail["url"],
            "https://www.obiettivoeuropa.com/bandi/horizon-europe-cluster-5"
        );
        let links = detail["sections"]["Link e Documenti"].as_array().unwrap();
        assert_eq!(links[0]["url"], "https://archivio.obiettivoeuropa.it/doc1.pdf");
        assert_eq!(links[1]["url"], "http://ext.example/doc2.pdf");
    }

    /// Records every request and answers by method: GET with `landing`,
    /// POST with `ajax`.
    struct RecordingSite {
        landing: String,
        ajax: String,
        requests: Arc<Mutex<Vec<PageRequest>>>,
    }

    #[async_trait]
    impl PageFetcher for RecordingSite {
        async fn fetch_page(&self, request: &PageRequest) -> Result<FetchedPage, FetchError> {
            self.requests.lock().unwrap().push(request.clone());
            let body = match request.form {
                Some(_) => self.ajax.clone(),
                None => self.landing.clone(),
            };
            Ok(FetchedPage {
                final_url: request.url.clone(),
                body,
                metadata: FetchMetadata::start(&request.url),
            })
        }
    }

    #[tokio::test]
    async fn configured_filters_reach_the_listing_form() {
        let dir = tempdir().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let site = RecordingSite {
            landing: fixture("interno/landing.html"),
            ajax: fixture("interno/ajax_page_0.json"),
            requests: Arc::clone(&requests),
        };
        let pipeline = ScrapePipeline::with_fetcher(config(dir.path()), Box::new(site));
        let mut interno = source("interno", "bandi_gara", SchemaKind::Dynamic);
        interno.follow_details = false;
        interno.filters.insert("combine".into(), "vigilanza".into());

        let summary = pipeline.run_source(&interno).await.unwrap();

        assert_eq!(summary.records, 2);
        let requests = requests.lock().unwrap();
        let form = requests
            .iter()
            .find_map(|r| r.form.clone())
            .expect("ajax post");
        assert!(form.contains(&("combine".to_string(), "vigilanza".to_string())));
        assert!(form.contains(&(
            "field_tender_notice_source_target_id".to_string(),
            "All".to_string()
        )));
    }

    #[tokio::test]
    async fn rows_outside_the_valid_prefix_are_dropped() {
        let dir = tempdir().unwrap();
        let pipeline = ScrapePipeline::with_fetcher(
            config(dir.path()),
            Box::new(CannedSite {
                pages: HashMap::from([(
                    "https://www.incentivi.gov.it/it/catalogo".to_string(),
                    fixture("incentivi/catalogo.html"),
                )]),
            }),
        );
        let mut incentivi = source("incentivi", "incentivi_completi", SchemaKind::Fixed);
        incentivi.follow_details = false;
        incentivi.valid_prefix = Some("https://www.incentivi.gov.it/it/catalogo/voucher".into());

        let summary = pipeline.run_source(&incentivi).await.unwrap();

        assert_eq!(summary.records, 1);
        assert_eq!(summary.skipped_invalid, 2);
        let csv = std::fs::read_to_string(summary.files.unwrap().csv_path).unwrap();
        assert_eq!(csv.lines().count(), 2);
        assert!(!csv.lines().next().unwrap().contains("errore"));
    }

    #[tokio::test]
    async fn empty_listing_writes_nothing() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out");
        let pipeline = ScrapePipeline::with_fetcher(
            config(&out),
            Box::new(CannedSite {
                pages: HashMap::from([(
                    "https://www.incentivi.gov.it/it/catalogo".to_string(),
                    "<html><body><p>Nessun incentivo</p></body></html>".to_string(),
                )]),
            }),
        );

        let summary = pipeline
            .run_source(&source("incentivi", "incentivi_completi", SchemaKind::Fixed))
            .await
            .unwrap();

        assert_eq!(summary.records, 0);
        assert!(summary.files.is_none());
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn unknown_source_is_an_error() {
        let dir = tempdir().unwrap();
        let pipeline = ScrapePipeline::with_fetcher(
            config(dir.path()),
            Box::new(CannedSite { pages: HashMap::new() }),
        );
        let err = pipeline
            .run_source(&source("sconosciuta", "x", SchemaKind::Fixed))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("sconosciuta"));
    }

    #[tokio::test]
    async fn missing_local_file_is_an_unexpected_fetch_error() {
        let fetcher = LocalFileFetcher::new(Box::new(CannedSite { pages: HashMap::new() }));
        let err = fetcher
            .fetch_page(&PageRequest::get("/nonexistent/index.json"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unexpected");
    }
}
