//! Core record model shared by the bandi scrapers.
//!
//! Records flow leaf-first: an adapter produces [`ListingRecord`]s from a paged
//! catalog, optionally follows each one into a [`DetailRecord`], the two are
//! merged into a [`ScrapedRecord`], and the normalizer flattens that into a
//! [`NormalizedOutputRow`] for the tabular sink.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "bandi-core";

/// One `{label, url}` entry of a links/documents section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEntry {
    pub label: String,
    pub url: String,
}

/// Content captured under one heading of a detail page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SectionValue {
    Text(String),
    Links(Vec<LinkEntry>),
}

impl SectionValue {
    /// Single-string rendering used for tabular output.
    pub fn flatten(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Links(links) => links
                .iter()
                .map(|l| format!("{}: {}", l.label, l.url))
                .collect::<Vec<_>>()
                .join("; "),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.trim().is_empty(),
            Self::Links(links) => links.is_empty(),
        }
    }
}

/// Heading title -> content, in document order.
pub type Sections = IndexMap<String, SectionValue>;

/// One compact entry of a paged catalog/search view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ListingRecord {
    pub identifier: Option<String>,
    pub title: String,
    pub detail_url: String,
    pub raw_status: Option<String>,
    pub open_date: String,
    pub close_date: String,
    /// Named zones of the row that have no dedicated field
    /// (`amministrazione_titolare`, `area_geografica`, ...).
    pub extra_columns: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ListingRecord {
    /// Key used for cross-page dedup: identifier, then title, then detail URL.
    pub fn dedup_key(&self) -> Option<&str> {
        self.identifier
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or_else(|| Some(self.title.trim()).filter(|s| !s.is_empty()))
            .or_else(|| Some(self.detail_url.trim()).filter(|s| !s.is_empty()))
    }

    /// Minimal completeness check: a row without a usable title is dropped.
    pub fn is_valid(&self) -> bool {
        !self.title.trim().is_empty()
    }

    pub fn extra(&self, zone: &str) -> Option<&str> {
        self.extra_columns.get(zone).map(String::as_str)
    }
}

/// Result of following a listing row into its detail page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailRecord {
    pub url: String,
    pub page_title: Option<String>,
    pub status: Option<String>,
    pub open_date: Option<String>,
    pub close_date: Option<String>,
    pub sections: Sections,
    pub full_text: String,
    pub fetched_at: DateTime<Utc>,
}

/// A listing row plus whatever its detail page contributed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedRecord {
    pub source_id: String,
    pub listing: ListingRecord,
    pub detail: Option<DetailRecord>,
    pub fetched_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errore: Option<String>,
}

impl ScrapedRecord {
    pub fn from_listing(
        source_id: impl Into<String>,
        listing: ListingRecord,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        let errore = listing.error.clone();
        Self {
            source_id: source_id.into(),
            listing,
            detail: None,
            fetched_at,
            errore,
        }
    }

    /// Attach a detail page. Detail records are keyed by URL: a detail whose
    /// URL differs from the listing's `detail_url` is rejected.
    pub fn merge_detail(&mut self, detail: DetailRecord) -> bool {
        if detail.url != self.listing.detail_url {
            return false;
        }
        self.detail = Some(detail);
        true
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errore = Some(message.into());
    }

    /// Detail page title when present, otherwise the listing title.
    pub fn title(&self) -> &str {
        self.detail
            .as_ref()
            .and_then(|d| d.page_title.as_deref())
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(&self.listing.title)
    }

    pub fn status(&self) -> Option<&str> {
        self.listing
            .raw_status
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.detail.as_ref().and_then(|d| d.status.as_deref()))
    }

    pub fn open_date(&self) -> &str {
        pick_date(
            &self.listing.open_date,
            self.detail.as_ref().and_then(|d| d.open_date.as_deref()),
        )
    }

    pub fn close_date(&self) -> &str {
        pick_date(
            &self.listing.close_date,
            self.detail.as_ref().and_then(|d| d.close_date.as_deref()),
        )
    }

    /// Timestamp of the most recent fetch that contributed to this record.
    pub fn processed_at(&self) -> DateTime<Utc> {
        self.detail.as_ref().map(|d| d.fetched_at).unwrap_or(self.fetched_at)
    }

    pub fn sections(&self) -> impl Iterator<Item = (&str, &SectionValue)> {
        self.detail
            .iter()
            .flat_map(|d| d.sections.iter().map(|(k, v)| (k.as_str(), v)))
    }
}

fn pick_date<'a>(listing: &'a str, detail: Option<&'a str>) -> &'a str {
    if !listing.trim().is_empty() {
        return listing;
    }
    detail.unwrap_or("")
}

/// Canonical output bucket a section title is classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Descrizione,
    Beneficiari,
    Settore,
    Regioni,
    FormaAgevolazione,
    SpesaMinMax,
    Stanziamento,
    SoggettoGestore,
    SitoRiferimento,
    BaseNormativa,
    NoteAggiuntive,
}

impl Bucket {
    pub const ALL: [Bucket; 11] = [
        Bucket::Descrizione,
        Bucket::Beneficiari,
        Bucket::Settore,
        Bucket::Regioni,
        Bucket::FormaAgevolazione,
        Bucket::SpesaMinMax,
        Bucket::Stanziamento,
        Bucket::SoggettoGestore,
        Bucket::SitoRiferimento,
        Bucket::BaseNormativa,
        Bucket::NoteAggiuntive,
    ];

    pub fn column(self) -> &'static str {
        match self {
            Bucket::Descrizione => "descrizione",
            Bucket::Beneficiari => "beneficiari",
            Bucket::Settore => "settore",
            Bucket::Regioni => "regioni",
            Bucket::FormaAgevolazione => "forma_agevolazione",
            Bucket::SpesaMinMax => "spesa_min_max",
            Bucket::Stanziamento => "stanziamento",
            Bucket::SoggettoGestore => "soggetto_gestore",
            Bucket::SitoRiferimento => "sito_riferimento",
            Bucket::BaseNormativa => "base_normativa",
            Bucket::NoteAggiuntive => "note_aggiuntive",
        }
    }

    pub fn from_column(column: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.column() == column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Buckets {
    pub descrizione: String,
    pub beneficiari: String,
    pub settore: String,
    pub regioni: String,
    pub forma_agevolazione: String,
    pub spesa_min_max: String,
    pub stanziamento: String,
    pub soggetto_gestore: String,
    pub sito_riferimento: String,
    pub base_normativa: String,
    pub note_aggiuntive: String,
}

impl Buckets {
    pub fn get(&self, bucket: Bucket) -> &str {
        match bucket {
            Bucket::Descrizione => &self.descrizione,
            Bucket::Beneficiari => &self.beneficiari,
            Bucket::Settore => &self.settore,
            Bucket::Regioni => &self.regioni,
            Bucket::FormaAgevolazione => &self.forma_agevolazione,
            Bucket::SpesaMinMax => &self.spesa_min_max,
            Bucket::Stanziamento => &self.stanziamento,
            Bucket::SoggettoGestore => &self.soggetto_gestore,
            Bucket::SitoRiferimento => &self.sito_riferimento,
            Bucket::BaseNormativa => &self.base_normativa,
            Bucket::NoteAggiuntive => &self.note_aggiuntive,
        }
    }

    pub fn slot_mut(&mut self, bucket: Bucket) -> &mut String {
        match bucket {
            Bucket::Descrizione => &mut self.descrizione,
            Bucket::Beneficiari => &mut self.beneficiari,
            Bucket::Settore => &mut self.settore,
            Bucket::Regioni => &mut self.regioni,
            Bucket::FormaAgevolazione => &mut self.forma_agevolazione,
            Bucket::SpesaMinMax => &mut self.spesa_min_max,
            Bucket::Stanziamento => &mut self.stanziamento,
            Bucket::SoggettoGestore => &mut self.soggetto_gestore,
            Bucket::SitoRiferimento => &mut self.sito_riferimento,
            Bucket::BaseNormativa => &mut self.base_normativa,
            Bucket::NoteAggiuntive => &mut self.note_aggiuntive,
        }
    }
}

/// Fixed tabular columns, in output order.
pub const FIXED_COLUMNS: [&str; 18] = [
    "id_progressivo",
    "titolo",
    "stato",
    "data_apertura",
    "data_chiusura",
    "descrizione",
    "beneficiari",
    "settore",
    "regioni",
    "forma_agevolazione",
    "spesa_min_max",
    "stanziamento",
    "soggetto_gestore",
    "sito_riferimento",
    "base_normativa",
    "note_aggiuntive",
    "link_ufficiale",
    "data_elaborazione",
];

pub const ERROR_COLUMN: &str = "errore";

/// Flattened record written to the tabular sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedOutputRow {
    pub id_progressivo: usize,
    pub titolo: String,
    pub stato: String,
    pub data_apertura: String,
    pub data_chiusura: String,
    #[serde(flatten)]
    pub buckets: Buckets,
    pub link_ufficiale: String,
    pub data_elaborazione: String,
    /// Dynamic columns: raw section titles and listing zones.
    pub extra: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errore: Option<String>,
}

impl NormalizedOutputRow {
    /// Value for `column`; unknown or absent columns yield an empty string.
    pub fn cell(&self, column: &str) -> String {
        match column {
            "id_progressivo" => self.id_progressivo.to_string(),
            "titolo" => self.titolo.clone(),
            "stato" => self.stato.clone(),
            "data_apertura" => self.data_apertura.clone(),
            "data_chiusura" => self.data_chiusura.clone(),
            "link_ufficiale" => self.link_ufficiale.clone(),
            "data_elaborazione" => self.data_elaborazione.clone(),
            ERROR_COLUMN => self.errore.clone().unwrap_or_default(),
            other => match Bucket::from_column(other) {
                Some(bucket) => self.buckets.get(bucket).to_string(),
                None => self.extra.get(other).cloned().unwrap_or_default(),
            },
        }
    }
}

/// Pipeline state of a URL in the `to_scrape` ledger consumed downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    #[serde(rename = "")]
    Pending,
    ToSummarize,
    Summarized,
    Reconstructed,
    Failed,
}
