//! Scraped records to fixed-schema rows, and rows to a CSV table.

use std::collections::BTreeSet;

use bandi_adapters::text::sanitize_cell;
use bandi_core::{
    Bucket, Buckets, NormalizedOutputRow, ScrapedRecord, ERROR_COLUMN, FIXED_COLUMNS,
};
use bandi_storage::CsvTable;
use indexmap::IndexMap;
use serde::Serialize;

use crate::config::SchemaKind;

pub const PROCESSED_AT_FORMAT: &str = "%d/%m/%Y %H:%M";

/// Section-title keywords -> bucket. Evaluated top to bottom, first rule
/// whose keyword is a substring of the lower-cased title wins. Later rules
/// are shadowed by earlier ones ("agevolazione concedibile" never reaches
/// `spesa_min_max`).
pub const BUCKET_RULES: &[(&[&str], Bucket)] = &[
    (
        &["cos'è", "cos’è", "cosa prevede", "descrizione", "obiettivo", "finalità"],
        Bucket::Descrizione,
    ),
    (&["chi si rivolge", "beneficiari", "tipologia soggetto"], Bucket::Beneficiari),
    (&["settore", "ateco"], Bucket::Settore),
    (&["regioni", "ambito territoriale"], Bucket::Regioni),
    (&["forma agevolazione", "agevolazione concedibile"], Bucket::FormaAgevolazione),
    (&["spesa ammessa", "agevolazione concedibile"], Bucket::SpesaMinMax),
    (&["stanziamento"], Bucket::Stanziamento),
    (&["soggetto gestore", "gestore"], Bucket::SoggettoGestore),
    (&["sito", "riferimento"], Bucket::SitoRiferimento),
    (&["base normativa", "normativa"], Bucket::BaseNormativa),
    (&["note", "altre caratteristiche"], Bucket::NoteAggiuntive),
];

pub fn classify_section(title: &str) -> Option<Bucket> {
    let lowered = title.to_lowercase();
    BUCKET_RULES
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(_, bucket)| *bucket)
}

fn is_fixed_column(name: &str) -> bool {
    FIXED_COLUMNS.contains(&name) || name == ERROR_COLUMN
}

/// Flatten one record. Pure: the same record and id always give the same row.
pub fn normalize(record: &ScrapedRecord, id: usize) -> NormalizedOutputRow {
    let mut buckets = Buckets::default();
    let mut extra = IndexMap::new();

    for (zone, value) in &record.listing.extra_columns {
        if !is_fixed_column(zone) {
            extra.insert(zone.clone(), sanitize_cell(value));
        }
    }

    for (title, value) in record.sections() {
        if value.is_empty() {
            continue;
        }
        let flat = sanitize_cell(&value.flatten());
        if let Some(bucket) = classify_section(title) {
            let slot = buckets.slot_mut(bucket);
            // The first description wins; every other bucket keeps the last.
            if bucket != Bucket::Descrizione || slot.is_empty() {
                *slot = flat.clone();
            }
        }
        if !is_fixed_column(title) {
            extra.insert(title.to_string(), flat);
        }
    }

    if buckets.descrizione.is_empty() {
        if let Some(description) = record.listing.extra("descrizione") {
            buckets.descrizione = sanitize_cell(description);
        }
    }

    NormalizedOutputRow {
        id_progressivo: id,
        titolo: sanitize_cell(record.title()),
        stato: record.status().map(sanitize_cell).unwrap_or_default(),
        data_apertura: record.open_date().trim().to_string(),
        data_chiusura: record.close_date().trim().to_string(),
        buckets,
        link_ufficiale: record.listing.detail_url.trim().to_string(),
        data_elaborazione: record.processed_at().format(PROCESSED_AT_FORMAT).to_string(),
        extra,
        errore: record.errore.as_deref().map(sanitize_cell),
    }
}

/// Header row for a run: the fixed columns, then (dynamic schema only) every
/// extra column seen in any row sorted by name, then `errore` when any row
/// carries one.
pub fn table_headers(rows: &[NormalizedOutputRow], schema: SchemaKind) -> Vec<String> {
    let mut headers: Vec<String> = FIXED_COLUMNS.iter().map(|c| c.to_string()).collect();
    if schema == SchemaKind::Dynamic {
        let discovered: BTreeSet<&str> = rows
            .iter()
            .flat_map(|row| row.extra.keys().map(String::as_str))
            .filter(|name| !is_fixed_column(name))
            .collect();
        headers.extend(discovered.into_iter().map(str::to_string));
    }
    if rows.iter().any(|row| row.errore.is_some()) {
        headers.push(ERROR_COLUMN.to_string());
    }
    headers
}

pub fn build_table(rows: &[NormalizedOutputRow], schema: SchemaKind) -> CsvTable {
    let headers = table_headers(rows, schema);
    let rows = rows
        .iter()
        .map(|row| headers.iter().map(|h| row.cell(h)).collect())
        .collect();
    CsvTable { headers, rows }
}

/// JSON shape of one persisted record: the flattened row next to everything
/// it was built from.
#[derive(Debug, Serialize)]
pub struct RunRecord<'a> {
    #[serde(flatten)]
    pub normalized: &'a NormalizedOutputRow,
    pub raw: &'a ScrapedRecord,
}
