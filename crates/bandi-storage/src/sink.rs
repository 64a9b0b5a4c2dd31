//! Timestamped JSON + CSV snapshot per run.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("refusing to overwrite existing file {}", .0.display())]
    AlreadyExists(PathBuf),
    #[error("json encoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("csv encoding failed: {0}")]
    Csv(#[from] csv::Error),
}

/// Header row plus data rows, already flattened to strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvTable {
    pub fn encode(&self) -> Result<Vec<u8>, PersistenceError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush().map_err(|source| PersistenceError::Io {
            path: PathBuf::from("<csv buffer>"),
            source,
        })?;
        writer.into_inner().map_err(|e| PersistenceError::Io {
            path: PathBuf::from("<csv buffer>"),
            source: e.into_error(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunFiles {
    pub json_path: PathBuf,
    pub csv_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RunSink {
    output_dir: PathBuf,
}

impl RunSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn file_stem(dataset: &str, stamp: NaiveDateTime) -> String {
        format!("{dataset}_{}", stamp.format("%Y%m%d_%H%M%S"))
    }

    pub fn paths_for(&self, dataset: &str, stamp: NaiveDateTime) -> RunFiles {
        let stem = Self::file_stem(dataset, stamp);
        RunFiles {
            json_path: self.output_dir.join(format!("{stem}.json")),
            csv_path: self.output_dir.join(format!("{stem}.csv")),
        }
    }

    /// Write `<dataset>_<stamp>.json` and `.csv`. Neither file may already exist.
    pub async fn persist<T: Serialize>(
        &self,
        dataset: &str,
        stamp: NaiveDateTime,
        records: &[T],
        table: &CsvTable,
    ) -> Result<RunFiles, PersistenceError> {
        fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|source| PersistenceError::Io {
                path: self.output_dir.clone(),
                source,
            })?;

        let files = self.paths_for(dataset, stamp);
        for path in [&files.json_path, &files.csv_path] {
            if fs::try_exists(path).await.map_err(|source| PersistenceError::Io {
                path: path.clone(),
                source,
            })? {
                return Err(PersistenceError::AlreadyExists(path.clone()));
            }
        }

        let json = serde_json::to_vec_pretty(records)?;
        let csv = table.encode()?;
        write_new(&files.json_path, &json).await?;
        write_new(&files.csv_path, &csv).await?;

        info!(
            json = %files.json_path.display(),
            csv = %files.csv_path.display(),
            records = records.len(),
            "run snapshot written"
        );
        Ok(files)
    }
}

async fn write_new(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    let io_err = |source: std::io::Error| {
        if source.kind() == std::io::ErrorKind::AlreadyExists {
            PersistenceError::AlreadyExists(path.to_path_buf())
        } else {
            PersistenceError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    };
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(path)
        .await
        .map_err(io_err)?;
    file.write_all(bytes).await.map_err(io_err)?;
    file.flush().await.map_err(io_err)?;
    Ok(())
}
