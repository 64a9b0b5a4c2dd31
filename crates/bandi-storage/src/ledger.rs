//! `to_scrape.json`: url -> pipeline status map shared with downstream stages.

use std::path::{Path, PathBuf};

use bandi_core::LinkStatus;
use indexmap::IndexMap;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::sink::PersistenceError;

/// Insertion-ordered ledger. A `null` value (left behind by a failed
/// summarization downstream) is kept as `None`.
#[derive(Debug, Clone, Default)]
pub struct LinkLedger {
    path: PathBuf,
    entries: IndexMap<String, Option<LinkStatus>>,
}

impl LinkLedger {
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: IndexMap::new(),
        }
    }

    /// A missing file is an empty ledger.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        let exists = fs::try_exists(&path)
            .await
            .map_err(|source| PersistenceError::Io {
                path: path.clone(),
                source,
            })?;
        if !exists {
            return Ok(Self::empty(path));
        }
        let raw = fs::read_to_string(&path)
            .await
            .map_err(|source| PersistenceError::Io {
                path: path.clone(),
                source,
            })?;
        let entries = if raw.trim().is_empty() {
            IndexMap::new()
        } else {
            serde_json::from_str(&raw)?
        };
        Ok(Self { path, entries })
    }

    /// Rewrites the ledger through a temp file + rename.
    pub async fn save(&self) -> Result<(), PersistenceError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| PersistenceError::Io { path, source }
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(io_err(parent))?;
        }
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "to_scrape.json".to_string());
        let temp_path = self.path.with_file_name(format!(".{file_name}.tmp"));

        let bytes = serde_json::to_vec_pretty(&self.entries)?;
        let mut file = fs::File::create(&temp_path).await.map_err(io_err(&temp_path))?;
        file.write_all(&bytes).await.map_err(io_err(&temp_path))?;
        file.flush().await.map_err(io_err(&temp_path))?;
        drop(file);

        if let Err(source) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(PersistenceError::Io {
                path: self.path.clone(),
                source,
            });
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.contains_key(url)
    }

    pub fn status(&self, url: &str) -> Option<LinkStatus> {
        self.entries.get(url).copied().flatten()
    }

    /// Adds `url` as pending. Known URLs are left untouched.
    pub fn insert_pending(&mut self, url: impl Into<String>) -> bool {
        let url = url.into();
        if self.entries.contains_key(&url) {
            return false;
        }
        self.entries.insert(url, Some(LinkStatus::Pending));
        true
    }

    pub fn set_status(&mut self, url: &str, status: LinkStatus) {
        if let Some(slot) = self.entries.get_mut(url) {
            *slot = Some(status);
        } else {
            self.entries.insert(url.to_string(), Some(status));
        }
    }

    pub fn pending(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, status)| **status == Some(LinkStatus::Pending))
            .map(|(url, _)| url.clone())
            .collect()
    }

    pub fn count(&self, status: LinkStatus) -> usize {
        self.entries.values().filter(|s| **s == Some(status)).count()
    }

    /// Marks every pending entry as failed; returns how many changed.
    pub fn dismiss_pending(&mut self) -> usize {
        let mut dismissed = 0;
        for status in self.entries.values_mut() {
            if *status == Some(LinkStatus::Pending) {
                *status = Some(LinkStatus::Failed);
                dismissed += 1;
            }
        }
        dismissed
    }
}
