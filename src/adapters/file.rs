//! File-backed span store.
//!
//! One JSON array of spans per document at `{root}/{source}/{page}.json`.
//! Writers take an exclusive lock on a sidecar `.lock` file and replace the
//! document file atomically, so concurrent processes never see a torn file.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs2::FileExt;
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

use super::{SpanStore, StoreError};
use crate::domain::{DocumentKey, Span, SpanUpdate};

/// Span store rooted at a directory
#[derive(Debug, Clone)]
pub struct FileSpanStore {
    root: PathBuf,
}

impl FileSpanStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the JSON file holding one document's spans
    pub fn document_path(&self, key: &DocumentKey) -> PathBuf {
        self.root
            .join(&key.source_code)
            .join(format!("{}.json", key.page_id))
    }

    /// Replace every span of a document
    pub async fn save_spans(&self, key: &DocumentKey, spans: &[Span]) -> Result<(), StoreError> {
        let path = self.document_path(key);
        let spans = spans.to_vec();
        blocking(move || with_lock(&path, || write_spans(&path, &spans))).await
    }
}

#[async_trait]
impl SpanStore for FileSpanStore {
    fn name(&self) -> &str {
        "file"
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn load_spans(&self, key: &DocumentKey) -> Result<Vec<Span>, StoreError> {
        let path = self.document_path(key);
        if !path.exists() {
            return Err(StoreError::NotFound(key.clone()));
        }

        let spans = blocking(move || read_spans(&path)).await?;
        debug!(count = spans.len(), "Loaded spans");
        Ok(spans)
    }

    #[instrument(skip(self, batch), fields(key = %key, size = batch.len()))]
    async fn persist_updates(
        &self,
        key: &DocumentKey,
        batch: &[SpanUpdate],
    ) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        let path = self.document_path(key);
        if !path.exists() {
            return Err(StoreError::NotFound(key.clone()));
        }

        let batch = batch.to_vec();
        blocking(move || {
            with_lock(&path, || {
                let mut spans = read_spans(&path)?;
                for update in &batch {
                    match spans.iter_mut().find(|s| s.id == update.id) {
                        Some(span) => update.apply_to(span),
                        None => debug!(span_id = %update.id, "Update for unknown span ignored"),
                    }
                }
                write_spans(&path, &spans)
            })
        })
        .await
    }
}

async fn blocking<T, F>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

/// Run `f` while holding an exclusive lock next to `path`
fn with_lock<T>(path: &Path, f: impl FnOnce() -> Result<T, StoreError>) -> Result<T, StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut lock_path = path.as_os_str().to_owned();
    lock_path.push(".lock");
    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(PathBuf::from(lock_path))?;

    lock.lock_exclusive()?;
    let result = f();
    // Lock is released when file is dropped
    drop(lock);
    result
}

fn read_spans(path: &Path) -> Result<Vec<Span>, StoreError> {
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&content)?)
}

fn write_spans(path: &Path, spans: &[Span]) -> Result<(), StoreError> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    let json = serde_json::to_string_pretty(spans)?;
    tmp.write_all(json.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}
