//! In-process span store that records every persisted batch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{SpanStore, StoreError};
use crate::domain::{DocumentKey, Span, SpanUpdate};

#[derive(Debug, Default)]
pub struct MemorySpanStore {
    documents: Mutex<HashMap<DocumentKey, Vec<Span>>>,
    batches: Mutex<Vec<(DocumentKey, Vec<SpanUpdate>)>>,
    fail_persist: AtomicBool,
}

impl MemorySpanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with one document
    pub fn with_document(key: DocumentKey, spans: Vec<Span>) -> Self {
        let store = Self::new();
        store.insert(key, spans);
        store
    }

    pub fn insert(&self, key: DocumentKey, spans: Vec<Span>) {
        lock(&self.documents).insert(key, spans);
    }

    /// Current spans of a document, updates applied
    pub fn spans(&self, key: &DocumentKey) -> Vec<Span> {
        lock(&self.documents).get(key).cloned().unwrap_or_default()
    }

    /// Every batch received, in order (failed ones included)
    pub fn batches(&self) -> Vec<(DocumentKey, Vec<SpanUpdate>)> {
        lock(&self.batches).clone()
    }

    /// Make subsequent persists fail with `Rejected`
    pub fn set_fail_persist(&self, fail: bool) {
        self.fail_persist.store(fail, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl SpanStore for MemorySpanStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load_spans(&self, key: &DocumentKey) -> Result<Vec<Span>, StoreError> {
        lock(&self.documents)
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    async fn persist_updates(
        &self,
        key: &DocumentKey,
        batch: &[SpanUpdate],
    ) -> Result<(), StoreError> {
        lock(&self.batches).push((key.clone(), batch.to_vec()));

        if self.fail_persist.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected {
                status: 503,
                message: "store unavailable".to_string(),
            });
        }

        let mut documents = lock(&self.documents);
        let spans = documents
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        for update in batch {
            if let Some(span) = spans.iter_mut().find(|s| s.id == update.id) {
                update.apply_to(span);
            }
        }
        Ok(())
    }
}
