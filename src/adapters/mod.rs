//! Adapter interfaces for the external span store.
//!
//! The store owns span persistence; waymark only loads the spans of one
//! document and pushes back batched partial updates.

pub mod file;
pub mod http;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{DocumentKey, Span, SpanUpdate};

pub use file::FileSpanStore;
pub use http::HttpSpanStore;
pub use memory::MemorySpanStore;

/// Errors raised by span stores
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Not authorized by the store; log in again")]
    Unauthorized,

    #[error("Document not found in store: {0}")]
    NotFound(DocumentKey),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Trait for external span stores
#[async_trait]
pub trait SpanStore: Send + Sync {
    /// Human-readable store name
    fn name(&self) -> &str;

    /// All spans recorded for a document
    async fn load_spans(&self, key: &DocumentKey) -> Result<Vec<Span>, StoreError>;

    /// Apply a batch of partial updates in one request
    async fn persist_updates(
        &self,
        key: &DocumentKey,
        batch: &[SpanUpdate],
    ) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: SpanStore + ?Sized> SpanStore for std::sync::Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn load_spans(&self, key: &DocumentKey) -> Result<Vec<Span>, StoreError> {
        (**self).load_spans(key).await
    }

    async fn persist_updates(
        &self,
        key: &DocumentKey,
        batch: &[SpanUpdate],
    ) -> Result<(), StoreError> {
        (**self).persist_updates(key, batch).await
    }
}
