//! REST client for the remote span store.
//!
//! Endpoints:
//! - GET  {base}/pages/{source}/{page}/units  -> {"units": [...]}
//! - POST {base}/units/realign                <- {"updates": [...]}
//!
//! Auth: Bearer token

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{SpanStore, StoreError};
use crate::domain::{DocumentKey, Span, SpanId, SpanUpdate};

const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Remote span store client
pub struct HttpSpanStore {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct UnitsResponse {
    #[serde(default)]
    units: Vec<Span>,
}

#[derive(Debug, Serialize)]
struct RealignRequest<'a> {
    updates: Vec<RealignUpdate<'a>>,
}

/// One update in the store's own field names
#[derive(Debug, Serialize)]
struct RealignUpdate<'a> {
    id: &'a SpanId,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_char_index: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_char_index: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text_content: Option<&'a str>,
    /// 0/1 flag on the wire
    #[serde(skip_serializing_if = "Option::is_none")]
    broken_index: Option<u8>,
}

impl<'a> From<&'a SpanUpdate> for RealignUpdate<'a> {
    fn from(update: &'a SpanUpdate) -> Self {
        Self {
            id: &update.id,
            start_char_index: update.start_offset,
            end_char_index: update.end_offset,
            text_content: update.snapshot_text.as_deref(),
            broken_index: update.broken.map(u8::from),
        }
    }
}

impl<'a> RealignRequest<'a> {
    fn new(batch: &'a [SpanUpdate]) -> Self {
        Self {
            updates: batch.iter().map(RealignUpdate::from).collect(),
        }
    }
}

impl HttpSpanStore {
    /// Create a new client
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            client: reqwest::Client::new(),
        }
    }

    fn units_url(&self, key: &DocumentKey) -> String {
        format!(
            "{}/pages/{}/{}/units",
            self.base_url, key.source_code, key.page_id
        )
    }

    fn realign_url(&self) -> String {
        format!("{}/units/realign", self.base_url)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.header("X-Client-Version", CLIENT_VERSION);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(StoreError::Unauthorized);
        }
        let message = response.text().await.unwrap_or_default();
        Err(StoreError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl SpanStore for HttpSpanStore {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn load_spans(&self, key: &DocumentKey) -> Result<Vec<Span>, StoreError> {
        let response = self
            .request(self.client.get(self.units_url(key)))
            .send()
            .await?;

        if response.status().as_u16() == 404 {
            return Err(StoreError::NotFound(key.clone()));
        }

        let body: UnitsResponse = Self::check(response).await?.json().await?;
        debug!(count = body.units.len(), "Loaded spans");
        Ok(body.units)
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

        let response = self
            .request(self.client.post(self.realign_url()))
            .json(&RealignRequest::new(batch))
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }
}
