//! Reconciliation driver for one document view.
//!
//! Owns the span cache of the view and runs passes over it:
//! load, verify each span, heal the broken ones, push one batch of updates
//! to the store, then render the spans selected by the view mode.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{SpanStore, StoreError};
use crate::document::{
    Document, Extraction, ExtractionRules, NodeId, RenderReport, SpanRenderer, TextExtractor,
};
use crate::domain::{DocumentKey, Span, SpanId, SpanUpdate, ViewMode, ViewPhase};
use crate::healing::{heal, verify, HealOutcome, HealingSettings, MatchKind, Unrecoverable, Verdict};
use crate::page::{check_page, Hibernation, SourceProfile};

/// What happened to one span during a pass
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SpanStatus {
    Healthy {
        matched: MatchKind,
    },
    Healed {
        from: (i64, i64),
        to: (i64, i64),
    },
    Unrecoverable {
        cause: Unrecoverable,
    },
    /// Already broken before the pass
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanOutcome {
    pub id: SpanId,
    #[serde(flatten)]
    pub status: SpanStatus,
}

/// Summary of one reconciliation pass
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub pass_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub key: DocumentKey,
    /// Digest of the flattened text, when it was built
    pub digest: Option<String>,
    pub outcomes: Vec<SpanOutcome>,
    /// Batch sent (or that would have been sent) to the store
    pub updates: Vec<SpanUpdate>,
    pub persisted: bool,
    pub persist_error: Option<String>,
}

impl PassReport {
    fn new(key: DocumentKey) -> Self {
        Self {
            pass_id: Uuid::new_v4(),
            started_at: Utc::now(),
            key,
            digest: None,
            outcomes: Vec::new(),
            updates: Vec::new(),
            persisted: false,
            persist_error: None,
        }
    }

    fn count(&self, pred: impl Fn(&SpanStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }

    pub fn healthy(&self) -> usize {
        self.count(|s| matches!(s, SpanStatus::Healthy { .. }))
    }

    pub fn healed(&self) -> usize {
        self.count(|s| matches!(s, SpanStatus::Healed { .. }))
    }

    pub fn unrecoverable(&self) -> usize {
        self.count(|s| matches!(s, SpanStatus::Unrecoverable { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, SpanStatus::Skipped))
    }
}

/// Drives verification, healing, persistence and rendering for one view
pub struct Reconciler<S: SpanStore> {
    store: S,
    key: DocumentKey,
    extractor: TextExtractor,
    renderer: SpanRenderer,
    healing: HealingSettings,
    mode: ViewMode,
    phase: ViewPhase,
    persist: bool,
    cache: Vec<Span>,
}

impl<S: SpanStore> Reconciler<S> {
    pub fn new(store: S, key: DocumentKey, rules: ExtractionRules, healing: HealingSettings) -> Self {
        let extractor = TextExtractor::new(rules);
        Self {
            store,
            key,
            renderer: SpanRenderer::new(extractor.clone()),
            extractor,
            healing,
            mode: ViewMode::default(),
            phase: ViewPhase::Loading,
            persist: true,
            cache: Vec::new(),
        }
    }

    pub fn with_mode(mut self, mode: ViewMode) -> Self {
        self.mode = mode;
        self
    }

    /// Compute updates without sending them to the store
    pub fn dry_run(mut self) -> Self {
        self.persist = false;
        self
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn phase(&self) -> ViewPhase {
        self.phase
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn extractor(&self) -> &TextExtractor {
        &self.extractor
    }

    /// Cached spans in render order
    pub fn spans(&self) -> &[Span] {
        &self.cache
    }

    pub fn span(&self, id: &SpanId) -> Option<&Span> {
        self.cache.iter().find(|s| &s.id == id)
    }

    /// Park the view; passes and renders become no-ops
    pub fn hibernate(&mut self) {
        self.phase = ViewPhase::Hibernating;
    }

    /// Run the page guard and hibernate when the page may not be annotated
    pub fn guard(
        &mut self,
        url: &str,
        profile: Option<&SourceProfile>,
        doc: &Document,
    ) -> Result<(), Hibernation> {
        check_page(url, profile, doc, &self.key).map_err(|reason| {
            info!(key = %self.key, ?reason, "Page guarded, hibernating");
            self.hibernate();
            reason
        })
    }

    pub fn is_hibernating(&self) -> bool {
        self.phase == ViewPhase::Hibernating
    }

    /// Replace the cache with the store's spans for this document
    #[instrument(skip(self), fields(key = %self.key, store = self.store.name()))]
    pub async fn load(&mut self) -> Result<usize, StoreError> {
        if self.is_hibernating() {
            return Ok(0);
        }
        self.phase = ViewPhase::Loading;

        let spans = match self.store.load_spans(&self.key).await {
            Ok(spans) => spans,
            Err(StoreError::NotFound(_)) => {
                debug!("No spans stored for document");
                Vec::new()
            }
            Err(e) => {
                self.phase = ViewPhase::Idle;
                return Err(e);
            }
        };

        info!(count = spans.len(), "Loaded spans");
        self.cache = spans;
        Ok(self.cache.len())
    }

    /// Merge spans by id without healing them
    ///
    /// Existing spans with an incoming id are dropped and the incoming
    /// spans are appended in order.
    pub fn apply_new_spans(&mut self, spans: Vec<Span>) {
        self.cache
            .retain(|cached| !spans.iter().any(|incoming| incoming.id == cached.id));
        self.cache.extend(spans);
    }

    /// Verify every cached span, heal the broken ones and persist one batch
    #[instrument(skip(self, doc), fields(key = %self.key, spans = self.cache.len()))]
    pub async fn reconcile(&mut self, doc: &Document) -> PassReport {
        let mut report = PassReport::new(self.key.clone());
        if self.is_hibernating() {
            return report;
        }
        self.phase = ViewPhase::Verifying;

        // Built on first need, reused for every span of the pass
        let mut extraction: Option<Extraction> = None;

        for span in self.cache.iter_mut() {
            if span.broken {
                report.outcomes.push(SpanOutcome {
                    id: span.id.clone(),
                    status: SpanStatus::Skipped,
                });
                continue;
            }

            let ex = extraction.get_or_insert_with(|| self.extractor.extract(doc));
            let status = match verify(span, ex) {
                Verdict::Healthy(matched) => SpanStatus::Healthy { matched },
                Verdict::Skipped => SpanStatus::Skipped,
                Verdict::Broken(reason) => {
                    self.phase = ViewPhase::Healing;
                    debug!(span_id = %span.id, ?reason, "Span broken, healing");
                    match heal(span, &ex.flat, &self.healing) {
                        HealOutcome::Healed(repair) => {
                            let from = (span.start_offset, span.end_offset);
                            let to = (repair.start as i64, repair.end as i64);
                            let text = if self.healing.persist_repaired_text {
                                Some(repair.repaired_text)
                            } else {
                                None
                            };
                            let update = SpanUpdate::healed(span.id.clone(), to.0, to.1, text);
                            update.apply_to(span);
                            report.updates.push(update);
                            debug!(span_id = %span.id, ?from, ?to, scope = ?repair.scope, "Span healed");
                            SpanStatus::Healed { from, to }
                        }
                        HealOutcome::Unrecoverable(cause) => {
                            warn!(span_id = %span.id, ?cause, "Span unrecoverable, flagging broken");
                            let update = SpanUpdate::broken(span.id.clone());
                            update.apply_to(span);
                            report.updates.push(update);
                            SpanStatus::Unrecoverable { cause }
                        }
                    }
                }
            };

            report.outcomes.push(SpanOutcome {
                id: span.id.clone(),
                status,
            });
        }

        report.digest = extraction.map(|ex| ex.flat.digest());

        if !report.updates.is_empty() && self.persist {
            match self.store.persist_updates(&self.key, &report.updates).await {
                Ok(()) => report.persisted = true,
                Err(e) => {
                    warn!(error = %e, size = report.updates.len(), "Failed to persist span updates");
                    report.persist_error = Some(e.to_string());
                }
            }
        }

        info!(
            pass_id = %report.pass_id,
            healthy = report.healthy(),
            healed = report.healed(),
            unrecoverable = report.unrecoverable(),
            skipped = report.skipped(),
            persisted = report.persisted,
            "Reconciliation pass complete"
        );
        self.phase = ViewPhase::Rendering;
        report
    }

    /// Clear all markers and render the spans the current mode shows
    pub fn render(&mut self, doc: &mut Document) -> RenderReport {
        if self.is_hibernating() {
            return RenderReport::default();
        }
        self.phase = ViewPhase::Rendering;

        let mode = self.mode;
        let report = self
            .renderer
            .render_all(doc, self.cache.iter().filter(|s| mode.shows(s)));
        debug!(
            mode = mode.as_str(),
            rendered = report.rendered.len(),
            failed = report.failed.len(),
            "Rendered spans"
        );

        self.phase = ViewPhase::Idle;
        report
    }

    /// Load, reconcile and render in one go
    pub async fn refresh(&mut self, doc: &mut Document) -> Result<(PassReport, RenderReport), StoreError> {
        self.load().await?;
        let pass = self.reconcile(doc).await;
        let rendered = self.render(doc);
        Ok((pass, rendered))
    }

    /// Switch the render filter and re-render without re-verifying
    pub fn set_mode(&mut self, mode: ViewMode, doc: &mut Document) -> RenderReport {
        self.mode = mode;
        self.render(doc)
    }

    /// First rendered fragment of a cached span
    pub fn reveal(&self, doc: &Document, id: &SpanId) -> Option<NodeId> {
        self.span(id)?;
        doc.markers_for(id).into_iter().next()
    }

    /// Toggle hover state on every fragment of a span
    pub fn hover(&self, doc: &mut Document, id: &SpanId, active: bool) -> usize {
        doc.set_span_active(id, active)
    }

    /// Span identity behind an activated node
    pub fn activate(&self, doc: &Document, node: NodeId) -> Option<SpanId> {
        let marker = doc.enclosing_marker(node)?;
        doc.marker(marker).map(|m| m.span_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemorySpanStore;
    use crate::document::{parse_markup, ContentBoundary};
    use crate::domain::SpanKind;
    use std::sync::Arc;

    const PAGE: &str = "<html><body><p>The quick brown fox jumps over the lazy dog.</p></body></html>";

    fn key() -> DocumentKey {
        DocumentKey::new("bw", 1)
    }

    fn reconciler(store: Arc<MemorySpanStore>) -> Reconciler<Arc<MemorySpanStore>> {
        Reconciler::new(
            store,
            key(),
            ExtractionRules::with_boundary(ContentBoundary::Body),
            HealingSettings::default(),
        )
        .with_mode(ViewMode::All)
    }

    #[tokio::test]
    async fn test_healthy_spans_produce_no_updates() {
        let store = Arc::new(MemorySpanStore::with_document(
            key(),
            vec![Span::new(1, 4, 9, "quick", SpanKind::UserHighlight)],
        ));
        let mut rec = reconciler(store.clone());
        let mut doc = parse_markup(PAGE).unwrap();

        let (pass, rendered) = rec.refresh(&mut doc).await.unwrap();
        assert_eq!(pass.healthy(), 1);
        assert!(pass.updates.is_empty());
        assert!(pass.digest.is_some());
        assert!(store.batches().is_empty());
        assert_eq!(rendered.rendered, vec![SpanId::Number(1)]);
        assert_eq!(rec.phase(), ViewPhase::Idle);
    }

    #[tokio::test]
    async fn test_no_live_spans_skips_extraction() {
        let store = Arc::new(MemorySpanStore::with_document(
            key(),
            vec![Span::new(1, 0, 3, "old", SpanKind::UserHighlight).with_broken(true)],
        ));
        let mut rec = reconciler(store);
        let doc = parse_markup(PAGE).unwrap();

        rec.load().await.unwrap();
        let pass = rec.reconcile(&doc).await;
        assert_eq!(pass.skipped(), 1);
        assert!(pass.digest.is_none());
    }

    #[tokio::test]
    async fn test_missing_document_loads_empty() {
        let mut rec = reconciler(Arc::new(MemorySpanStore::new()));
        assert_eq!(rec.load().await.unwrap(), 0);
        assert!(rec.spans().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_never_persists() {
        let store = Arc::new(MemorySpanStore::with_document(
            key(),
            vec![Span::new(1, 0, 5, "quick", SpanKind::UserHighlight)],
        ));
        let mut rec = reconciler(store.clone()).dry_run();
        let doc = parse_markup(PAGE).unwrap();

        rec.load().await.unwrap();
        let pass = rec.reconcile(&doc).await;
        assert_eq!(pass.healed(), 1);
        assert_eq!(pass.updates.len(), 1);
        assert!(!pass.persisted);
        assert!(store.batches().is_empty());
        // The cache still carries the healed offsets
        assert_eq!(rec.spans()[0].start_offset, 4);
    }

    #[test]
    fn test_apply_new_spans_merges_by_id() {
        let mut rec = reconciler(Arc::new(MemorySpanStore::new()));
        rec.apply_new_spans(vec![
            Span::new(1, 0, 3, "The", SpanKind::UserHighlight),
            Span::new(2, 4, 9, "quick", SpanKind::UserHighlight),
        ]);
        rec.apply_new_spans(vec![Span::new(1, 10, 15, "brown", SpanKind::CanonicalAnswer)]);

        let ids: Vec<_> = rec.spans().iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids, vec![SpanId::Number(2), SpanId::Number(1)]);
        assert_eq!(rec.span(&SpanId::Number(1)).unwrap().snapshot_text, "brown");
    }

    #[tokio::test]
    async fn test_hibernating_view_does_nothing() {
        let store = Arc::new(MemorySpanStore::with_document(
            key(),
            vec![Span::new(1, 0, 5, "quick", SpanKind::UserHighlight)],
        ));
        let mut rec = reconciler(store);
        rec.hibernate();
        let mut doc = parse_markup(PAGE).unwrap();

        let (pass, rendered) = rec.refresh(&mut doc).await.unwrap();
        assert!(pass.outcomes.is_empty());
        assert!(rendered.rendered.is_empty());
        assert_eq!(rec.phase(), ViewPhase::Hibernating);
    }

    #[tokio::test]
    async fn test_guarded_page_hibernates() {
        let store = Arc::new(MemorySpanStore::with_document(
            key(),
            vec![Span::new(1, 4, 9, "quick", SpanKind::UserHighlight)],
        ));
        let profile = SourceProfile::new("bw", &["bahai.works"]);

        // Edit view of a MediaWiki page
        let mut rec = reconciler(store.clone());
        let mut edit = parse_markup(
            r#"<html><body class="action-edit"><p>The quick brown fox.</p></body></html>"#,
        )
        .unwrap();
        let refused = rec.guard("https://bahai.works/Fox?action=edit", Some(&profile), &edit);
        assert_eq!(refused, Err(Hibernation::NotReadView));
        assert!(rec.is_hibernating());
        let (_, rendered) = rec.refresh(&mut edit).await.unwrap();
        assert!(rendered.rendered.is_empty());
        assert!(edit.markers().is_empty());

        // Read view passes the guard
        let mut rec = reconciler(store);
        let view = parse_markup(
            r#"<html><body class="action-view"><p>The quick brown fox.</p></body></html>"#,
        )
        .unwrap();
        assert_eq!(rec.guard("https://bahai.works/Fox", Some(&profile), &view), Ok(()));
        assert!(!rec.is_hibernating());
    }

    #[tokio::test]
    async fn test_interactions() {
        let store = Arc::new(MemorySpanStore::with_document(
            key(),
            vec![Span::new(7, 4, 15, "quick brown", SpanKind::UserHighlight)],
        ));
        let mut rec = reconciler(store);
        let mut doc = parse_markup(PAGE).unwrap();
        rec.refresh(&mut doc).await.unwrap();

        let node = rec.reveal(&doc, &SpanId::Number(7)).unwrap();
        assert_eq!(rec.activate(&doc, node), Some(SpanId::Number(7)));
        assert_eq!(rec.hover(&mut doc, &SpanId::Number(7), true), 1);
        assert!(doc.marker(node).unwrap().active);
        assert!(rec.reveal(&doc, &SpanId::Number(8)).is_none());
    }
}
