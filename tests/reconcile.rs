//! Reconciliation Integration Tests
//!
//! Full passes over a page that changed since its spans were recorded:
//! verify, heal, one batched persist, then render by view mode.

use std::sync::Arc;

use tempfile::TempDir;
use waymark::adapters::{FileSpanStore, MemorySpanStore, SpanStore};
use waymark::core::{Reconciler, SpanStatus};
use waymark::document::{parse_markup, ContentBoundary, Document, ExtractionRules, TextExtractor};
use waymark::domain::{DocumentKey, Span, SpanId, SpanKind, SpanUpdate, ViewMode, ViewPhase};
use waymark::healing::HealingSettings;

const BEFORE: &str = "<html><body><div id=\"mw-content-text\">\
<p>Intro paragraph here.</p>\
<p>The quick brown fox jumps over the lazy dog.</p>\
<p>A passage that will be removed entirely later on.</p>\
</div><div id=\"footer\">footer text</div></body></html>";

const AFTER: &str = "<html><body><div id=\"mw-content-text\">\
<p>Intro paragraph here.</p>\
<p>Inserted words. The quick brown fox jumps over the <i>lazy</i> dog.</p>\
</div><div id=\"footer\">footer text</div></body></html>";

fn key() -> DocumentKey {
    DocumentKey::new("bw", 77)
}

fn rules() -> ExtractionRules {
    ExtractionRules::with_boundary(ContentBoundary::ElementId("mw-content-text".to_string()))
}

/// Span recorded against `markup` at the first occurrence of `text`
fn recorded(markup: &str, id: i64, text: &str, kind: SpanKind) -> Span {
    let doc = parse_markup(markup).unwrap();
    let flat = TextExtractor::new(rules()).extract(&doc).flat;
    let start = flat.as_str().find(text).unwrap();
    Span::new(id, start as i64, (start + text.len()) as i64, text, kind)
}

fn recorded_spans() -> Vec<Span> {
    vec![
        recorded(BEFORE, 1, "Intro paragraph", SpanKind::UserHighlight),
        recorded(BEFORE, 2, "quick brown fox", SpanKind::CanonicalAnswer),
        recorded(BEFORE, 3, "A passage that will be removed", SpanKind::UserHighlight),
        recorded(BEFORE, 4, "lazy", SpanKind::UserHighlight).with_broken(true),
    ]
}

fn reconciler<S: SpanStore>(store: S) -> Reconciler<S> {
    Reconciler::new(store, key(), rules(), HealingSettings::default()).with_mode(ViewMode::All)
}

fn after() -> Document {
    parse_markup(AFTER).unwrap()
}

#[tokio::test]
async fn test_pass_heals_flags_and_persists_one_batch() {
    let store = Arc::new(MemorySpanStore::with_document(key(), recorded_spans()));
    let mut rec = reconciler(store.clone());
    let mut doc = after();

    let (pass, rendered) = rec.refresh(&mut doc).await.unwrap();

    assert_eq!(pass.healthy(), 1);
    assert_eq!(pass.healed(), 1);
    assert_eq!(pass.unrecoverable(), 1);
    assert_eq!(pass.skipped(), 1);
    assert!(pass.persisted);

    // Exactly one batch for the whole pass
    let batches = store.batches();
    assert_eq!(batches.len(), 1);
    let (batch_key, updates) = &batches[0];
    assert_eq!(batch_key, &key());
    assert_eq!(updates.len(), 2);

    let shift = "Inserted words. ".len() as i64;
    let original = &recorded_spans()[1];
    assert_eq!(
        updates[0],
        SpanUpdate::healed(
            SpanId::Number(2),
            original.start_offset + shift,
            original.end_offset + shift,
            Some("quick brown fox".to_string()),
        )
    );
    assert_eq!(updates[1], SpanUpdate::broken(SpanId::Number(3)));

    // Store now agrees with the cache
    let stored = store.spans(&key());
    assert_eq!(stored[1].start_offset, original.start_offset + shift);
    assert!(stored[2].broken);

    // Broken spans are never rendered
    assert_eq!(rendered.rendered, vec![SpanId::Number(1), SpanId::Number(2)]);
    assert_eq!(rec.phase(), ViewPhase::Idle);
    let marked: Vec<String> = doc
        .markers()
        .into_iter()
        .map(|m| doc.text_content(m))
        .collect();
    assert_eq!(marked, vec!["Intro paragraph", "quick brown fox"]);
}

#[tokio::test]
async fn test_outcomes_report_offsets() {
    let store = Arc::new(MemorySpanStore::with_document(key(), recorded_spans()));
    let mut rec = reconciler(store);
    let doc = after();

    rec.load().await.unwrap();
    let pass = rec.reconcile(&doc).await;

    let healed = pass
        .outcomes
        .iter()
        .find(|o| o.id == SpanId::Number(2))
        .unwrap();
    match healed.status {
        SpanStatus::Healed { from, to } => assert_eq!(to.0 - from.0, 16),
        ref other => panic!("expected healed, got {:?}", other),
    }
    assert!(pass.digest.as_deref().unwrap().starts_with("sha256:"));
}

#[tokio::test]
async fn test_second_pass_is_quiet() {
    let store = Arc::new(MemorySpanStore::with_document(key(), recorded_spans()));
    let mut rec = reconciler(store.clone());
    let mut doc = after();

    rec.refresh(&mut doc).await.unwrap();
    let (second, _) = rec.refresh(&mut doc).await.unwrap();

    // Healed offsets were persisted, broken flags are skipped
    assert!(second.updates.is_empty());
    assert_eq!(second.healthy(), 2);
    assert_eq!(second.skipped(), 2);
    assert_eq!(store.batches().len(), 1);
}

#[tokio::test]
async fn test_persist_failure_is_logged_and_retried_next_pass() {
    let store = Arc::new(MemorySpanStore::with_document(key(), recorded_spans()));
    store.set_fail_persist(true);
    let mut rec = reconciler(store.clone());
    let mut doc = after();

    let (pass, rendered) = rec.refresh(&mut doc).await.unwrap();
    assert!(!pass.persisted);
    assert!(pass.persist_error.is_some());
    // The view still renders the healed cache
    assert_eq!(rendered.rendered.len(), 2);

    // Store unchanged, so the next pass derives the same batch again
    store.set_fail_persist(false);
    let (retry, _) = rec.refresh(&mut doc).await.unwrap();
    assert!(retry.persisted);
    assert_eq!(retry.updates, pass.updates);
    assert_eq!(store.batches().len(), 2);
}

#[tokio::test]
async fn test_repaired_text_can_be_kept_out_of_updates() {
    let store = Arc::new(MemorySpanStore::with_document(key(), recorded_spans()));
    let settings = HealingSettings {
        persist_repaired_text: false,
        ..Default::default()
    };
    let mut rec = Reconciler::new(store.clone(), key(), rules(), settings);
    let doc = after();

    rec.load().await.unwrap();
    let pass = rec.reconcile(&doc).await;
    assert_eq!(pass.updates[0].snapshot_text, None);
    assert!(pass.updates[0].start_offset.is_some());
}

#[tokio::test]
async fn test_mode_switch_rerenders_without_verifying() {
    let store = Arc::new(MemorySpanStore::with_document(key(), recorded_spans()));
    let mut rec = reconciler(store.clone()).with_mode(ViewMode::Taxonomy);
    let mut doc = after();

    let (_, rendered) = rec.refresh(&mut doc).await.unwrap();
    assert_eq!(rendered.rendered, vec![SpanId::Number(1)]);

    let qa = rec.set_mode(ViewMode::Qa, &mut doc);
    assert_eq!(qa.rendered, vec![SpanId::Number(2)]);
    assert_eq!(qa.cleared, 1);
    assert_eq!(doc.markers().len(), 1);
    assert_eq!(store.batches().len(), 1);
}

#[tokio::test]
async fn test_new_spans_merge_without_healing() {
    let store = Arc::new(MemorySpanStore::with_document(key(), recorded_spans()));
    let mut rec = reconciler(store.clone());
    let mut doc = after();
    rec.refresh(&mut doc).await.unwrap();

    // Freshly authored span (correct by construction) and a replacement for 1
    let fresh = recorded(AFTER, 5, "lazy", SpanKind::Custom("note".to_string()));
    let replaced = recorded(AFTER, 1, "paragraph here", SpanKind::UserHighlight);
    rec.apply_new_spans(vec![fresh, replaced]);
    let rendered = rec.render(&mut doc);

    assert_eq!(
        rendered.rendered,
        vec![SpanId::Number(2), SpanId::Number(5), SpanId::Number(1)]
    );
    assert_eq!(store.batches().len(), 1);
    assert!(doc.to_markup().contains("kind-note"));
}

#[tokio::test]
async fn test_file_store_round_trip() {
    let temp = TempDir::new().unwrap();
    let store = FileSpanStore::new(temp.path());
    store.save_spans(&key(), &recorded_spans()).await.unwrap();

    let mut rec = reconciler(store);
    let mut doc = after();
    let (pass, _) = rec.refresh(&mut doc).await.unwrap();
    assert!(pass.persisted);

    let reloaded = FileSpanStore::new(temp.path())
        .load_spans(&key())
        .await
        .unwrap();
    assert!(reloaded[2].broken);
    assert_eq!(reloaded[1].snapshot_text, "quick brown fox");
    assert_eq!(
        reloaded[1].start_offset,
        recorded(AFTER, 0, "quick brown fox", SpanKind::default()).start_offset
    );
}
