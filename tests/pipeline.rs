//! End-to-end pipeline properties over the library API, driven against the
//! in-memory store and scripted embedder doubles: idempotent re-ingestion,
//! sequential batches with bounded concurrency, partial-failure tolerance,
//! the retry ceiling, and threshold-filtered retrieval.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use ragbase::config::{DedupPolicy, Metric};
use ragbase::dedup::{self, FingerprintStatus};
use ragbase::embedding::{l2_normalize, Embedder};
use ragbase::error::{PipelineError, PipelineResult};
use ragbase::ingest::{self, IngestOptions};
use ragbase::models::{ChunkMetadata, EmbeddingRecord, SearchHit};
use ragbase::retrieval;
use ragbase::retry::RetryPolicy;
use ragbase::store::{MetadataFilter, VectorStore};
use ragbase::store_memory::MemoryStore;

const DIMS: usize = 4;

/// Deterministic embedder that tracks call volume and concurrency.
struct ScriptedEmbedder {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    /// Times `in_flight` rose from zero — one per sequential batch when
    /// chunks inside a batch overlap.
    waves: AtomicUsize,
    delay: Duration,
    fixed: Option<Vec<f32>>,
}

impl ScriptedEmbedder {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            waves: AtomicUsize::new(0),
            delay: Duration::from_millis(50),
            fixed: None,
        }
    }

    fn fixed(vector: Vec<f32>) -> Self {
        Self {
            fixed: Some(vector),
            delay: Duration::ZERO,
            ..Self::new()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn vector_for(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for (i, byte) in text.bytes().enumerate() {
        v[i % DIMS] += f32::from(byte);
    }
    l2_normalize(v)
}

#[async_trait]
impl Embedder for ScriptedEmbedder {
    async fn embed(&self, text: &str) -> PipelineResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        if now == 1 {
            self.waves.fetch_add(1, Ordering::SeqCst);
        }
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(self.fixed.clone().unwrap_or_else(|| vector_for(text)))
    }

    fn dimensions(&self) -> usize {
        DIMS
    }
}

/// Store wrapper that fails writes for chosen chunk indices, counting
/// attempts per index.
struct FailingStore {
    inner: MemoryStore,
    fail_indices: HashSet<usize>,
    attempts: Mutex<HashMap<usize, usize>>,
}

impl FailingStore {
    fn new(fail_indices: impl IntoIterator<Item = usize>) -> Self {
        Self {
            inner: MemoryStore::new(DIMS, Metric::Cosine),
            fail_indices: fail_indices.into_iter().collect(),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    fn attempts_for(&self, chunk_index: usize) -> usize {
        *self.attempts.lock().unwrap().get(&chunk_index).unwrap_or(&0)
    }
}

#[async_trait]
impl VectorStore for FailingStore {
    async fn insert(&self, record: &EmbeddingRecord) -> PipelineResult<i64> {
        let chunk_index = record.metadata.chunk_index.unwrap_or_default();
        if self.fail_indices.contains(&chunk_index) {
            *self.attempts.lock().unwrap().entry(chunk_index).or_insert(0) += 1;
            return Err(PipelineError::Storage("synthetic write failure".into()));
        }
        self.inner.insert(record).await
    }

    async fn batch_insert(&self, records: &[EmbeddingRecord]) -> PipelineResult<Vec<i64>> {
        self.inner.batch_insert(records).await
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        filter: Option<&MetadataFilter>,
    ) -> PipelineResult<Vec<SearchHit>> {
        self.inner.search(query_embedding, limit, filter).await
    }

    async fn delete_by_source(&self, source: &str) -> PipelineResult<u64> {
        self.inner.delete_by_source(source).await
    }

    async fn fingerprint_status(&self, fingerprint: &str) -> PipelineResult<FingerprintStatus> {
        self.inner.fingerprint_status(fingerprint).await
    }
}

/// Twelve 60-char paragraphs: with chunk size 100 and zero overlap each
/// paragraph becomes exactly one chunk.
fn twelve_paragraph_text() -> String {
    (0..12)
        .map(|i| format!("{:02} {}", i, "x".repeat(57)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn options(chunk_size: usize, overlap: usize, batch_width: usize) -> IngestOptions {
    IngestOptions {
        chunk_size_chars: chunk_size,
        overlap_chars: overlap,
        batch_width,
        retry: RetryPolicy::new(3, Duration::from_millis(1)),
        dedup_policy: DedupPolicy::Presence,
    }
}

#[tokio::test]
async fn test_twelve_chunks_run_in_three_bounded_batches() {
    let store = Arc::new(MemoryStore::new(DIMS, Metric::Cosine));
    let embedder = Arc::new(ScriptedEmbedder::new());
    let text = twelve_paragraph_text();

    let report = ingest::ingest(
        store.clone(),
        embedder.clone(),
        text.as_bytes(),
        &text,
        "handbook.txt",
        &options(100, 0, 5),
    )
    .await;

    assert!(report.success);
    assert!(!report.skipped);
    assert_eq!(report.chunks_total, 12);
    assert_eq!(report.chunks_processed, 12);
    assert!(report.errors.is_empty());
    assert_eq!(store.len().await, 12);
    assert_eq!(embedder.calls(), 12);
    // Batches of 5, 5, 2 run one after another, never above the cap.
    assert_eq!(embedder.max_in_flight.load(Ordering::SeqCst), 5);
    assert_eq!(embedder.waves.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_chunk_order_is_preserved_in_metadata() {
    let store = Arc::new(MemoryStore::new(DIMS, Metric::Cosine));
    let embedder = Arc::new(ScriptedEmbedder::new());
    let text = twelve_paragraph_text();

    ingest::ingest(
        store.clone(),
        embedder,
        text.as_bytes(),
        &text,
        "handbook.txt",
        &options(100, 0, 5),
    )
    .await;

    let query = vector_for("00");
    let hits = store.search(&query, 12, None).await.unwrap();
    let mut indices: Vec<usize> = hits
        .iter()
        .map(|h| h.metadata.chunk_index.unwrap())
        .collect();
    indices.sort_unstable();
    assert_eq!(indices, (0..12).collect::<Vec<_>>());
    for hit in &hits {
        assert_eq!(hit.metadata.total_chunks, Some(12));
        assert_eq!(hit.metadata.source, "handbook.txt");
        assert!(hit.metadata.fingerprint.is_some());
    }
}

#[tokio::test]
async fn test_reingest_same_bytes_is_skipped_without_embedding() {
    let store = Arc::new(MemoryStore::new(DIMS, Metric::Cosine));
    let embedder = Arc::new(ScriptedEmbedder::new());
    let text = twelve_paragraph_text();
    let opts = options(100, 0, 5);

    let first = ingest::ingest(
        store.clone(),
        embedder.clone(),
        text.as_bytes(),
        &text,
        "handbook.txt",
        &opts,
    )
    .await;
    assert!(!first.skipped);
    let calls_after_first = embedder.calls();
    let rows_after_first = store.len().await;

    let second = ingest::ingest(
        store.clone(),
        embedder.clone(),
        text.as_bytes(),
        &text,
        "handbook.txt",
        &opts,
    )
    .await;

    assert!(second.success);
    assert!(second.skipped);
    assert_eq!(second.chunks_processed, 0);
    assert_eq!(embedder.calls(), calls_after_first, "no embedding on skip");
    assert_eq!(store.len().await, rows_after_first, "no new rows on skip");
}

#[tokio::test]
async fn test_partial_failure_degrades_counts_not_success() {
    let store = Arc::new(FailingStore::new([1, 3]));
    let embedder = Arc::new(ScriptedEmbedder::new());
    let text = (0..4)
        .map(|i| format!("{:02} {}", i, "y".repeat(57)))
        .collect::<Vec<_>>()
        .join("\n\n");

    let report = ingest::ingest(
        store.clone(),
        embedder,
        text.as_bytes(),
        &text,
        "flaky.txt",
        &options(100, 0, 5),
    )
    .await;

    assert!(report.success, "chunk failures never flip the run flag");
    assert_eq!(report.chunks_total, 4);
    assert_eq!(report.chunks_processed, 2);
    let failed: Vec<usize> = report.errors.iter().map(|e| e.chunk_index).collect();
    assert_eq!(failed, vec![1, 3]);
}

#[tokio::test]
async fn test_failing_store_write_is_attempted_exactly_to_the_ceiling() {
    let store = Arc::new(FailingStore::new([0]));
    let embedder = Arc::new(ScriptedEmbedder::new());
    let text = "a single short document";

    let report = ingest::ingest(
        store.clone(),
        embedder,
        text.as_bytes(),
        text,
        "stubborn.txt",
        &options(100, 0, 5),
    )
    .await;

    assert!(report.success);
    assert_eq!(report.chunks_total, 1);
    assert_eq!(report.chunks_processed, 0);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(store.attempts_for(0), 3, "retried to the ceiling, no further");
}

#[tokio::test]
async fn test_empty_document_is_a_fatal_content_failure() {
    let store = Arc::new(MemoryStore::new(DIMS, Metric::Cosine));
    let embedder = Arc::new(ScriptedEmbedder::new());

    let report = ingest::ingest(
        store.clone(),
        embedder.clone(),
        b"   \n\t ",
        "   \n\t ",
        "empty.txt",
        &options(100, 0, 5),
    )
    .await;

    assert!(!report.success);
    assert!(!report.skipped);
    assert_eq!(report.chunks_total, 0);
    assert_eq!(embedder.calls(), 0);
    assert!(report.message.contains("no content"));
}

#[tokio::test]
async fn test_presence_policy_skips_partial_remnant() {
    let store = Arc::new(MemoryStore::new(DIMS, Metric::Cosine));
    let embedder = Arc::new(ScriptedEmbedder::new());
    let text = twelve_paragraph_text();
    seed_partial_remnant(&store, text.as_bytes(), "handbook.txt").await;

    let report = ingest::ingest(
        store.clone(),
        embedder.clone(),
        text.as_bytes(),
        &text,
        "handbook.txt",
        &options(100, 0, 5),
    )
    .await;

    assert!(report.skipped, "presence policy cannot see incompleteness");
    assert_eq!(embedder.calls(), 0);
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_complete_policy_cleans_up_partial_remnant_and_reingests() {
    let store = Arc::new(MemoryStore::new(DIMS, Metric::Cosine));
    let embedder = Arc::new(ScriptedEmbedder::new());
    let text = twelve_paragraph_text();
    seed_partial_remnant(&store, text.as_bytes(), "handbook.txt").await;

    let mut opts = options(100, 0, 5);
    opts.dedup_policy = DedupPolicy::Complete;
    let report = ingest::ingest(
        store.clone(),
        embedder.clone(),
        text.as_bytes(),
        &text,
        "handbook.txt",
        &opts,
    )
    .await;

    assert!(!report.skipped);
    assert_eq!(report.chunks_processed, 12);
    // The stale remnant row is gone; only the fresh ingestion remains.
    assert_eq!(store.len().await, 12);

    // A complete ingestion is then skipped under the same policy.
    let again = ingest::ingest(
        store.clone(),
        embedder,
        text.as_bytes(),
        &text,
        "handbook.txt",
        &opts,
    )
    .await;
    assert!(again.skipped);
}

/// One stored row claiming 12 total chunks: the signature a run leaves
/// behind when it dies partway through.
async fn seed_partial_remnant(store: &MemoryStore, raw_bytes: &[u8], source: &str) {
    let metadata = ChunkMetadata {
        source: source.to_string(),
        fingerprint: Some(dedup::fingerprint(raw_bytes)),
        chunk_index: Some(0),
        total_chunks: Some(12),
        ..ChunkMetadata::default()
    };
    store
        .insert(&EmbeddingRecord {
            embedding: vector_for("stale"),
            content: "stale".into(),
            metadata,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_retrieve_orders_by_distance_and_applies_threshold() {
    let store = MemoryStore::new(DIMS, Metric::Cosine);
    for (name, v) in [
        ("exact", vec![1.0, 0.0, 0.0, 0.0]),
        ("orthogonal", vec![0.0, 1.0, 0.0, 0.0]),
        ("close", l2_normalize(vec![1.0, 0.2, 0.0, 0.0])),
    ] {
        store
            .insert(&EmbeddingRecord {
                embedding: v,
                content: name.into(),
                metadata: ChunkMetadata::for_source("kb.txt"),
            })
            .await
            .unwrap();
    }
    let embedder = ScriptedEmbedder::fixed(vec![1.0, 0.0, 0.0, 0.0]);

    let unfiltered = retrieval::retrieve(&store, &embedder, "query", 10, None)
        .await
        .unwrap();
    let names: Vec<&str> = unfiltered.iter().map(|h| h.content.as_str()).collect();
    assert_eq!(names, vec!["exact", "close", "orthogonal"]);
    assert!(unfiltered.windows(2).all(|w| w[0].distance <= w[1].distance));

    // Orthogonal sits at cosine distance 1.0; a 0.5 threshold removes only
    // it and leaves the remainder in order.
    let filtered = retrieval::retrieve(&store, &embedder, "query", 10, Some(0.5))
        .await
        .unwrap();
    let names: Vec<&str> = filtered.iter().map(|h| h.content.as_str()).collect();
    assert_eq!(names, vec!["exact", "close"]);
}

#[tokio::test]
async fn test_retrieve_against_empty_store_is_empty_not_an_error() {
    let store = MemoryStore::new(DIMS, Metric::Cosine);
    let embedder = ScriptedEmbedder::fixed(vec![1.0, 0.0, 0.0, 0.0]);
    let hits = retrieval::retrieve(&store, &embedder, "anything at all", 5, None)
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn test_top_k_bounds_result_count() {
    let store = MemoryStore::new(DIMS, Metric::Cosine);
    for i in 0..10 {
        store
            .insert(&EmbeddingRecord {
                embedding: vector_for(&format!("row {i}")),
                content: format!("row {i}"),
                metadata: ChunkMetadata::for_source("kb.txt"),
            })
            .await
            .unwrap();
    }
    let embedder = ScriptedEmbedder::fixed(vector_for("row 3"));
    let hits = retrieval::retrieve(&store, &embedder, "row 3", 4, None)
        .await
        .unwrap();
    assert_eq!(hits.len(), 4);
}
