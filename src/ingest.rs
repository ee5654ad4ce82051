//! Ingestion coordinator.
//!
//! Drives the pipeline for one document: dedup pre-flight → split →
//! batched embed+insert → aggregate report. Batches run strictly one after
//! another; the chunks inside a batch run concurrently on a
//! [`tokio::task::JoinSet`], so at most `batch_width` embed+store
//! operations are ever in flight. Each chunk's embed+insert is retried as
//! one unit under the shared backoff policy; a chunk that exhausts its
//! attempts is recorded in the report and never aborts its siblings or the
//! run.
//!
//! The report's `success` flag only goes false for run-level fatal errors
//! (nothing to ingest, a failing pre-flight check). Partial completeness is
//! visible in the counters instead.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::{Config, DedupPolicy};
use crate::dedup::{self, DedupOutcome};
use crate::embedding::Embedder;
use crate::models::{ChunkFailure, ChunkMetadata, EmbeddingRecord, IngestReport};
use crate::retry::{self, RetryPolicy};
use crate::splitter;
use crate::store::VectorStore;

/// Chunks completed between progress log events.
const PROGRESS_EVERY: usize = 10;

/// Knobs for one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub chunk_size_chars: usize,
    pub overlap_chars: usize,
    pub batch_width: usize,
    pub retry: RetryPolicy,
    pub dedup_policy: DedupPolicy,
}

impl IngestOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_size_chars: config.chunking.chunk_size_chars,
            overlap_chars: config.chunking.overlap_chars,
            batch_width: config.ingest.batch_width,
            retry: RetryPolicy::new(
                config.ingest.max_attempts,
                std::time::Duration::from_millis(config.ingest.base_delay_ms),
            ),
            dedup_policy: config.ingest.dedup_policy,
        }
    }
}

/// Ingest one document: `raw_bytes` feed the fingerprint, `text` is the
/// extracted content to split and embed, `source` identifies the document
/// in metadata and for deletion.
///
/// Always returns a report; fatal conditions come back as
/// `success = false` with a message rather than an error.
pub async fn ingest(
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    raw_bytes: &[u8],
    text: &str,
    source: &str,
    options: &IngestOptions,
) -> IngestReport {
    let started = Instant::now();
    let fingerprint = dedup::fingerprint(raw_bytes);

    match dedup::preflight(store.as_ref(), &fingerprint, options.dedup_policy).await {
        Ok(DedupOutcome::AlreadyIngested) => {
            info!(source, fingerprint, "already ingested, skipping");
            return IngestReport::skipped(source, elapsed_ms(started));
        }
        Ok(DedupOutcome::PartialRemnant) => {
            warn!(source, fingerprint, "partial remnant found, re-ingesting");
            if let Err(err) = store.delete_by_source(source).await {
                return IngestReport::failed(format!(
                    "failed to clean up partial remnant for {source}: {err}"
                ));
            }
        }
        Ok(DedupOutcome::Fresh) => {}
        Err(err) => {
            return IngestReport::failed(format!("dedup pre-flight failed for {source}: {err}"));
        }
    }

    let chunks = splitter::split(text, options.chunk_size_chars, options.overlap_chars);
    if chunks.is_empty() {
        return IngestReport::failed(format!("{source} produced no content to ingest"));
    }

    let total = chunks.len();
    let file_name = std::path::Path::new(source)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned());
    let ingested_at = chrono::Utc::now();
    info!(source, chunks = total, batch_width = options.batch_width, "starting ingestion");

    let mut processed = 0usize;
    let mut completed = 0usize;
    let mut errors: Vec<ChunkFailure> = Vec::new();

    for (batch_number, batch) in chunks.chunks(options.batch_width).enumerate() {
        let mut tasks = JoinSet::new();

        for (offset, chunk_text) in batch.iter().enumerate() {
            let chunk_index = batch_number * options.batch_width + offset;
            let store = Arc::clone(&store);
            let embedder = Arc::clone(&embedder);
            let chunk_text = chunk_text.clone();
            let retry_policy = options.retry;
            let metadata = ChunkMetadata {
                source: source.to_string(),
                file_name: file_name.clone(),
                fingerprint: Some(fingerprint.clone()),
                chunk_index: Some(chunk_index),
                total_chunks: Some(total),
                ingested_at: Some(ingested_at),
                extra: Default::default(),
            };

            tasks.spawn(async move {
                let result = retry::with_backoff(retry_policy, "chunk", || {
                    let store = Arc::clone(&store);
                    let embedder = Arc::clone(&embedder);
                    let chunk_text = chunk_text.clone();
                    let metadata = metadata.clone();
                    async move {
                        let embedding = embedder.embed(&chunk_text).await?;
                        store
                            .insert(&EmbeddingRecord {
                                embedding,
                                content: chunk_text,
                                metadata,
                            })
                            .await
                    }
                })
                .await;
                (chunk_index, result)
            });
        }

        // Drain the batch before the next one starts; the coordinator is
        // the single consumer of completions, so the counters need no
        // further synchronization.
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(id))) => {
                    processed += 1;
                    debug!(id, "chunk stored");
                }
                Ok((chunk_index, Err(err))) => {
                    warn!(chunk_index, error = %err, "chunk failed after retries");
                    errors.push(ChunkFailure {
                        chunk_index,
                        error: err.to_string(),
                    });
                }
                Err(join_err) => {
                    warn!(error = %join_err, "chunk task panicked");
                    errors.push(ChunkFailure {
                        chunk_index: batch_number * options.batch_width,
                        error: format!("chunk task panicked: {join_err}"),
                    });
                }
            }
            completed += 1;
            if completed % PROGRESS_EVERY == 0 {
                info!(completed, total, "ingestion progress");
            }
        }
    }

    errors.sort_by_key(|e| e.chunk_index);
    let duration_ms = elapsed_ms(started);
    info!(source, processed, total, failed = errors.len(), duration_ms, "ingestion finished");

    IngestReport {
        success: true,
        skipped: false,
        chunks_total: total,
        chunks_processed: processed,
        errors,
        duration_ms,
        message: format!("ingested {processed}/{total} chunks from {source}"),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
