//! Retrieval service: embed the query, search the store, apply the
//! caller's distance threshold.
//!
//! An empty result is a valid outcome, not an error — a query with no
//! relevant context simply returns no hits.

use tracing::debug;

use crate::embedding::Embedder;
use crate::error::PipelineResult;
use crate::models::SearchHit;
use crate::store::VectorStore;

/// Top-`top_k` chunks ranked by ascending distance. When
/// `similarity_threshold` is set, candidates whose distance exceeds it are
/// dropped; the surviving order is untouched.
pub async fn retrieve(
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    query_text: &str,
    top_k: usize,
    similarity_threshold: Option<f64>,
) -> PipelineResult<Vec<SearchHit>> {
    let query_embedding = embedder.embed(query_text).await?;
    let mut hits = store.search(&query_embedding, top_k, None).await?;

    if let Some(threshold) = similarity_threshold {
        let before = hits.len();
        hits.retain(|hit| hit.distance <= threshold);
        debug!(before, after = hits.len(), threshold, "applied distance threshold");
    }

    Ok(hits)
}
