//! In-memory [`VectorStore`] for tests and offline runs.
//!
//! Linear-scan search under the configured metric — exact, not approximate,
//! which is what makes it useful for asserting ranking behavior. Not meant
//! for production data volumes.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::config::Metric;
use crate::dedup::FingerprintStatus;
use crate::embedding::cosine_similarity;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{ChunkMetadata, EmbeddingRecord, SearchHit};
use crate::store::{MetadataFilter, VectorStore};

struct StoredRow {
    id: i64,
    embedding: Vec<f32>,
    content: String,
    metadata: ChunkMetadata,
}

/// Mutex-guarded vector of rows with store-assigned monotonic ids.
pub struct MemoryStore {
    dimensions: usize,
    metric: Metric,
    rows: Mutex<Vec<StoredRow>>,
    next_id: Mutex<i64>,
}

impl MemoryStore {
    pub fn new(dimensions: usize, metric: Metric) -> Self {
        Self {
            dimensions,
            metric,
            rows: Mutex::new(Vec::new()),
            next_id: Mutex::new(1),
        }
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }

    fn check_dimensions(&self, embedding: &[f32]) -> PipelineResult<()> {
        if embedding.len() != self.dimensions {
            return Err(PipelineError::DimensionMismatch {
                expected: self.dimensions,
                actual: embedding.len(),
            });
        }
        Ok(())
    }

    fn distance(&self, a: &[f32], b: &[f32]) -> f64 {
        match self.metric {
            Metric::Cosine => 1.0 - f64::from(cosine_similarity(a, b)),
            Metric::L2 => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| f64::from(x - y).powi(2))
                .sum::<f64>()
                .sqrt(),
        }
    }

    fn matches_filter(metadata: &ChunkMetadata, filter: &MetadataFilter) -> bool {
        let row_json = match serde_json::to_value(metadata) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => return false,
        };
        filter
            .to_json()
            .as_object()
            .map(|wanted| {
                wanted
                    .iter()
                    .all(|(key, value)| row_json.get(key) == Some(value))
            })
            .unwrap_or(true)
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn insert(&self, record: &EmbeddingRecord) -> PipelineResult<i64> {
        self.check_dimensions(&record.embedding)?;
        let mut next_id = self.next_id.lock().await;
        let id = *next_id;
        *next_id += 1;
        drop(next_id);

        self.rows.lock().await.push(StoredRow {
            id,
            embedding: record.embedding.clone(),
            content: record.content.clone(),
            metadata: record.metadata.clone(),
        });
        Ok(id)
    }

    async fn batch_insert(&self, records: &[EmbeddingRecord]) -> PipelineResult<Vec<i64>> {
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            ids.push(self.insert(record).await?);
        }
        Ok(ids)
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        filter: Option<&MetadataFilter>,
    ) -> PipelineResult<Vec<SearchHit>> {
        self.check_dimensions(query_embedding)?;
        let rows = self.rows.lock().await;
        let mut hits: Vec<SearchHit> = rows
            .iter()
            .filter(|row| {
                filter
                    .filter(|f| !f.is_empty())
                    .map(|f| Self::matches_filter(&row.metadata, f))
                    .unwrap_or(true)
            })
            .map(|row| SearchHit {
                id: row.id,
                content: row.content.clone(),
                metadata: row.metadata.clone(),
                distance: self.distance(query_embedding, &row.embedding),
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete_by_source(&self, source: &str) -> PipelineResult<u64> {
        let mut rows = self.rows.lock().await;
        let before = rows.len();
        rows.retain(|row| row.metadata.source != source);
        Ok((before - rows.len()) as u64)
    }

    async fn fingerprint_status(&self, fingerprint: &str) -> PipelineResult<FingerprintStatus> {
        let rows = self.rows.lock().await;
        let matching: Vec<&StoredRow> = rows
            .iter()
            .filter(|row| row.metadata.fingerprint.as_deref() == Some(fingerprint))
            .collect();
        if matching.is_empty() {
            return Ok(FingerprintStatus::Absent);
        }
        let total = matching.iter().filter_map(|r| r.metadata.total_chunks).max();
        Ok(match total {
            Some(total) if matching.len() < total => FingerprintStatus::Partial,
            _ => FingerprintStatus::Complete,
        })
    }
}
