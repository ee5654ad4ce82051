use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provenance attached to every stored chunk.
///
/// The well-known fields below are what dedup and deletion key on; anything
/// else a caller wants to carry rides along in `extra` and round-trips
/// through the JSONB column untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    /// Identifier of the originating document, typically a file path.
    #[serde(default)]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Content fingerprint (hex SHA-256) shared by every chunk of one
    /// ingestion of one document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingested_at: Option<DateTime<Utc>>,
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ChunkMetadata {
    pub fn for_source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }
}

/// One chunk ready to be persisted: the vector plus the text it encodes.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub embedding: Vec<f32>,
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// A search result. `distance` is in the configured metric's units, so
/// smaller is always more similar.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: i64,
    pub content: String,
    pub metadata: ChunkMetadata,
    pub distance: f64,
}

/// Outcome of one ingestion run.
///
/// `success` reports whether the run completed, not whether every chunk made
/// it in; per-chunk failures are listed in `errors` and the counters tell
/// the rest of the story.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub success: bool,
    /// The document was already present and nothing was written.
    pub skipped: bool,
    pub chunks_total: usize,
    pub chunks_processed: usize,
    pub errors: Vec<ChunkFailure>,
    pub duration_ms: u64,
    pub message: String,
}

impl IngestReport {
    pub fn skipped(source: &str, duration_ms: u64) -> Self {
        Self {
            success: true,
            skipped: true,
            chunks_total: 0,
            chunks_processed: 0,
            errors: Vec::new(),
            duration_ms,
            message: format!("{source} already ingested, skipping"),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            skipped: false,
            chunks_total: 0,
            chunks_processed: 0,
            errors: Vec::new(),
            duration_ms: 0,
            message: message.into(),
        }
    }
}

/// A chunk that exhausted its retry budget during ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkFailure {
    pub chunk_index: usize,
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_roundtrip_preserves_extra_fields() {
        let raw = serde_json::json!({
            "source": "docs/report.pdf",
            "file_name": "report.pdf",
            "fingerprint": "abc123",
            "chunk_index": 3,
            "total_chunks": 12,
            "department": "finance",
        });
        let meta: ChunkMetadata = serde_json::from_value(raw).unwrap();
        assert_eq!(meta.source, "docs/report.pdf");
        assert_eq!(meta.chunk_index, Some(3));
        assert_eq!(
            meta.extra.get("department"),
            Some(&serde_json::json!("finance"))
        );

        let back = serde_json::to_value(&meta).unwrap();
        assert_eq!(back["department"], "finance");
        assert_eq!(back["total_chunks"], 12);
    }

    #[test]
    fn test_metadata_skips_absent_fields() {
        let meta = ChunkMetadata::for_source("notes.txt");
        let value = serde_json::to_value(&meta).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.get("source"), Some(&serde_json::json!("notes.txt")));
        assert!(!object.contains_key("fingerprint"));
        assert!(!object.contains_key("chunk_index"));
    }

    #[test]
    fn test_skipped_report_counts_nothing() {
        let report = IngestReport::skipped("notes.txt", 12);
        assert!(report.success);
        assert!(report.skipped);
        assert_eq!(report.chunks_processed, 0);
        assert!(report.message.contains("notes.txt"));
    }
}
