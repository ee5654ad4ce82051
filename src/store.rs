//! Vector store seam and the Postgres/pgvector backend.
//!
//! The [`VectorStore`] trait defines the data operations the pipeline needs:
//! single and batched inserts, ranked similarity search, bulk deletion by
//! source, and the fingerprint existence check behind the dedup gate.
//! [`PgVectorStore`] implements it over an injected [`sqlx::PgPool`]; the
//! pool's lifecycle belongs to the process entry point and is never
//! re-created here.
//!
//! Schema notes: one table with `id BIGSERIAL`, a fixed-width `VECTOR(N)`
//! column, nullable `content`/`metadata`, and server-defaulted timestamps
//! kept current by an update trigger. One approximate-nearest-neighbor index
//! over the embedding column, created with the configured parameters and
//! never resized as data grows — recall degrades past the size the
//! parameters were chosen for, and rebuilding (`rag reindex`) is an explicit
//! operator action.
//!
//! The similarity vector and the metadata filter are bound query parameters,
//! never formatted into SQL. Identifiers cannot be bound, so table and index
//! names pass through [`quote_ident`] which rejects anything that is not a
//! plain identifier.

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use crate::config::{Config, IndexConfig, IndexKind, Metric};
use crate::dedup::FingerprintStatus;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{ChunkMetadata, EmbeddingRecord, SearchHit};
use crate::retry::{self, RetryPolicy};

/// Storage backend for embedding records.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert one record, returning the store-assigned id.
    async fn insert(&self, record: &EmbeddingRecord) -> PipelineResult<i64>;

    /// Insert several records in one round trip. The whole batch commits or
    /// fails atomically.
    async fn batch_insert(&self, records: &[EmbeddingRecord]) -> PipelineResult<Vec<i64>>;

    /// Ranked similarity search: ascending distance under the configured
    /// metric, at most `limit` hits, optionally restricted by a metadata
    /// predicate before ranking.
    async fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        filter: Option<&MetadataFilter>,
    ) -> PipelineResult<Vec<SearchHit>>;

    /// Remove every record whose metadata `source` matches. Returns the
    /// removed count.
    async fn delete_by_source(&self, source: &str) -> PipelineResult<u64>;

    /// What the store knows about a content fingerprint, for the dedup gate.
    async fn fingerprint_status(&self, fingerprint: &str) -> PipelineResult<FingerprintStatus>;
}

/// Equality predicate over metadata fields, serialized to one bound JSONB
/// containment argument (`metadata @> $n`).
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    fields: serde_json::Map<String, serde_json::Value>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The JSONB containment argument.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(self.fields.clone())
    }
}

/// Quote a SQL identifier, rejecting anything but `[A-Za-z_][A-Za-z0-9_]*`.
pub fn quote_ident(name: &str) -> PipelineResult<String> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if !valid {
        return Err(PipelineError::Config(format!(
            "invalid SQL identifier: {name:?}"
        )));
    }
    Ok(format!("\"{name}\""))
}

/// Postgres/pgvector-backed [`VectorStore`].
pub struct PgVectorStore {
    pool: PgPool,
    /// Quoted table identifier, safe to splice into SQL.
    table: String,
    table_raw: String,
    dimensions: usize,
    metric: Metric,
    index: IndexConfig,
    retry: RetryPolicy,
}

impl PgVectorStore {
    /// Wrap an existing pool. Fails on an invalid table identifier.
    pub fn new(pool: PgPool, config: &Config) -> PipelineResult<Self> {
        let table = quote_ident(&config.store.table)?;
        Ok(Self {
            pool,
            table,
            table_raw: config.store.table.clone(),
            dimensions: config.store.dimensions,
            metric: config.store.metric,
            index: config.index.clone(),
            retry: RetryPolicy::new(
                config.ingest.max_attempts,
                std::time::Duration::from_millis(config.ingest.base_delay_ms),
            ),
        })
    }

    /// Create the embeddings table, the `updated_at` maintenance trigger,
    /// and nothing else. Idempotent.
    pub async fn create_table(&self) -> PipelineResult<()> {
        sqlx::query(&self.create_table_sql()).execute(&self.pool).await?;
        sqlx::query(&self.trigger_function_sql())
            .execute(&self.pool)
            .await?;
        // DROP + CREATE because Postgres has no CREATE TRIGGER IF NOT EXISTS.
        sqlx::query(&self.drop_trigger_sql()).execute(&self.pool).await?;
        sqlx::query(&self.create_trigger_sql())
            .execute(&self.pool)
            .await?;
        info!(table = %self.table_raw, dimensions = self.dimensions, "table ready");
        Ok(())
    }

    /// Create the configured ANN index if absent. Does not rebuild or resize
    /// an existing index.
    pub async fn create_index(&self) -> PipelineResult<()> {
        sqlx::query(&self.create_index_sql()).execute(&self.pool).await?;
        info!(
            table = %self.table_raw,
            kind = ?self.index.kind,
            "ANN index ready"
        );
        Ok(())
    }

    /// Drop and recreate the ANN index with the configured parameters. This
    /// is the operator's answer to recall degrading as the table outgrows
    /// the parameters the index was built with.
    pub async fn rebuild_index(&self) -> PipelineResult<()> {
        sqlx::query(&format!(
            "DROP INDEX IF EXISTS {}",
            self.index_ident()
        ))
        .execute(&self.pool)
        .await?;
        self.create_index().await
    }

    fn index_ident(&self) -> String {
        // table_raw was validated in new(), so the derived name is too.
        format!("\"{}_embedding_idx\"", self.table_raw)
    }

    fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (\n\
             \x20   id BIGSERIAL PRIMARY KEY,\n\
             \x20   embedding VECTOR({dims}) NOT NULL,\n\
             \x20   content TEXT,\n\
             \x20   metadata JSONB,\n\
             \x20   created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),\n\
             \x20   updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()\n\
             )",
            table = self.table,
            dims = self.dimensions
        )
    }

    fn trigger_function_sql(&self) -> String {
        format!(
            "CREATE OR REPLACE FUNCTION \"{raw}_touch_updated_at\"() RETURNS TRIGGER AS $$\n\
             BEGIN\n\
             \x20   NEW.updated_at = NOW();\n\
             \x20   RETURN NEW;\n\
             END;\n\
             $$ LANGUAGE plpgsql",
            raw = self.table_raw
        )
    }

    fn drop_trigger_sql(&self) -> String {
        format!(
            "DROP TRIGGER IF EXISTS \"{raw}_set_updated_at\" ON {table}",
            raw = self.table_raw,
            table = self.table
        )
    }

    fn create_trigger_sql(&self) -> String {
        format!(
            "CREATE TRIGGER \"{raw}_set_updated_at\" BEFORE UPDATE ON {table} \
             FOR EACH ROW EXECUTE FUNCTION \"{raw}_touch_updated_at\"()",
            raw = self.table_raw,
            table = self.table
        )
    }

    fn create_index_sql(&self) -> String {
        let opclass = self.metric.opclass();
        match self.index.kind {
            IndexKind::Hnsw => format!(
                "CREATE INDEX IF NOT EXISTS {idx} ON {table} \
                 USING hnsw (embedding {opclass}) \
                 WITH (m = {m}, ef_construction = {efc})",
                idx = self.index_ident(),
                table = self.table,
                m = self.index.m,
                efc = self.index.ef_construction
            ),
            IndexKind::Ivfflat => format!(
                "CREATE INDEX IF NOT EXISTS {idx} ON {table} \
                 USING ivfflat (embedding {opclass}) \
                 WITH (lists = {lists})",
                idx = self.index_ident(),
                table = self.table,
                lists = self.index.lists
            ),
        }
    }

    fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (embedding, content, metadata) VALUES ($1, $2, $3) RETURNING id",
            self.table
        )
    }

    fn search_sql(&self, filtered: bool) -> String {
        let op = self.metric.operator();
        let filter_clause = if filtered {
            " WHERE metadata @> $3"
        } else {
            ""
        };
        format!(
            "SELECT id, content, metadata, (embedding {op} $1)::float8 AS distance \
             FROM {table}{filter_clause} ORDER BY embedding {op} $1 LIMIT $2",
            table = self.table
        )
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

    fn metadata_json(metadata: &ChunkMetadata) -> PipelineResult<serde_json::Value> {
        serde_json::to_value(metadata)
            .map_err(|e| PipelineError::Storage(format!("metadata serialization failed: {e}")))
    }

    fn hit_from_row(row: &sqlx::postgres::PgRow) -> PipelineResult<SearchHit> {
        let metadata: Option<serde_json::Value> = row.try_get("metadata")?;
        let metadata = match metadata {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| PipelineError::Storage(format!("malformed metadata row: {e}")))?,
            None => ChunkMetadata::default(),
        };
        Ok(SearchHit {
            id: row.try_get("id")?,
            content: row
                .try_get::<Option<String>, _>("content")?
                .unwrap_or_default(),
            metadata,
            distance: row.try_get("distance")?,
        })
    }
}

#[async_trait]
impl VectorStore for PgVectorStore {
    // Inserts run single-shot: the ingestion coordinator retries each
    // chunk's embed+insert as one unit, and a second envelope here would
    // multiply the attempt ceiling.
    async fn insert(&self, record: &EmbeddingRecord) -> PipelineResult<i64> {
        self.check_dimensions(&record.embedding)?;
        let metadata = Self::metadata_json(&record.metadata)?;
        let id: i64 = sqlx::query_scalar(&self.insert_sql())
            .bind(Vector::from(record.embedding.clone()))
            .bind(&record.content)
            .bind(metadata)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    async fn batch_insert(&self, records: &[EmbeddingRecord]) -> PipelineResult<Vec<i64>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            self.check_dimensions(&record.embedding)?;
            rows.push((
                Vector::from(record.embedding.clone()),
                record.content.clone(),
                Self::metadata_json(&record.metadata)?,
            ));
        }

        let mut builder = sqlx::QueryBuilder::new(format!(
            "INSERT INTO {} (embedding, content, metadata) ",
            self.table
        ));
        builder.push_values(rows, |mut b, (embedding, content, metadata)| {
            b.push_bind(embedding).push_bind(content).push_bind(metadata);
        });
        builder.push(" RETURNING id");

        let ids = builder
            .build_query_scalar::<i64>()
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        filter: Option<&MetadataFilter>,
    ) -> PipelineResult<Vec<SearchHit>> {
        self.check_dimensions(query_embedding)?;
        let filter = filter.filter(|f| !f.is_empty());
        let sql = self.search_sql(filter.is_some());
        let query = Vector::from(query_embedding.to_vec());
        let filter_json = filter.map(MetadataFilter::to_json);

        retry::with_backoff(self.retry, "search", || {
            let pool = self.pool.clone();
            let sql = sql.clone();
            let query = query.clone();
            let filter_json = filter_json.clone();
            let ef_search = match self.index.kind {
                IndexKind::Hnsw => self.index.ef_search,
                IndexKind::Ivfflat => None,
            };
            async move {
                let mut tx = pool.begin().await?;
                if let Some(ef) = ef_search {
                    // ef is a validated u32; SET LOCAL cannot take binds.
                    sqlx::query(&format!("SET LOCAL hnsw.ef_search = {ef}"))
                        .execute(&mut *tx)
                        .await?;
                }
                let mut q = sqlx::query(&sql).bind(query).bind(limit as i64);
                if let Some(json) = filter_json {
                    q = q.bind(json);
                }
                let rows = q.fetch_all(&mut *tx).await?;
                tx.commit().await?;
                rows.iter().map(Self::hit_from_row).collect()
            }
        })
        .await
    }

    async fn delete_by_source(&self, source: &str) -> PipelineResult<u64> {
        let sql = format!("DELETE FROM {} WHERE metadata @> $1", self.table);
        let predicate = MetadataFilter::new().eq("source", source).to_json();
        let removed = retry::with_backoff(self.retry, "delete_by_source", || {
            let pool = self.pool.clone();
            let sql = sql.clone();
            let predicate = predicate.clone();
            async move {
                let result = sqlx::query(&sql).bind(predicate).execute(&pool).await?;
                Ok(result.rows_affected())
            }
        })
        .await?;
        debug!(source, removed, "deleted records by source");
        Ok(removed)
    }

    async fn fingerprint_status(&self, fingerprint: &str) -> PipelineResult<FingerprintStatus> {
        let sql = format!(
            "SELECT COUNT(*), MAX((metadata->>'total_chunks')::BIGINT) \
             FROM {} WHERE metadata @> $1",
            self.table
        );
        let predicate = MetadataFilter::new().eq("fingerprint", fingerprint).to_json();
        let (count, total): (i64, Option<i64>) =
            retry::with_backoff(self.retry, "fingerprint_status", || {
                let pool = self.pool.clone();
                let sql = sql.clone();
                let predicate = predicate.clone();
                async move {
                    let row = sqlx::query_as(&sql).bind(predicate).fetch_one(&pool).await?;
                    Ok(row)
                }
            })
            .await?;

        Ok(match (count, total) {
            (0, _) => FingerprintStatus::Absent,
            // No recorded total means an old or partial write; the stored
            // rows still exist, so presence-wise the fingerprint is known.
            (n, Some(total)) if n < total => FingerprintStatus::Partial,
            _ => FingerprintStatus::Complete,
        })
    }
}
