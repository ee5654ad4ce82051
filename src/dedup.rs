//! Content fingerprinting and the pre-flight dedup gate.
//!
//! The fingerprint is a SHA-256 hex digest over a source file's raw bytes:
//! the same bytes always produce the same fingerprint, and the coordinator
//! skips any file whose fingerprint the store already knows. The check is
//! file-granular; the [`DedupPolicy`](crate::config::DedupPolicy) decides
//! whether a partially ingested remnant counts as "already known".

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::DedupPolicy;
use crate::error::PipelineResult;
use crate::store::VectorStore;

/// Hex SHA-256 digest of `bytes`. Deterministic and collision-resistant.
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// What the store knows about a fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintStatus {
    /// No record carries this fingerprint.
    Absent,
    /// Records exist but fewer than the recorded total-chunk count — a prior
    /// run failed partway through.
    Partial,
    /// The stored record count matches the recorded total-chunk count.
    Complete,
}

/// Coordinator-facing outcome of the pre-flight gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    /// Skip the run entirely; the document is already present.
    AlreadyIngested,
    /// Nothing stored under this fingerprint; ingest normally.
    Fresh,
    /// A partial remnant exists and the policy is `complete`: clean up the
    /// source's stale records, then ingest fresh.
    PartialRemnant,
}

/// Read-only existence check against the store, interpreted under `policy`.
pub async fn preflight(
    store: &dyn VectorStore,
    fingerprint: &str,
    policy: DedupPolicy,
) -> PipelineResult<DedupOutcome> {
    let status = store.fingerprint_status(fingerprint).await?;
    debug!(fingerprint, ?status, ?policy, "dedup pre-flight");
    let outcome = match (status, policy) {
        (FingerprintStatus::Absent, _) => DedupOutcome::Fresh,
        (FingerprintStatus::Complete, _) => DedupOutcome::AlreadyIngested,
        (FingerprintStatus::Partial, DedupPolicy::Presence) => DedupOutcome::AlreadyIngested,
        (FingerprintStatus::Partial, DedupPolicy::Complete) => DedupOutcome::PartialRemnant,
    };
    Ok(outcome)
}
