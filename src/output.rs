//! Result types produced by a batch run.
//!
//! [`TransformResult`] is the per-item outcome the executor emits.
//! [`BatchReport`] collects them for one run; [`FinishedArchive`] is what a
//! `done` pipeline exposes; [`BatchOutput`] bundles everything for the
//! one-shot helpers in [`crate::convert`].

use crate::error::{BulkError, ItemError};
use crate::pipeline::queue::ItemId;
use crate::pipeline::registry::HandleToken;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A successfully transformed item, before packaging.
#[derive(Debug, Clone, Serialize)]
pub struct ItemSuccess {
    pub id: ItemId,
    /// Zero-based queue position.
    pub order: usize,
    /// Original input name.
    pub name: String,
    /// Name the transform asked for; collisions are resolved at packaging.
    pub output_name: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub output_len: usize,
    pub duration_ms: u64,
}

/// A failed item. The reason is kept as data, never re-thrown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub id: ItemId,
    pub order: usize,
    pub name: String,
    pub error: ItemError,
}

impl ItemFailure {
    /// Human-readable reason, suitable for a failure list.
    pub fn reason(&self) -> String {
        self.error.to_string()
    }
}

/// Outcome of running the transform on one item.
#[derive(Debug, Clone)]
pub enum TransformResult {
    Success(ItemSuccess),
    Failure(ItemFailure),
}

impl TransformResult {
    pub fn id(&self) -> ItemId {
        match self {
            TransformResult::Success(s) => s.id,
            TransformResult::Failure(f) => f.id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TransformResult::Success(_))
    }
}

/// Everything the executor produced for one run, in queue order.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub successes: Vec<ItemSuccess>,
    pub failures: Vec<ItemFailure>,
    /// Items never dispatched because the run was cancelled.
    pub undispatched: usize,
    pub cancelled: bool,
}

impl BatchReport {
    pub fn completed(&self) -> usize {
        self.successes.len() + self.failures.len()
    }
}

/// One entry of a finished archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    /// Final, collision-free entry name.
    pub name: String,
    pub source: ItemId,
    pub size: usize,
}

/// The finalized archive of a `done` pipeline.
///
/// The buffer is shared; the pipeline's registry holds the release handle
/// (`token`) until the next reset.
#[derive(Debug, Clone, Serialize)]
pub struct FinishedArchive {
    #[serde(skip)]
    pub bytes: Arc<[u8]>,
    pub suggested_name: String,
    pub entries: Vec<ArchiveEntry>,
    pub size: usize,
    pub token: HandleToken,
}

impl FinishedArchive {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Aggregate statistics for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_items: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Items not dispatched (cancellation).
    pub skipped: usize,
    pub archive_entries: usize,
    pub archive_bytes: usize,
    pub total_duration_ms: u64,
    pub transform_duration_ms: u64,
    pub package_duration_ms: u64,
}

impl BatchStats {
    /// "N of M succeeded".
    pub fn summary(&self) -> String {
        format!("{} of {} succeeded", self.succeeded, self.total_items)
    }
}

/// Result of a complete run: archive, failures, stats.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutput {
    pub archive: FinishedArchive,
    pub failures: Vec<ItemFailure>,
    pub stats: BatchStats,
}

impl BatchOutput {
    /// Treat any item failure as an error.
    ///
    /// The pipeline considers a run with failures `done`; callers that need
    /// all-or-nothing semantics use this.
    pub fn into_result(self) -> Result<BatchOutput, BulkError> {
        let total = self.stats.total_items;
        let failed = self.failures.len();
        if failed == 0 {
            return Ok(self);
        }
        if self.stats.succeeded == 0 {
            return Err(BulkError::AllItemsFailed {
                total,
                first_error: self.failures[0].reason(),
            });
        }
        Err(BulkError::PartialFailure {
            success: self.stats.succeeded,
            failed,
            total,
        })
    }
}
