//! Error types for the edgequake-batch library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`BulkError`] is **fatal**: the run cannot start or cannot produce an
//!   archive (empty batch, codec not ready, packaging failed, illegal state
//!   transition). Returned as `Err(BulkError)` from the pipeline operations.
//!
//! * [`ItemError`] is **non-fatal**: a single item failed (corrupt input,
//!   unsupported media type, transform panicked) but every other item is fine.
//!   Stored inside [`crate::output::ItemFailure`] so callers can inspect
//!   partial success rather than losing the whole batch to one bad file.
//!
//! [`ArchiveError`] is the packager's own vocabulary and [`TransformError`]
//! is what a [`crate::transform::Transform`] returns; the executor turns the
//! latter into an [`ItemError`] before it ever leaves the per-item call.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-batch library.
///
/// Item-level failures use [`ItemError`] and are stored in
/// [`crate::output::ItemFailure`] rather than propagated here.
#[derive(Debug, Error)]
pub enum BulkError {
    // ── Run preconditions ─────────────────────────────────────────────────
    /// `start_run` was called with nothing in the queue.
    #[error("Cannot start a run: the batch is empty.\nAdd at least one file first.")]
    EmptyBatch,

    /// The transform or archive library has not signalled readiness yet.
    #[error("Cannot start a run: {reason}\nWait for the library to finish loading and retry.")]
    LibraryNotReady { reason: String },

    /// A run is already in flight on this pipeline.
    #[error("A run is already processing; wait for it to finish or reset")]
    AlreadyProcessing,

    /// The requested operation is not legal in the current pipeline state.
    #[error("Cannot {action} while the pipeline is {state}")]
    InvalidState { state: String, action: &'static str },

    // ── Run outcomes ──────────────────────────────────────────────────────
    /// The run stopped before every item was dispatched.
    #[error("Run cancelled before all items were processed")]
    Cancelled,

    /// The archive could not be built; no partial archive is exposed.
    #[error("Packaging failed: {0}")]
    PackagingFailed(#[from] ArchiveError),

    /// Every item failed; the archive would be empty.
    ///
    /// Only returned by [`crate::output::BatchOutput::into_result`]; the
    /// pipeline itself treats a fully failed batch as `done`.
    #[error("All {total} items failed.\nFirst error: {first_error}")]
    AllItemsFailed { total: usize, first_error: String },

    /// Some items succeeded but at least one failed.
    ///
    /// Returned by [`crate::output::BatchOutput::into_result`] when the
    /// caller wants to treat any item failure as an error.
    #[error("{failed}/{total} items failed during the run")]
    PartialFailure {
        success: usize,
        failed: usize,
        total: usize,
    },

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The path exists but is not a regular file.
    #[error("Invalid input '{path}': not a regular file")]
    NotAFile { path: PathBuf },

    /// Reading the input failed for another I/O reason.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output archive.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single item.
///
/// Stored inside [`crate::output::ItemFailure`] when an item fails.
/// The run continues with the next item.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum ItemError {
    /// The transform returned an error.
    #[error("'{name}': {detail}")]
    TransformFailed { name: String, detail: String },

    /// The transform panicked; the panic was contained to this item.
    #[error("'{name}': transform panicked: {detail}")]
    Panicked { name: String, detail: String },

    /// The transform exceeded the per-item time limit.
    #[error("'{name}': transform timed out after {ms}ms")]
    Timeout { name: String, ms: u64 },
}

impl ItemError {
    /// Original name of the item this error belongs to.
    pub fn item_name(&self) -> &str {
        match self {
            ItemError::TransformFailed { name, .. }
            | ItemError::Panicked { name, .. }
            | ItemError::Timeout { name, .. } => name,
        }
    }
}

/// Errors raised by the archive packager and archive codecs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArchiveError {
    /// An entry with this name was already added in the current run.
    #[error("Duplicate archive entry name '{name}'")]
    DuplicateName { name: String },

    /// `finalize` (or `add`) was called after the archive was finalized.
    #[error("Archive already finalized; reset before packaging again")]
    AlreadyFinalized,

    /// The codec failed while writing or finalizing.
    #[error("Archive codec error: {0}")]
    Codec(String),
}

impl From<zip::result::ZipError> for ArchiveError {
    fn from(e: zip::result::ZipError) -> Self {
        ArchiveError::Codec(e.to_string())
    }
}

/// Error returned by a [`crate::transform::Transform`] for one item.
#[derive(Debug, Error)]
pub enum TransformError {
    /// The input bytes are not in a format this transform understands.
    #[error("unsupported input (media type '{media_type}')")]
    Unsupported { media_type: String },

    /// The transform parameters do not make sense for this transform.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// Decoding or encoding the image failed.
    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    /// I/O failure while producing the output.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else, as a message.
    #[error("{0}")]
    Other(String),
}

impl TransformError {
    pub fn other(msg: impl Into<String>) -> Self {
        TransformError::Other(msg.into())
    }
}
