//! One-shot entry points: files in, archive out.
//!
//! These wrap a throwaway [`BatchPipeline`] for callers that do not need the
//! interactive enqueue/run/reset cycle (scripts, the CLI). Use
//! [`crate::session::BatchPipeline`] directly when a UI drives the batch, or
//! [`crate::stream::transform_stream`] for per-item results without packaging.

use crate::config::BatchConfig;
use crate::error::BulkError;
use crate::output::{BatchOutput, BatchStats};
use crate::pipeline::input;
use crate::pipeline::queue::RawInput;
use crate::session::BatchPipeline;
use crate::transform::Transform;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Transform in-memory inputs and package the successes.
///
/// # Returns
/// `Ok(BatchOutput)` even if some items failed (check `output.failures`, or
/// call [`BatchOutput::into_result`] for all-or-nothing semantics).
///
/// # Errors
/// Only fatal errors: an empty input list or a packaging failure.
pub async fn convert_inputs(
    inputs: Vec<RawInput>,
    transform: Arc<dyn Transform>,
    config: &BatchConfig,
) -> Result<BatchOutput, BulkError> {
    let pipeline = BatchPipeline::new(transform, config.clone());
    pipeline.enqueue(inputs)?;
    let output = pipeline.start_run().await?;
    // The caller owns the bytes now; release the pipeline's handle.
    pipeline.reset();
    Ok(output)
}

/// Read local files, transform each and package the successes.
///
/// This is the primary entry point for the library.
///
/// # Errors
/// Returns `Err(BulkError)` for fatal errors only:
/// - File not found / permission denied / not a regular file
/// - No input files
/// - Archive finalization failed
pub async fn convert_files<P: AsRef<Path>>(
    paths: impl IntoIterator<Item = P>,
    transform: Arc<dyn Transform>,
    config: &BatchConfig,
) -> Result<BatchOutput, BulkError> {
    let inputs = input::read_inputs(paths).await?;
    info!("Loaded {} input files", inputs.len());
    convert_inputs(inputs, transform, config).await
}

/// Convert files and write the archive to `output_path`.
///
/// The write is atomic: the archive goes to a sibling temp file first and is
/// renamed into place, so a crash never leaves a truncated archive.
pub async fn convert_to_file<P: AsRef<Path>>(
    paths: impl IntoIterator<Item = P>,
    output_path: impl AsRef<Path>,
    transform: Arc<dyn Transform>,
    config: &BatchConfig,
) -> Result<BatchOutput, BulkError> {
    let output = convert_files(paths, transform, config).await?;
    write_archive(&output, output_path.as_ref()).await?;
    Ok(output)
}

/// Write a finished archive to `path` atomically.
pub async fn write_archive(output: &BatchOutput, path: &Path) -> Result<BatchStats, BulkError> {
    let write_err = |e| BulkError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = path.with_extension("zip.tmp");
    tokio::fs::write(&tmp_path, &output.archive.bytes[..])
        .await
        .map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

    info!(
        "Wrote {} ({} bytes)",
        path.display(),
        output.archive.bytes.len()
    );
    Ok(output.stats.clone())
}

/// Synchronous wrapper around [`convert_files`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync<P: AsRef<Path>>(
    paths: impl IntoIterator<Item = P>,
    transform: Arc<dyn Transform>,
    config: &BatchConfig,
) -> Result<BatchOutput, BulkError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| BulkError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert_files(paths, transform, config))
}
