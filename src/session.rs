//! The batch pipeline: one queue, one run at a time, one archive.
//!
//! [`BatchPipeline`] is the façade a UI (or the CLI) talks to. It owns the
//! queue, the resource registry and the finished archive, and enforces the
//! `idle → processing → done | error` state machine from
//! [`crate::pipeline::state`].
//!
//! ## Sharing
//!
//! The pipeline is cheap to clone; clones share the same state. A UI task can
//! therefore await [`BatchPipeline::start_run`] while another task reads
//! [`BatchPipeline::view`] or calls [`BatchPipeline::cancel`]. The internal
//! lock is a plain `std::sync::Mutex` that is never held across an `.await`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use edgequake_batch::{BatchConfig, BatchPipeline, ImageTransform, RawInput};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = BatchPipeline::new(Arc::new(ImageTransform::grayscale()), BatchConfig::default());
//! pipeline.enqueue(vec![RawInput::new("a.png", "image/png", std::fs::read("a.png")?)])?;
//! let output = pipeline.start_run().await?;
//! println!("{}", output.stats.summary());
//! std::fs::write(&output.archive.suggested_name, &output.archive.bytes[..])?;
//! pipeline.reset();
//! # Ok(())
//! # }
//! ```

use crate::config::{BatchConfig, TransformParams};
use crate::error::{ArchiveError, BulkError};
use crate::output::{
    ArchiveEntry, BatchOutput, BatchReport, BatchStats, FinishedArchive, ItemFailure,
};
use crate::pipeline::executor::{self, ExecOptions};
use crate::pipeline::gate::ReadinessGate;
use crate::pipeline::naming::NameResolver;
use crate::pipeline::package::{ArchiveBackend, ArchivePackager, PackagedArchive, ZipBackend};
use crate::pipeline::queue::{Batch, BatchQueue, Item, ItemId, RawInput};
use crate::pipeline::registry::{HandleToken, ResourceKind, ResourceRegistry};
use crate::pipeline::state::{PipelineState, Transition};
use crate::progress::{BatchProgressCallback, ProgressCallback};
use crate::transform::Transform;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What [`BatchPipeline::reset`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    /// The pipeline is idle again; `released` handles were reclaimed.
    Completed { released: usize },
    /// A run is in flight. It stops after the current item, then the
    /// pipeline resets itself and `start_run` returns [`BulkError::Cancelled`].
    Deferred,
}

/// A finished archive spilled to a temporary file.
///
/// The file is owned by the pipeline's registry and deleted on reset.
#[derive(Debug, Clone, Serialize)]
pub struct ExportedArchive {
    pub path: PathBuf,
    pub suggested_name: String,
    pub token: HandleToken,
}

/// Read-only snapshot of everything a UI renders.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineView {
    pub state: PipelineState,
    pub progress: f64,
    pub queued: usize,
    pub failures: Vec<ItemFailure>,
    pub archive: Option<ArchiveSummary>,
    /// "N of M succeeded" once a run is done.
    pub summary: Option<String>,
}

/// Archive metadata without the bytes.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveSummary {
    pub suggested_name: String,
    pub size: usize,
    pub entries: Vec<ArchiveEntry>,
}

struct RunControl {
    cancel: CancellationToken,
    reset_requested: bool,
}

#[derive(Default)]
struct Inner {
    state: PipelineState,
    queue: BatchQueue,
    params: TransformParams,
    progress: f64,
    failures: Vec<ItemFailure>,
    archive: Option<FinishedArchive>,
    stats: Option<BatchStats>,
    run: Option<RunControl>,
}

impl Inner {
    /// Drop everything a finished run exposed. Handles are released by the caller.
    fn clear_run_output(&mut self) {
        self.progress = 0.0;
        self.failures.clear();
        self.archive = None;
        self.stats = None;
    }

    /// Return to `idle` with an empty queue and release every handle.
    fn reset_all(&mut self, registry: &ResourceRegistry) -> usize {
        self.state = PipelineState::Idle;
        self.queue.clear();
        self.clear_run_output();
        registry.release_all()
    }
}

/// A batch media transform pipeline.
#[derive(Clone)]
pub struct BatchPipeline {
    inner: Arc<Mutex<Inner>>,
    registry: Arc<ResourceRegistry>,
    gate: ReadinessGate,
    backend: Arc<dyn ArchiveBackend>,
    transform: Arc<dyn Transform>,
    config: Arc<BatchConfig>,
}

impl std::fmt::Debug for BatchPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchPipeline")
            .field("transform", &self.transform.name())
            .field("backend", &self.backend.name())
            .field("state", &self.state())
            .field("queued", &self.len())
            .field("registry", &self.registry)
            .finish()
    }
}

impl BatchPipeline {
    /// A pipeline with the ZIP backend and an open readiness gate.
    pub fn new(transform: Arc<dyn Transform>, config: BatchConfig) -> Self {
        let inner = Inner {
            params: config.params.clone(),
            ..Default::default()
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
            registry: Arc::new(ResourceRegistry::new()),
            gate: ReadinessGate::ready(),
            backend: Arc::new(ZipBackend::new(config.compression)),
            transform,
            config: Arc::new(config),
        }
    }

    /// Replace the archive codec.
    pub fn with_backend(mut self, backend: Arc<dyn ArchiveBackend>) -> Self {
        self.backend = backend;
        self
    }

    /// Share an externally controlled readiness gate.
    pub fn with_gate(mut self, gate: ReadinessGate) -> Self {
        self.gate = gate;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Queue and parameters (idle only) ─────────────────────────────────

    /// Append items in input order. Legal only while idle.
    pub fn enqueue(
        &self,
        payloads: impl IntoIterator<Item = RawInput>,
    ) -> Result<Vec<ItemId>, BulkError> {
        let mut inner = self.lock();
        inner.state.apply(&Transition::Mutate)?;
        let ids = inner.queue.enqueue(payloads);
        debug!("Enqueued {} items ({} queued)", ids.len(), inner.queue.len());
        Ok(ids)
    }

    /// Remove one item; `Ok(false)` if it was not queued. Legal only while idle.
    pub fn remove(&self, id: ItemId) -> Result<bool, BulkError> {
        let mut inner = self.lock();
        inner.state.apply(&Transition::Mutate)?;
        Ok(inner.queue.remove(id))
    }

    /// Empty the queue. Legal in any state; a running batch keeps its snapshot.
    pub fn clear(&self) -> usize {
        self.lock().queue.clear()
    }

    /// Change the run parameters. Legal only while idle.
    pub fn set_params(&self, params: TransformParams) -> Result<(), BulkError> {
        params.validate()?;
        let mut inner = self.lock();
        inner.state.apply(&Transition::Mutate)?;
        inner.params = params;
        Ok(())
    }

    pub fn params(&self) -> TransformParams {
        self.lock().params.clone()
    }

    /// The queued items, in order.
    pub fn items(&self) -> Vec<Item> {
        self.lock().queue.snapshot()
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    // ── Observation ──────────────────────────────────────────────────────

    pub fn state(&self) -> PipelineState {
        self.lock().state.clone()
    }

    /// Completed fraction of the current or last run.
    pub fn progress(&self) -> f64 {
        self.lock().progress
    }

    pub fn failures(&self) -> Vec<ItemFailure> {
        self.lock().failures.clone()
    }

    /// The finished archive; `Some` only while `done`.
    pub fn archive(&self) -> Option<FinishedArchive> {
        self.lock().archive.clone()
    }

    pub fn stats(&self) -> Option<BatchStats> {
        self.lock().stats.clone()
    }

    pub fn view(&self) -> PipelineView {
        let inner = self.lock();
        PipelineView {
            state: inner.state.clone(),
            progress: inner.progress,
            queued: inner.queue.len(),
            failures: inner.failures.clone(),
            archive: inner.archive.as_ref().map(|a| ArchiveSummary {
                suggested_name: a.suggested_name.clone(),
                size: a.size,
                entries: a.entries.clone(),
            }),
            summary: inner.stats.as_ref().map(BatchStats::summary),
        }
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    pub fn gate(&self) -> &ReadinessGate {
        &self.gate
    }

    /// Wait for the codec library to become ready, up to `timeout`.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<(), BulkError> {
        self.gate.wait_ready(timeout).await
    }

    // ── Run ──────────────────────────────────────────────────────────────

    /// Process the queued batch and package the successes.
    ///
    /// Refused synchronously (state unchanged) when a run is already in
    /// flight, the pipeline is not idle, the queue is empty, or the library
    /// is not ready. Item failures never fail the run; they are listed in
    /// the returned output and in [`BatchPipeline::failures`].
    ///
    /// # Errors
    /// - [`BulkError::AlreadyProcessing`] / [`BulkError::InvalidState`]
    /// - [`BulkError::EmptyBatch`]
    /// - [`BulkError::LibraryNotReady`]
    /// - [`BulkError::Cancelled`] after [`BatchPipeline::cancel`] or a deferred reset
    /// - [`BulkError::PackagingFailed`]; the pipeline is then in `error`
    pub async fn start_run(&self) -> Result<BatchOutput, BulkError> {
        let total_start = Instant::now();
        let (batch, options) = self.begin_run()?;
        let mut guard = RunGuard {
            inner: &self.inner,
            registry: &self.registry,
            armed: true,
        };
        let total = batch.len();
        info!(
            "Starting '{}' run over {} items",
            self.transform.name(),
            total
        );

        // ── Transform every item ─────────────────────────────────────────
        let observer = SessionObserver {
            inner: &self.inner,
            user: self.config.progress_callback.clone(),
        };
        let transform_start = Instant::now();
        let report = executor::run(
            &batch,
            self.transform.as_ref(),
            &self.registry,
            &observer,
            &options,
        )
        .await?;
        let transform_duration_ms = transform_start.elapsed().as_millis() as u64;

        if options.cancel.is_cancelled() {
            guard.armed = false;
            return Err(self.finish_cancelled(report));
        }

        // ── Package successes ────────────────────────────────────────────
        let package_start = Instant::now();
        let packaged = match self.package(&report).await {
            Ok(p) => p,
            Err(e) => {
                guard.armed = false;
                return Err(self.finish_packaging_failed(report, e));
            }
        };
        let package_duration_ms = package_start.elapsed().as_millis() as u64;

        if options.cancel.is_cancelled() {
            guard.armed = false;
            return Err(self.finish_cancelled(report));
        }

        // ── Expose the archive ───────────────────────────────────────────
        let (packaged, entries) = packaged;
        let token = self
            .registry
            .register(ResourceKind::Archive, Arc::clone(&packaged.bytes));
        let archive = FinishedArchive {
            size: packaged.bytes.len(),
            bytes: packaged.bytes,
            suggested_name: self.config.archive_name.clone(),
            entries,
            token,
        };
        let stats = BatchStats {
            total_items: total,
            succeeded: report.successes.len(),
            failed: report.failures.len(),
            skipped: report.undispatched,
            archive_entries: archive.entries.len(),
            archive_bytes: archive.size,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
            transform_duration_ms,
            package_duration_ms,
        };

        {
            let mut inner = self.lock();
            if inner.run.as_ref().is_some_and(|r| r.reset_requested) {
                inner.run = None;
                guard.armed = false;
                let released = inner.reset_all(&self.registry);
                info!("Deferred reset applied, released {} handles", released);
                return Err(BulkError::Cancelled);
            }
            inner.state = inner.state.apply(&Transition::AllItemsComplete)?;
            inner.progress = 1.0;
            inner.failures = report.failures.clone();
            inner.archive = Some(archive.clone());
            inner.stats = Some(stats.clone());
            inner.run = None;
        }
        guard.armed = false;

        if let Some(ref cb) = self.config.progress_callback {
            cb.on_batch_complete(total, stats.succeeded);
        }
        info!(
            "Run done: {} ({} entries, {} bytes, {}ms)",
            stats.summary(),
            stats.archive_entries,
            stats.archive_bytes,
            stats.total_duration_ms
        );

        Ok(BatchOutput {
            archive,
            failures: report.failures,
            stats,
        })
    }

    /// Check the guards and enter `processing`, all under one lock.
    fn begin_run(&self) -> Result<(Batch, ExecOptions), BulkError> {
        let mut inner = self.lock();
        let next = inner.state.apply(&Transition::StartRun)?;
        if inner.queue.is_empty() {
            return Err(BulkError::EmptyBatch);
        }
        self.gate.check()?;

        let options = ExecOptions::new(self.config.item_timeout_secs.map(Duration::from_secs));
        inner.state = next;
        inner.clear_run_output();
        inner.run = Some(RunControl {
            cancel: options.cancel.clone(),
            reset_requested: false,
        });
        let batch = Batch::new(inner.queue.snapshot(), inner.params.clone());
        Ok((batch, options))
    }

    async fn package(
        &self,
        report: &BatchReport,
    ) -> Result<(PackagedArchive, Vec<ArchiveEntry>), ArchiveError> {
        let mut packager = ArchivePackager::new(self.backend.as_ref())?;
        let mut names = NameResolver::new();
        let mut entries = Vec::with_capacity(report.successes.len());
        for s in &report.successes {
            let name = names.resolve(&s.output_name, s.order);
            packager.add(&name, s.bytes.clone()).await?;
            entries.push(ArchiveEntry {
                name,
                source: s.id,
                size: s.output_len,
            });
        }
        let packaged = packager.finalize().await?;
        Ok((packaged, entries))
    }

    fn finish_cancelled(&self, report: BatchReport) -> BulkError {
        let mut inner = self.lock();
        let reset_requested = inner.run.take().is_some_and(|r| r.reset_requested);
        if reset_requested {
            let released = inner.reset_all(&self.registry);
            info!("Deferred reset applied, released {} handles", released);
        } else {
            inner.state = inner
                .state
                .apply(&Transition::Cancelled)
                .unwrap_or_else(|_| PipelineState::Error("run cancelled".into()));
            inner.failures = report.failures;
            warn!(
                "Run cancelled with {} items not dispatched",
                report.undispatched
            );
        }
        BulkError::Cancelled
    }

    fn finish_packaging_failed(&self, report: BatchReport, e: ArchiveError) -> BulkError {
        warn!("Packaging failed: {}", e);
        let mut inner = self.lock();
        let reset_requested = inner.run.take().is_some_and(|r| r.reset_requested);
        if reset_requested {
            inner.reset_all(&self.registry);
        } else {
            let reason = e.to_string();
            inner.state = inner
                .state
                .apply(&Transition::PackagingFailed(reason.clone()))
                .unwrap_or(PipelineState::Error(reason));
            inner.failures = report.failures;
        }
        BulkError::PackagingFailed(e)
    }

    /// Stop dispatching after the current item. Returns whether a run was
    /// in flight. The run ends in `error("run cancelled")`.
    pub fn cancel(&self) -> bool {
        let inner = self.lock();
        match inner.run {
            Some(ref run) => {
                info!("Cancellation requested");
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Discard the queue, the archive and every registered handle.
    ///
    /// While processing the reset is deferred until the in-flight item
    /// completes (see [`ResetOutcome::Deferred`]).
    pub fn reset(&self) -> ResetOutcome {
        let mut inner = self.lock();
        if let Some(ref mut run) = inner.run {
            info!("Reset requested while processing; deferring");
            run.reset_requested = true;
            run.cancel.cancel();
            return ResetOutcome::Deferred;
        }
        // Every non-processing state accepts Reset.
        let released = inner.reset_all(&self.registry);
        info!("Pipeline reset, released {} handles", released);
        ResetOutcome::Completed { released }
    }

    // ── Handles exposed to the UI layer ──────────────────────────────────

    /// Write the finished archive to a temporary file for download.
    ///
    /// The file lives until [`BatchPipeline::reset`] (or an explicit
    /// `registry().release(token)`).
    pub fn export_archive(&self) -> Result<ExportedArchive, BulkError> {
        let archive = {
            let inner = self.lock();
            match inner.archive {
                Some(ref a) => a.clone(),
                None => {
                    return Err(BulkError::InvalidState {
                        state: inner.state.to_string(),
                        action: "export the archive",
                    })
                }
            }
        };

        let mut tmp = tempfile::Builder::new()
            .prefix("batch-")
            .suffix(".zip")
            .tempfile()
            .map_err(|e| BulkError::Internal(format!("tempfile: {e}")))?;
        let path = tmp.path().to_path_buf();
        tmp.write_all(&archive.bytes)
            .and_then(|_| tmp.flush())
            .map_err(|e| BulkError::OutputWriteFailed {
                path: path.clone(),
                source: e,
            })?;

        let token = self.registry.register(ResourceKind::Download, tmp);
        debug!("Exported archive to {} ({})", path.display(), token);
        Ok(ExportedArchive {
            path,
            suggested_name: archive.suggested_name,
            token,
        })
    }

    /// Hand a UI-side resource (thumbnail, decoded preview) to the registry
    /// so the next reset reclaims it.
    pub fn register_preview<T: Send + 'static>(&self, resource: T) -> HandleToken {
        self.registry.register(ResourceKind::Preview, resource)
    }
}

// ── Progress plumbing ────────────────────────────────────────────────────

/// Records progress in the shared state and forwards events to the user.
struct SessionObserver<'a> {
    inner: &'a Mutex<Inner>,
    user: Option<ProgressCallback>,
}

impl BatchProgressCallback for SessionObserver<'_> {
    fn on_batch_start(&self, total_items: usize) {
        if let Some(ref cb) = self.user {
            cb.on_batch_start(total_items);
        }
    }

    fn on_item_start(&self, index: usize, total: usize, name: &str) {
        if let Some(ref cb) = self.user {
            cb.on_item_start(index, total, name);
        }
    }

    fn on_item_complete(&self, index: usize, total: usize, name: &str, output_len: usize) {
        if let Some(ref cb) = self.user {
            cb.on_item_complete(index, total, name, output_len);
        }
    }

    fn on_item_error(&self, index: usize, total: usize, name: &str, error: &str) {
        if let Some(ref cb) = self.user {
            cb.on_item_error(index, total, name, error);
        }
    }

    fn on_progress(&self, fraction: f64) {
        let fraction = fraction.clamp(0.0, 1.0);
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if fraction > inner.progress {
                inner.progress = fraction;
            }
        }
        if let Some(ref cb) = self.user {
            cb.on_progress(fraction);
        }
    }
}

/// Leaves the pipeline in `error` if a `start_run` future is dropped mid-run,
/// or applies a reset that was deferred to the end of that run.
struct RunGuard<'a> {
    inner: &'a Mutex<Inner>,
    registry: &'a ResourceRegistry,
    armed: bool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let reset_requested = match inner.run.take() {
            Some(run) => {
                run.cancel.cancel();
                run.reset_requested
            }
            None => false,
        };
        if reset_requested {
            let released = inner.reset_all(self.registry);
            info!("Run dropped; deferred reset released {} handles", released);
        } else if inner.state.is_processing() {
            warn!("Run abandoned before completion");
            inner.state = PipelineState::Error("run abandoned".into());
        }
    }
}
