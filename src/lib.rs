//! # edgequake-batch
//!
//! Apply one transform to many files and package the results into a single
//! ZIP archive.
//!
//! ## Why this crate?
//!
//! Every "bulk X" tool (bulk rotate, bulk compress, bulk grayscale, format
//! conversion, base64 encode, batch rename) needs the same machinery: an
//! ordered queue, one item at a time so memory stays bounded, a corrupt file
//! that fails only itself, a progress fraction, one downloadable archive, and
//! cleanup that does not leak buffers across repeated runs. This crate is
//! that machinery once, parameterised by a pluggable [`Transform`].
//!
//! ## Pipeline Overview
//!
//! ```text
//! files
//!  │
//!  ├─ 1. Input     read paths into in-memory payloads
//!  ├─ 2. Queue     ordered items with stable ids
//!  ├─ 3. Execute   one item at a time (spawn_blocking for codecs)
//!  ├─ 4. Isolate   Err / panic / timeout → failure record, batch continues
//!  ├─ 5. Package   collision-free names → ZIP, finalized once
//!  └─ 6. Expose    archive handle in the registry until reset
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_batch::{convert_files, BatchConfig, ImageTransform, OutputFormat};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BatchConfig::builder()
//!         .quality(70)
//!         .format(OutputFormat::Jpeg)
//!         .build()?;
//!     let output = convert_files(["a.png", "b.png"], Arc::new(ImageTransform::compress()), &config).await?;
//!     std::fs::write("compressed.zip", &output.archive.bytes[..])?;
//!     eprintln!("{}", output.stats.summary());
//!     for f in &output.failures {
//!         eprintln!("  {}: {}", f.name, f.reason());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `batch2zip` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! edgequake-batch = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod session;
pub mod stream;
pub mod transform;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ArchiveCompression, BatchConfig, BatchConfigBuilder, OutputFormat, Rotation, TransformParams,
};
pub use convert::{convert_files, convert_inputs, convert_sync, convert_to_file, write_archive};
pub use error::{ArchiveError, BulkError, ItemError, TransformError};
pub use output::{
    ArchiveEntry, BatchOutput, BatchReport, BatchStats, FinishedArchive, ItemFailure, ItemSuccess,
    TransformResult,
};
pub use pipeline::gate::ReadinessGate;
pub use pipeline::package::{ArchiveBackend, ArchiveWriter, ZipBackend};
pub use pipeline::queue::{Item, ItemId, RawInput};
pub use pipeline::registry::{HandleToken, ResourceKind, ResourceRegistry};
pub use pipeline::state::PipelineState;
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use session::{BatchPipeline, ExportedArchive, PipelineView, ResetOutcome};
pub use stream::{transform_files_stream, transform_stream, ResultStream};
pub use transform::{
    transform_fn, Base64Transform, ImageOp, ImageTransform, RenameTransform, Transform,
    TransformInput, TransformOutput,
};
