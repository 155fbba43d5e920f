//! Archive packaging: collect named outputs, finalize one archive buffer.
//!
//! The codec is pluggable through [`ArchiveBackend`] / [`ArchiveWriter`];
//! [`ZipBackend`] is the default. The packager enforces the run-level
//! invariants the codec does not know about:
//!
//! * an entry name can be added at most once per run ([`ArchiveError::DuplicateName`]);
//! * `finalize` succeeds exactly once ([`ArchiveError::AlreadyFinalized`] afterwards,
//!   with the first result left untouched);
//! * zero entries still finalize into a valid, empty archive.
//!
//! Compression is CPU-bound, so every codec call runs in `spawn_blocking`
//! and the async executor never stalls on a large entry.

use crate::config::ArchiveCompression;
use crate::error::ArchiveError;
use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::sync::Arc;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// A finalized archive: immutable bytes plus the entry names it contains.
#[derive(Debug, Clone)]
pub struct PackagedArchive {
    pub bytes: Arc<[u8]>,
    pub entries: Vec<String>,
}

/// Factory for archive writers (the external codec library).
pub trait ArchiveBackend: Send + Sync {
    /// Short codec name for logs and errors.
    fn name(&self) -> &str;

    /// Start a new, empty archive.
    fn create(&self) -> Result<Box<dyn ArchiveWriter>, ArchiveError>;
}

/// One archive being written.
pub trait ArchiveWriter: Send {
    fn add(&mut self, name: &str, bytes: &[u8]) -> Result<(), ArchiveError>;

    fn finalize(self: Box<Self>) -> Result<Vec<u8>, ArchiveError>;
}

// ── ZIP codec ────────────────────────────────────────────────────────────

/// ZIP archives held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct ZipBackend {
    compression: ArchiveCompression,
}

impl ZipBackend {
    pub fn new(compression: ArchiveCompression) -> Self {
        Self { compression }
    }
}

impl ArchiveBackend for ZipBackend {
    fn name(&self) -> &str {
        "zip"
    }

    fn create(&self) -> Result<Box<dyn ArchiveWriter>, ArchiveError> {
        let method = match self.compression {
            ArchiveCompression::Stored => CompressionMethod::Stored,
            ArchiveCompression::Deflated => CompressionMethod::Deflated,
        };
        Ok(Box::new(ZipArchiveWriter {
            inner: ZipWriter::new(Cursor::new(Vec::new())),
            options: SimpleFileOptions::default().compression_method(method),
        }))
    }
}

struct ZipArchiveWriter {
    inner: ZipWriter<Cursor<Vec<u8>>>,
    options: SimpleFileOptions,
}

impl ArchiveWriter for ZipArchiveWriter {
    fn add(&mut self, name: &str, bytes: &[u8]) -> Result<(), ArchiveError> {
        self.inner.start_file(name, self.options)?;
        self.inner
            .write_all(bytes)
            .map_err(|e| ArchiveError::Codec(format!("writing '{name}': {e}")))?;
        Ok(())
    }

    fn finalize(self: Box<Self>) -> Result<Vec<u8>, ArchiveError> {
        let cursor = self.inner.finish()?;
        Ok(cursor.into_inner())
    }
}

// ── Packager ─────────────────────────────────────────────────────────────

enum Slot {
    Open(Box<dyn ArchiveWriter>),
    Finalized(PackagedArchive),
    /// The codec task panicked; nothing more can be written.
    Broken,
}

/// Accumulates one run's successful outputs into an archive.
pub struct ArchivePackager {
    codec: String,
    slot: Slot,
    names: HashSet<String>,
    entries: Vec<String>,
    bytes_in: usize,
}

impl std::fmt::Debug for ArchivePackager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = match self.slot {
            Slot::Open(_) => "open",
            Slot::Finalized(_) => "finalized",
            Slot::Broken => "broken",
        };
        f.debug_struct("ArchivePackager")
            .field("codec", &self.codec)
            .field("slot", &slot)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl ArchivePackager {
    /// Start packaging with a fresh writer from `backend`.
    pub fn new(backend: &dyn ArchiveBackend) -> Result<Self, ArchiveError> {
        let writer = backend.create()?;
        Ok(Self {
            codec: backend.name().to_string(),
            slot: Slot::Open(writer),
            names: HashSet::new(),
            entries: Vec::new(),
            bytes_in: 0,
        })
    }

    /// Store one named entry.
    ///
    /// Names must already be collision-free (see [`super::naming::NameResolver`]).
    pub async fn add(&mut self, name: &str, bytes: Vec<u8>) -> Result<(), ArchiveError> {
        if self.names.contains(name) {
            return Err(ArchiveError::DuplicateName {
                name: name.to_string(),
            });
        }
        let mut writer = self.take_writer()?;

        let entry = name.to_string();
        let len = bytes.len();
        let joined = tokio::task::spawn_blocking(move || {
            let res = writer.add(&entry, &bytes);
            (writer, res)
        })
        .await;

        let (writer, res) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                return Err(ArchiveError::Codec(format!("archive task panicked: {e}")));
            }
        };
        self.slot = Slot::Open(writer);
        res?;

        debug!("Archived '{}' ({} bytes)", name, len);
        self.names.insert(name.to_string());
        self.entries.push(name.to_string());
        self.bytes_in += len;
        Ok(())
    }

    /// Serialise every added entry into one archive buffer.
    ///
    /// Callable once; later calls fail with [`ArchiveError::AlreadyFinalized`].
    pub async fn finalize(&mut self) -> Result<PackagedArchive, ArchiveError> {
        let writer = self.take_writer()?;
        let bytes = tokio::task::spawn_blocking(move || writer.finalize())
            .await
            .map_err(|e| ArchiveError::Codec(format!("archive task panicked: {e}")))??;

        let archive = PackagedArchive {
            bytes: Arc::from(bytes),
            entries: self.entries.clone(),
        };
        info!(
            "Finalized {} archive: {} entries, {} → {} bytes",
            self.codec,
            archive.entries.len(),
            self.bytes_in,
            archive.bytes.len()
        );
        self.slot = Slot::Finalized(archive.clone());
        Ok(archive)
    }

    /// The archive produced by the first successful `finalize`, if any.
    pub fn finalized(&self) -> Option<&PackagedArchive> {
        match &self.slot {
            Slot::Finalized(a) => Some(a),
            _ => None,
        }
    }

    /// Entry names added so far, in insertion order.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Leaves `Slot::Broken` behind; callers put the writer back on success.
    fn take_writer(&mut self) -> Result<Box<dyn ArchiveWriter>, ArchiveError> {
        match std::mem::replace(&mut self.slot, Slot::Broken) {
            Slot::Open(w) => Ok(w),
            Slot::Finalized(a) => {
                self.slot = Slot::Finalized(a);
                Err(ArchiveError::AlreadyFinalized)
            }
            Slot::Broken => Err(ArchiveError::Codec(format!(
                "{} writer is unusable after an earlier failure",
                self.codec
            ))),
        }
    }
}
