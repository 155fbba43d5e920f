//! Input loading: turn user-supplied paths into [`RawInput`] payloads.
//!
//! Files are read whole; every item lives in memory for the duration of a
//! run anyway, since the archive is assembled in memory. Fatal conditions
//! (missing file, no permission, a directory) are reported before anything
//! is enqueued so a typo never produces a half-built batch.

use crate::error::BulkError;
use crate::pipeline::queue::RawInput;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

const FALLBACK_MEDIA_TYPE: &str = "application/octet-stream";

/// Read one local file into a [`RawInput`].
///
/// The item name is the file name component; the media type is sniffed from
/// the content first and the extension second.
pub async fn read_input(path: impl AsRef<Path>) -> Result<RawInput, BulkError> {
    let path = path.as_ref();
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| classify(path, e))?;
    if !meta.is_file() {
        return Err(BulkError::NotAFile {
            path: path.to_path_buf(),
        });
    }

    let data = tokio::fs::read(path).await.map_err(|e| classify(path, e))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let media_type = sniff_media_type(&name, &data);

    debug!(
        "Loaded '{}' ({} bytes, {})",
        path.display(),
        data.len(),
        media_type
    );
    Ok(RawInput::new(name, media_type, data))
}

/// Read several files, in order. Fails on the first unreadable path.
pub async fn read_inputs<P: AsRef<Path>>(
    paths: impl IntoIterator<Item = P>,
) -> Result<Vec<RawInput>, BulkError> {
    let mut inputs = Vec::new();
    for path in paths {
        inputs.push(read_input(path).await?);
    }
    Ok(inputs)
}

/// Best-effort MIME type: magic bytes, then extension, then octet-stream.
pub fn sniff_media_type(name: &str, bytes: &[u8]) -> String {
    if let Ok(format) = image::guess_format(bytes) {
        return format.to_mime_type().to_string();
    }
    let from_ext = Path::new(name)
        .extension()
        .and_then(|ext| image::ImageFormat::from_extension(ext))
        .map(|f| f.to_mime_type().to_string());
    if let Some(mime) = from_ext {
        return mime;
    }
    match Path::new(name).extension().and_then(|e| e.to_str()) {
        Some("txt") => "text/plain".to_string(),
        Some("json") => "application/json".to_string(),
        Some("pdf") => "application/pdf".to_string(),
        _ => FALLBACK_MEDIA_TYPE.to_string(),
    }
}

fn classify(path: &Path, e: std::io::Error) -> BulkError {
    let path: PathBuf = path.to_path_buf();
    match e.kind() {
        ErrorKind::NotFound => BulkError::FileNotFound { path },
        ErrorKind::PermissionDenied => BulkError::PermissionDenied { path },
        _ => BulkError::ReadFailed { path, source: e },
    }
}
