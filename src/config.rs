//! Configuration types for batch runs.
//!
//! All run behaviour is controlled through [`BatchConfig`], built via its
//! [`BatchConfigBuilder`]. The per-item knobs the transform sees (quality,
//! dimensions, angle, target format) live in [`TransformParams`] so a UI can
//! change them while the pipeline is idle without rebuilding the config.

use crate::error::BulkError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Configuration for a batch pipeline.
///
/// Built via [`BatchConfig::builder()`] or using [`BatchConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_batch::{BatchConfig, OutputFormat};
///
/// let config = BatchConfig::builder()
///     .quality(75)
///     .format(OutputFormat::Jpeg)
///     .archive_name("compressed-images.zip")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct BatchConfig {
    /// Parameters handed to the transform for every item.
    pub params: TransformParams,

    /// Suggested file name for the finished archive. Default: "batch.zip".
    pub archive_name: String,

    /// How entries are stored inside the archive. Default: Deflated.
    ///
    /// Already-compressed outputs (JPEG, WebP) gain almost nothing from
    /// deflate; `Stored` makes packaging of large batches noticeably faster.
    pub compression: ArchiveCompression,

    /// Per-item transform time limit in seconds. Default: None (no limit).
    ///
    /// A hung decoder would otherwise stall the whole batch, since items are
    /// processed strictly one at a time.
    pub item_timeout_secs: Option<u64>,

    /// Progress events receiver. Default: None.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            params: TransformParams::default(),
            archive_name: "batch.zip".to_string(),
            compression: ArchiveCompression::default(),
            item_timeout_secs: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for BatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchConfig")
            .field("params", &self.params)
            .field("archive_name", &self.archive_name)
            .field("compression", &self.compression)
            .field("item_timeout_secs", &self.item_timeout_secs)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl BatchConfig {
    /// Create a new builder for `BatchConfig`.
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`BatchConfig`].
#[derive(Debug)]
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    pub fn params(mut self, params: TransformParams) -> Self {
        self.config.params = params;
        self
    }

    pub fn quality(mut self, q: u8) -> Self {
        self.config.params.quality = q.clamp(1, 100);
        self
    }

    pub fn width(mut self, w: u32) -> Self {
        self.config.params.width = Some(w);
        self
    }

    pub fn height(mut self, h: u32) -> Self {
        self.config.params.height = Some(h);
        self
    }

    pub fn rotation(mut self, r: Rotation) -> Self {
        self.config.params.rotation = r;
        self
    }

    pub fn format(mut self, f: OutputFormat) -> Self {
        self.config.params.format = Some(f);
        self
    }

    pub fn rename_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.params.rename_pattern = Some(pattern.into());
        self
    }

    pub fn data_uri(mut self, v: bool) -> Self {
        self.config.params.data_uri = v;
        self
    }

    pub fn archive_name(mut self, name: impl Into<String>) -> Self {
        self.config.archive_name = name.into();
        self
    }

    pub fn compression(mut self, c: ArchiveCompression) -> Self {
        self.config.compression = c;
        self
    }

    pub fn item_timeout_secs(mut self, secs: u64) -> Self {
        self.config.item_timeout_secs = Some(secs);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<BatchConfig, BulkError> {
        let c = &self.config;
        c.params.validate()?;
        if c.archive_name.trim().is_empty() {
            return Err(BulkError::InvalidConfig(
                "archive name must not be empty".into(),
            ));
        }
        if c.item_timeout_secs == Some(0) {
            return Err(BulkError::InvalidConfig(
                "item timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Transform parameters ─────────────────────────────────────────────────

/// Run-level parameters passed to the transform for every item.
///
/// Each field is only meaningful to some transforms; the rest ignore it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformParams {
    /// Encoder quality 1–100 for lossy formats. Default: 80.
    pub quality: u8,
    /// Target width bound in pixels (resize).
    pub width: Option<u32>,
    /// Target height bound in pixels (resize).
    pub height: Option<u32>,
    /// Rotation angle (rotate). Default: 90°.
    pub rotation: Rotation,
    /// Output format override. None keeps the input's format where possible.
    pub format: Option<OutputFormat>,
    /// Naming pattern (rename), e.g. `"holiday-{index:3}.{ext}"`.
    pub rename_pattern: Option<String>,
    /// Emit a `data:` URI instead of bare base64 (base64).
    pub data_uri: bool,
}

impl Default for TransformParams {
    fn default() -> Self {
        Self {
            quality: 80,
            width: None,
            height: None,
            rotation: Rotation::default(),
            format: None,
            rename_pattern: None,
            data_uri: false,
        }
    }
}

impl TransformParams {
    /// Check the cross-field constraints the builder cannot clamp.
    pub fn validate(&self) -> Result<(), BulkError> {
        if !(1..=100).contains(&self.quality) {
            return Err(BulkError::InvalidConfig(format!(
                "quality must be 1–100, got {}",
                self.quality
            )));
        }
        if self.width == Some(0) || self.height == Some(0) {
            return Err(BulkError::InvalidConfig(
                "target dimensions must be ≥ 1 pixel".into(),
            ));
        }
        if let Some(ref p) = self.rename_pattern {
            if p.trim().is_empty() {
                return Err(BulkError::InvalidConfig(
                    "rename pattern must not be empty".into(),
                ));
            }
        }
        Ok(())
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Clockwise rotation in quarter turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Normalise an angle in degrees to a quarter turn.
    ///
    /// Negative angles rotate counter-clockwise (`-90` is `Deg270`).
    /// Angles that are not multiples of 90 or that normalise to 0 are rejected.
    pub fn from_degrees(deg: i32) -> Result<Self, BulkError> {
        match deg.rem_euclid(360) {
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            _ => Err(BulkError::InvalidConfig(format!(
                "rotation must be a non-zero multiple of 90°, got {deg}"
            ))),
        }
    }

    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }
}

/// Image formats the built-in transforms can encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputFormat {
    Png,
    Jpeg,
    WebP,
    Bmp,
}

impl OutputFormat {
    /// Canonical file extension, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
            OutputFormat::WebP => "webp",
            OutputFormat::Bmp => "bmp",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::WebP => "image/webp",
            OutputFormat::Bmp => "image/bmp",
        }
    }

    pub fn image_format(self) -> image::ImageFormat {
        match self {
            OutputFormat::Png => image::ImageFormat::Png,
            OutputFormat::Jpeg => image::ImageFormat::Jpeg,
            OutputFormat::WebP => image::ImageFormat::WebP,
            OutputFormat::Bmp => image::ImageFormat::Bmp,
        }
    }

    /// Map a decoded input format to an encodable one, if supported.
    pub fn from_image_format(f: image::ImageFormat) -> Option<Self> {
        match f {
            image::ImageFormat::Png => Some(OutputFormat::Png),
            image::ImageFormat::Jpeg => Some(OutputFormat::Jpeg),
            image::ImageFormat::WebP => Some(OutputFormat::WebP),
            image::ImageFormat::Bmp => Some(OutputFormat::Bmp),
            _ => None,
        }
    }

    /// Parse a user-facing name or extension ("jpg", "JPEG", "png", …).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "png" => Some(OutputFormat::Png),
            "jpg" | "jpeg" => Some(OutputFormat::Jpeg),
            "webp" => Some(OutputFormat::WebP),
            "bmp" => Some(OutputFormat::Bmp),
            _ => None,
        }
    }

    /// Whether `ext` (without dot) already names this format.
    pub fn matches_extension(self, ext: &str) -> bool {
        OutputFormat::parse(ext) == Some(self)
    }
}

/// How archive entries are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ArchiveCompression {
    /// No compression.
    Stored,
    /// Deflate at the codec's default level. (default)
    #[default]
    Deflated,
}
