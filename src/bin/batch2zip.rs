//! CLI binary for edgequake-batch.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `BatchConfig` + a built-in transform and writes the archive.

use anyhow::{bail, Context, Result};
use clap::Parser;
use edgequake_batch::{
    convert_files, write_archive, ArchiveCompression, Base64Transform, BatchConfig,
    BatchProgressCallback, ImageTransform, OutputFormat, ProgressCallback, RenameTransform,
    Rotation, Transform,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per finished item.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Per-item start times, keyed by 1-based index.
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading files…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&index)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_items: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total_items as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Processing");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {total_items} files…"))
        ));
    }

    fn on_item_start(&self, index: usize, _total: usize, name: &str) {
        self.start_times
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(index, Instant::now());
        self.bar.set_message(name.to_string());
    }

    fn on_item_complete(&self, index: usize, total: usize, name: &str, output_len: usize) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {:<32}  {}  {}",
            green("✓"),
            index,
            total,
            name,
            dim(&format!("{output_len:>9} bytes")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_item_error(&self, index: usize, total: usize, name: &str, error: &str) {
        let secs = self.elapsed_secs(index);
        self.errors.fetch_add(1, Ordering::SeqCst);

        // Keep one line per item.
        let msg: String = if error.chars().count() > 80 {
            let cut: String = error.chars().take(79).collect();
            format!("{cut}\u{2026}")
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {:<32}  {}  {}",
            red("✗"),
            index,
            total,
            name,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_items: usize, success_count: usize) {
        let failed = total_items.saturating_sub(success_count);
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!(
                "{} {} files processed successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} files processed  ({} failed)",
                if failed == total_items {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_items,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Rotate every photo 90° clockwise
  batch2zip rotate *.jpg -o rotated.zip

  # Rotate counter-clockwise
  batch2zip rotate --angle -90 *.jpg

  # Compress to JPEG at quality 70, store entries without deflate
  batch2zip compress --quality 70 --store *.png -o small.zip

  # Convert everything to WebP
  batch2zip convert --format webp photos/* -o webp.zip

  # Fit inside 800×600
  batch2zip resize --width 800 --height 600 *.png

  # Base64 data URIs for CSS
  batch2zip base64 --data-uri icons/*.svg -o icons-b64.zip

  # Batch rename: holiday-001.jpg, holiday-002.jpg, …
  batch2zip rename --pattern "holiday-{index:3}.{ext}" *.jpg

  # JSON report (archive metadata, failures, stats) on stdout
  batch2zip grayscale --json *.png > report.json

RENAME PLACEHOLDERS:
  {name}      original file stem
  {ext}       original extension
  {index}     1-based position in the batch
  {index:N}   position zero-padded to N digits

NAME COLLISIONS:
  When two outputs want the same entry name, the later one gets its
  zero-based queue position inserted before the extension:
  a.png, b.png, a.png  →  a.png, b.png, a-2.png

ENVIRONMENT VARIABLES:
  Every flag can also be set as BATCH2ZIP_<FLAG>, e.g. BATCH2ZIP_QUALITY=70.
  RUST_LOG overrides the log filter (e.g. RUST_LOG=edgequake_batch=debug).
"#;

/// Apply one transform to many files and package the results into a ZIP.
#[derive(Parser, Debug)]
#[command(
    name = "batch2zip",
    version,
    about = "Apply one transform to many files and package the results into a ZIP",
    long_about = "Process files one at a time through a built-in transform (rotate, grayscale, \
compress, convert, resize, base64, rename) and package every successful output into a single \
ZIP archive. A file that fails is reported and skipped; the rest of the batch still completes.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Transform to apply to every file.
    #[arg(value_enum)]
    op: OpArg,

    /// Input files, processed in the order given.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Write the archive here.
    #[arg(short, long, env = "BATCH2ZIP_OUTPUT", default_value = "batch.zip")]
    output: PathBuf,

    /// Rotation angle in degrees (multiple of 90, negative = counter-clockwise).
    #[arg(long, env = "BATCH2ZIP_ANGLE", default_value_t = 90, allow_hyphen_values = true)]
    angle: i32,

    /// Encoder quality for lossy formats (1–100).
    #[arg(long, env = "BATCH2ZIP_QUALITY", default_value_t = 80,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: u8,

    /// Output format: png, jpg, webp, bmp.
    #[arg(long, env = "BATCH2ZIP_FORMAT")]
    format: Option<String>,

    /// Maximum output width in pixels (resize).
    #[arg(long, env = "BATCH2ZIP_WIDTH")]
    width: Option<u32>,

    /// Maximum output height in pixels (resize).
    #[arg(long, env = "BATCH2ZIP_HEIGHT")]
    height: Option<u32>,

    /// Naming pattern for `rename`, e.g. "photo-{index:3}.{ext}".
    #[arg(long, env = "BATCH2ZIP_PATTERN")]
    pattern: Option<String>,

    /// Emit `data:` URIs instead of bare base64.
    #[arg(long, env = "BATCH2ZIP_DATA_URI")]
    data_uri: bool,

    /// Per-file time limit in seconds; slower files are reported as failed.
    #[arg(long, env = "BATCH2ZIP_ITEM_TIMEOUT")]
    item_timeout: Option<u64>,

    /// Store entries without compression.
    #[arg(long, env = "BATCH2ZIP_STORE")]
    store: bool,

    /// Print a JSON report (BatchOutput without the archive bytes) on stdout.
    #[arg(long, env = "BATCH2ZIP_JSON")]
    json: bool,

    /// Exit with an error if any file failed.
    #[arg(long, env = "BATCH2ZIP_STRICT")]
    strict: bool,

    /// Disable progress bar.
    #[arg(long, env = "BATCH2ZIP_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "BATCH2ZIP_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "BATCH2ZIP_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum OpArg {
    Rotate,
    Grayscale,
    Compress,
    Convert,
    Resize,
    Base64,
    Rename,
}

impl OpArg {
    fn transform(self) -> Arc<dyn Transform> {
        match self {
            OpArg::Rotate => Arc::new(ImageTransform::rotate()),
            OpArg::Grayscale => Arc::new(ImageTransform::grayscale()),
            OpArg::Compress => Arc::new(ImageTransform::compress()),
            OpArg::Convert => Arc::new(ImageTransform::convert()),
            OpArg::Resize => Arc::new(ImageTransform::resize()),
            OpArg::Base64 => Arc::new(Base64Transform),
            OpArg::Rename => Arc::new(RenameTransform),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new();
        Some(cb as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Run ──────────────────────────────────────────────────────────────
    let output = convert_files(&cli.files, cli.op.transform(), &config)
        .await
        .context("Batch failed")?;
    let stats = write_archive(&output, &cli.output)
        .await
        .context("Failed to write archive")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else if !cli.quiet {
        eprintln!(
            "{}  {}  {}ms  →  {}",
            if stats.failed == 0 {
                green("✔")
            } else {
                cyan("⚠")
            },
            stats.summary(),
            stats.total_duration_ms,
            bold(&cli.output.display().to_string()),
        );
        for failure in &output.failures {
            eprintln!("   {} {}: {}", red("✗"), failure.name, dim(&failure.reason()));
        }
    }

    if cli.strict {
        output
            .into_result()
            .context("Some files failed (--strict)")?;
    }
    Ok(())
}

/// Map CLI args to `BatchConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<BatchConfig> {
    let mut builder = BatchConfig::builder()
        .quality(cli.quality)
        .data_uri(cli.data_uri);

    if matches!(cli.op, OpArg::Rotate) {
        builder = builder.rotation(Rotation::from_degrees(cli.angle)?);
    }
    if let Some(ref f) = cli.format {
        let Some(format) = OutputFormat::parse(f) else {
            bail!("Unknown output format '{f}' (expected png, jpg, webp or bmp)");
        };
        builder = builder.format(format);
    } else if matches!(cli.op, OpArg::Convert) {
        bail!("`convert` needs --format");
    }
    if let Some(w) = cli.width {
        builder = builder.width(w);
    }
    if let Some(h) = cli.height {
        builder = builder.height(h);
    }
    if matches!(cli.op, OpArg::Resize) && cli.width.is_none() && cli.height.is_none() {
        bail!("`resize` needs --width and/or --height");
    }
    if let Some(ref p) = cli.pattern {
        builder = builder.rename_pattern(p.clone());
    } else if matches!(cli.op, OpArg::Rename) {
        bail!("`rename` needs --pattern");
    }
    if let Some(secs) = cli.item_timeout {
        builder = builder.item_timeout_secs(secs);
    }
    if cli.store {
        builder = builder.compression(ArchiveCompression::Stored);
    }
    if let Some(name) = cli.output.file_name() {
        builder = builder.archive_name(name.to_string_lossy());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    Ok(builder.build()?)
}
