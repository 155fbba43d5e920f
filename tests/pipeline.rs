//! Integration tests for the batch pipeline.
//!
//! Everything runs in memory except the `convert_files` tests, which write
//! small generated images to a temp directory. No network, no fixtures.
//!
//! Run with:
//!   RUST_LOG=edgequake_batch=debug cargo test --test pipeline -- --nocapture

use edgequake_batch::{
    convert_files, convert_to_file, transform_fn, ArchiveBackend, ArchiveError, ArchiveWriter,
    BatchConfig, BatchPipeline, BatchProgressCallback, BulkError, ImageTransform, ItemError,
    PipelineState, RawInput, ReadinessGate, ResetOutcome, ResourceKind, Transform,
    TransformError, TransformInput, TransformOutput, TransformParams, ZipBackend,
};
use futures::future::{BoxFuture, FutureExt};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio_test::{assert_err, assert_ok};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Route library logs to the test harness, filtered by `RUST_LOG`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn input(name: &str) -> RawInput {
    RawInput::new(name, "text/plain", name.as_bytes().to_vec())
}

fn echo() -> Arc<dyn Transform> {
    transform_fn("echo", |item, _| async move {
        Ok(TransformOutput::new(item.payload.data.to_vec()))
    })
}

/// Fails every item whose name starts with "bad".
fn picky() -> Arc<dyn Transform> {
    transform_fn("picky", |item, _| async move {
        if item.payload.name.starts_with("bad") {
            Err(TransformError::other(format!("cannot decode {}", item.payload.name)))
        } else {
            Ok(TransformOutput::new(item.payload.data.to_vec()))
        }
    })
}

/// Records every progress fraction.
#[derive(Default)]
struct Fractions(Mutex<Vec<f64>>);

impl BatchProgressCallback for Fractions {
    fn on_progress(&self, fraction: f64) {
        self.0.lock().unwrap().push(fraction);
    }
}

impl Fractions {
    fn rounded(&self) -> Vec<f64> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .map(|f| (f * 100.0).round() / 100.0)
            .collect()
    }
}

fn with_fractions() -> (BatchConfig, Arc<Fractions>) {
    let fractions = Arc::new(Fractions::default());
    let config = BatchConfig::builder()
        .progress_callback(fractions.clone())
        .build()
        .unwrap();
    (config, fractions)
}

/// Entry names inside a ZIP buffer, in archive order.
fn zip_names(bytes: &[u8]) -> Vec<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

/// Blocks inside the transform until the test releases it; registers a
/// scratch buffer on every call.
struct Gated {
    started: Arc<Notify>,
    release: Arc<Notify>,
}

impl Gated {
    fn new() -> (Arc<Self>, Arc<Notify>, Arc<Notify>) {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let t = Arc::new(Self {
            started: started.clone(),
            release: release.clone(),
        });
        (t, started, release)
    }
}

impl Transform for Gated {
    fn name(&self) -> &str {
        "gated"
    }

    fn apply<'a>(
        &'a self,
        input: TransformInput<'a>,
    ) -> BoxFuture<'a, Result<TransformOutput, TransformError>> {
        async move {
            input
                .registry
                .register(ResourceKind::Scratch, vec![0u8; 64]);
            self.started.notify_one();
            self.release.notified().await;
            Ok(TransformOutput::new(input.item.payload.data.to_vec()))
        }
        .boxed()
    }
}

/// An archive codec whose finalize always fails.
struct OutOfMemory;

struct OutOfMemoryWriter;

impl ArchiveBackend for OutOfMemory {
    fn name(&self) -> &str {
        "oom"
    }

    fn create(&self) -> Result<Box<dyn ArchiveWriter>, ArchiveError> {
        Ok(Box::new(OutOfMemoryWriter))
    }
}

impl ArchiveWriter for OutOfMemoryWriter {
    fn add(&mut self, _name: &str, _bytes: &[u8]) -> Result<(), ArchiveError> {
        Ok(())
    }

    fn finalize(self: Box<Self>) -> Result<Vec<u8>, ArchiveError> {
        Err(ArchiveError::Codec("out of memory".into()))
    }
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 10) as u8, (y * 10) as u8, 128])
    });
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

// ── Batch outcomes ───────────────────────────────────────────────────────────

#[tokio::test]
async fn all_successes_are_packaged() {
    init_tracing();
    let (config, fractions) = with_fractions();
    let p = BatchPipeline::new(echo(), config);
    let names = ["1.txt", "2.txt", "3.txt", "4.txt", "5.txt"];
    assert_ok!(p.enqueue(names.iter().map(|n| input(n))));

    let out = assert_ok!(p.start_run().await);

    assert_eq!(p.state(), PipelineState::Done);
    assert_eq!(p.progress(), 1.0);
    assert_eq!(fractions.rounded().last(), Some(&1.0));
    assert!(out.failures.is_empty());
    assert_eq!(out.archive.entries.len(), 5);
    assert_eq!(zip_names(&out.archive.bytes), names);
    assert_eq!(out.stats.summary(), "5 of 5 succeeded");
}

#[tokio::test]
async fn k_failures_still_reach_done() {
    init_tracing();
    let p = BatchPipeline::new(picky(), BatchConfig::default());
    assert_ok!(p.enqueue(vec![
        input("a.txt"),
        input("bad1.txt"),
        input("b.txt"),
        input("c.txt"),
        input("bad2.txt"),
        input("d.txt"),
    ]));

    let out = assert_ok!(p.start_run().await);

    assert_eq!(p.state(), PipelineState::Done);
    assert_eq!(p.progress(), 1.0);
    assert_eq!(out.archive.entries.len(), 4);
    assert_eq!(out.failures.len(), 2);
    let failed: Vec<_> = p.failures().into_iter().map(|f| f.name).collect();
    assert_eq!(failed, vec!["bad1.txt", "bad2.txt"]);
    assert_eq!(zip_names(&out.archive.bytes).len(), 4);
}

#[tokio::test]
async fn every_item_failing_gives_empty_valid_archive() {
    init_tracing();
    let p = BatchPipeline::new(picky(), BatchConfig::default());
    assert_ok!(p.enqueue(vec![input("bad-a"), input("bad-b")]));

    let out = assert_ok!(p.start_run().await);

    assert_eq!(p.state(), PipelineState::Done);
    assert!(out.archive.is_empty());
    assert!(zip_names(&out.archive.bytes).is_empty());
    assert_eq!(out.stats.summary(), "0 of 2 succeeded");
    assert!(matches!(
        out.into_result(),
        Err(BulkError::AllItemsFailed { total: 2, .. })
    ));
}

#[tokio::test]
async fn duplicate_names_are_disambiguated_with_progress_thirds() {
    init_tracing();
    let (config, fractions) = with_fractions();
    let p = BatchPipeline::new(echo(), config);
    assert_ok!(p.enqueue(vec![input("a.png"), input("b.png"), input("a.png")]));

    let out = assert_ok!(p.start_run().await);

    let names: Vec<_> = out.archive.entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["a.png", "b.png", "a-2.png"]);
    assert_eq!(zip_names(&out.archive.bytes), names);
    assert_eq!(fractions.rounded(), vec![0.33, 0.67, 1.0]);
}

#[tokio::test]
async fn collision_names_are_stable_across_runs() {
    init_tracing();
    let p = BatchPipeline::new(echo(), BatchConfig::default());
    let mut runs = Vec::new();
    for _ in 0..2 {
        assert_ok!(p.enqueue(vec![input("x.png"), input("x.png"), input("x.png")]));
        let out = assert_ok!(p.start_run().await);
        runs.push(zip_names(&out.archive.bytes));
        p.reset();
    }
    assert_eq!(runs[0], runs[1]);
    assert_eq!(runs[0], vec!["x.png", "x-1.png", "x-2.png"]);
}

#[tokio::test]
async fn first_item_failing_leaves_second_in_archive() {
    init_tracing();
    let (config, fractions) = with_fractions();
    let p = BatchPipeline::new(picky(), config);
    let ids = assert_ok!(p.enqueue(vec![input("bad.png"), input("good.png")]));

    let out = assert_ok!(p.start_run().await);

    assert_eq!(p.state(), PipelineState::Done);
    assert_eq!(out.failures.len(), 1);
    assert_eq!(out.failures[0].id, ids[0]);
    assert!(matches!(
        out.failures[0].error,
        ItemError::TransformFailed { .. }
    ));
    assert!(out.failures[0].reason().contains("cannot decode bad.png"));
    assert_eq!(zip_names(&out.archive.bytes), vec!["good.png"]);
    assert_eq!(out.archive.entries[0].source, ids[1]);
    assert_eq!(fractions.rounded(), vec![0.5, 1.0]);
}

#[tokio::test]
async fn panicking_transform_fails_only_its_item() {
    init_tracing();
    let t = transform_fn("explode", |item, _| async move {
        if item.order == 0 {
            panic!("decoder crashed");
        }
        Ok(TransformOutput::new(item.payload.data.to_vec()))
    });
    let p = BatchPipeline::new(t, BatchConfig::default());
    assert_ok!(p.enqueue(vec![input("a"), input("b")]));

    let out = assert_ok!(p.start_run().await);

    assert_eq!(out.failures.len(), 1);
    assert!(matches!(out.failures[0].error, ItemError::Panicked { .. }));
    assert_eq!(out.archive.entries.len(), 1);
}

#[tokio::test]
async fn transform_panicking_before_its_future_fails_only_its_item() {
    init_tracing();
    let t = transform_fn("eager", |item, _| {
        if item.payload.name == "a" {
            panic!("header rejected");
        }
        async move { Ok(TransformOutput::new(item.payload.data.to_vec())) }
    });
    let p = BatchPipeline::new(t, BatchConfig::default());
    assert_ok!(p.enqueue(vec![input("a"), input("b")]));

    let runner = p.clone();
    let joined = tokio::spawn(async move { runner.start_run().await }).await;
    let out = assert_ok!(assert_ok!(joined));

    assert_eq!(p.state(), PipelineState::Done);
    assert_eq!(out.failures.len(), 1);
    assert_eq!(out.failures[0].name, "a");
    assert!(matches!(out.failures[0].error, ItemError::Panicked { .. }));
    let names: Vec<_> = out.archive.entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["b"]);
}

// ── Guards ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn library_not_ready_refuses_start_and_keeps_batch_mutable() {
    init_tracing();
    let gate = ReadinessGate::not_ready("zip codec still loading");
    let p = BatchPipeline::new(echo(), BatchConfig::default()).with_gate(gate.clone());
    let ids = assert_ok!(p.enqueue(vec![input("a"), input("b")]));

    let err = assert_err!(p.start_run().await);
    assert!(matches!(err, BulkError::LibraryNotReady { ref reason } if reason.contains("loading")));
    assert_eq!(p.state(), PipelineState::Idle);
    assert_eq!(p.len(), 2);

    assert_ok!(p.remove(ids[0]));
    assert_ok!(p.enqueue(vec![input("c")]));
    assert_eq!(p.len(), 2);

    gate.set_ready();
    let out = assert_ok!(p.start_run().await);
    assert_eq!(zip_names(&out.archive.bytes), vec!["b", "c"]);
}

#[tokio::test]
async fn wait_ready_unblocks_when_gate_opens() {
    init_tracing();
    let gate = ReadinessGate::not_ready("loading");
    let p = BatchPipeline::new(echo(), BatchConfig::default()).with_gate(gate.clone());

    let opener = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        gate.set_ready();
    });
    assert_ok!(p.wait_ready(std::time::Duration::from_secs(5)).await);
    opener.await.unwrap();
}

#[tokio::test]
async fn empty_batch_is_refused() {
    init_tracing();
    let p = BatchPipeline::new(echo(), BatchConfig::default());
    let err = assert_err!(p.start_run().await);
    assert!(matches!(err, BulkError::EmptyBatch));
    assert_eq!(p.state(), PipelineState::Idle);
}

#[tokio::test]
async fn second_start_and_mutations_rejected_while_processing() {
    init_tracing();
    let (t, started, release) = Gated::new();
    let p = BatchPipeline::new(t, BatchConfig::default());
    assert_ok!(p.enqueue(vec![input("only")]));

    let runner = p.clone();
    let run = tokio::spawn(async move { runner.start_run().await });
    started.notified().await;
    assert_eq!(p.state(), PipelineState::Processing);

    let err = assert_err!(p.start_run().await);
    assert!(matches!(err, BulkError::AlreadyProcessing));
    let err = assert_err!(p.enqueue(vec![input("late")]));
    assert!(matches!(err, BulkError::InvalidState { .. }));
    let err = assert_err!(p.set_params(TransformParams::default()));
    assert!(matches!(err, BulkError::InvalidState { .. }));
    // Clearing is always legal; the running batch keeps its snapshot.
    assert_eq!(p.clear(), 1);

    release.notify_one();
    let out = assert_ok!(run.await.unwrap());
    assert_eq!(out.archive.entries.len(), 1);
    assert_eq!(p.state(), PipelineState::Done);
}

// ── Reset and resources ──────────────────────────────────────────────────────

#[tokio::test]
async fn reset_after_done_releases_every_handle() {
    init_tracing();
    let p = BatchPipeline::new(echo(), BatchConfig::default());
    assert_ok!(p.enqueue(vec![input("a"), input("b")]));
    let out = assert_ok!(p.start_run().await);

    let exported = assert_ok!(p.export_archive());
    assert!(exported.path.exists());
    assert_eq!(std::fs::read(&exported.path).unwrap(), &out.archive.bytes[..]);
    let preview = p.register_preview(vec![1u8, 2, 3]);
    assert_eq!(p.registry().live_count(), 3);

    assert_eq!(p.reset(), ResetOutcome::Completed { released: 3 });

    assert_eq!(p.state(), PipelineState::Idle);
    assert_eq!(p.registry().live_count(), 0);
    assert!(!p.registry().is_live(out.archive.token));
    assert!(!p.registry().is_live(preview));
    assert!(!exported.path.exists());
    assert!(p.archive().is_none());
    assert!(p.is_empty());
    assert_eq!(p.progress(), 0.0);

    // A fresh batch runs independently.
    assert_ok!(p.enqueue(vec![input("z")]));
    let again = assert_ok!(p.start_run().await);
    assert_eq!(zip_names(&again.archive.bytes), vec!["z"]);
    assert_ne!(again.archive.token, out.archive.token);
    assert_eq!(p.registry().live_count(), 1);
}

#[tokio::test]
async fn release_is_idempotent() {
    init_tracing();
    let p = BatchPipeline::new(echo(), BatchConfig::default());
    let token = p.register_preview(String::from("thumb"));
    assert!(p.registry().release(token));
    let after_first = p.registry().released_count();
    assert!(!p.registry().release(token));
    assert_eq!(p.registry().released_count(), after_first);
    assert_eq!(p.registry().live_count(), 0);
}

#[tokio::test]
async fn reset_mid_run_is_deferred_until_item_completes() {
    init_tracing();
    let (t, started, release) = Gated::new();
    let p = BatchPipeline::new(t, BatchConfig::default());
    assert_ok!(p.enqueue(vec![input("a"), input("b"), input("c")]));

    let runner = p.clone();
    let run = tokio::spawn(async move { runner.start_run().await });
    started.notified().await;

    assert_eq!(p.reset(), ResetOutcome::Deferred);
    // In-flight work is not interrupted.
    assert_eq!(p.state(), PipelineState::Processing);
    assert_eq!(p.registry().live_of(ResourceKind::Scratch), 1);

    release.notify_one();
    let err = assert_err!(run.await.unwrap());
    assert!(matches!(err, BulkError::Cancelled));

    assert_eq!(p.state(), PipelineState::Idle);
    assert!(p.is_empty());
    assert!(p.archive().is_none());
    assert_eq!(p.registry().live_count(), 0);
}

#[tokio::test]
async fn packaging_failure_enters_error_state() {
    init_tracing();
    let p = BatchPipeline::new(picky(), BatchConfig::default())
        .with_backend(Arc::new(OutOfMemory));
    assert_ok!(p.enqueue(vec![input("a"), input("bad")]));

    let err = assert_err!(p.start_run().await);
    assert!(matches!(
        err,
        BulkError::PackagingFailed(ArchiveError::Codec(_))
    ));
    match p.state() {
        PipelineState::Error(reason) => assert!(reason.contains("out of memory")),
        other => panic!("expected error state, got {other}"),
    }
    assert!(p.archive().is_none());
    assert_eq!(p.failures().len(), 1);
    assert_eq!(p.registry().live_count(), 0);

    assert_eq!(p.reset(), ResetOutcome::Completed { released: 0 });
    assert_eq!(p.state(), PipelineState::Idle);
}

#[tokio::test]
async fn finalize_twice_keeps_first_archive() {
    init_tracing();
    let backend = ZipBackend::default();
    let mut packager = assert_ok!(edgequake_batch::pipeline::package::ArchivePackager::new(
        &backend
    ));
    assert_ok!(packager.add("a.txt", b"alpha".to_vec()).await);
    let first = assert_ok!(packager.finalize().await);

    let err = assert_err!(packager.finalize().await);
    assert_eq!(err, ArchiveError::AlreadyFinalized);
    let kept = packager.finalized().unwrap();
    assert_eq!(&kept.bytes[..], &first.bytes[..]);
    assert_eq!(zip_names(&kept.bytes), vec!["a.txt"]);
}

// ── Files on disk ────────────────────────────────────────────────────────────

#[tokio::test]
async fn convert_files_grayscale_real_images() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.png");
    let b = dir.path().join("b.png");
    let broken = dir.path().join("broken.png");
    std::fs::write(&a, png(8, 4)).unwrap();
    std::fs::write(&b, png(3, 3)).unwrap();
    std::fs::write(&broken, b"definitely not a png").unwrap();

    let out = assert_ok!(
        convert_files(
            [&a, &broken, &b],
            Arc::new(ImageTransform::grayscale()),
            &BatchConfig::default(),
        )
        .await
    );

    assert_eq!(out.stats.succeeded, 2);
    assert_eq!(out.failures.len(), 1);
    assert_eq!(out.failures[0].name, "broken.png");

    let mut archive = zip::ZipArchive::new(Cursor::new(out.archive.bytes.to_vec())).unwrap();
    let mut entry = archive.by_name("a.png").unwrap();
    let mut buf = Vec::new();
    std::io::Read::read_to_end(&mut entry, &mut buf).unwrap();
    let decoded = image::load_from_memory(&buf).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (8, 4));
    let luma = decoded.to_rgb8();
    let px = luma.get_pixel(5, 2);
    assert_eq!(px[0], px[1]);
    assert_eq!(px[1], px[2]);
}

#[tokio::test]
async fn convert_to_file_with_format_change() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("photo.png");
    std::fs::write(&src, png(6, 6)).unwrap();
    let dest = dir.path().join("converted.zip");
    let config = BatchConfig::builder()
        .format(edgequake_batch::OutputFormat::Jpeg)
        .quality(60)
        .build()
        .unwrap();

    let out = assert_ok!(
        convert_to_file([&src], &dest, Arc::new(ImageTransform::convert()), &config).await
    );

    let on_disk = std::fs::read(&dest).unwrap();
    assert_eq!(on_disk.len(), out.archive.size);
    assert_eq!(zip_names(&on_disk), vec!["photo.jpg"]);
}

#[tokio::test]
async fn missing_input_file_is_fatal() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let err = assert_err!(
        convert_files(
            [dir.path().join("ghost.png")],
            echo(),
            &BatchConfig::default()
        )
        .await
    );
    assert!(matches!(err, BulkError::FileNotFound { .. }));
}
