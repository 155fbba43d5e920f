//! Sequential transform executor.
//!
//! Items are processed strictly one at a time in queue order. Image codecs
//! are memory-hungry and a batch of a few hundred photos decoded in
//! parallel would exhaust a small machine; one-at-a-time also gives a
//! progress sequence that is monotone by construction.
//!
//! Cancellation is cooperative: the token is checked before each item is
//! dispatched, never in the middle of one.

use crate::error::BulkError;
use crate::output::{BatchReport, TransformResult};
use crate::pipeline::isolate::isolate_transform;
use crate::pipeline::queue::Batch;
use crate::pipeline::registry::ResourceRegistry;
use crate::progress::BatchProgressCallback;
use crate::transform::{Transform, TransformInput};
use futures::future;
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Per-run executor knobs.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Per-item deadline; `None` waits forever.
    pub item_timeout: Option<Duration>,
    pub cancel: CancellationToken,
}

impl ExecOptions {
    pub fn new(item_timeout: Option<Duration>) -> Self {
        Self {
            item_timeout,
            cancel: CancellationToken::new(),
        }
    }
}

/// Run `transform` over every item of `batch`.
///
/// Per-item failures are collected into the report; the only error is an
/// empty batch. Progress is reported through `observer` after each item as
/// `completed / total`.
pub async fn run(
    batch: &Batch,
    transform: &dyn Transform,
    registry: &ResourceRegistry,
    observer: &dyn BatchProgressCallback,
    options: &ExecOptions,
) -> Result<BatchReport, BulkError> {
    if batch.is_empty() {
        return Err(BulkError::EmptyBatch);
    }
    let total = batch.len();
    info!("Running '{}' over {} items", transform.name(), total);
    observer.on_batch_start(total);

    let params = &batch.params;
    let cancel = &options.cancel;
    let item_timeout = options.item_timeout;

    let results = stream::iter(batch.items.iter().enumerate())
        .take_while(move |_| future::ready(!cancel.is_cancelled()))
        .then(move |(idx, item)| async move {
            let index = idx + 1;
            observer.on_item_start(index, total, item.name());
            debug!("Dispatching {} ({}/{})", item.id, index, total);

            let input = TransformInput {
                item,
                params,
                registry,
            };
            let result = isolate_transform(item, transform, input, item_timeout).await;

            match &result {
                TransformResult::Success(s) => {
                    observer.on_item_complete(index, total, item.name(), s.output_len)
                }
                TransformResult::Failure(f) => {
                    observer.on_item_error(index, total, item.name(), &f.reason())
                }
            }
            observer.on_progress(index as f64 / total as f64);
            result
        });
    futures::pin_mut!(results);

    let mut report = BatchReport::default();
    while let Some(result) = results.next().await {
        match result {
            TransformResult::Success(s) => report.successes.push(s),
            TransformResult::Failure(f) => report.failures.push(f),
        }
    }

    report.undispatched = total - report.completed();
    report.cancelled = report.undispatched > 0;
    info!(
        "Executor finished: {} ok, {} failed, {} not dispatched",
        report.successes.len(),
        report.failures.len(),
        report.undispatched
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransformParams;
    use crate::error::TransformError;
    use crate::pipeline::queue::{BatchQueue, RawInput};
    use crate::transform::{transform_fn, TransformOutput};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
        fractions: Mutex<Vec<f64>>,
    }

    impl BatchProgressCallback for Recorder {
        fn on_item_start(&self, index: usize, _total: usize, _name: &str) {
            self.events.lock().unwrap().push(format!("start{index}"));
        }
        fn on_item_complete(&self, index: usize, _total: usize, _name: &str, _len: usize) {
            self.events.lock().unwrap().push(format!("ok{index}"));
        }
        fn on_item_error(&self, index: usize, _total: usize, _name: &str, _error: &str) {
            self.events.lock().unwrap().push(format!("err{index}"));
        }
        fn on_progress(&self, fraction: f64) {
            self.fractions.lock().unwrap().push(fraction);
        }
    }

    fn batch(names: &[&str]) -> Batch {
        let mut q = BatchQueue::new();
        q.enqueue(
            names
                .iter()
                .map(|n| RawInput::new(*n, "text/plain", n.as_bytes().to_vec())),
        );
        Batch::new(q.snapshot(), TransformParams::default())
    }

    #[tokio::test]
    async fn empty_batch_is_an_error() {
        let t = transform_fn("noop", |_, _| async { Ok(TransformOutput::new(vec![])) });
        let err = run(
            &batch(&[]),
            t.as_ref(),
            &ResourceRegistry::new(),
            &Recorder::default(),
            &ExecOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BulkError::EmptyBatch));
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_batch() {
        let t = transform_fn("picky", |item, _| async move {
            if item.payload.name == "bad" {
                Err(TransformError::other("corrupt"))
            } else {
                Ok(TransformOutput::new(item.payload.data.to_vec()))
            }
        });
        let rec = Recorder::default();
        let report = run(
            &batch(&["a", "bad", "c"]),
            t.as_ref(),
            &ResourceRegistry::new(),
            &rec,
            &ExecOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(report.successes.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].name, "bad");
        assert!(!report.cancelled);
        assert_eq!(
            *rec.events.lock().unwrap(),
            vec!["start1", "ok1", "start2", "err2", "start3", "ok3"]
        );
        let fractions = rec.fractions.lock().unwrap().clone();
        assert_eq!(fractions.len(), 3);
        assert!((fractions[0] - 1.0 / 3.0).abs() < 1e-9);
        assert!((fractions[1] - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(fractions[2], 1.0);
    }

    #[tokio::test]
    async fn eager_panic_in_transform_fails_only_its_item() {
        let t = transform_fn("eager", |item, _| {
            if item.payload.name == "a" {
                panic!("refused synchronously");
            }
            async move { Ok(TransformOutput::new(item.payload.data.to_vec())) }
        });
        let rec = Recorder::default();
        let report = run(
            &batch(&["a", "b"]),
            t.as_ref(),
            &ResourceRegistry::new(),
            &rec,
            &ExecOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].name, "a");
        assert_eq!(report.successes.len(), 1);
        assert_eq!(report.successes[0].name, "b");
        assert_eq!(report.undispatched, 0);
        assert_eq!(
            *rec.events.lock().unwrap(),
            vec!["start1", "err1", "start2", "ok2"]
        );
    }

    #[tokio::test]
    async fn successes_keep_queue_order() {
        let t = transform_fn("echo", |item, _| async move {
            Ok(TransformOutput::new(item.payload.data.to_vec()))
        });
        let report = run(
            &batch(&["x", "y", "z"]),
            t.as_ref(),
            &ResourceRegistry::new(),
            &Recorder::default(),
            &ExecOptions::default(),
        )
        .await
        .unwrap();
        let names: Vec<_> = report.successes.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["x", "y", "z"]);
        let orders: Vec<_> = report.successes.iter().map(|s| s.order).collect();
        assert_eq!(orders, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_item() {
        let options = ExecOptions::default();
        let cancel = options.cancel.clone();
        let t = transform_fn("cancel-after-first", move |item, _| {
            let cancel = cancel.clone();
            async move {
                cancel.cancel();
                Ok(TransformOutput::new(item.payload.data.to_vec()))
            }
        });
        let report = run(
            &batch(&["a", "b", "c"]),
            t.as_ref(),
            &ResourceRegistry::new(),
            &Recorder::default(),
            &options,
        )
        .await
        .unwrap();

        assert_eq!(report.successes.len(), 1);
        assert_eq!(report.undispatched, 2);
        assert!(report.cancelled);
    }
}
