//! Streaming API: emit per-item results as they complete, without packaging.
//!
//! Unlike [`crate::convert::convert_files`], which returns only after the
//! archive is finalized, [`transform_stream`] yields one [`TransformResult`]
//! per item as soon as it is ready. Items are still processed one at a time
//! and in input order, so callers can write outputs to disk incrementally
//! without holding the whole batch in memory.
//!
//! Dropping the stream stops dispatch; the item in flight is abandoned.

use crate::config::BatchConfig;
use crate::error::BulkError;
use crate::output::TransformResult;
use crate::pipeline::input;
use crate::pipeline::isolate::isolate_transform;
use crate::pipeline::queue::{BatchQueue, RawInput};
use crate::pipeline::registry::ResourceRegistry;
use crate::transform::{Transform, TransformInput};
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of per-item results.
pub type ResultStream = Pin<Box<dyn Stream<Item = TransformResult> + Send>>;

/// Transform in-memory inputs, streaming results in input order.
///
/// Scratch resources the transform registers are released when the stream
/// is dropped.
///
/// # Example
/// ```rust,no_run
/// use edgequake_batch::{transform_stream, Base64Transform, BatchConfig, RawInput};
/// use futures::StreamExt;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() {
/// let inputs = vec![RawInput::new("logo.png", "image/png", vec![0x89, b'P', b'N', b'G'])];
/// let mut results = transform_stream(inputs, Arc::new(Base64Transform), &BatchConfig::default());
/// while let Some(r) = results.next().await {
///     println!("{:?} ok={}", r.id(), r.is_success());
/// }
/// # }
/// ```
pub fn transform_stream(
    inputs: impl IntoIterator<Item = RawInput>,
    transform: Arc<dyn Transform>,
    config: &BatchConfig,
) -> ResultStream {
    let mut queue = BatchQueue::new();
    queue.enqueue(inputs);
    let items = queue.snapshot();
    info!(
        "Streaming '{}' over {} items",
        transform.name(),
        items.len()
    );

    let params = Arc::new(config.params.clone());
    let registry = Arc::new(ResourceRegistry::new());
    let timeout = config.item_timeout_secs.map(Duration::from_secs);

    let s = stream::iter(items).then(move |item| {
        let transform = Arc::clone(&transform);
        let params = Arc::clone(&params);
        let registry = Arc::clone(&registry);
        async move {
            let input = TransformInput {
                item: &item,
                params: &params,
                registry: &registry,
            };
            isolate_transform(&item, transform.as_ref(), input, timeout).await
        }
    });

    Box::pin(s)
}

/// Read local files and stream their transform results.
///
/// All files are read up front, so a missing path fails before any item is
/// transformed.
pub async fn transform_files_stream<P: AsRef<Path>>(
    paths: impl IntoIterator<Item = P>,
    transform: Arc<dyn Transform>,
    config: &BatchConfig,
) -> Result<ResultStream, BulkError> {
    let inputs = input::read_inputs(paths).await?;
    if inputs.is_empty() {
        return Err(BulkError::EmptyBatch);
    }
    Ok(transform_stream(inputs, transform, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransformError;
    use crate::pipeline::registry::ResourceKind;
    use crate::transform::{transform_fn, TransformOutput};
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn yields_one_result_per_input_in_order() {
        let t = transform_fn("odd-fails", |item, _| async move {
            if item.order % 2 == 1 {
                Err(TransformError::other("odd"))
            } else {
                Ok(TransformOutput::new(item.payload.data.to_vec()))
            }
        });
        let inputs = (0..4).map(|i| RawInput::new(format!("{i}.bin"), "x/y", vec![i as u8]));
        let results: Vec<_> = transform_stream(inputs, t, &BatchConfig::default())
            .collect()
            .await;

        assert_eq!(results.len(), 4);
        let ok: Vec<_> = results.iter().map(|r| r.is_success()).collect();
        assert_eq!(ok, vec![true, false, true, false]);
    }

    #[tokio::test]
    async fn empty_file_list_is_refused() {
        let t = transform_fn("noop", |_, _| async { Ok(TransformOutput::new(vec![])) });
        let err = transform_files_stream(Vec::<&str>::new(), t, &BatchConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BulkError::EmptyBatch));
    }

    struct Scratchy(Arc<AtomicUsize>);

    impl Transform for Scratchy {
        fn name(&self) -> &str {
            "scratchy"
        }

        fn apply<'a>(
            &'a self,
            input: TransformInput<'a>,
        ) -> BoxFuture<'a, Result<TransformOutput, TransformError>> {
            let released = Arc::clone(&self.0);
            input
                .registry
                .register_with(ResourceKind::Scratch, move || {
                    released.fetch_add(1, Ordering::SeqCst);
                });
            async { Ok(TransformOutput::new(vec![])) }.boxed()
        }
    }

    #[tokio::test]
    async fn dropping_stream_releases_scratch() {
        let released = Arc::new(AtomicUsize::new(0));
        let t = Arc::new(Scratchy(Arc::clone(&released)));
        let inputs = (0..3).map(|i| RawInput::new(format!("{i}.bin"), "x/y", vec![i as u8]));
        let mut results = transform_stream(inputs, t, &BatchConfig::default());

        assert!(results.next().await.is_some());
        assert!(results.next().await.is_some());
        assert_eq!(released.load(Ordering::SeqCst), 0);

        drop(results);
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }
}
