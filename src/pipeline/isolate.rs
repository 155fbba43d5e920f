//! Failure isolation around a single transform call.
//!
//! Anything that goes wrong inside one item's transform (an `Err`, a panic,
//! an expired per-item deadline) becomes an [`ItemFailure`] here and never
//! travels further. No retries.

use crate::error::{ItemError, TransformError};
use crate::output::{ItemFailure, ItemSuccess, TransformResult};
use crate::pipeline::queue::Item;
use crate::transform::{Transform, TransformInput, TransformOutput};
use futures::{future, FutureExt};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tracing::warn;

/// Apply `transform` to one item under [`isolate`].
///
/// `apply` itself is called from inside the guarded future, so a transform
/// that panics before handing back its future still fails only this item.
pub async fn isolate_transform<'a>(
    item: &Item,
    transform: &'a dyn Transform,
    input: TransformInput<'a>,
    timeout: Option<Duration>,
) -> TransformResult {
    let deferred = future::lazy(move |_| transform.apply(input)).flatten();
    isolate(item, deferred, timeout).await
}

/// Drive one transform future to a [`TransformResult`].
pub async fn isolate<F>(item: &Item, fut: F, timeout: Option<Duration>) -> TransformResult
where
    F: Future<Output = Result<TransformOutput, TransformError>>,
{
    let start = Instant::now();
    let guarded = AssertUnwindSafe(fut).catch_unwind();

    let outcome = match timeout {
        Some(limit) => tokio::time::timeout(limit, guarded).await.ok(),
        None => Some(guarded.await),
    };
    let duration_ms = start.elapsed().as_millis() as u64;
    let name = item.name().to_string();

    let error = match outcome {
        Some(Ok(Ok(output))) => {
            let output_name = output.file_name.unwrap_or_else(|| name.clone());
            return TransformResult::Success(ItemSuccess {
                id: item.id,
                order: item.order,
                name,
                output_name,
                output_len: output.bytes.len(),
                bytes: output.bytes,
                duration_ms,
            });
        }
        Some(Ok(Err(e))) => ItemError::TransformFailed {
            name: name.clone(),
            detail: e.to_string(),
        },
        Some(Err(panic)) => ItemError::Panicked {
            name: name.clone(),
            detail: panic_message(panic.as_ref()),
        },
        None => ItemError::Timeout {
            name: name.clone(),
            ms: timeout.map(|t| t.as_millis() as u64).unwrap_or_default(),
        },
    };

    warn!("Item {} failed: {}", item.id, error);
    TransformResult::Failure(ItemFailure {
        id: item.id,
        order: item.order,
        name,
        error,
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
