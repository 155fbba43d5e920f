//! Pluggable per-item transforms.
//!
//! The pipeline does not know how to rotate, compress or rename anything; it
//! only drives a [`Transform`] once per item. Each "bulk X" tool is then a
//! thin pairing of a transform with [`crate::config::TransformParams`]:
//!
//! | Tool              | Transform                         | Params used            |
//! |-------------------|-----------------------------------|------------------------|
//! | bulk rotate       | [`ImageTransform::rotate`]        | `rotation`, `format`   |
//! | bulk grayscale    | [`ImageTransform::grayscale`]     | `format`               |
//! | bulk compress     | [`ImageTransform::compress`]      | `quality`, `format`    |
//! | format conversion | [`ImageTransform::convert`]       | `format`, `quality`    |
//! | bulk resize       | [`ImageTransform::resize`]        | `width`, `height`      |
//! | base64 encode     | [`Base64Transform`]               | `data_uri`             |
//! | batch rename      | [`RenameTransform`]               | `rename_pattern`       |
//!
//! Ad-hoc transforms can be written as closures with [`transform_fn`].

pub mod encode;
pub mod image_ops;
pub mod rename;

pub use encode::Base64Transform;
pub use image_ops::{ImageOp, ImageTransform};
pub use rename::RenameTransform;

use crate::config::TransformParams;
use crate::error::TransformError;
use crate::pipeline::queue::Item;
use crate::pipeline::registry::ResourceRegistry;
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;

/// What a transform sees for one item.
pub struct TransformInput<'a> {
    pub item: &'a Item,
    pub params: &'a TransformParams,
    /// Register scratch resources here; they are released on reset.
    pub registry: &'a ResourceRegistry,
}

/// Output bytes plus an optional new file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutput {
    pub bytes: Vec<u8>,
    /// `None` keeps the item's original name.
    pub file_name: Option<String>,
}

impl TransformOutput {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            file_name: None,
        }
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }
}

/// A per-item transform.
///
/// Must not mutate pipeline state and must not keep the input buffer past
/// the returned future. Returning `Err` (or panicking) fails only this item.
pub trait Transform: Send + Sync {
    /// Short name for logs ("rotate", "base64", …).
    fn name(&self) -> &str;

    fn apply<'a>(
        &'a self,
        input: TransformInput<'a>,
    ) -> BoxFuture<'a, Result<TransformOutput, TransformError>>;
}

/// Adapter turning an async closure into a [`Transform`].
pub struct FnTransform<F> {
    name: String,
    f: F,
}

impl<F, Fut> Transform for FnTransform<F>
where
    F: Fn(Item, TransformParams) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TransformOutput, TransformError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply<'a>(
        &'a self,
        input: TransformInput<'a>,
    ) -> BoxFuture<'a, Result<TransformOutput, TransformError>> {
        (self.f)(input.item.clone(), input.params.clone()).boxed()
    }
}

/// Wrap a closure `(Item, TransformParams) -> impl Future<Output = Result<…>>`.
///
/// ```rust
/// use edgequake_batch::transform::{transform_fn, Transform, TransformOutput};
///
/// let upper = transform_fn("upper", |item, _params| async move {
///     Ok(TransformOutput::new(item.payload.data.to_ascii_uppercase()))
/// });
/// assert_eq!(upper.name(), "upper");
/// ```
pub fn transform_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn Transform>
where
    F: Fn(Item, TransformParams) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TransformOutput, TransformError>> + Send + 'static,
{
    Arc::new(FnTransform {
        name: name.into(),
        f,
    })
}
