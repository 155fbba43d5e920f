//! Batch rename: bytes pass through untouched, names follow a pattern.
//!
//! Placeholders:
//!
//! | Token       | Expands to                                  |
//! |-------------|---------------------------------------------|
//! | `{name}`    | original file stem (`IMG_0042`)             |
//! | `{ext}`     | original extension without dot (`jpg`)      |
//! | `{index}`   | 1-based position in the batch (`7`)         |
//! | `{index:N}` | position zero-padded to N digits (`007`)    |
//!
//! Anything else is copied verbatim. Two items that render to the same
//! name are disambiguated at packaging time like any other collision.

use super::{Transform, TransformInput, TransformOutput};
use crate::error::TransformError;
use crate::pipeline::naming::split_extension;
use futures::future::{BoxFuture, FutureExt};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{(name|ext|index)(?::(\d{1,2}))?\}").expect("placeholder regex is valid")
});

/// Renames every item according to `TransformParams::rename_pattern`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenameTransform;

impl Transform for RenameTransform {
    fn name(&self) -> &str {
        "rename"
    }

    fn apply<'a>(
        &'a self,
        input: TransformInput<'a>,
    ) -> BoxFuture<'a, Result<TransformOutput, TransformError>> {
        async move {
            let pattern = input.params.rename_pattern.as_deref().ok_or_else(|| {
                TransformError::InvalidParams("rename needs a pattern".into())
            })?;
            let item = input.item;
            let new_name = render_pattern(pattern, &item.payload.name, item.order + 1);
            Ok(TransformOutput::new(item.payload.data.to_vec()).with_file_name(new_name))
        }
        .boxed()
    }
}

/// Expand the placeholders in `pattern` for one item.
pub fn render_pattern(pattern: &str, original: &str, index: usize) -> String {
    let (stem, ext) = split_extension(original);
    let rendered = PLACEHOLDER.replace_all(pattern, |caps: &Captures<'_>| match &caps[1] {
        "name" => stem.to_string(),
        "ext" => ext.unwrap_or("").to_string(),
        _ => match caps.get(2).and_then(|w| w.as_str().parse::<usize>().ok()) {
            Some(width) => format!("{index:0width$}"),
            None => index.to_string(),
        },
    });
    // "{name}.{ext}" on an extensionless file would leave a dangling dot.
    rendered.trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransformParams;
    use crate::pipeline::queue::{BatchQueue, RawInput};
    use crate::pipeline::registry::ResourceRegistry;

    #[test]
    fn expands_all_placeholders() {
        assert_eq!(
            render_pattern("holiday-{index:3}-{name}.{ext}", "IMG_0042.jpg", 7),
            "holiday-007-IMG_0042.jpg"
        );
        assert_eq!(render_pattern("{index}.{ext}", "a.png", 12), "12.png");
    }

    #[test]
    fn unknown_tokens_are_literal() {
        assert_eq!(render_pattern("{date}-{name}", "a.png", 1), "{date}-a");
    }

    #[test]
    fn missing_extension_drops_trailing_dot() {
        assert_eq!(render_pattern("{name}.{ext}", "README", 1), "README");
    }

    #[tokio::test]
    async fn transform_passes_bytes_through() {
        let mut q = BatchQueue::new();
        q.enqueue(vec![
            RawInput::new("x.png", "image/png", b"one".to_vec()),
            RawInput::new("y.png", "image/png", b"two".to_vec()),
        ]);
        let snapshot = q.snapshot();
        let params = TransformParams {
            rename_pattern: Some("photo-{index:2}.{ext}".into()),
            ..Default::default()
        };
        let registry = ResourceRegistry::new();

        let out = RenameTransform
            .apply(TransformInput {
                item: &snapshot[1],
                params: &params,
                registry: &registry,
            })
            .await
            .unwrap();
        assert_eq!(out.file_name.as_deref(), Some("photo-02.png"));
        assert_eq!(out.bytes, b"two");
    }

    #[tokio::test]
    async fn transform_without_pattern_fails() {
        let mut q = BatchQueue::new();
        q.enqueue(vec![RawInput::new("x.png", "image/png", b"one".to_vec())]);
        let snapshot = q.snapshot();
        let params = TransformParams::default();
        let registry = ResourceRegistry::new();

        let err = RenameTransform
            .apply(TransformInput {
                item: &snapshot[0],
                params: &params,
                registry: &registry,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TransformError::InvalidParams(_)));
    }
}
