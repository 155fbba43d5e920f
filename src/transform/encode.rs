//! Base64 encoding: any file → base64 text (optionally a `data:` URI).
//!
//! The bulk base64 tool exists so users can paste many images straight into
//! CSS or HTML. The output for `logo.png` is `logo.png.txt`, keeping the
//! original extension visible so entries stay recognisable in the archive.

use super::{Transform, TransformInput, TransformOutput};
use crate::error::TransformError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::future::{BoxFuture, FutureExt};
use tracing::debug;

/// Encodes each item's bytes as standard base64.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Transform;

impl Transform for Base64Transform {
    fn name(&self) -> &str {
        "base64"
    }

    fn apply<'a>(
        &'a self,
        input: TransformInput<'a>,
    ) -> BoxFuture<'a, Result<TransformOutput, TransformError>> {
        async move {
            let payload = &input.item.payload;
            let text = encode_payload(&payload.data, &payload.media_type, input.params.data_uri);
            debug!("Encoded '{}' → {} bytes base64", payload.name, text.len());
            Ok(TransformOutput::new(text.into_bytes())
                .with_file_name(format!("{}.txt", payload.name)))
        }
        .boxed()
    }
}

/// Base64-encode `data`, optionally wrapped as `data:{media_type};base64,…`.
pub fn encode_payload(data: &[u8], media_type: &str, data_uri: bool) -> String {
    let b64 = STANDARD.encode(data);
    if data_uri {
        format!("data:{media_type};base64,{b64}")
    } else {
        b64
    }
}
