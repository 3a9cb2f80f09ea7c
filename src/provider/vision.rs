use tokio_util::sync::CancellationToken;

use crate::config::{AdapterConfig, ModelInfo};
use crate::error::AdapterError;
use crate::host::{ChatMessage, ContentPart, ImageCaptioner};

// Vision fallback routing. Rerouting to a vision-capable model is a pure
// decision and costs nothing extra on the wire; captioning is the expensive
// path, one extra network call per image, performed sequentially so that a
// cancellation check between iterations reliably stops further calls.

/// The routing decision for a request that may carry image content.
#[derive(Debug, Clone, PartialEq)]
pub enum VisionRoute {
    /// No images, or the model accepts them natively.
    PassThrough,
    /// Send the entire request to this vision-capable model instead.
    Reroute(String),
    /// Pre-convert each image to a text caption before sending.
    NeedsCaptions,
}

/// Decide how to handle image content for the requested model. Pure; no I/O.
///
/// # Errors
///
/// Returns [`AdapterError::InvalidRequest`] when images are present, the
/// model cannot accept them, no reroute target exists, and `has_captioner`
/// is false.
pub fn resolve_route(
    messages: &[ChatMessage],
    model: &ModelInfo,
    config: &AdapterConfig,
    has_captioner: bool,
) -> Result<VisionRoute, AdapterError> {
    let has_images = messages.iter().any(ChatMessage::has_image);
    if !has_images || model.supports_vision {
        return Ok(VisionRoute::PassThrough);
    }

    if let Some(ref fallback) = config.vision_fallback_model {
        if fallback != &model.id && config.models.contains_key(fallback) {
            return Ok(VisionRoute::Reroute(fallback.clone()));
        }
    }

    if has_captioner {
        return Ok(VisionRoute::NeedsCaptions);
    }

    Err(AdapterError::InvalidRequest(format!(
        "model '{}' does not accept image input and no vision fallback is configured",
        model.id
    )))
}

/// Replace every image part with a text block containing its caption.
///
/// Captions are fetched one at a time; the cancellation token is checked
/// between calls and aborts the remaining ones immediately.
///
/// # Errors
///
/// Returns [`AdapterError::Cancelled`] when cancellation is observed, or
/// whatever error the captioner surfaces.
pub async fn caption_images(
    messages: &mut [ChatMessage],
    captioner: &dyn ImageCaptioner,
    cancel: &CancellationToken,
) -> Result<(), AdapterError> {
    for message in messages.iter_mut() {
        for part in message.content.iter_mut() {
            let ContentPart::ImageUrl { url } = part else {
                continue;
            };
            if cancel.is_cancelled() {
                return Err(AdapterError::Cancelled);
            }
            let caption = captioner.caption(url).await?;
            *part = ContentPart::Text(format!("Image description: {caption}"));
        }
    }
    Ok(())
}
