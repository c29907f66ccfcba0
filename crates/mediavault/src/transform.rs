//! Media transform leaf: decode, probe, and thumbnail rendering.
//!
//! Pure functions over byte buffers. Callers are expected to run these on a
//! blocking-capable thread (`tokio::task::spawn_blocking`) since decode and
//! resample are CPU-bound.

use std::io::Cursor;

use image::{DynamicImage, GenericImageView, ImageFormat};

use crate::error::TransformError;

/// Content type of every rendered thumbnail.
pub const THUMBNAIL_CONTENT_TYPE: &str = "image/jpeg";

/// A decoded source image with its probed dimensions.
pub struct DecodedMedia {
    image: DynamicImage,
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Debug for DecodedMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedMedia")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// A rendered thumbnail ready for storage.
#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Thumbnail {
    pub fn byte_size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Decodes raw media bytes into an image, probing its dimensions.
pub fn decode(bytes: &[u8]) -> Result<DecodedMedia, TransformError> {
    if bytes.is_empty() {
        return Err(TransformError::EmptyInput);
    }

    let image =
        image::load_from_memory(bytes).map_err(|e| TransformError::Decode(e.to_string()))?;
    let (width, height) = image.dimensions();

    Ok(DecodedMedia {
        image,
        width,
        height,
    })
}

/// Renders a JPEG thumbnail bounded by `max_dim` on the longest edge.
/// Aspect ratio is preserved; images already within bounds pass through
/// at their native size.
pub fn render_thumbnail(media: &DecodedMedia, max_dim: u32) -> Result<Thumbnail, TransformError> {
    let scaled = if media.width <= max_dim && media.height <= max_dim {
        media.image.clone()
    } else {
        media.image.thumbnail(max_dim, max_dim)
    };

    let (width, height) = scaled.dimensions();

    // JPEG has no alpha channel; flatten before encoding.
    let rgb = scaled.to_rgb8();
    let mut bytes = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
        .map_err(|e| TransformError::Encode(e.to_string()))?;

    Ok(Thumbnail {
        bytes,
        width,
        height,
    })
}
