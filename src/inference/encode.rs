use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use thiserror::Error;

use crate::display::Snapshot;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("snapshot is {got} bytes, expected at least {needed}")]
    Truncated { needed: usize, got: usize },
    #[error("empty snapshot")]
    Empty,
    #[error("jpeg encoding failed: {0}")]
    Jpeg(#[from] image::ImageError),
}

/// Compress a BGRA snapshot into a JPEG still.
pub fn encode_jpeg(snapshot: &Snapshot, quality: u8) -> Result<Bytes, EncodeError> {
    let (width, height, stride) = (snapshot.width, snapshot.height, snapshot.stride as usize);
    if width == 0 || height == 0 {
        return Err(EncodeError::Empty);
    }

    let row_bytes = width as usize * 4;
    let needed = stride * (height as usize - 1) + row_bytes;
    if snapshot.pixels.len() < needed || stride < row_bytes {
        return Err(EncodeError::Truncated {
            needed,
            got: snapshot.pixels.len(),
        });
    }

    // JPEG carries no alpha; swizzle BGRA rows into packed RGB
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for row in snapshot.pixels.chunks(stride).take(height as usize) {
        for px in row[..row_bytes].chunks_exact(4) {
            rgb.extend_from_slice(&[px[2], px[1], px[0]]);
        }
    }

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).encode(
        &rgb,
        width,
        height,
        ExtendedColorType::Rgb8,
    )?;
    Ok(Bytes::from(out))
}
