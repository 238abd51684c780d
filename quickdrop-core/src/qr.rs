use std::io::Cursor;

use image::{DynamicImage, ImageFormat, Luma};
use qrcode::{EcLevel, QrCode};
use thiserror::Error;

/// Default edge length of generated QR images, in pixels.
pub const DEFAULT_QR_SIZE: u32 = 256;

#[derive(Debug, Error)]
pub enum QrError {
    #[error("QR generation: {0}")]
    Encode(#[from] qrcode::types::QrError),
    #[error("PNG encoding: {0}")]
    Png(#[from] image::ImageError),
}

/// Render `text` as a medium error-correction QR code and PNG-encode it.
///
/// The image is at least `size` x `size` pixels, quiet zone included.
pub fn encode_png(text: &str, size: u32) -> Result<Vec<u8>, QrError> {
    let code = QrCode::with_error_correction_level(text.as_bytes(), EcLevel::M)?;

    let image = code
        .render::<Luma<u8>>()
        .min_dimensions(size, size)
        .quiet_zone(true)
        .build();

    let mut png = Vec::new();
    DynamicImage::ImageLuma8(image).write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(png)
}
