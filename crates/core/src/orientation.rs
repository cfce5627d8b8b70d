//! Orientation auto-detection from image headers.
//!
//! Only the header is read; no pixel data is decoded.

use std::io::Cursor;

use image::ImageReader;

use crate::error::CoreError;
use crate::workflow::Orientation;

/// Read `(width, height)` from an encoded image (PNG, JPEG or WebP).
pub fn read_dimensions(bytes: &[u8]) -> Result<(u32, u32), CoreError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| CoreError::ImageDecode(e.to_string()))?;
    if reader.format().is_none() {
        return Err(CoreError::ImageDecode("unrecognized image format".into()));
    }
    reader
        .into_dimensions()
        .map_err(|e| CoreError::ImageDecode(e.to_string()))
}

/// `Portrait` when strictly taller than wide, otherwise `Landscape`.
pub fn classify(width: u32, height: u32) -> Orientation {
    if height > width {
        Orientation::Portrait
    } else {
        Orientation::Landscape
    }
}

/// Read and classify in one step.
pub fn detect_orientation(bytes: &[u8]) -> Result<Orientation, CoreError> {
    let (width, height) = read_dimensions(bytes)?;
    Ok(classify(width, height))
}
