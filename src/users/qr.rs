//! Decoding of the 2FA enrolment QR code

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::errors::{Error, Result};

/// Decode a base64 PNG and return the text of the first QR code in it
pub fn decode_qr_png(qr_b64: &str) -> Result<String> {
    let png = STANDARD
        .decode(qr_b64.trim())
        .map_err(|e| Error::assertion(format!("QR code is not valid base64: {e}")))?;
    let image = image::load_from_memory(&png)
        .map_err(|e| Error::assertion(format!("QR code is not a readable image: {e}")))?
        .to_luma8();

    let mut prepared = rqrr::PreparedImage::prepare(image);
    let grid = prepared
        .detect_grids()
        .into_iter()
        .next()
        .ok_or_else(|| Error::assertion("no QR code found in image"))?;
    let (_meta, content) =
        grid.decode().map_err(|e| Error::assertion(format!("failed to decode QR code: {e}")))?;

    Ok(content)
}
