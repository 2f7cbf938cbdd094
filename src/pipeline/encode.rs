//! Image encoding: `DynamicImage` ↔ base64 PNG.
//!
//! Record images travel as base64 PNG strings: embedded in JSON exports,
//! turned into data URIs for the table, attached to tickets, and sent to the
//! classifier. PNG keeps the reviewer's markup and small text crisp.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode an image as a base64 PNG string.
pub fn encode_png_base64(img: &DynamicImage) -> Result<String, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded {}x{} crop → {} bytes base64", img.width(), img.height(), b64.len());
    Ok(b64)
}

/// Decode a base64 PNG produced by [`encode_png_base64`] back to raw bytes.
pub fn decode_base64(b64: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(b64.trim())
}

/// Wrap a record image for a multimodal chat message.
pub fn to_image_data(b64: &str) -> ImageData {
    ImageData::new(b64.to_string(), "image/png").with_detail("high")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let b64 = encode_png_base64(&img).expect("encode should succeed");
        let bytes = decode_base64(&b64).expect("valid base64");
        assert_eq!(&bytes[1..4], b"PNG");
        let back = image::load_from_memory(&bytes).expect("valid png");
        assert_eq!((back.width(), back.height()), (10, 10));
    }

    #[test]
    fn image_data_is_png() {
        let data = to_image_data("aGVsbG8=");
        assert_eq!(data.mime_type, "image/png");
        assert_eq!(data.data, "aGVsbG8=");
    }
}
