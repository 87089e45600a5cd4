use crate::utils::error::VisionError;
use crate::Result;
use base64::Engine;
use image::{DynamicImage, GenericImageView, ImageFormat};

const MAX_IMAGE_BYTES: usize = 50 * 1024 * 1024;
const MIN_SIDE: u32 = 8;
const MAX_SIDE: u32 = 8192;

pub struct ImageLoader;

impl ImageLoader {
    /// Decode a base64 payload, with or without a `data:image/...;base64,` prefix
    pub fn decode_base64(base64_data: &str) -> Result<Vec<u8>> {
        let base64_clean = if base64_data.starts_with("data:") {
            base64_data.split(',').nth(1).unwrap_or(base64_data)
        } else {
            base64_data
        };

        let image_bytes = base64::engine::general_purpose::STANDARD.decode(base64_clean.trim())?;
        Ok(image_bytes)
    }

    /// Decode raw upload bytes into an image, rejecting anything unreadable
    pub fn from_bytes(bytes: &[u8]) -> Result<DynamicImage> {
        if bytes.is_empty() {
            return Err(VisionError::InvalidInput("Empty image data".to_string()));
        }

        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(VisionError::InvalidInput(format!(
                "Image too large: {} bytes, max allowed: {} bytes",
                bytes.len(),
                MAX_IMAGE_BYTES
            )));
        }

        match Self::detect_format(bytes) {
            Some(format) if Self::is_supported_format(format) => {}
            Some(format) => {
                return Err(VisionError::InvalidInput(format!(
                    "Unsupported image format: {:?}",
                    format
                )))
            }
            None => {
                return Err(VisionError::InvalidInput(
                    "Unrecognized image format".to_string(),
                ))
            }
        }

        let image = image::load_from_memory(bytes)
            .map_err(|e| VisionError::InvalidInput(format!("Cannot decode image: {}", e)))?;

        Self::validate_dimensions(&image)?;
        Ok(image)
    }

    pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
        image::guess_format(bytes).ok()
    }

    pub fn is_supported_format(format: ImageFormat) -> bool {
        matches!(
            format,
            ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Bmp | ImageFormat::Tiff | ImageFormat::WebP
        )
    }

    /// File extension for storing the upload as-is
    pub fn extension(bytes: &[u8]) -> &'static str {
        Self::detect_format(bytes)
            .and_then(|format| format.extensions_str().first().copied())
            .unwrap_or("bin")
    }

    /// Rejects images with a side outside `MIN_SIDE..=MAX_SIDE`
    pub fn validate_dimensions(image: &DynamicImage) -> Result<()> {
        let (width, height) = image.dimensions();

        if width < MIN_SIDE || height < MIN_SIDE {
            return Err(VisionError::InvalidInput(format!(
                "Image too small: {}x{}, minimum {}x{}",
                width, height, MIN_SIDE, MIN_SIDE
            )));
        }

        if width > MAX_SIDE || height > MAX_SIDE {
            return Err(VisionError::InvalidInput(format!(
                "Image too large: {}x{}, maximum {}x{}",
                width, height, MAX_SIDE, MAX_SIDE
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::io::Cursor;

    pub(crate) fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb(color));
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    #[test]
    fn decodes_png_bytes() {
        let image = ImageLoader::from_bytes(&png_bytes(32, 24, [10, 200, 30])).unwrap();
        assert_eq!(image.dimensions(), (32, 24));
    }

    #[test]
    fn garbage_bytes_are_invalid_input() {
        let err = ImageLoader::from_bytes(b"definitely not an image").unwrap_err();
        assert!(matches!(err, VisionError::InvalidInput(_)));
    }

    #[test]
    fn truncated_png_is_invalid_input() {
        let bytes = png_bytes(32, 32, [0, 0, 0]);
        let err = ImageLoader::from_bytes(&bytes[..40]).unwrap_err();
        assert!(matches!(err, VisionError::InvalidInput(_)));
    }

    #[test]
    fn empty_and_tiny_images_are_rejected() {
        assert!(matches!(ImageLoader::from_bytes(&[]), Err(VisionError::InvalidInput(_))));
        assert!(matches!(
            ImageLoader::from_bytes(&png_bytes(4, 4, [0, 0, 0])),
            Err(VisionError::InvalidInput(_))
        ));
    }

    #[test]
    fn base64_with_data_url_prefix() {
        let bytes = png_bytes(16, 16, [1, 2, 3]);
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);

        let decoded = ImageLoader::decode_base64(&format!("data:image/png;base64,{}", encoded)).unwrap();
        assert_eq!(decoded, bytes);
        assert_eq!(ImageLoader::extension(&decoded), "png");
    }
}
