use std::io;

use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{ColorType, GenericImageView};
use thiserror::Error;

use super::keys::DERIVED_EXTENSION;
use super::metadata_source::{Dimensions, ImageInfo};
use super::scanner::Category;

const EVENTS_MAX_HEIGHT: u32 = 400;
const PORTFOLIO_MAX_WIDTH: u32 = 800;

#[derive(Debug, Error)]
pub enum DerivationError {
    #[error("image is empty")]
    Empty,
    #[error("image is unreadable: {0}")]
    Unreadable(#[source] io::Error),
    #[error("image format is not recognised")]
    UnknownFormat,
    #[error("image could not be decoded: {0}")]
    Decode(#[from] image::ImageError),
    #[error("preview could not be encoded: {0}")]
    Encode(#[source] image::ImageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizePolicy {
    MaxHeight(u32),
    MaxWidth(u32),
}

impl ResizePolicy {
    pub fn for_category(category: Category) -> Self {
        match category {
            Category::Events => ResizePolicy::MaxHeight(EVENTS_MAX_HEIGHT),
            Category::Portfolio | Category::Standalone => {
                ResizePolicy::MaxWidth(PORTFOLIO_MAX_WIDTH)
            }
        }
    }

    /// Fits the image inside the bound, keeping aspect ratio and never
    /// enlarging.
    pub fn target_size(&self, width: u32, height: u32) -> (u32, u32) {
        match *self {
            ResizePolicy::MaxHeight(max) if height > max => {
                (scale(width, max, height), max)
            }
            ResizePolicy::MaxWidth(max) if width > max => (max, scale(height, max, width)),
            _ => (width, height),
        }
    }
}

fn scale(side: u32, target: u32, reference: u32) -> u32 {
    let scaled = (side as f64) * (target as f64) / (reference as f64);
    (scaled.round() as u32).max(1)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedPreview {
    pub bytes: Vec<u8>,
    pub info: ImageInfo,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PreviewDeriver;

impl PreviewDeriver {
    pub fn new() -> Self {
        Self
    }

    pub fn derive(
        &self,
        original: &[u8],
        category: Category,
    ) -> Result<DerivedPreview, DerivationError> {
        if original.is_empty() {
            return Err(DerivationError::Empty);
        }
        let decoded = image::load_from_memory(original)?;
        let (width, height) = decoded.dimensions();
        let (target_width, target_height) =
            ResizePolicy::for_category(category).target_size(width, height);

        let rgba = if target_width == width && target_height == height {
            decoded.to_rgba8()
        } else {
            image::imageops::resize(
                &decoded,
                target_width,
                target_height,
                FilterType::Lanczos3,
            )
        };

        let (out_width, out_height) = rgba.dimensions();
        let mut bytes = Vec::new();
        WebPEncoder::new_lossless(&mut bytes)
            .encode(rgba.as_raw(), out_width, out_height, ColorType::Rgba8.into())
            .map_err(DerivationError::Encode)?;

        Ok(DerivedPreview {
            bytes,
            info: ImageInfo {
                dimensions: Dimensions {
                    width: out_width,
                    height: out_height,
                },
                encoding: DERIVED_EXTENSION.to_string(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat};
    use std::io::Cursor;

    fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 255) as u8, (y % 255) as u8, 128])
        });
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)
            .unwrap();
        out
    }

    #[test]
    fn events_constrain_height() {
        let preview = PreviewDeriver::new()
            .derive(&jpeg_bytes(1200, 800), Category::Events)
            .unwrap();
        assert_eq!(
            preview.info.dimensions,
            Dimensions {
                width: 600,
                height: 400
            }
        );
        assert_eq!(preview.info.encoding, "webp");
        let decoded = image::load_from_memory(&preview.bytes).unwrap();
        assert_eq!(decoded.dimensions(), (600, 400));
    }

    #[test]
    fn portfolio_constrains_width() {
        let preview = PreviewDeriver::new()
            .derive(&jpeg_bytes(1600, 1000), Category::Portfolio)
            .unwrap();
        assert_eq!(
            preview.info.dimensions,
            Dimensions {
                width: 800,
                height: 500
            }
        );
    }

    #[test]
    fn never_upscales_small_images() {
        let preview = PreviewDeriver::new()
            .derive(&jpeg_bytes(120, 90), Category::Standalone)
            .unwrap();
        assert_eq!(
            preview.info.dimensions,
            Dimensions {
                width: 120,
                height: 90
            }
        );
    }

    #[test]
    fn derivation_is_deterministic() {
        let input = jpeg_bytes(900, 500);
        let deriver = PreviewDeriver::new();
        let first = deriver.derive(&input, Category::Events).unwrap();
        let second = deriver.derive(&input, Category::Events).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_empty_and_corrupt_input() {
        let deriver = PreviewDeriver::new();
        assert!(matches!(
            deriver.derive(&[], Category::Events),
            Err(DerivationError::Empty)
        ));
        assert!(matches!(
            deriver.derive(b"\xff\xd8 truncated jpeg", Category::Events),
            Err(DerivationError::Decode(_))
        ));
    }

    #[test]
    fn target_size_keeps_minimum_of_one_pixel() {
        assert_eq!(ResizePolicy::MaxHeight(400).target_size(1, 4000), (1, 400));
        assert_eq!(ResizePolicy::MaxWidth(800).target_size(8000, 2), (800, 1));
    }
}
