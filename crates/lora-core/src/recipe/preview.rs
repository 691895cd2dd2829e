//! Recipe preview optimisation.

use crate::config::{RecipeConfig, RecipeImageFormat};
use crate::error::{LoraError, Result};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::DynamicImage;

/// Shrink `data` to at most [`RecipeConfig::TARGET_WIDTH`] pixels wide and re-encode it.
///
/// Returns the encoded bytes and the file extension (with leading dot).
pub fn optimize_image(data: &[u8], format: RecipeImageFormat) -> Result<(Vec<u8>, &'static str)> {
    let img = image::load_from_memory(data)?;
    let img = fit_width(img, RecipeConfig::TARGET_WIDTH);

    let mut out = Vec::new();
    match format {
        RecipeImageFormat::Webp => {
            // libwebp only takes 8-bit RGB or RGBA buffers.
            let pixels = if img.color().has_alpha() {
                DynamicImage::ImageRgba8(img.to_rgba8())
            } else {
                DynamicImage::ImageRgb8(img.to_rgb8())
            };
            let encoder = webp::Encoder::from_image(&pixels).map_err(|e| LoraError::Image {
                message: format!("WebP encoder rejected image: {}", e),
            })?;
            out.extend_from_slice(&encoder.encode(f32::from(RecipeConfig::QUALITY)));
        }
        RecipeImageFormat::Jpeg => {
            DynamicImage::ImageRgb8(img.to_rgb8())
                .write_with_encoder(JpegEncoder::new_with_quality(&mut out, RecipeConfig::QUALITY))?;
        }
        RecipeImageFormat::Png => {
            DynamicImage::ImageRgba8(img.to_rgba8()).write_with_encoder(PngEncoder::new(&mut out))?;
        }
    }
    Ok((out, format.extension()))
}

fn fit_width(img: DynamicImage, max_width: u32) -> DynamicImage {
    let (width, height) = (img.width(), img.height());
    if width <= max_width {
        return img;
    }
    let scaled = (u64::from(height) * u64::from(max_width) / u64::from(width)).max(1) as u32;
    img.resize_exact(max_width, scaled, FilterType::Lanczos3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::webp::WebPEncoder;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([10, 120, 240])))
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_wide_image_is_scaled_down() {
        let (bytes, ext) = optimize_image(&png(960, 600), RecipeImageFormat::Webp).unwrap();
        assert_eq!(ext, ".webp");
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::WebP);
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (480, 300));
    }

    fn noisy_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            let v = x.wrapping_mul(2654435761).wrapping_add(y.wrapping_mul(40503));
            Rgb([(x % 256) as u8, (y % 256) as u8, (v >> 24) as u8])
        });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_webp_is_lossy_and_smaller_than_lossless() {
        let source = noisy_png(1024, 640);
        let (bytes, _) = optimize_image(&source, RecipeImageFormat::Webp).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[12..16], b"VP8 ");

        let resized = fit_width(image::load_from_memory(&source).unwrap(), 480);
        let mut lossless = Vec::new();
        DynamicImage::ImageRgba8(resized.to_rgba8())
            .write_with_encoder(WebPEncoder::new_lossless(&mut lossless))
            .unwrap();
        assert!(bytes.len() < lossless.len());

        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (480, 300));
    }

    #[test]
    fn test_small_image_keeps_size() {
        let (bytes, ext) = optimize_image(&png(200, 100), RecipeImageFormat::Jpeg).unwrap();
        assert_eq!(ext, ".jpg");
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (200, 100));
    }

    #[test]
    fn test_png_output() {
        let (bytes, ext) = optimize_image(&png(481, 2), RecipeImageFormat::Png).unwrap();
        assert_eq!(ext, ".png");
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (480, 1));
    }

    #[test]
    fn test_garbage_is_an_image_error() {
        assert!(matches!(
            optimize_image(b"not an image", RecipeImageFormat::Webp),
            Err(crate::error::LoraError::Image { .. })
        ));
    }
}
