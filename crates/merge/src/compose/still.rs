//! Still image compositor.
//!
//! Decodes main and overlay, stretches the overlay to the main's exact size,
//! blends it with the straight-alpha "over" operator and encodes the result.
//! Formats without an alpha channel get the result flattened onto white.

use super::{ComposeError, Compositor};
use crate::replace::remove_if_exists;
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ImageFormat, ImageReader, Rgb, RgbImage, RgbaImage};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Checks if an output format can carry the alpha channel.
pub fn supports_alpha(format: ImageFormat) -> bool {
    matches!(
        format,
        ImageFormat::Png
            | ImageFormat::WebP
            | ImageFormat::Tiff
            | ImageFormat::Tga
            | ImageFormat::Qoi
    )
}

/// Blends `layer` over `base` in place.
///
/// Both buffers hold straight (non-premultiplied) alpha. Pixels of `base`
/// outside the bounds of `layer` are left unchanged.
pub fn composite_over(base: &mut RgbaImage, layer: &RgbaImage) {
    let (lw, lh) = layer.dimensions();
    for (x, y, dst) in base.enumerate_pixels_mut() {
        if x >= lw || y >= lh {
            continue;
        }
        let src = layer.get_pixel(x, y);
        let src_a = src[3] as f32 / 255.0;
        if src_a <= 0.0 {
            continue;
        }
        let dst_a = dst[3] as f32 / 255.0;
        let out_a = src_a + dst_a * (1.0 - src_a);

        for c in 0..3 {
            let blended =
                (src[c] as f32 * src_a + dst[c] as f32 * dst_a * (1.0 - src_a)) / out_a;
            dst[c] = blended.round().clamp(0.0, 255.0) as u8;
        }
        dst[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    }
}

/// Flattens an RGBA image onto a solid white background.
pub fn flatten_onto_white(img: &RgbaImage) -> RgbImage {
    let (w, h) = img.dimensions();
    RgbImage::from_fn(w, h, |x, y| {
        let px = img.get_pixel(x, y);
        let a = px[3] as f32 / 255.0;
        let channel = |c: u8| (c as f32 * a + 255.0 * (1.0 - a)).round().clamp(0.0, 255.0) as u8;
        Rgb([channel(px[0]), channel(px[1]), channel(px[2])])
    })
}

/// Decodes an image, sniffing the content rather than trusting the extension.
fn decode_rgba(path: &Path) -> Result<RgbaImage, ComposeError> {
    let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    Ok(img.to_rgba8())
}

/// Composites overlay images onto still images.
#[derive(Debug, Clone)]
pub struct ImageCompositor {
    jpeg_quality: u8,
}

impl Default for ImageCompositor {
    fn default() -> Self {
        Self::new(95)
    }
}

impl ImageCompositor {
    /// Create a compositor; quality is clamped to 1-100.
    pub fn new(jpeg_quality: u8) -> Self {
        Self {
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    /// Runs the full composite on the current thread.
    ///
    /// The output file is only created once the composite is computed, and is
    /// removed again if encoding fails.
    pub fn compose_blocking(
        &self,
        main: &Path,
        overlay: &Path,
        output: &Path,
    ) -> Result<(), ComposeError> {
        let mut base = decode_rgba(main)?;
        let mut layer = decode_rgba(overlay)?;

        let (w, h) = base.dimensions();
        if layer.dimensions() != (w, h) {
            debug!(
                from = ?layer.dimensions(),
                to = ?(w, h),
                "Resampling overlay to main dimensions"
            );
            layer = imageops::resize(&layer, w, h, FilterType::Lanczos3);
        }

        composite_over(&mut base, &layer);

        let format = ImageFormat::from_path(output)?;
        if let Err(e) = self.encode(&base, format, output) {
            let _ = remove_if_exists(output);
            return Err(e);
        }
        Ok(())
    }

    fn encode(&self, img: &RgbaImage, format: ImageFormat, output: &Path) -> Result<(), ComposeError> {
        let mut writer = BufWriter::new(File::create(output)?);

        if supports_alpha(format) {
            img.write_to(&mut writer, format)?;
        } else {
            let flat = flatten_onto_white(img);
            match format {
                ImageFormat::Jpeg => {
                    let encoder = JpegEncoder::new_with_quality(&mut writer, self.jpeg_quality);
                    flat.write_with_encoder(encoder)?;
                }
                _ => flat.write_to(&mut writer, format)?,
            }
        }

        writer.flush()?;
        Ok(())
    }
}

#[async_trait]
impl Compositor for ImageCompositor {
    async fn compose(
        &self,
        main: &Path,
        overlay: &Path,
        output: &Path,
    ) -> Result<(), ComposeError> {
        let this = self.clone();
        let (main, overlay, output): (PathBuf, PathBuf, PathBuf) =
            (main.into(), overlay.into(), output.into());

        tokio::task::spawn_blocking(move || this.compose_blocking(&main, &overlay, &output))
            .await
            .map_err(|e| ComposeError::Io(std::io::Error::other(e.to_string())))?
    }
}
