use anyhow::{anyhow, Result};
use image::{DynamicImage, GrayImage, RgbImage};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    /// 8-bit monochrome (the usual industrial sensor output).
    Mono8,
    Rgb24,
    /// Packed YUV 4:2:2 (Y0 U Y1 V).
    Yuyv,
}

impl PixelFormat {
    #[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"GREY" => Some(Self::Mono8),
            b"RGB3" => Some(Self::Rgb24),
            b"YUYV" => Some(Self::Yuyv),
            _ => None,
        }
    }

    fn bytes_per_frame(self, width: u32, height: u32) -> Option<usize> {
        let pixels = (width as usize).checked_mul(height as usize)?;
        match self {
            Self::Mono8 => Some(pixels),
            Self::Rgb24 => pixels.checked_mul(3),
            Self::Yuyv => pixels.checked_mul(2),
        }
    }
}

/// Decode one raw buffer into an owned image.
///
/// Trailing bytes past the frame (driver padding) are ignored.
pub(crate) fn to_image(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<DynamicImage> {
    let expected = format
        .bytes_per_frame(width, height)
        .ok_or_else(|| anyhow!("{:?} frame dimensions overflow", format))?;
    if pixels.len() < expected {
        return Err(anyhow!(
            "{:?} frame too short: expected {} bytes, got {}",
            format,
            expected,
            pixels.len()
        ));
    }
    let pixels = &pixels[..expected];

    let image = match format {
        PixelFormat::Mono8 => DynamicImage::ImageLuma8(
            GrayImage::from_raw(width, height, pixels.to_vec())
                .ok_or_else(|| anyhow!("mono8 buffer does not fit {}x{}", width, height))?,
        ),
        PixelFormat::Rgb24 => DynamicImage::ImageRgb8(
            RgbImage::from_raw(width, height, pixels.to_vec())
                .ok_or_else(|| anyhow!("rgb24 buffer does not fit {}x{}", width, height))?,
        ),
        PixelFormat::Yuyv => DynamicImage::ImageRgb8(
            RgbImage::from_raw(width, height, yuyv_to_rgb(pixels))
                .ok_or_else(|| anyhow!("yuyv buffer does not fit {}x{}", width, height))?,
        ),
    };
    Ok(image)
}

fn yuyv_to_rgb(pixels: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(pixels.len() / 2 * 3);
    for chunk in pixels.chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            let y = y as f32;
            rgb.push(clamp_to_u8(y + 1.402_f32 * v));
            rgb.push(clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v));
            rgb.push(clamp_to_u8(y + 1.772_f32 * u));
        }
    }
    rgb
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono8_keeps_dimensions() -> Result<()> {
        let image = to_image(&[7u8; 12], 4, 3, PixelFormat::Mono8)?;
        assert_eq!((image.width(), image.height()), (4, 3));
        assert_eq!(image.as_luma8().map(|img| img.get_pixel(0, 0).0), Some([7]));
        Ok(())
    }

    #[test]
    fn short_buffer_is_rejected() {
        assert!(to_image(&[0u8; 5], 4, 3, PixelFormat::Mono8).is_err());
        assert!(to_image(&[0u8; 35], 4, 3, PixelFormat::Rgb24).is_err());
    }

    #[test]
    fn padding_is_ignored() -> Result<()> {
        let image = to_image(&[1u8; 20], 4, 3, PixelFormat::Mono8)?;
        assert_eq!(image.as_bytes().len(), 12);
        Ok(())
    }

    #[test]
    fn yuyv_gray_maps_to_gray() -> Result<()> {
        // Neutral chroma: every pixel should come out as its luma value.
        let image = to_image(&[100, 128, 200, 128], 2, 1, PixelFormat::Yuyv)?;
        let rgb = image.to_rgb8();
        assert_eq!(rgb.get_pixel(0, 0).0, [100, 100, 100]);
        assert_eq!(rgb.get_pixel(1, 0).0, [200, 200, 200]);
        Ok(())
    }

    #[test]
    fn fourcc_lookup() {
        assert_eq!(PixelFormat::from_fourcc(b"GREY"), Some(PixelFormat::Mono8));
        assert_eq!(PixelFormat::from_fourcc(b"MJPG"), None);
    }
}
