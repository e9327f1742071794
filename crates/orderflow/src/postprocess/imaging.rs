use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage, RgbaImage};
use tracing::warn;

use crate::error::PostProcessError;

use super::Region;

pub const JPEG_QUALITY: u8 = 95;

pub fn open_rgb(path: &Path) -> Result<RgbImage, PostProcessError> {
    image::open(path)
        .map(|img| img.to_rgb8())
        .map_err(|e| PostProcessError::OpenImage {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

pub fn open_rgba(path: &Path) -> Result<RgbaImage, PostProcessError> {
    image::open(path)
        .map(|img| img.to_rgba8())
        .map_err(|e| PostProcessError::OpenImage {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Writes an RGB image back to `path`. JPEG files keep the generation quality;
/// other formats follow the extension.
pub fn save_rgb(path: &Path, img: &RgbImage) -> Result<(), PostProcessError> {
    let save_err = |reason: String| PostProcessError::SaveImage {
        path: path.to_path_buf(),
        reason,
    };

    let is_jpeg = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"));

    if is_jpeg {
        write_jpeg(path, img).map_err(save_err)
    } else {
        img.save(path).map_err(|e| save_err(e.to_string()))
    }
}

pub fn write_jpeg(path: &Path, img: &RgbImage) -> Result<(), String> {
    let file = File::create(path).map_err(|e| e.to_string())?;
    let mut writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY)
        .encode_image(img)
        .map_err(|e| e.to_string())
}

/// Pixelates each region in place: shrink by `factor` with nearest
/// sampling, then scale back. Regions are clamped to the image; empty ones
/// are skipped. Returns how many regions were applied.
pub fn pixelate(img: &mut RgbImage, regions: &[Region], factor: u32) -> usize {
    let factor = factor.max(1);
    let mut applied = 0;

    for region in regions {
        let Some((x, y, w, h)) = region.clamp_to(img.width(), img.height()) else {
            warn!("Skipping invalid mosaic region {:?}", region);
            continue;
        };

        let crop = imageops::crop_imm(img, x, y, w, h).to_image();
        let small = imageops::resize(
            &crop,
            (w / factor).max(1),
            (h / factor).max(1),
            FilterType::Nearest,
        );
        let blocky = imageops::resize(&small, w, h, FilterType::Nearest);
        imageops::replace(img, &blocky, i64::from(x), i64::from(y));
        applied += 1;
    }

    applied
}

/// Alpha-composites `layer` onto the bottom-right corner of `base`.
pub fn overlay_bottom_right(base: &RgbImage, layer: &RgbaImage) -> RgbImage {
    let mut canvas = DynamicImage::ImageRgb8(base.clone()).to_rgba8();
    let x = i64::from(base.width()) - i64::from(layer.width());
    let y = i64::from(base.height()) - i64::from(layer.height());
    imageops::overlay(&mut canvas, layer, x, y);
    DynamicImage::ImageRgba8(canvas).to_rgb8()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, Rgba};
    use tempfile::TempDir;

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, 0]))
    }

    fn region(x: i64, y: i64, w: i64, h: i64) -> Region {
        Region { x, y, w, h }
    }

    #[test]
    fn test_pixelate_makes_uniform_blocks() {
        let mut img = gradient(40, 40);
        let applied = pixelate(&mut img, &[region(0, 0, 20, 20)], 10);
        assert_eq!(applied, 1);

        // 20x20 shrinks to 2x2, so each 10x10 block is one color.
        let corner = *img.get_pixel(0, 0);
        for y in 0..10 {
            for x in 0..10 {
                assert_eq!(*img.get_pixel(x, y), corner);
            }
        }
        // Outside the region is untouched.
        assert_eq!(*img.get_pixel(30, 30), *gradient(40, 40).get_pixel(30, 30));
    }

    #[test]
    fn test_pixelate_clamps_to_bounds() {
        let mut img = gradient(30, 30);
        assert_eq!(pixelate(&mut img, &[region(20, 20, 50, 50)], 10), 1);
    }

    #[test]
    fn test_pixelate_skips_invalid_regions() {
        let mut img = gradient(30, 30);
        let before = img.clone();
        let applied = pixelate(
            &mut img,
            &[region(40, 0, 5, 5), region(0, 0, 0, 10), region(5, 5, -3, 4)],
            10,
        );
        assert_eq!(applied, 0);
        assert_eq!(img, before);
    }

    #[test]
    fn test_overlay_bottom_right() {
        let base = RgbImage::from_pixel(10, 10, Rgb([0, 0, 0]));
        let mut layer = RgbaImage::from_pixel(3, 2, Rgba([255, 255, 255, 255]));
        layer.put_pixel(0, 0, Rgba([255, 255, 255, 0]));

        let out = overlay_bottom_right(&base, &layer);
        assert_eq!(*out.get_pixel(9, 9), Rgb([255, 255, 255]));
        assert_eq!(*out.get_pixel(7, 8), Rgb([0, 0, 0]));
        assert_eq!(*out.get_pixel(8, 8), Rgb([255, 255, 255]));
        assert_eq!(*out.get_pixel(0, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_save_rgb_round_trips_png() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.png");
        let img = gradient(8, 8);
        save_rgb(&path, &img).unwrap();
        assert_eq!(open_rgb(&path).unwrap(), img);
    }

    #[test]
    fn test_open_missing_file() {
        assert!(matches!(
            open_rgb(Path::new("/nonexistent.jpg")),
            Err(PostProcessError::OpenImage { .. })
        ));
    }
}
