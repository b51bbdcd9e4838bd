//! 画像の正規化（レターボックス化）
//!
//! アスペクト比を保ったまま長辺が指定サイズに収まるよう縮小し、
//! 白いキャンバスの中央に配置します。拡大は行いません。

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader, Rgb, RgbImage};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::error::{PipelineError, PipelineResult};

/// パディング色（白）
pub const PADDING_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// 長辺が `bound` に収まる縮小後サイズを計算（拡大はしない）
pub fn fit_within(width: u32, height: u32, bound: u32) -> (u32, u32) {
    if width <= bound && height <= bound {
        return (width, height);
    }

    let scale = (bound as f64 / width as f64).min(bound as f64 / height as f64);
    let scaled = |v: u32| ((v as f64 * scale).round() as u32).clamp(1, bound);
    (scaled(width), scaled(height))
}

/// RGBに変換し、target_size x target_size の白キャンバス中央に配置した画像を返す
pub fn letterbox(image: &DynamicImage, target_size: u32) -> RgbImage {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    let (new_width, new_height) = fit_within(width, height, target_size);

    let resized = if (new_width, new_height) == (width, height) {
        rgb
    } else {
        imageops::resize(&rgb, new_width, new_height, FilterType::Lanczos3)
    };

    let mut canvas = RgbImage::from_pixel(target_size, target_size, PADDING_COLOR);
    let paste_x = (target_size - new_width) / 2;
    let paste_y = (target_size - new_height) / 2;
    imageops::overlay(&mut canvas, &resized, paste_x as i64, paste_y as i64);
    canvas
}

/// 画像を開く（拡張子ではなく内容からフォーマットを判定）
pub fn open_image(path: &Path) -> PipelineResult<DynamicImage> {
    if !path.is_file() {
        return Err(PipelineError::MissingInput {
            what: "画像ファイル",
            path: path.to_path_buf(),
        });
    }

    ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| PipelineError::image(path, e))
}

/// JPEGとして保存
pub fn save_jpeg(image: &RgbImage, path: &Path, quality: u8) -> PipelineResult<()> {
    let file = File::create(path)?;
    let encoder = JpegEncoder::new_with_quality(BufWriter::new(file), quality);
    image
        .write_with_encoder(encoder)
        .map_err(|e| PipelineError::image(path, e))
}

/// 1枚の元画像を正規化して保存
pub fn process_image(
    src: &Path,
    dst: &Path,
    target_size: u32,
    jpeg_quality: u8,
) -> PipelineResult<()> {
    let image = open_image(src)?;
    let canvas = letterbox(&image, target_size);
    save_jpeg(&canvas, dst, jpeg_quality)
}

/// RGB画像を [0, 1] の値に変換（H, W, C の順で平坦化）
pub fn to_unit_pixels(image: &RgbImage) -> Vec<f32> {
    image.as_raw().iter().map(|&v| v as f32 / 255.0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgba, RgbaImage};

    fn solid(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)))
    }

    #[test]
    fn test_fit_within_shrinks_longer_edge() {
        assert_eq!(fit_within(448, 224, 224), (224, 112));
        assert_eq!(fit_within(300, 600, 224), (112, 224));
        assert_eq!(fit_within(1000, 1000, 224), (224, 224));
    }

    #[test]
    fn test_fit_within_never_enlarges() {
        assert_eq!(fit_within(100, 50, 224), (100, 50));
        assert_eq!(fit_within(224, 224, 224), (224, 224));
    }

    #[test]
    fn test_fit_within_keeps_at_least_one_pixel() {
        assert_eq!(fit_within(10_000, 2, 224), (224, 1));
    }

    #[test]
    fn test_letterbox_pads_wide_image_vertically() {
        let canvas = letterbox(&solid(448, 224, [200, 0, 0]), 224);
        assert_eq!(canvas.dimensions(), (224, 224));
        // 縮小後 224x112 → 上下に56pxずつ白帯
        assert_eq!(*canvas.get_pixel(112, 10), PADDING_COLOR);
        assert_eq!(*canvas.get_pixel(112, 213), PADDING_COLOR);
        let center = canvas.get_pixel(112, 112);
        assert!(center[0] > 190 && center[1] < 10 && center[2] < 10);
    }

    #[test]
    fn test_letterbox_centers_small_image_without_scaling() {
        let canvas = letterbox(&solid(100, 50, [0, 0, 255]), 224);
        // paste offset: ((224-100)/2, (224-50)/2) = (62, 87)
        assert_eq!(*canvas.get_pixel(61, 100), PADDING_COLOR);
        assert_eq!(*canvas.get_pixel(62, 87), Rgb([0, 0, 255]));
        assert_eq!(*canvas.get_pixel(161, 136), Rgb([0, 0, 255]));
        assert_eq!(*canvas.get_pixel(162, 136), PADDING_COLOR);
        assert_eq!(*canvas.get_pixel(100, 137), PADDING_COLOR);
    }

    #[test]
    fn test_letterbox_converts_to_rgb() {
        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(20, 20, Luma([128])));
        let canvas = letterbox(&gray, 32);
        assert_eq!(*canvas.get_pixel(16, 16), Rgb([128, 128, 128]));

        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(20, 20, Rgba([10, 20, 30, 255])));
        let canvas = letterbox(&rgba, 32);
        assert_eq!(*canvas.get_pixel(16, 16), Rgb([10, 20, 30]));
    }

    #[test]
    fn test_letterbox_is_deterministic() {
        let mut source = RgbImage::new(317, 211);
        for (x, y, pixel) in source.enumerate_pixels_mut() {
            *pixel = Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8]);
        }
        let source = DynamicImage::ImageRgb8(source);
        assert_eq!(letterbox(&source, 224), letterbox(&source, 224));
    }

    #[test]
    fn test_process_image_writes_square_rgb_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("shirt.png");
        let dst = dir.path().join("out.png");
        solid(640, 480, [30, 120, 60]).save(&src).unwrap();

        process_image(&src, &dst, 224, 95).unwrap();

        // 出力はファイル名に関わらずJPEG
        let written = open_image(&dst).unwrap();
        assert_eq!((written.width(), written.height()), (224, 224));
        assert_eq!(written.color(), image::ColorType::Rgb8);
    }

    #[test]
    fn test_open_image_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_image(&dir.path().join("nope.jpg")).unwrap_err();
        assert!(matches!(err, PipelineError::MissingInput { .. }));
    }

    #[test]
    fn test_open_image_rejects_corrupt_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not an image").unwrap();
        assert!(open_image(&path).is_err());
    }

    #[test]
    fn test_to_unit_pixels_scales_hwc() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([255, 0, 51]));
        img.put_pixel(1, 0, Rgb([0, 255, 0]));
        let pixels = to_unit_pixels(&img);
        assert_eq!(pixels.len(), 6);
        assert_eq!(pixels[0], 1.0);
        assert!((pixels[2] - 0.2).abs() < 1e-6);
        assert_eq!(pixels[4], 1.0);
    }
}
