//! 画像の読み込みと正規化

use anyhow::{Context, Result};
use image::{imageops::FilterType, DynamicImage, ImageReader};
use std::path::{Path, PathBuf};

use crate::model::DataSettings;

/// リサイズに使う補間方式（バイキュービック）
pub const RESIZE_FILTER: FilterType = FilterType::CatmullRom;

/// 正規化済み画像
///
/// 値は [0, 1]、(C, H, W) の順で平坦化されている
#[derive(Debug, Clone, PartialEq)]
pub struct LesionImage {
    size: usize,
    pixels: Vec<f32>,
}

impl LesionImage {
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn pixels(&self) -> &[f32] {
        &self.pixels
    }
}

/// デコード済み画像を RGB 化・リサイズし、255で割って正規化
pub fn preprocess_image(image: &DynamicImage, size: usize) -> Result<LesionImage> {
    if size == 0 {
        anyhow::bail!("入力サイズが0です");
    }
    if image.width() == 0 || image.height() == 0 {
        anyhow::bail!("空の画像です: {}x{}", image.width(), image.height());
    }

    let rgb = image.to_rgb8();
    let resized = image::imageops::resize(&rgb, size as u32, size as u32, RESIZE_FILTER);

    let mut pixels = Vec::with_capacity(3 * size * size);
    for channel in 0..3 {
        for y in 0..size as u32 {
            for x in 0..size as u32 {
                let pixel = resized.get_pixel(x, y);
                pixels.push(pixel[channel] as f32 / 255.0);
            }
        }
    }

    Ok(LesionImage { size, pixels })
}

/// 画像ファイルを開いて前処理する
///
/// 形式は拡張子ではなくファイル内容から判定する
pub fn load_and_preprocess(path: &Path, size: usize) -> Result<LesionImage> {
    let image = ImageReader::open(path)
        .with_context(|| format!("Failed to open image: {}", path.display()))?
        .with_guessed_format()
        .with_context(|| format!("Failed to read image header: {}", path.display()))?
        .decode()
        .with_context(|| format!("Failed to decode image: {}", path.display()))?;
    preprocess_image(&image, size)
}

/// image_id から画像ファイルを探して読み込む
#[derive(Debug, Clone)]
pub struct ImageLoader {
    data_dir: PathBuf,
    image_dirs: [String; 2],
    extension: String,
}

impl ImageLoader {
    pub fn new(settings: &DataSettings) -> Self {
        Self {
            data_dir: settings.data_dir.clone(),
            image_dirs: settings.image_dirs.clone(),
            extension: settings.image_extension.clone(),
        }
    }

    /// 2つの画像ディレクトリを順に確認し、最初に見つかったパスを返す
    pub fn resolve_path(&self, image_id: &str) -> Option<PathBuf> {
        let file_name = format!("{}.{}", image_id, self.extension);
        self.image_dirs
            .iter()
            .map(|dir| self.data_dir.join(dir).join(&file_name))
            .find(|path| path.is_file())
    }

    /// 画像を読み込んで正規化
    ///
    /// ファイルが無い・デコードできない場合は `None`（呼び出し側でスキップする）
    pub fn load_image(&self, image_id: &str, size: usize) -> Option<LesionImage> {
        let path = self.resolve_path(image_id)?;
        match load_and_preprocess(&path, size) {
            Ok(image) => Some(image),
            Err(e) => {
                log::warn!("画像読み込みエラー {}: {:#}", image_id, e);
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::fs;
    use tempfile::TempDir;

    /// テスト用のグラデーション画像を保存する
    pub(crate) fn write_image(path: &Path, width: u32, height: u32, seed: u8) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let image = RgbImage::from_fn(width, height, |x, y| {
            Rgb([
                (x as u8).wrapping_mul(7).wrapping_add(seed),
                (y as u8).wrapping_mul(5),
                seed.wrapping_mul(3),
            ])
        });
        image.save(path).unwrap();
    }

    fn loader(dir: &Path) -> ImageLoader {
        ImageLoader::new(&DataSettings::default().with_data_dir(dir))
    }

    #[test]
    fn test_preprocess_shape_and_range() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 30, Rgb([255, 0, 51])));
        let processed = preprocess_image(&image, 16).unwrap();

        assert_eq!(processed.size(), 16);
        assert_eq!(processed.pixels().len(), 3 * 16 * 16);
        assert!(processed.pixels().iter().all(|v| (0.0..=1.0).contains(v)));

        // チャネル優先の並び
        let plane = 16 * 16;
        assert!((processed.pixels()[0] - 1.0).abs() < 1e-6);
        assert!(processed.pixels()[plane].abs() < 1e-6);
        assert!((processed.pixels()[2 * plane] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_rejects_empty_image() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(0, 0));
        assert!(preprocess_image(&image, 16).is_err());
    }

    #[test]
    fn test_resolve_prefers_first_directory() {
        let dir = TempDir::new().unwrap();
        let part1 = dir.path().join("HAM10000_images_part_1/ISIC_1.jpg");
        let part2 = dir.path().join("HAM10000_images_part_2/ISIC_1.jpg");
        write_image(&part1, 8, 8, 1);
        write_image(&part2, 8, 8, 2);

        assert_eq!(loader(dir.path()).resolve_path("ISIC_1"), Some(part1));
    }

    #[test]
    fn test_resolve_falls_back_to_second_directory() {
        let dir = TempDir::new().unwrap();
        let part2 = dir.path().join("HAM10000_images_part_2/ISIC_2.jpg");
        write_image(&part2, 8, 8, 2);

        assert_eq!(loader(dir.path()).resolve_path("ISIC_2"), Some(part2));
        assert_eq!(loader(dir.path()).resolve_path("ISIC_3"), None);
    }

    #[test]
    fn test_load_image_is_deterministic() {
        let dir = TempDir::new().unwrap();
        write_image(&dir.path().join("HAM10000_images_part_1/ISIC_1.jpg"), 50, 40, 9);

        let loader = loader(dir.path());
        let first = loader.load_image("ISIC_1", 24).unwrap();
        let second = loader.load_image("ISIC_1", 24).unwrap();

        let first_bits: Vec<u32> = first.pixels().iter().map(|v| v.to_bits()).collect();
        let second_bits: Vec<u32> = second.pixels().iter().map(|v| v.to_bits()).collect();
        assert_eq!(first_bits, second_bits);
    }

    #[test]
    fn test_load_image_missing_or_corrupt_returns_none() {
        let dir = TempDir::new().unwrap();
        let broken = dir.path().join("HAM10000_images_part_1/ISIC_BAD.jpg");
        fs::create_dir_all(broken.parent().unwrap()).unwrap();
        fs::write(&broken, b"not a jpeg").unwrap();

        let loader = loader(dir.path());
        assert!(loader.load_image("ISIC_BAD", 16).is_none());
        assert!(loader.load_image("ISIC_MISSING", 16).is_none());
    }

    #[test]
    fn test_load_image_detects_format_from_content() {
        let dir = TempDir::new().unwrap();
        let png = dir.path().join("source.png");
        write_image(&png, 20, 20, 4);
        let mislabelled = dir.path().join("HAM10000_images_part_1/ISIC_PNG.jpg");
        fs::create_dir_all(mislabelled.parent().unwrap()).unwrap();
        fs::copy(&png, &mislabelled).unwrap();

        let image = loader(dir.path()).load_image("ISIC_PNG", 16).unwrap();
        assert_eq!(image.pixels().len(), 3 * 16 * 16);
    }
}
