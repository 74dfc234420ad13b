use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader};
use tracing::{debug, warn};

/// Turns source image bytes into a fixed-size, orientation-corrected RGB
/// raster (JPEG encoded).
pub trait ImageNormalizer {
    fn normalize(&self, source: &[u8], width: u32, height: u32) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FixedSizeNormalizer;

impl ImageNormalizer for FixedSizeNormalizer {
    fn normalize(&self, source: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
        let image = decode_oriented(source)?;
        let resized = image.resize_exact(width, height, FilterType::Lanczos3);
        let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());
        let mut out = Vec::new();
        rgb.write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)
            .context("failed to encode resized image as JPEG")?;
        Ok(out)
    }
}

/// Image payload ready to be stored in a package media folder.
#[derive(Debug, Clone)]
pub struct EmbeddedImage {
    pub png: Vec<u8>,
    pub width_px: u32,
    pub height_px: u32,
}

/// Decode any supported raster and re-encode it as PNG, keeping its native
/// pixel size.
pub fn encode_png_for_embedding(path: &Path) -> Result<EmbeddedImage> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let image = decode_oriented(&bytes)
        .with_context(|| format!("failed to decode image {}", path.display()))?;
    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .with_context(|| format!("failed to encode {} as PNG", path.display()))?;
    Ok(EmbeddedImage {
        png,
        width_px: image.width(),
        height_px: image.height(),
    })
}

pub fn resized_cache_path(resized_dir: &Path, source: &Path, size_px: u32) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "image".to_string());
    match source.extension() {
        Some(ext) => {
            let ext = ext.to_string_lossy().to_ascii_lowercase();
            resized_dir.join(format!("{stem}_{ext}_{size_px}.jpg"))
        }
        None => resized_dir.join(format!("{stem}_{size_px}.jpg")),
    }
}

/// Resize `source` into the cache folder. Any failure falls back to the
/// unresized source path.
pub fn prepare_photo<N: ImageNormalizer + ?Sized>(
    normalizer: &N,
    source: &Path,
    resized_dir: &Path,
    size_px: u32,
) -> PathBuf {
    let target = resized_cache_path(resized_dir, source, size_px);
    match resize_into(normalizer, source, &target, size_px) {
        Ok(()) => {
            debug!(source = %source.display(), target = %target.display(), "resized photo");
            target
        }
        Err(error) => {
            warn!(source = %source.display(), error = %format!("{error:#}"), "resize failed; using original photo");
            source.to_path_buf()
        }
    }
}

fn resize_into<N: ImageNormalizer + ?Sized>(
    normalizer: &N,
    source: &Path,
    target: &Path,
    size_px: u32,
) -> Result<()> {
    let bytes = fs::read(source).with_context(|| format!("failed to read {}", source.display()))?;
    let resized = normalizer.normalize(&bytes, size_px, size_px)?;
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(target, resized).with_context(|| format!("failed to write {}", target.display()))
}

fn decode_oriented(bytes: &[u8]) -> Result<DynamicImage> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .context("failed to sniff image format")?;
    let mut decoder = reader.into_decoder().context("unsupported image format")?;
    let orientation = decoder
        .orientation()
        .context("failed to read image orientation")?;
    let mut image = DynamicImage::from_decoder(decoder).context("failed to decode image")?;
    image.apply_orientation(orientation);
    Ok(image)
}

#[cfg(test)]
mod tests {
    use image::{Rgba, RgbaImage};
    use tempfile::tempdir;

    use super::*;

    fn write_png(path: &Path, width: u32, height: u32) {
        let image = RgbaImage::from_pixel(width, height, Rgba([10, 200, 30, 128]));
        image.save_with_format(path, ImageFormat::Png).expect("save png");
    }

    #[test]
    fn normalizer_produces_fixed_size_rgb_jpeg() {
        let temp = tempdir().expect("tempdir");
        let source = temp.path().join("cage.png");
        write_png(&source, 40, 20);

        let bytes = fs::read(&source).expect("read");
        let out = FixedSizeNormalizer.normalize(&bytes, 16, 16).expect("normalize");
        let decoded = image::load_from_memory(&out).expect("decode");
        assert_eq!((decoded.width(), decoded.height()), (16, 16));
        assert_eq!(
            image::guess_format(&out).expect("format"),
            ImageFormat::Jpeg
        );
        assert!(matches!(decoded, DynamicImage::ImageRgb8(_)));
    }

    #[test]
    fn embedding_keeps_native_size_and_emits_png() {
        let temp = tempdir().expect("tempdir");
        let source = temp.path().join("sign.png");
        write_png(&source, 7, 3);

        let embedded = encode_png_for_embedding(&source).expect("embed");
        assert_eq!((embedded.width_px, embedded.height_px), (7, 3));
        assert_eq!(
            image::guess_format(&embedded.png).expect("format"),
            ImageFormat::Png
        );
    }

    #[test]
    fn cache_names_keep_source_extension_apart() {
        let dir = Path::new("resized");
        let jpg = resized_cache_path(dir, Path::new("photos/588.jpg"), 162);
        let png = resized_cache_path(dir, Path::new("photos/588.PNG"), 162);
        assert_eq!(jpg, dir.join("588_jpg_162.jpg"));
        assert_eq!(png, dir.join("588_png_162.jpg"));
        assert_eq!(resized_cache_path(dir, Path::new("588"), 162), dir.join("588_162.jpg"));
    }

    #[test]
    fn prepare_photo_falls_back_to_source_on_garbage() {
        let temp = tempdir().expect("tempdir");
        let source = temp.path().join("broken.jpg");
        fs::write(&source, b"definitely not an image").expect("write");

        let chosen = prepare_photo(&FixedSizeNormalizer, &source, &temp.path().join("resized"), 162);
        assert_eq!(chosen, source);
    }

    #[test]
    fn prepare_photo_writes_cache_copy() {
        let temp = tempdir().expect("tempdir");
        let source = temp.path().join("588.png");
        write_png(&source, 30, 30);
        let resized_dir = temp.path().join("resized");

        let chosen = prepare_photo(&FixedSizeNormalizer, &source, &resized_dir, 12);
        assert_eq!(chosen, resized_dir.join("588_png_12.jpg"));
        let decoded = image::open(&chosen).expect("open resized");
        assert_eq!((decoded.width(), decoded.height()), (12, 12));
    }
}
