use crate::config::{PreviewConfig, PreviewFormat};
use crate::import::scanner::path_key;
use crate::import::transform::{ensure_output_dir, Transform, TransformError};
use crate::import::util::build_pool;
use crate::photos::model::{Metadata, Record};
use image::error::{EncodingError, ImageFormatHint};
use image::{DynamicImage, ExtendedColorType, GenericImageView, ImageError, ImageFormat, RgbImage};
use rayon::prelude::*;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::ThreadId;

/// Lower bound on the mean squared error used when converting to PSNR,
/// so a lossless run reports 50 dB instead of infinity.
const MIN_MSE: f64 = 1.0e-5;

/// Resizes each source photo to every configured long-edge size.
///
/// Record layout:
/// `{"preview": {"1024": "dir/a_pr1024.webp"}, "preview_mse": {"1024": 0.0001}}`,
/// where `preview_mse` is present only when quality checking is enabled.
pub struct PreviewTransform {
    sizes: Vec<u32>,
    format: PreviewFormat,
    quality: u8,
    calc_psnr: bool,
    num_threads: usize,
    /// one size-rendering pool per calling worker thread, built on first use
    size_pools: Mutex<HashMap<ThreadId, Arc<rayon::ThreadPool>>>,
}

impl PreviewTransform {
    pub fn new(config: &PreviewConfig) -> Self {
        Self {
            sizes: config.sizes.clone(),
            format: config.format,
            quality: config.quality,
            calc_psnr: config.calc_psnr,
            num_threads: config.num_threads,
            size_pools: Mutex::new(HashMap::new()),
        }
    }

    pub fn sizes(&self) -> &[u32] {
        &self.sizes
    }

    /// Pool of `num_threads` threads owned by the calling worker, or None when
    /// the sizes are rendered sequentially.
    fn size_pool(&self) -> Option<Arc<rayon::ThreadPool>> {
        if self.num_threads <= 1 || self.sizes.len() <= 1 {
            return None;
        }
        let worker = std::thread::current().id();
        let mut pools = self.size_pools.lock().unwrap_or_else(PoisonError::into_inner);
        let pool = pools.entry(worker).or_insert_with(|| {
            tracing::debug!("worker {:?}: size pool of {} threads", worker, self.num_threads);
            Arc::new(build_pool(self.num_threads, "preview-size"))
        });
        Some(Arc::clone(pool))
    }

    #[cfg(test)]
    fn size_pool_count(&self) -> usize {
        self.size_pools.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn render_all(
        &self,
        img: &DynamicImage,
        rel_path: &Path,
        output_root: &Path,
    ) -> Result<Vec<RenderedPreview>, TransformError> {
        let render = |size: u32| self.render_size(img, rel_path, output_root, size);
        match self.size_pool() {
            Some(pool) => pool.install(|| self.sizes.par_iter().map(|&s| render(s)).collect()),
            None => self.sizes.iter().map(|&s| render(s)).collect(),
        }
    }

    fn render_size(
        &self,
        img: &DynamicImage,
        rel_path: &Path,
        output_root: &Path,
        size: u32,
    ) -> Result<RenderedPreview, TransformError> {
        let out_rel = preview_rel_path(rel_path, size, self.format)?;
        let out_path = output_root.join(&out_rel);
        tracing::debug!("resize {:?} -> {:?}, size = {}", rel_path, out_path, size);

        let resized = resize_to_long_edge(img, size);
        encode_preview(&resized, &out_path, self.format, self.quality)?;

        let mse = if self.calc_psnr {
            let decoded = image::open(&out_path).map_err(|source| TransformError::Decode {
                path: out_path.clone(),
                source,
            })?;
            let value = mse(&resized.to_rgb8(), &decoded.to_rgb8()).ok_or_else(|| {
                TransformError::Corrupted {
                    path: out_path.clone(),
                    reason: format!(
                        "decoded {}x{}, rendered {}x{}",
                        decoded.width(),
                        decoded.height(),
                        resized.width(),
                        resized.height()
                    ),
                }
            })?;
            Some(value)
        } else {
            None
        };

        Ok(RenderedPreview {
            size,
            key: path_key(&out_rel),
            mse,
        })
    }
}

struct RenderedPreview {
    size: u32,
    key: String,
    mse: Option<f64>,
}

impl Transform for PreviewTransform {
    fn process(
        &self,
        input_root: &Path,
        rel_path: &Path,
        output_root: &Path,
    ) -> Result<Record, TransformError> {
        let source_path = input_root.join(rel_path);
        let img = image::open(&source_path).map_err(|source| TransformError::Decode {
            path: source_path.clone(),
            source,
        })?;
        ensure_output_dir(output_root, rel_path)?;

        let rendered = self.render_all(&img, rel_path, output_root)?;

        let mut preview = Map::new();
        let mut preview_mse = Map::new();
        for r in rendered {
            preview.insert(r.size.to_string(), Value::String(r.key));
            if let Some(mse) = r.mse {
                preview_mse.insert(r.size.to_string(), Value::from(mse));
            }
        }

        let mut record = Record::new();
        record.insert("preview".to_string(), Value::Object(preview));
        if self.calc_psnr {
            record.insert("preview_mse".to_string(), Value::Object(preview_mse));
        }
        Ok(record)
    }
}

/// `<parent>/<stem>_pr<size>.<ext>` for a source at `rel_path`.
pub fn preview_rel_path(
    rel_path: &Path,
    size: u32,
    format: PreviewFormat,
) -> Result<PathBuf, TransformError> {
    let stem = rel_path.file_stem().and_then(|s| s.to_str()).ok_or_else(|| {
        TransformError::io(
            rel_path,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "no usable file name"),
        )
    })?;
    let name = format!("{}_pr{}.{}", stem, size, format.extension());
    Ok(match rel_path.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    })
}

/// Dimensions after fitting the long edge into `target`. Never upscales.
pub fn scaled_dimensions(width: u32, height: u32, target: u32) -> (u32, u32) {
    let long = width.max(height);
    if long <= target {
        return (width, height);
    }
    let scale = target as f64 / long as f64;
    let scaled = |d: u32| ((d as f64 * scale).round() as u32).max(1);
    (scaled(width), scaled(height))
}

/// Downscale `img` so its long edge equals `target`, or borrow it unchanged
/// when it already fits.
pub fn resize_to_long_edge(img: &DynamicImage, target: u32) -> Cow<'_, DynamicImage> {
    let (w, h) = img.dimensions();
    let (nw, nh) = scaled_dimensions(w, h, target);
    if (nw, nh) == (w, h) {
        Cow::Borrowed(img)
    } else {
        Cow::Owned(img.resize_exact(nw, nh, image::imageops::FilterType::Lanczos3))
    }
}

fn encode_preview(
    img: &DynamicImage,
    out_path: &Path,
    format: PreviewFormat,
    quality: u8,
) -> Result<(), TransformError> {
    let file = std::fs::File::create(out_path).map_err(|e| TransformError::io(out_path, e))?;
    let mut writer = BufWriter::new(file);
    let encode_err = |source| TransformError::Encode {
        path: out_path.to_path_buf(),
        source,
    };

    match format {
        PreviewFormat::Jpeg => {
            let rgb = img.to_rgb8();
            let mut encoder =
                image::codecs::jpeg::JpegEncoder::new_with_quality(&mut writer, quality);
            encoder
                .encode(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
                .map_err(encode_err)?;
        }
        PreviewFormat::Webp => {
            let encoded = if img.color().has_alpha() {
                let rgba = img.to_rgba8();
                let encoder = webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height());
                encoder.encode_simple(false, quality as f32)
            } else {
                let rgb = img.to_rgb8();
                let encoder = webp::Encoder::from_rgb(rgb.as_raw(), rgb.width(), rgb.height());
                encoder.encode_simple(false, quality as f32)
            }
            .map_err(|e| {
                encode_err(ImageError::Encoding(EncodingError::new(
                    ImageFormatHint::Exact(ImageFormat::WebP),
                    format!("libwebp: {:?}", e),
                )))
            })?;
            writer
                .write_all(&encoded)
                .map_err(|e| TransformError::io(out_path, e))?;
        }
        PreviewFormat::Png => {
            img.write_to(&mut writer, ImageFormat::Png)
                .map_err(encode_err)?;
        }
    }

    writer.flush().map_err(|e| TransformError::io(out_path, e))
}

/// Mean squared error between two RGB images with channels scaled to [0, 1].
/// Returns None if the dimensions differ.
pub fn mse(reference: &RgbImage, candidate: &RgbImage) -> Option<f64> {
    if reference.dimensions() != candidate.dimensions() {
        return None;
    }
    let a = reference.as_raw();
    let b = candidate.as_raw();
    if a.is_empty() {
        return Some(0.0);
    }
    let sum: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = (x as f64 - y as f64) / 255.0;
            d * d
        })
        .sum();
    Some(sum / a.len() as f64)
}

/// Peak signal-to-noise ratio in dB for a mean squared error on [0, 1] data.
pub fn psnr(mean_mse: f64) -> f64 {
    -10.0 * mean_mse.max(MIN_MSE).log10()
}

/// Average the per-file `preview_mse` of every record, per size, and convert to PSNR.
///
/// Sizes with no samples (quality checking off, or every file failed) are left out.
pub fn psnr_summary(metadata: &Metadata, sizes: &[u32]) -> BTreeMap<u32, f64> {
    let mut summary = BTreeMap::new();
    for &size in sizes {
        let key = size.to_string();
        let samples: Vec<f64> = metadata
            .values()
            .filter_map(|record| record.get("preview_mse")?.get(&key)?.as_f64())
            .collect();
        if samples.is_empty() {
            continue;
        }
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        summary.insert(size, psnr(mean));
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        }))
    }

    fn write_source(root: &Path, rel: &str, width: u32, height: u32) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        gradient(width, height).save(&path).unwrap();
    }

    fn config(root: &Path, sizes: Vec<u32>) -> PreviewConfig {
        PreviewConfig {
            sizes,
            num_threads: 1,
            ..PreviewConfig::new(root)
        }
    }

    #[test]
    fn test_scaled_dimensions_never_upscales() {
        assert_eq!(scaled_dimensions(400, 300, 1024), (400, 300));
        assert_eq!(scaled_dimensions(1024, 700, 1024), (1024, 700));
    }

    #[test]
    fn test_scaled_dimensions_fits_long_edge() {
        assert_eq!(scaled_dimensions(2000, 1000, 1024), (1024, 512));
        assert_eq!(scaled_dimensions(1000, 2000, 512), (256, 512));
        // 3000x2000 at 1000 → 1000x666.67 rounds to 667
        assert_eq!(scaled_dimensions(3000, 2000, 1000), (1000, 667));
    }

    #[test]
    fn test_scaled_dimensions_preserves_aspect_ratio() {
        for &(w, h, t) in &[(4032u32, 3024u32, 512u32), (1080, 1920, 1024), (5000, 37, 700)] {
            let (nw, nh) = scaled_dimensions(w, h, t);
            assert_eq!(nw.max(nh), t, "long edge must equal target for {}x{}", w, h);
            // the short edge is off the exact ratio by at most half a pixel
            let exact_short = w.min(h) as f64 * t as f64 / w.max(h) as f64;
            assert!(
                (nw.min(nh) as f64 - exact_short).abs() <= 0.5 + 1e-9,
                "{}x{} -> {}x{}, exact short edge {}",
                w,
                h,
                nw,
                nh,
                exact_short
            );
        }
    }

    #[test]
    fn test_scaled_dimensions_thin_image_keeps_one_pixel() {
        assert_eq!(scaled_dimensions(10000, 1, 100), (100, 1));
    }

    #[test]
    fn test_resize_borrows_when_small_enough() {
        let img = gradient(40, 30);
        assert!(matches!(resize_to_long_edge(&img, 64), Cow::Borrowed(_)));
        let resized = resize_to_long_edge(&img, 20);
        assert_eq!(resized.dimensions(), (20, 15));
    }

    #[test]
    fn test_preview_rel_path_layout() {
        let p = preview_rel_path(Path::new("trip/day1/IMG_01.JPG"), 512, PreviewFormat::Webp).unwrap();
        assert_eq!(p, Path::new("trip/day1/IMG_01_pr512.webp"));
        let p = preview_rel_path(Path::new("a.png"), 1024, PreviewFormat::Jpeg).unwrap();
        assert_eq!(path_key(&p), "a_pr1024.jpeg");
    }

    #[test]
    fn test_process_writes_previews_and_record() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        write_source(input.path(), "album/a.jpg", 2000, 1000);
        write_source(input.path(), "album/b.jpg", 400, 300);

        let transform = PreviewTransform::new(&config(input.path(), vec![1024]));

        let a = transform
            .process(input.path(), Path::new("album/a.jpg"), output.path())
            .unwrap();
        assert_eq!(a["preview"]["1024"], "album/a_pr1024.webp");
        assert!(a.get("preview_mse").is_none());
        let dims = image::image_dimensions(output.path().join("album/a_pr1024.webp")).unwrap();
        assert_eq!(dims, (1024, 512));

        let b = transform
            .process(input.path(), Path::new("album/b.jpg"), output.path())
            .unwrap();
        assert_eq!(b["preview"]["1024"], "album/b_pr1024.webp");
        let dims = image::image_dimensions(output.path().join("album/b_pr1024.webp")).unwrap();
        assert_eq!(dims, (400, 300), "small sources must not be upscaled");
    }

    #[test]
    fn test_process_multiple_sizes_in_parallel() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        write_source(input.path(), "a.png", 900, 600);

        let cfg = PreviewConfig {
            num_threads: 2,
            ..config(input.path(), vec![600, 300, 150])
        };
        let transform = PreviewTransform::new(&cfg);
        let record = transform
            .process(input.path(), Path::new("a.png"), output.path())
            .unwrap();

        let preview = record["preview"].as_object().unwrap();
        assert_eq!(preview.len(), 3);
        for (size, expected) in [(600u32, (600, 400)), (300, (300, 200)), (150, (150, 100))] {
            let rel = preview[&size.to_string()].as_str().unwrap();
            let dims = image::image_dimensions(output.path().join(rel)).unwrap();
            assert_eq!(dims, expected, "size {}", size);
        }
    }

    #[test]
    fn test_process_calc_psnr_records_mse() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        write_source(input.path(), "a.png", 300, 200);

        let cfg = PreviewConfig {
            calc_psnr: true,
            format: PreviewFormat::Png,
            ..config(input.path(), vec![128, 512])
        };
        let record = PreviewTransform::new(&cfg)
            .process(input.path(), Path::new("a.png"), output.path())
            .unwrap();

        let mse = record["preview_mse"].as_object().unwrap();
        assert_eq!(mse.len(), 2);
        for v in mse.values() {
            // png output is lossless
            assert!(v.as_f64().unwrap() < 1e-9, "lossless mse must be ~0, got {}", v);
        }
    }

    #[test]
    fn test_process_webp_honours_quality() {
        let input = TempDir::new().unwrap();
        write_source(input.path(), "a.png", 300, 200);

        let render = |quality: u8| {
            let output = TempDir::new().unwrap();
            let cfg = PreviewConfig {
                calc_psnr: true,
                format: PreviewFormat::Webp,
                quality,
                ..config(input.path(), vec![256])
            };
            let record = PreviewTransform::new(&cfg)
                .process(input.path(), Path::new("a.png"), output.path())
                .unwrap();
            let bytes = std::fs::read(output.path().join("a_pr256.webp")).unwrap();
            assert_eq!(&bytes[8..12], b"WEBP");
            let mse = record["preview_mse"]["256"].as_f64().unwrap();
            (bytes.len(), mse)
        };

        let (low_len, low_mse) = render(10);
        let (high_len, high_mse) = render(95);
        assert!(low_len < high_len, "q10 {} bytes, q95 {} bytes", low_len, high_len);
        assert!(low_mse > high_mse, "q10 mse {}, q95 mse {}", low_mse, high_mse);
        assert!(high_mse > 0.0, "webp previews are lossy");
    }

    #[test]
    fn test_size_pool_is_per_worker_thread() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        for name in ["a.png", "b.png", "c.png", "d.png"] {
            write_source(input.path(), name, 64, 48);
        }
        let cfg = PreviewConfig {
            num_threads: 2,
            ..config(input.path(), vec![32, 16])
        };
        let transform = PreviewTransform::new(&cfg);

        // one worker reuses its pool across files
        for name in ["a.png", "b.png"] {
            transform.process(input.path(), Path::new(name), output.path()).unwrap();
        }
        assert_eq!(transform.size_pool_count(), 1);

        // every other worker thread gets a pool of its own
        std::thread::scope(|s| {
            for name in ["c.png", "d.png"] {
                let transform = &transform;
                let (input, output) = (input.path(), output.path());
                s.spawn(move || transform.process(input, Path::new(name), output).unwrap());
            }
        });
        assert_eq!(transform.size_pool_count(), 3);
    }

    #[test]
    fn test_single_size_or_thread_uses_no_pool() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        write_source(input.path(), "a.png", 64, 48);

        let one_size = PreviewTransform::new(&PreviewConfig {
            num_threads: 4,
            ..config(input.path(), vec![32])
        });
        one_size.process(input.path(), Path::new("a.png"), output.path()).unwrap();
        assert_eq!(one_size.size_pool_count(), 0);

        let one_thread = PreviewTransform::new(&config(input.path(), vec![32, 16]));
        one_thread.process(input.path(), Path::new("a.png"), output.path()).unwrap();
        assert_eq!(one_thread.size_pool_count(), 0);
    }

    #[test]
    fn test_process_jpeg_quality_mse_is_small_but_positive() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        write_source(input.path(), "a.png", 256, 256);

        let cfg = PreviewConfig {
            calc_psnr: true,
            format: PreviewFormat::Jpeg,
            quality: 50,
            ..config(input.path(), vec![256])
        };
        let record = PreviewTransform::new(&cfg)
            .process(input.path(), Path::new("a.png"), output.path())
            .unwrap();

        assert_eq!(record["preview"]["256"], "a_pr256.jpeg");
        let bytes = std::fs::read(output.path().join("a_pr256.jpeg")).unwrap();
        assert_eq!(&bytes[0..2], &[0xFF, 0xD8], "output must be a JPEG");
        let mse = record["preview_mse"]["256"].as_f64().unwrap();
        assert!(mse > 0.0 && mse < 0.05, "unexpected jpeg mse {}", mse);
    }

    #[test]
    fn test_process_corrupt_source_is_decode_error() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        std::fs::write(input.path().join("broken.jpg"), [0xFF, 0xD8, 0x00, 0x01]).unwrap();

        let err = PreviewTransform::new(&config(input.path(), vec![512]))
            .process(input.path(), Path::new("broken.jpg"), output.path())
            .unwrap_err();
        assert!(matches!(err, TransformError::Decode { .. }));
    }

    #[test]
    fn test_process_missing_source_is_error() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let result = PreviewTransform::new(&config(input.path(), vec![512]))
            .process(input.path(), Path::new("missing.jpg"), output.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_mse_known_values() {
        let black = RgbImage::new(2, 2);
        let white = RgbImage::from_pixel(2, 2, Rgb([255, 255, 255]));
        assert_eq!(mse(&black, &black), Some(0.0));
        assert_eq!(mse(&black, &white), Some(1.0));
        assert_eq!(mse(&black, &RgbImage::new(3, 2)), None);
    }

    #[test]
    fn test_psnr_formula() {
        assert!((psnr(0.01) - 20.0).abs() < 1e-9);
        assert!((psnr(0.0) - 50.0).abs() < 1e-9, "clamped at 1e-5");
        assert!((psnr(1.0) - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_psnr_summary_averages_per_size() {
        let mut metadata = Metadata::new();
        for (key, m512) in [("a.jpg", 0.01), ("b.jpg", 0.03)] {
            let record = serde_json::json!({
                "preview": {"512": format!("{}_pr512.webp", key)},
                "preview_mse": {"512": m512}
            });
            metadata.insert(key.to_string(), record.as_object().unwrap().clone());
        }
        let summary = psnr_summary(&metadata, &[512, 1024]);
        assert_eq!(summary.len(), 1, "1024 has no samples");
        assert!((summary[&512] - psnr(0.02)).abs() < 1e-9);
    }
}
