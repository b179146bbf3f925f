use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::Deserialize;
use tract_onnx::prelude::tract_ndarray::Array4;

use crate::error::{InferenceError, LoadError};

/// Resize target from `preprocessor_config.json`. Older exports store a bare integer.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ResizeSpec {
    ShortestEdge { shortest_edge: u32 },
    Exact { height: u32, width: u32 },
    Square(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CropSpec {
    Exact { height: u32, width: u32 },
    Square(u32),
}

impl CropSpec {
    fn dims(self) -> (u32, u32) {
        match self {
            CropSpec::Exact { height, width } => (height, width),
            CropSpec::Square(side) => (side, side),
        }
    }
}

/// Image processor settings. Unset fields take the MobileNetV2 processor defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PreprocessorConfig {
    pub do_resize: bool,
    pub size: ResizeSpec,
    pub do_center_crop: bool,
    pub crop_size: CropSpec,
    pub do_rescale: bool,
    pub rescale_factor: f32,
    pub do_normalize: bool,
    pub image_mean: [f32; 3],
    pub image_std: [f32; 3],
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self {
            do_resize: true,
            size: ResizeSpec::ShortestEdge { shortest_edge: 256 },
            do_center_crop: true,
            crop_size: CropSpec::Exact {
                height: 224,
                width: 224,
            },
            do_rescale: true,
            rescale_factor: 1.0 / 255.0,
            do_normalize: true,
            image_mean: [0.5, 0.5, 0.5],
            image_std: [0.5, 0.5, 0.5],
        }
    }
}

/// Turns a decoded RGB image into the model's NCHW input.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    config: PreprocessorConfig,
    input_dims: (u32, u32),
}

impl Preprocessor {
    pub fn new(config: PreprocessorConfig) -> Result<Self, LoadError> {
        let input_dims = if config.do_center_crop {
            config.crop_size.dims()
        } else {
            match (config.do_resize, config.size) {
                (true, ResizeSpec::Exact { height, width }) => (height, width),
                (true, ResizeSpec::Square(side)) => (side, side),
                _ => {
                    return Err(LoadError::Model(
                        "input size is not fixed: enable center crop or an exact resize"
                            .to_string(),
                    ))
                }
            }
        };

        if input_dims.0 == 0 || input_dims.1 == 0 {
            return Err(LoadError::Model("input size must be non-zero".to_string()));
        }
        if config.do_normalize && config.image_std.iter().any(|s| *s == 0.0) {
            return Err(LoadError::Model("image_std must be non-zero".to_string()));
        }

        Ok(Self { config, input_dims })
    }

    /// Loads `preprocessor_config.json`, falling back to defaults when the file is absent.
    pub fn from_path(path: &Path) -> Result<Self, LoadError> {
        let config = match fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|source| LoadError::Json {
                path: path.display().to_string(),
                source,
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(
                    "{} not found, using default preprocessing",
                    path.display()
                );
                PreprocessorConfig::default()
            }
            Err(source) => {
                return Err(LoadError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        Self::new(config)
    }

    /// `[batch, channels, height, width]` of the tensor produced by [`Self::to_tensor`].
    pub fn input_shape(&self) -> [usize; 4] {
        [1, 3, self.input_dims.0 as usize, self.input_dims.1 as usize]
    }

    pub fn to_tensor(&self, image: &RgbImage) -> Result<Array4<f32>, InferenceError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(InferenceError::Preprocess("image has no pixels".to_string()));
        }

        let kept = self.resize_and_crop(image);
        let (crop_h, crop_w) = if self.config.do_center_crop {
            self.input_dims
        } else {
            (kept.height(), kept.width())
        };

        // Negative offsets mean the crop is larger than the image; those pixels are zero.
        let top = (kept.height() as i64 - crop_h as i64) / 2;
        let left = (kept.width() as i64 - crop_w as i64) / 2;

        let cfg = &self.config;
        let scale = if cfg.do_rescale { cfg.rescale_factor } else { 1.0 };

        let tensor = Array4::from_shape_fn(
            (1, 3, crop_h as usize, crop_w as usize),
            |(_, c, y, x)| {
                let sy = y as i64 + top;
                let sx = x as i64 + left;
                let raw = if sy >= 0
                    && sx >= 0
                    && (sy as u32) < kept.height()
                    && (sx as u32) < kept.width()
                {
                    kept.get_pixel(sx as u32, sy as u32)[c] as f32
                } else {
                    0.0
                };

                let value = raw * scale;
                if cfg.do_normalize {
                    (value - cfg.image_mean[c]) / cfg.image_std[c]
                } else {
                    value
                }
            },
        );

        Ok(tensor)
    }

    /// Size of the image after the resize step. Can be far larger than the input
    /// for thin images, so it is never allocated whole when a center crop follows.
    fn resized_dims(&self, width: u32, height: u32) -> (u64, u64) {
        let (width, height) = (width as u64, height as u64);
        if !self.config.do_resize {
            return (width, height);
        }

        match self.config.size {
            ResizeSpec::ShortestEdge { shortest_edge } => {
                // Short side becomes `shortest_edge`, long side keeps the aspect ratio.
                let short = shortest_edge as u64;
                if width <= height {
                    (short, (short * height / width).max(1))
                } else {
                    ((short * width / height).max(1), short)
                }
            }
            ResizeSpec::Exact { height, width } => (width as u64, height as u64),
            ResizeSpec::Square(side) => (side as u64, side as u64),
        }
    }

    /// Resizes only the part of `image` that survives the center crop. Without a
    /// crop the target is a fixed size and the whole image is resized.
    fn resize_and_crop(&self, image: &RgbImage) -> RgbImage {
        let (width, height) = image.dimensions();
        let (target_w, target_h) = self.resized_dims(width, height);

        if !self.config.do_center_crop {
            return resize_to(image, target_w as u32, target_h as u32);
        }

        let (crop_h, crop_w) = self.input_dims;
        let (x0, x1, keep_w) = source_window(width, target_w, crop_w);
        let (y0, y1, keep_h) = source_window(height, target_h, crop_h);

        let region = imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image();
        resize_to(&region, keep_w, keep_h)
    }
}

/// Source span `[start, end)` along one axis that maps onto the centered `crop`
/// window of an axis resized from `source` to `target`, plus the kept length.
fn source_window(source: u32, target: u64, crop: u32) -> (u32, u32, u32) {
    let keep = target.min(crop as u64);
    let offset = (target - keep) / 2;
    let (source, target) = (source as u128, target as u128);
    let (offset, keep_wide) = (offset as u128, keep as u128);

    let start = offset * source / target;
    let end = ((offset + keep_wide) * source + target - 1) / target;
    let end = end.clamp(start + 1, source);
    (start as u32, end as u32, keep as u32)
}

fn resize_to(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    imageops::resize(image, width, height, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn default_pipeline_produces_224_square() {
        let pre = Preprocessor::new(PreprocessorConfig::default()).unwrap();
        let image = RgbImage::from_pixel(640, 480, Rgb([255, 0, 128]));

        let tensor = pre.to_tensor(&image).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 224, 224]);
        assert_eq!(pre.input_shape(), [1, 3, 224, 224]);

        // 255 -> 1.0 -> (1.0 - 0.5) / 0.5, within one level of resampling error
        assert!((tensor[[0, 0, 100, 100]] - 1.0).abs() < 0.02);
        assert!((tensor[[0, 1, 100, 100]] + 1.0).abs() < 0.02);
    }

    #[test]
    fn imagenet_normalization_from_config_file() {
        let raw = r#"{
            "do_resize": true,
            "size": {"height": 8, "width": 8},
            "do_center_crop": false,
            "do_normalize": true,
            "image_mean": [0.485, 0.456, 0.406],
            "image_std": [0.229, 0.224, 0.225],
            "rescale_factor": 0.00392156862745098
        }"#;
        let config: PreprocessorConfig = serde_json::from_str(raw).unwrap();
        assert!(config.do_rescale);
        let pre = Preprocessor::new(config).unwrap();

        let tensor = pre.to_tensor(&RgbImage::from_pixel(20, 10, Rgb([0, 0, 0]))).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 8, 8]);
        assert!((tensor[[0, 0, 0, 0]] - (-0.485 / 0.229)).abs() < 1e-5);
        assert!((tensor[[0, 2, 7, 7]] - (-0.406 / 0.225)).abs() < 1e-5);
    }

    #[test]
    fn legacy_integer_sizes_are_accepted() {
        let config: PreprocessorConfig =
            serde_json::from_str(r#"{"size": 256, "crop_size": 224}"#).unwrap();
        assert_eq!(config.size, ResizeSpec::Square(256));
        assert_eq!(config.crop_size, CropSpec::Square(224));
    }

    #[test]
    fn small_image_is_zero_padded_by_center_crop() {
        let config = PreprocessorConfig {
            do_resize: false,
            do_normalize: false,
            do_rescale: false,
            crop_size: CropSpec::Square(4),
            ..PreprocessorConfig::default()
        };
        let pre = Preprocessor::new(config).unwrap();

        let tensor = pre.to_tensor(&RgbImage::from_pixel(2, 2, Rgb([9, 9, 9]))).unwrap();
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        assert_eq!(tensor[[0, 0, 1, 1]], 9.0);
        assert_eq!(tensor[[0, 0, 2, 2]], 9.0);
        assert_eq!(tensor[[0, 0, 3, 3]], 0.0);
    }

    #[test]
    fn thin_image_is_cropped_before_resizing() {
        let pre = Preprocessor::new(PreprocessorConfig::default()).unwrap();
        let image = RgbImage::from_pixel(1, 4_000_000, Rgb([255, 255, 255]));

        let tensor = pre.to_tensor(&image).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 224, 224]);
        assert!((tensor[[0, 0, 112, 112]] - 1.0).abs() < 0.02);
        assert!((tensor[[0, 2, 0, 223]] - 1.0).abs() < 0.02);
    }

    #[test]
    fn wide_image_keeps_center_columns() {
        let config = PreprocessorConfig {
            size: ResizeSpec::ShortestEdge { shortest_edge: 4 },
            crop_size: CropSpec::Square(4),
            do_normalize: false,
            do_rescale: false,
            ..PreprocessorConfig::default()
        };
        let pre = Preprocessor::new(config).unwrap();

        // Left and right thirds black, middle third white: only white survives the crop.
        let image = RgbImage::from_fn(300, 10, |x, _| {
            if (100..200).contains(&x) {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        });
        let tensor = pre.to_tensor(&image).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 4, 4]);
        assert!(tensor.iter().all(|v| *v > 200.0), "{:?}", tensor);
    }

    #[test]
    fn source_window_maps_crop_back_to_input() {
        // 1x4_000_000 resized to 256x1_024_000_000, cropped to 224 rows.
        let (start, end, keep) = source_window(4_000_000, 1_024_000_000, 224);
        assert_eq!(keep, 224);
        assert!(end > start);
        assert!(end - start <= 2);
        assert!((1_999_999..=2_000_000).contains(&start));

        // Axis already smaller than the crop is kept whole.
        assert_eq!(source_window(10, 100, 224), (0, 10, 100));
    }

    #[test]
    fn rejects_variable_input_size() {
        let config = PreprocessorConfig {
            do_center_crop: false,
            ..PreprocessorConfig::default()
        };
        assert!(matches!(
            Preprocessor::new(config),
            Err(LoadError::Model(_))
        ));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let pre = Preprocessor::from_path(&dir.path().join("preprocessor_config.json")).unwrap();
        assert_eq!(pre.input_shape(), [1, 3, 224, 224]);
    }
}
