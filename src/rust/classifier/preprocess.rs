use std::fs;
use std::path::Path;

use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array4;
use serde::{Deserialize, Serialize};

use super::error::ClassifierError;

/// Number of colour channels the model consumes (RGB).
pub const CHANNELS: usize = 3;

/// Spatial input size the model was trained with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSize {
    pub height: u32,
    pub width: u32,
}

impl TargetSize {
    pub fn new(height: u32, width: u32) -> Result<Self, ClassifierError> {
        if height == 0 || width == 0 {
            return Err(ClassifierError::InvalidInput(
                format!("Target size must be non-zero, got {}x{}", height, width)
            ));
        }
        Ok(Self { height, width })
    }

    pub fn square(side: u32) -> Result<Self, ClassifierError> {
        Self::new(side, side)
    }

    /// `[H, W, C]`, the layout recorded in exported metadata.
    pub fn input_shape(&self) -> [usize; 3] {
        [self.height as usize, self.width as usize, CHANNELS]
    }

    /// Picks the size to feed a model that declares `declared` as its `[H, W, C]` input.
    ///
    /// The declared shape wins over the 224x224 default. An explicit size must agree with
    /// it, and a declared channel count other than RGB is rejected.
    pub fn resolve(explicit: Option<TargetSize>, declared: Option<[usize; 3]>) -> Result<Self, ClassifierError> {
        if let Some([_, _, channels]) = declared {
            if channels != CHANNELS {
                return Err(ClassifierError::shape_mismatch(
                    format!("{} input channels", CHANNELS),
                    format!("model input {:?}", declared),
                ));
            }
        }
        match (explicit, declared) {
            (Some(target), Some(shape)) if target.input_shape() != shape => Err(ClassifierError::shape_mismatch(
                format!("model input {:?}", shape),
                format!("target size {:?}", target.input_shape()),
            )),
            (Some(target), _) => Ok(target),
            (None, Some([h, w, _])) => Self::new(h as u32, w as u32),
            (None, None) => Ok(Self::default()),
        }
    }
}

impl Default for TargetSize {
    fn default() -> Self {
        Self { height: 224, width: 224 }
    }
}

/// Turns encoded images into the `[1, H, W, 3]` tensor the classifier expects.
///
/// Resizing is exact (no aspect-ratio preservation) with nearest-neighbour sampling and
/// intensities are scaled to `[0, 1]`, matching how training images were loaded.
#[derive(Debug, Clone, Copy, Default)]
pub struct Preprocessor {
    target_size: TargetSize,
}

impl Preprocessor {
    pub fn new(target_size: TargetSize) -> Self {
        Self { target_size }
    }

    pub fn target_size(&self) -> TargetSize {
        self.target_size
    }

    /// Decodes `raw_image` and converts it into a normalized batch of one.
    ///
    /// # Errors
    /// * `InvalidImage` if the bytes cannot be decoded or the image has zero area
    pub fn prepare(&self, raw_image: &[u8]) -> Result<Array4<f32>, ClassifierError> {
        let image = decode_image(raw_image)?;
        Ok(self.prepare_image(&image))
    }

    pub fn prepare_path<P: AsRef<Path>>(&self, path: P) -> Result<Array4<f32>, ClassifierError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| {
            ClassifierError::InvalidImage(format!("Failed to read {}: {}", path.display(), e))
        })?;
        self.prepare(&bytes)
    }

    /// Converts an already-decoded image. Callers are expected to have rejected
    /// zero-area images through [`decode_image`].
    pub fn prepare_image(&self, image: &DynamicImage) -> Array4<f32> {
        let TargetSize { height, width } = self.target_size;
        let rgb = image.resize_exact(width, height, FilterType::Nearest).to_rgb8();

        Array4::from_shape_fn(
            (1, height as usize, width as usize, CHANNELS),
            |(_, y, x, c)| rgb.get_pixel(x as u32, y as u32)[c] as f32 / 255.0,
        )
    }
}

/// Decodes an image, rejecting inputs without any pixels.
pub fn decode_image(raw_image: &[u8]) -> Result<DynamicImage, ClassifierError> {
    let image = image::load_from_memory(raw_image)
        .map_err(|e| ClassifierError::InvalidImage(format!("Failed to decode image: {}", e)))?;
    if image.width() == 0 || image.height() == 0 {
        return Err(ClassifierError::InvalidImage(
            format!("Image has zero area ({}x{})", image.width(), image.height())
        ));
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn encode_png(image: RgbImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_prepare_shape_and_range() {
        let png = encode_png(RgbImage::from_pixel(10, 6, Rgb([255, 0, 51])));
        let preprocessor = Preprocessor::new(TargetSize::new(4, 8).unwrap());
        let tensor = preprocessor.prepare(&png).unwrap();

        assert_eq!(tensor.shape(), &[1, 4, 8, 3]);
        assert_eq!(tensor[[0, 0, 0, 0]], 1.0);
        assert_eq!(tensor[[0, 3, 7, 1]], 0.0);
        assert!((tensor[[0, 2, 5, 2]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_prepare_is_deterministic() {
        let mut image = RgbImage::new(17, 13);
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            *pixel = Rgb([(x * 15) as u8, (y * 19) as u8, ((x + y) * 7) as u8]);
        }
        let png = encode_png(image);
        let preprocessor = Preprocessor::default();
        assert_eq!(preprocessor.prepare(&png).unwrap(), preprocessor.prepare(&png).unwrap());
    }

    #[test]
    fn test_resolve_target_size() {
        let explicit = TargetSize::square(299).unwrap();
        assert_eq!(TargetSize::resolve(None, None).unwrap(), TargetSize::default());
        assert_eq!(TargetSize::resolve(None, Some([299, 299, 3])).unwrap(), explicit);
        assert_eq!(TargetSize::resolve(Some(explicit), None).unwrap(), explicit);
        assert_eq!(TargetSize::resolve(Some(explicit), Some([299, 299, 3])).unwrap(), explicit);
        assert!(matches!(
            TargetSize::resolve(Some(explicit), Some([224, 224, 3])),
            Err(ClassifierError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            TargetSize::resolve(None, Some([224, 224, 1])),
            Err(ClassifierError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_prepare_rejects_garbage() {
        let result = Preprocessor::default().prepare(b"definitely not an image");
        assert!(matches!(result, Err(ClassifierError::InvalidImage(_))));
    }

    #[test]
    fn test_prepare_path_missing_file() {
        let result = Preprocessor::default().prepare_path("/nonexistent/arthrolens/xray.png");
        assert!(matches!(result, Err(ClassifierError::InvalidImage(_))));
    }

    #[test]
    fn test_zero_target_size_rejected() {
        assert!(matches!(TargetSize::new(0, 224), Err(ClassifierError::InvalidInput(_))));
        assert_eq!(TargetSize::default().input_shape(), [224, 224, 3]);
    }
}
