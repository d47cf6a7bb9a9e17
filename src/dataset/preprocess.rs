//! Image preprocessing shared by inference and training
//!
//! Every image fed to a classifier goes through [`image_to_hwc`]: force RGB,
//! resize (not crop) to a square side, scale to [0, 1]. The network itself
//! carries no rescale layer, so this is the only place pixel values are scaled.

use std::path::Path;

use burn::tensor::TensorData;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader, RgbImage};

use crate::utils::error::{LeafScanError, Result};

/// Number of colour channels after preprocessing
pub const CHANNELS: usize = 3;

/// Decode an image from disk, sniffing the format from content when the
/// extension is missing or wrong
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    let decode_err = |e: String| LeafScanError::ImageDecode(path.to_path_buf(), e);

    ImageReader::open(path)
        .map_err(|e| decode_err(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| decode_err(e.to_string()))?
        .decode()
        .map_err(|e| decode_err(e.to_string()))
}

/// Convert any colour type (grey, grey+alpha, RGBA, 16-bit...) to 8-bit RGB
pub fn to_rgb(image: DynamicImage) -> RgbImage {
    match image {
        DynamicImage::ImageRgb8(rgb) => rgb,
        other => other.to_rgb8(),
    }
}

/// Resize to `side x side` and flatten into HWC order, values in [0, 1]
pub fn image_to_hwc(image: DynamicImage, side: usize) -> Vec<f32> {
    let rgb = to_rgb(image);
    let resized = image::imageops::resize(&rgb, side as u32, side as u32, FilterType::CatmullRom);

    resized
        .into_raw()
        .into_iter()
        .map(|v| v as f32 / 255.0)
        .collect()
}

/// Preprocess a decoded image into a `[1, side, side, 3]` batch
pub fn preprocess_image(image: DynamicImage, side: usize) -> TensorData {
    TensorData::new(image_to_hwc(image, side), [1, side, side, CHANNELS])
}

/// Load an already-saved image and preprocess it for a model with the given input side
pub fn preprocess_path(path: &Path, side: usize) -> Result<TensorData> {
    let image = load_image(path)?;
    Ok(preprocess_image(image, side))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayAlphaImage, GrayImage, ImageBuffer, LumaA, Rgb, Rgba, RgbaImage};
    use tempfile::TempDir;

    fn assert_batch(data: &TensorData, side: usize) {
        assert_eq!(data.shape, vec![1, side, side, 3]);
        let values = data.to_vec::<f32>().unwrap();
        assert_eq!(values.len(), side * side * 3);
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_rgb_image_shape_and_range() {
        let img = RgbImage::from_pixel(100, 60, Rgb([255, 128, 0]));
        let data = preprocess_image(DynamicImage::ImageRgb8(img), 32);
        assert_batch(&data, 32);

        let values = data.to_vec::<f32>().unwrap();
        assert!((values[0] - 1.0).abs() < 1e-6);
        assert!((values[1] - 128.0 / 255.0).abs() < 1e-6);
        assert!(values[2].abs() < 1e-6);
    }

    #[test]
    fn test_greyscale_is_expanded_to_three_channels() {
        let img = GrayImage::from_pixel(20, 20, image::Luma([51]));
        let data = preprocess_image(DynamicImage::ImageLuma8(img), 8);
        assert_batch(&data, 8);

        let values = data.to_vec::<f32>().unwrap();
        assert!((values[0] - 0.2).abs() < 1e-6);
        assert_eq!(values[0], values[1]);
        assert_eq!(values[1], values[2]);
    }

    #[test]
    fn test_alpha_and_sixteen_bit_inputs() {
        let rgba = RgbaImage::from_pixel(10, 30, Rgba([10, 20, 30, 0]));
        assert_batch(&preprocess_image(DynamicImage::ImageRgba8(rgba), 16), 16);

        let grey_alpha = GrayAlphaImage::from_pixel(7, 7, LumaA([200, 100]));
        assert_batch(&preprocess_image(DynamicImage::ImageLumaA8(grey_alpha), 5), 5);

        let rgb16: ImageBuffer<Rgb<u16>, Vec<u16>> =
            ImageBuffer::from_pixel(12, 12, Rgb([65535, 0, 32768]));
        assert_batch(&preprocess_image(DynamicImage::ImageRgb16(rgb16), 4), 4);
    }

    #[test]
    fn test_preprocess_path_roundtrips_saved_png() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("leaf.png");
        GrayImage::from_pixel(40, 40, image::Luma([255]))
            .save(&path)
            .unwrap();

        let data = preprocess_path(&path, 24).unwrap();
        assert_batch(&data, 24);
    }

    #[test]
    fn test_undecodable_file_is_an_image_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();

        let err = preprocess_path(&path, 24).unwrap_err();
        assert!(err.is_input_error());
    }
}
