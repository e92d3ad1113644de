use crate::config::ModelConfig;
use crate::frame::Image;
use image::imageops::{self, FilterType};
use ndarray::Array4;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Invalid image: {0}")]
    InvalidImage(String),
    #[error("Model configuration error: {0}")]
    Config(String),
}

/// Convert an image into the `(1, C, H, W)` float tensor the embedding model expects.
///
/// Order of operations: channel reorder, linear resize, scale to [0, 1],
/// per-channel `(v - mean) / std`, channel-first layout with a batch axis.
pub fn preprocess(image: &Image, config: &ModelConfig) -> Result<Array4<f32>, PreprocessError> {
    config
        .validate()
        .map_err(|e| PreprocessError::Config(e.to_string()))?;

    if image.is_empty() {
        return Err(PreprocessError::InvalidImage(format!(
            "image has zero size ({}x{})",
            image.width(),
            image.height()
        )));
    }

    let (height, width) = (config.height(), config.width());
    let target_width = u32::try_from(width)
        .map_err(|_| PreprocessError::Config(format!("input width {} too large", width)))?;
    let target_height = u32::try_from(height)
        .map_err(|_| PreprocessError::Config(format!("input height {} too large", height)))?;

    let oriented = image.to_order(config.channel_order);
    let resized = imageops::resize(
        oriented.raster(),
        target_width,
        target_height,
        FilterType::Triangle,
    );

    let mut tensor = Array4::<f32>::zeros((1, config.channels(), height, width));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..config.channels() {
            let scaled = pixel[c] as f32 / 255.0;
            tensor[[0, c, y as usize, x as usize]] = (scaled - config.mean[c]) / config.std[c];
        }
    }

    Ok(tensor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ChannelOrder;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_output_shape() {
        let image = Image::from_rgb(RgbImage::from_pixel(64, 48, Rgb([10, 20, 30])));
        let tensor = preprocess(&image, &ModelConfig::default()).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
    }

    #[test]
    fn test_normalization_values() {
        // mean = std = 0.5 maps 0 -> -1 and 255 -> 1
        let image = Image::from_rgb(RgbImage::from_pixel(112, 112, Rgb([255, 0, 51])));
        let tensor = preprocess(&image, &ModelConfig::default()).unwrap();

        assert!((tensor[[0, 0, 5, 5]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 5, 5]] + 1.0).abs() < 1e-6);
        let expected = (51.0 / 255.0 - 0.5) / 0.5;
        assert!((tensor[[0, 2, 5, 5]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_bgr_input_is_reordered() {
        // Blue pixel stored BGR
        let image = Image::from_raw(2, 2, [255, 0, 0].repeat(4), ChannelOrder::Bgr).unwrap();
        let tensor = preprocess(&image, &ModelConfig::default()).unwrap();

        assert!((tensor[[0, 0, 0, 0]] + 1.0).abs() < 1e-6, "red channel should be empty");
        assert!((tensor[[0, 2, 0, 0]] - 1.0).abs() < 1e-6, "blue channel should be full");
    }

    #[test]
    fn test_bgr_model_receives_bgr_layout() {
        let image = Image::from_rgb(RgbImage::from_pixel(8, 8, Rgb([255, 0, 0])));
        let config = ModelConfig {
            channel_order: ChannelOrder::Bgr,
            ..ModelConfig::default()
        };
        let tensor = preprocess(&image, &config).unwrap();
        assert!((tensor[[0, 0, 0, 0]] + 1.0).abs() < 1e-6);
        assert!((tensor[[0, 2, 0, 0]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_per_channel_mean_and_std() {
        let image = Image::from_rgb(RgbImage::from_pixel(4, 4, Rgb([255, 255, 255])));
        let config = ModelConfig {
            input_size: [3, 4, 4],
            mean: vec![0.0, 0.5, 1.0],
            std: vec![1.0, 0.25, 2.0],
            ..ModelConfig::default()
        };
        let tensor = preprocess(&image, &config).unwrap();
        assert!((tensor[[0, 0, 1, 1]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 1, 1]] - 2.0).abs() < 1e-6);
        assert!(tensor[[0, 2, 1, 1]].abs() < 1e-6);
    }

    #[test]
    fn test_zero_size_image_is_invalid() {
        let image = Image::from_rgb(RgbImage::new(0, 10));
        assert!(matches!(
            preprocess(&image, &ModelConfig::default()),
            Err(PreprocessError::InvalidImage(_))
        ));
    }

    #[test]
    fn test_mismatched_std_is_config_error() {
        let image = Image::from_rgb(RgbImage::new(4, 4));
        let config = ModelConfig {
            std: vec![0.5],
            ..ModelConfig::default()
        };
        assert!(matches!(
            preprocess(&image, &config),
            Err(PreprocessError::Config(_))
        ));
    }

    #[test]
    fn test_deterministic() {
        let mut raster = RgbImage::new(37, 53);
        for (x, y, pixel) in raster.enumerate_pixels_mut() {
            *pixel = Rgb([(x * 7) as u8, (y * 5) as u8, ((x + y) * 3) as u8]);
        }
        let image = Image::from_rgb(raster);
        let a = preprocess(&image, &ModelConfig::default()).unwrap();
        let b = preprocess(&image, &ModelConfig::default()).unwrap();
        assert_eq!(a, b);
    }
}
