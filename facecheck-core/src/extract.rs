use crate::context::PipelineContext;
use crate::detect::{DetectionError, RegionSelection};
use crate::embedding::Embedding;
use crate::frame::{FaceRegion, Image};
use crate::model::ModelError;
use crate::preprocess::{preprocess, PreprocessError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Face region {region} lies outside the {width}x{height} image")]
    InvalidRegion {
        region: FaceRegion,
        width: u32,
        height: u32,
    },
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error("{0}")]
    Model(#[from] ModelError),
    #[error("Model returned {actual} values, expected {expected}")]
    OutputShape { expected: usize, actual: usize },
    #[error("Model output has zero norm; cannot normalize embedding")]
    DegenerateEmbedding,
    #[error("Face detection failed: {0}")]
    Detection(#[from] DetectionError),
}

/// Produce a unit-length embedding for `image`, cropped to `region` if given.
///
/// Every call runs inference; nothing is cached.
pub fn extract(
    context: &PipelineContext,
    image: &Image,
    region: Option<&FaceRegion>,
) -> Result<Embedding, ExtractError> {
    let cropped;
    let input = match region {
        Some(region) => {
            let (width, height) = image.dimensions();
            if !region.fits_within(width, height) {
                return Err(ExtractError::InvalidRegion {
                    region: *region,
                    width,
                    height,
                });
            }
            cropped = image.crop(region);
            &cropped
        }
        None => image,
    };

    // Preprocess and run the model
    let config = context.config();
    let tensor = preprocess(input, config)?;
    let raw = context.model().run(&tensor)?;

    if raw.len() != config.num_classes {
        return Err(ExtractError::OutputShape {
            expected: config.num_classes,
            actual: raw.len(),
        });
    }

    // L2 normalize
    Embedding::normalized(raw).ok_or(ExtractError::DegenerateEmbedding)
}

/// Run the context's detector and extract from the face chosen by `selection`.
///
/// Without a detector, or when nothing is detected, the whole image is used.
pub fn extract_detected(
    context: &PipelineContext,
    image: &Image,
    selection: RegionSelection,
) -> Result<Embedding, ExtractError> {
    let Some(detector) = context.detector() else {
        log::debug!("No face detector configured, using the full image");
        return extract(context, image, None);
    };

    // Detect faces, then let the caller's policy pick one
    let detections = detector.detect(image)?;
    match selection.select(&detections) {
        Some(detection) => {
            log::debug!(
                "Using face {} (confidence {:.2}) out of {} detections",
                detection.region,
                detection.confidence,
                detections.len()
            );
            extract(context, image, Some(&detection.region))
        }
        None => {
            log::debug!("No face detected, using the full image");
            extract(context, image, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    #[test]
    fn test_embedding_is_unit_length() {
        let context = channel_mean_context();
        for image in [
            gradient_image(),
            solid_image([255, 0, 0]),
            solid_image([10, 200, 90]),
        ] {
            let embedding = extract(&context, &image, None).unwrap();
            assert_eq!(embedding.len(), 512);
            assert!((embedding.norm() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let model = Arc::new(ChannelMeanModel::new(512));
        let context = PipelineContext::new(Default::default(), model.clone()).unwrap();

        let first = extract(&context, &gradient_image(), None).unwrap();
        let second = extract(&context, &gradient_image(), None).unwrap();
        assert_eq!(first, second);
        assert!(first.dot(&second) >= 0.999_999);
        // No caching: both calls reached the model
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_region_outside_image_is_rejected() {
        let context = channel_mean_context();
        let image = gradient_image();

        let result = extract(&context, &image, Some(&FaceRegion::new(100, 100, 20, 20)));
        assert!(matches!(
            result,
            Err(ExtractError::InvalidRegion { width: 112, height: 112, .. })
        ));

        let result = extract(&context, &image, Some(&FaceRegion::new(0, 0, 0, 10)));
        assert!(matches!(result, Err(ExtractError::InvalidRegion { .. })));
    }

    #[test]
    fn test_region_crop_changes_embedding() {
        let context = channel_mean_context();
        let mut raster = image::RgbImage::from_pixel(100, 50, image::Rgb([255, 0, 0]));
        for x in 50..100 {
            for y in 0..50 {
                raster.put_pixel(x, y, image::Rgb([0, 0, 255]));
            }
        }
        let image = Image::from_rgb(raster);

        let left = extract(&context, &image, Some(&FaceRegion::new(0, 0, 50, 50))).unwrap();
        let red = extract(&context, &solid_image([255, 0, 0]), None).unwrap();
        assert!(left.dot(&red) > 0.999);

        let right = extract(&context, &image, Some(&FaceRegion::new(50, 0, 50, 50))).unwrap();
        assert!(right.dot(&red) < 0.0);
    }

    #[test]
    fn test_zero_output_is_degenerate() {
        let context = context_with(FixedModel(vec![0.0; 512]));
        let result = extract(&context, &gradient_image(), None);
        assert!(matches!(result, Err(ExtractError::DegenerateEmbedding)));
    }

    #[test]
    fn test_wrong_output_length() {
        let context = context_with(FixedModel(vec![1.0; 128]));
        let result = extract(&context, &gradient_image(), None);
        assert!(matches!(
            result,
            Err(ExtractError::OutputShape { expected: 512, actual: 128 })
        ));
    }

    #[test]
    fn test_model_failure_propagates() {
        let context = context_with(FailingModel);
        let result = extract(&context, &gradient_image(), None);
        assert!(matches!(result, Err(ExtractError::Model(_))));
    }

    #[test]
    fn test_empty_image_is_invalid() {
        let context = channel_mean_context();
        let image = Image::from_rgb(image::RgbImage::new(0, 0));
        let result = extract(&context, &image, None);
        assert!(matches!(
            result,
            Err(ExtractError::Preprocess(PreprocessError::InvalidImage(_)))
        ));
    }

    #[test]
    fn test_extract_detected_uses_selected_region() {
        let mut raster = image::RgbImage::from_pixel(100, 50, image::Rgb([255, 0, 0]));
        for x in 60..100 {
            for y in 10..50 {
                raster.put_pixel(x, y, image::Rgb([0, 0, 255]));
            }
        }
        let image = Image::from_rgb(raster);
        let detector = FixedDetector(vec![
            detection(FaceRegion::new(0, 0, 20, 20), 0.99),
            detection(FaceRegion::new(60, 10, 40, 40), 0.6),
        ]);
        let context = channel_mean_context().with_detector(Arc::new(detector));
        let blue = extract(&context, &solid_image([0, 0, 255]), None).unwrap();
        let red = extract(&context, &solid_image([255, 0, 0]), None).unwrap();

        let largest = extract_detected(&context, &image, RegionSelection::Largest).unwrap();
        assert!(largest.dot(&blue) > 0.999);

        let confident = extract_detected(&context, &image, RegionSelection::MostConfident).unwrap();
        assert!(confident.dot(&red) > 0.999);
    }

    #[test]
    fn test_extract_detected_without_faces_uses_full_image() {
        let context = channel_mean_context().with_detector(Arc::new(FixedDetector(Vec::new())));
        let image = gradient_image();
        let detected = extract_detected(&context, &image, RegionSelection::Largest).unwrap();
        let full = extract(&context, &image, None).unwrap();
        assert_eq!(detected, full);
    }
}
