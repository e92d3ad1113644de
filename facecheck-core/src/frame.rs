use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Failed to read image: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to decode image: {0}")]
    Decode(String),
    #[error("Image has zero width or height")]
    Empty,
    #[error("Raw buffer holds {actual} bytes, expected {expected} for a 3-channel image")]
    BufferSize { expected: usize, actual: usize },
    #[error("Invalid data URL: {0}")]
    DataUrl(String),
}

/// Order of the three samples in each pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChannelOrder {
    #[default]
    #[serde(rename = "RGB", alias = "rgb")]
    Rgb,
    #[serde(rename = "BGR", alias = "bgr")]
    Bgr,
}

impl fmt::Display for ChannelOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelOrder::Rgb => write!(f, "RGB"),
            ChannelOrder::Bgr => write!(f, "BGR"),
        }
    }
}

/// A decoded 3-channel raster together with the order its samples are stored in.
///
/// The raster is always an `RgbImage` buffer; for `ChannelOrder::Bgr` images the
/// first sample of each pixel is blue.
#[derive(Debug, Clone)]
pub struct Image {
    raster: RgbImage,
    order: ChannelOrder,
}

impl Image {
    pub fn new(raster: RgbImage, order: ChannelOrder) -> Self {
        Self { raster, order }
    }

    pub fn from_rgb(raster: RgbImage) -> Self {
        Self::new(raster, ChannelOrder::Rgb)
    }

    /// Wrap an interleaved 8-bit buffer as produced by a capture device
    pub fn from_raw(
        width: u32,
        height: u32,
        data: Vec<u8>,
        order: ChannelOrder,
    ) -> Result<Self, ImageError> {
        let expected = width as usize * height as usize * 3;
        let actual = data.len();
        if actual != expected {
            return Err(ImageError::BufferSize { expected, actual });
        }

        let raster = RgbImage::from_raw(width, height, data)
            .ok_or(ImageError::BufferSize { expected, actual })?;
        Ok(Self::new(raster, order))
    }

    /// Decode an encoded image (JPEG, PNG, ...) from memory
    pub fn decode(bytes: &[u8]) -> Result<Self, ImageError> {
        let decoded =
            image::load_from_memory(bytes).map_err(|e| ImageError::Decode(e.to_string()))?;
        let image = Self::from_rgb(decoded.to_rgb8());
        if image.is_empty() {
            return Err(ImageError::Empty);
        }
        Ok(image)
    }

    /// Load and decode an image file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ImageError> {
        let bytes = std::fs::read(path.as_ref())?;
        Self::decode(&bytes)
    }

    /// Decode a `data:<mime>;base64,<payload>` URL as posted by browser front ends.
    /// A bare base64 payload without the `data:` prefix is accepted too.
    pub fn from_data_url(url: &str) -> Result<Self, ImageError> {
        let payload = match url.strip_prefix("data:") {
            Some(rest) => {
                let (header, payload) = rest
                    .split_once(',')
                    .ok_or_else(|| ImageError::DataUrl("missing ',' separator".to_string()))?;
                if !header.ends_with(";base64") {
                    return Err(ImageError::DataUrl(format!(
                        "unsupported encoding in header '{}'",
                        header
                    )));
                }
                payload
            }
            None => url,
        };

        let bytes = BASE64
            .decode(payload.trim())
            .map_err(|e| ImageError::DataUrl(e.to_string()))?;
        Self::decode(&bytes)
    }

    pub fn width(&self) -> u32 {
        self.raster.width()
    }

    pub fn height(&self) -> u32 {
        self.raster.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.raster.dimensions()
    }

    pub fn order(&self) -> ChannelOrder {
        self.order
    }

    pub fn raster(&self) -> &RgbImage {
        &self.raster
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Return a copy with samples rearranged into `order`
    pub fn to_order(&self, order: ChannelOrder) -> Image {
        if order == self.order {
            return self.clone();
        }

        let mut raster = self.raster.clone();
        for pixel in raster.pixels_mut() {
            pixel.0.swap(0, 2);
        }
        Image::new(raster, order)
    }

    /// Copy out the pixels covered by `region`. Callers must check bounds first.
    pub(crate) fn crop(&self, region: &FaceRegion) -> Image {
        let raster =
            image::imageops::crop_imm(&self.raster, region.x, region.y, region.width, region.height)
                .to_image();
        Image::new(raster, self.order)
    }
}

/// Axis-aligned rectangle in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// True when the region is non-empty and lies entirely inside a
    /// `width` x `height` image
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        let right = self.x.checked_add(self.width);
        let bottom = self.y.checked_add(self.height);
        match (right, bottom) {
            (Some(right), Some(bottom)) => {
                self.width > 0 && self.height > 0 && right <= width && bottom <= height
            }
            _ => false,
        }
    }
}

impl fmt::Display for FaceRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}x{})",
            self.x, self.y, self.width, self.height
        )
    }
}

impl FromStr for FaceRegion {
    type Err = String;

    /// Parse `x,y,w,h`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("invalid region '{}': {}", s, e))?;

        match parts.as_slice() {
            [x, y, w, h] => Ok(FaceRegion::new(*x, *y, *w, *h)),
            _ => Err(format!("invalid region '{}': expected x,y,w,h", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::io::Cursor;

    fn encode_png(raster: &RgbImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        raster
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_decode_png() {
        let raster = RgbImage::from_pixel(4, 3, Rgb([10, 20, 30]));
        let image = Image::decode(&encode_png(&raster)).unwrap();
        assert_eq!(image.dimensions(), (4, 3));
        assert_eq!(image.order(), ChannelOrder::Rgb);
        assert_eq!(image.raster().get_pixel(0, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(matches!(
            Image::decode(b"definitely not an image"),
            Err(ImageError::Decode(_))
        ));
        assert!(Image::decode(&[]).is_err());
    }

    #[test]
    fn test_data_url() {
        let raster = RgbImage::from_pixel(2, 2, Rgb([200, 100, 50]));
        let url = format!("data:image/png;base64,{}", BASE64.encode(encode_png(&raster)));
        let image = Image::from_data_url(&url).unwrap();
        assert_eq!(image.dimensions(), (2, 2));

        assert!(matches!(
            Image::from_data_url("data:image/png;base64"),
            Err(ImageError::DataUrl(_))
        ));
        assert!(matches!(
            Image::from_data_url("data:image/png;base64,!!!"),
            Err(ImageError::DataUrl(_))
        ));
    }

    #[test]
    fn test_from_raw_checks_length() {
        assert!(Image::from_raw(2, 2, vec![0; 12], ChannelOrder::Bgr).is_ok());
        assert!(matches!(
            Image::from_raw(2, 2, vec![0; 11], ChannelOrder::Bgr),
            Err(ImageError::BufferSize { expected: 12, actual: 11 })
        ));
    }

    #[test]
    fn test_to_order_swaps_red_and_blue() {
        let image = Image::from_raw(1, 1, vec![1, 2, 3], ChannelOrder::Bgr).unwrap();
        let rgb = image.to_order(ChannelOrder::Rgb);
        assert_eq!(rgb.order(), ChannelOrder::Rgb);
        assert_eq!(rgb.raster().get_pixel(0, 0), &Rgb([3, 2, 1]));

        let same = image.to_order(ChannelOrder::Bgr);
        assert_eq!(same.raster().get_pixel(0, 0), &Rgb([1, 2, 3]));
    }

    #[test]
    fn test_region_bounds() {
        assert!(FaceRegion::new(0, 0, 10, 10).fits_within(10, 10));
        assert!(FaceRegion::new(5, 5, 5, 5).fits_within(10, 10));
        assert!(!FaceRegion::new(5, 5, 6, 5).fits_within(10, 10));
        assert!(!FaceRegion::new(0, 0, 0, 5).fits_within(10, 10));
        assert!(!FaceRegion::new(u32::MAX, 0, 2, 2).fits_within(10, 10));
    }

    #[test]
    fn test_region_parse() {
        let region: FaceRegion = "1, 2,30,40".parse().unwrap();
        assert_eq!(region, FaceRegion::new(1, 2, 30, 40));
        assert!("1,2,3".parse::<FaceRegion>().is_err());
        assert!("a,b,c,d".parse::<FaceRegion>().is_err());
    }

    #[test]
    fn test_crop() {
        let mut raster = RgbImage::new(4, 4);
        raster.put_pixel(2, 1, Rgb([9, 9, 9]));
        let image = Image::from_rgb(raster);
        let cropped = image.crop(&FaceRegion::new(2, 1, 2, 3));
        assert_eq!(cropped.dimensions(), (2, 3));
        assert_eq!(cropped.raster().get_pixel(0, 0), &Rgb([9, 9, 9]));
    }
}
