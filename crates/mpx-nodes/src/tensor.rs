//! Host image tensors
//!
//! The host hands images over as `height × width × channels` arrays of
//! `f32` in `[0, 1]`. Backend calls need PNG bytes, so this module converts
//! between the two through the `image` crate.

use image::{DynamicImage, ImageFormat, RgbImage, RgbaImage};
use mpx_core::{InputHash, MpxError, Result};
use std::io::Cursor;
use std::path::Path;

/// An image in host layout
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    width: u32,
    height: u32,
    channels: u8,
    data: Vec<f32>,
}

impl ImageTensor {
    /// Wrap raw HWC data. Channels must be 1, 3 or 4.
    pub fn new(width: u32, height: u32, channels: u8, data: Vec<f32>) -> Result<Self> {
        if !matches!(channels, 1 | 3 | 4) {
            return Err(MpxError::validation(format!(
                "unsupported channel count: {}",
                channels
            )));
        }
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(MpxError::validation(format!(
                "tensor of {}x{}x{} needs {} values, got {}",
                height,
                width,
                channels,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// A tensor filled with one RGB colour
    pub fn solid(width: u32, height: u32, rgb: [f32; 3]) -> Self {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self {
            width,
            height,
            channels: 3,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// `(height, width, channels)`
    pub fn shape(&self) -> (u32, u32, u8) {
        (self.height, self.width, self.channels)
    }

    pub fn from_dynamic(img: &DynamicImage) -> Self {
        let (channels, raw) = if img.color().has_alpha() {
            (4, img.to_rgba8().into_raw())
        } else {
            (3, img.to_rgb8().into_raw())
        };
        Self {
            width: img.width(),
            height: img.height(),
            channels,
            data: raw.into_iter().map(|v| v as f32 / 255.0).collect(),
        }
    }

    /// Convert to 8-bit, clamping values outside `[0, 1]`
    pub fn to_dynamic(&self) -> Result<DynamicImage> {
        let bytes: Vec<u8> = self
            .data
            .iter()
            .map(|v| (v * 255.0).clamp(0.0, 255.0) as u8)
            .collect();
        let built = match self.channels {
            1 => image::GrayImage::from_raw(self.width, self.height, bytes)
                .map(DynamicImage::ImageLuma8),
            3 => RgbImage::from_raw(self.width, self.height, bytes).map(DynamicImage::ImageRgb8),
            _ => RgbaImage::from_raw(self.width, self.height, bytes).map(DynamicImage::ImageRgba8),
        };
        built.ok_or_else(|| MpxError::ImageError("tensor does not fit its dimensions".to_string()))
    }

    pub fn from_png_bytes(bytes: &[u8]) -> Result<Self> {
        let img = image::load_from_memory(bytes).map_err(|e| MpxError::ImageError(e.to_string()))?;
        Ok(Self::from_dynamic(&img))
    }

    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        self.to_dynamic()?
            .write_to(&mut out, ImageFormat::Png)
            .map_err(|e| MpxError::ImageError(e.to_string()))?;
        Ok(out.into_inner())
    }

    /// Decode an image file from disk
    pub fn load(path: &Path) -> Result<Self> {
        let img = image::open(path)
            .map_err(|e| MpxError::ImageError(format!("{}: {}", path.display(), e)))?;
        Ok(Self::from_dynamic(&img))
    }

    pub fn save_png(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_png_bytes()?)?;
        Ok(())
    }

    /// Digest of shape and pixel values, used as part of memo keys
    pub fn content_hash(&self) -> InputHash {
        let mut bytes = Vec::with_capacity(9 + self.data.len() * 4);
        bytes.extend_from_slice(&self.width.to_le_bytes());
        bytes.extend_from_slice(&self.height.to_le_bytes());
        bytes.push(self.channels);
        for v in &self.data {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        InputHash::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_wrong_length() {
        let err = ImageTensor::new(2, 2, 3, vec![0.0; 11]).unwrap_err();
        assert!(matches!(err, MpxError::ValidationError(_)));
        assert!(ImageTensor::new(1, 1, 2, vec![0.0; 2]).is_err());
    }

    #[test]
    fn test_png_round_trip_keeps_shape() {
        let tensor = ImageTensor::solid(4, 3, [1.0, 0.0, 0.5]);
        let back = ImageTensor::from_png_bytes(&tensor.to_png_bytes().unwrap()).unwrap();
        assert_eq!(back.shape(), (3, 4, 3));
        assert_eq!(back.data()[0], 1.0);
        assert_eq!(back.data()[1], 0.0);
    }

    #[test]
    fn test_out_of_range_values_clamp() {
        let tensor = ImageTensor::new(1, 1, 3, vec![-0.5, 2.0, 0.5]).unwrap();
        let rgb = tensor.to_dynamic().unwrap().to_rgb8();
        assert_eq!(rgb.get_pixel(0, 0).0, [0, 255, 127]);
    }

    #[test]
    fn test_content_hash_tracks_pixels() {
        let a = ImageTensor::solid(2, 2, [0.1, 0.2, 0.3]);
        let b = ImageTensor::solid(2, 2, [0.1, 0.2, 0.4]);
        assert_eq!(a.content_hash(), a.clone().content_hash());
        assert_ne!(a.content_hash(), b.content_hash());
    }
}
