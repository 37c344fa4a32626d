use std::path::PathBuf;

use image::RgbImage;
use ndarray::Array3;

use crate::config::ImageSize;

/// Mono waveform at its native sample rate, samples in [-1, 1].
#[derive(Clone, Debug)]
pub struct AudioSignal {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Fixed-size RGB image, pixels laid out as (height, width, channel).
#[derive(Clone, Debug, PartialEq)]
pub struct SpectrogramImage {
    pixels: Array3<u8>,
}

impl SpectrogramImage {
    pub const CHANNELS: usize = 3;

    pub fn from_rgb(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        let pixels = Array3::from_shape_fn(
            (height as usize, width as usize, Self::CHANNELS),
            |(y, x, c)| image.get_pixel(x as u32, y as u32)[c],
        );
        Self { pixels }
    }

    pub fn pixels(&self) -> &Array3<u8> {
        &self.pixels
    }

    pub fn size(&self) -> ImageSize {
        let (height, width, _) = self.pixels.dim();
        ImageSize {
            width: width as u32,
            height: height as u32,
        }
    }

    pub fn channels(&self) -> usize {
        self.pixels.dim().2
    }

    /// Intensities divided by 255 and reordered channel-first, ready for the classifier.
    pub fn to_scaled_chw(&self) -> Vec<f32> {
        self.pixels
            .view()
            .permuted_axes([2, 0, 1])
            .iter()
            .map(|&p| p as f32 / u8::MAX as f32)
            .collect()
    }
}

/// One image paired with its genre name.
#[derive(Clone, Debug)]
pub struct Sample {
    pub image: SpectrogramImage,
    pub genre: String,
    pub path: PathBuf,
}
