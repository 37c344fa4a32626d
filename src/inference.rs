//! Classify single images or audio clips with a previously trained artifact.

use std::path::Path;

use burn::tensor::{Tensor, TensorData};
use log::{debug, info};
use serde::Serialize;

use crate::config::GenreConfig;
use crate::error::{GenreError, Result};
use crate::labels::LabelEncoder;
use crate::load_and_show::load_image;
use crate::models::InferenceBackend;
use crate::network::GenreCnn;
use crate::persistence;
use crate::spectrogram;

#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub genre: String,
    pub confidence: f32,
    /// `(genre, probability)` for every known genre, most likely first.
    pub probabilities: Vec<(String, f32)>,
}

/// Loaded classifier plus the mapping that names its outputs.
pub struct Predictor {
    model: GenreCnn<InferenceBackend>,
    encoder: LabelEncoder,
    config: GenreConfig,
}

impl Predictor {
    pub fn load(config: &GenreConfig) -> Result<Self> {
        let device = Default::default();
        let (model, encoder) = persistence::load::<InferenceBackend>(config, &device)?;
        info!(
            "Loaded model from {} ({} genres)",
            persistence::model_file(config).display(),
            encoder.len()
        );
        Ok(Self {
            model,
            encoder,
            config: config.clone(),
        })
    }

    pub fn from_parts(
        model: GenreCnn<InferenceBackend>,
        encoder: LabelEncoder,
        config: &GenreConfig,
    ) -> Self {
        Self {
            model,
            encoder,
            config: config.clone(),
        }
    }

    pub fn genres(&self) -> &[String] {
        self.encoder.classes()
    }

    /// Predict the genre of a spectrogram image.
    pub fn predict(&self, image_path: &Path) -> Result<Prediction> {
        let size = self.config.image_size;
        let image = load_image(image_path, size)?;
        let pixels = image.to_scaled_chw();

        let device = Default::default();
        let input: Tensor<InferenceBackend, 4> = Tensor::from_data(
            TensorData::new(pixels, [1, 3, size.height as usize, size.width as usize]),
            &device,
        );
        let probs: Vec<f32> = self.model.forward_probs(input).into_data().iter().collect();

        let (best, &confidence) = probs
            .iter()
            .enumerate()
            .rev()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .ok_or_else(|| GenreError::Model("classifier produced no outputs".into()))?;
        let genre = self.encoder.decode(best)?.to_string();

        let mut probabilities = self
            .encoder
            .classes()
            .iter()
            .cloned()
            .zip(probs.iter().copied())
            .collect::<Vec<_>>();
        probabilities.sort_by(|a, b| b.1.total_cmp(&a.1));

        debug!("{}: {:?}", image_path.display(), probabilities);
        Ok(Prediction {
            genre,
            confidence,
            probabilities,
        })
    }

    /// Convert a WAV file to a temporary spectrogram and classify it.
    pub fn predict_audio(&self, audio_path: &Path) -> Result<Prediction> {
        self.predict_audio_in(audio_path, &std::env::temp_dir())
    }

    /// Like [`Predictor::predict_audio`], with the temporary image created in `scratch_dir`.
    ///
    /// The image is removed whether or not prediction succeeds.
    pub fn predict_audio_in(&self, audio_path: &Path, scratch_dir: &Path) -> Result<Prediction> {
        let image = tempfile::Builder::new()
            .prefix("genre-")
            .suffix(".png")
            .tempfile_in(scratch_dir)?;
        spectrogram::convert(audio_path, image.path(), &self.config)?;
        self.predict(image.path())
    }
}

/// Load the artifact and classify one image.
pub fn predict(image_path: &Path, config: &GenreConfig) -> Result<Prediction> {
    Predictor::load(config)?.predict(image_path)
}

/// Load the artifact and classify one WAV file.
pub fn predict_audio(audio_path: &Path, config: &GenreConfig) -> Result<Prediction> {
    Predictor::load(config)?.predict_audio(audio_path)
}
