//! Configuration for the genre classifier.
//!
//! One `GenreConfig` value is built at start-up and handed by reference to every
//! component, so tests can shrink the label set and image size freely.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::{GenreError, Result};
use crate::network;

pub const DEFAULT_GENRES: [&str; 10] = [
    "blues", "classical", "country", "disco", "hiphop", "jazz", "metal", "pop", "reggae", "rock",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn square(side: u32) -> Self {
        Self {
            width: side,
            height: side,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrogramConfig {
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    /// Dynamic range kept below the peak, in dB.
    pub top_db: f64,
}

impl Default for SpectrogramConfig {
    fn default() -> Self {
        Self {
            n_fft: 2048,
            hop_length: 512,
            n_mels: 128,
            top_db: 80.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenreConfig {
    /// Closed, ordered set of genres the loader looks for.
    pub genres: Vec<String>,
    pub image_size: ImageSize,
    pub artifact_dir: PathBuf,
    /// Stem of the weights file; the recorder adds its own extension.
    pub model_file: String,
    pub labels_file: String,
    pub epochs: usize,
    pub batch_size: usize,
    pub test_fraction: f64,
    pub validation_fraction: f64,
    pub seed: u64,
    pub learning_rate: f64,
    /// Fraction of activations kept by the dropout step while training.
    pub dropout_keep: f64,
    pub spectrogram: SpectrogramConfig,
}

impl Default for GenreConfig {
    fn default() -> Self {
        Self {
            genres: DEFAULT_GENRES.iter().map(|g| g.to_string()).collect(),
            image_size: ImageSize::square(128),
            artifact_dir: PathBuf::from("artifacts"),
            model_file: "genre_model".into(),
            labels_file: "genre_labels.json".into(),
            epochs: 30,
            batch_size: 32,
            test_fraction: 0.2,
            validation_fraction: 0.1,
            seed: 42,
            learning_rate: 1e-3,
            dropout_keep: 0.7,
            spectrogram: SpectrogramConfig::default(),
        }
    }
}

impl GenreConfig {
    /// Path handed to the recorder (without the `.mpk` extension).
    pub fn model_path(&self) -> PathBuf {
        self.artifact_dir.join(&self.model_file)
    }

    pub fn labels_path(&self) -> PathBuf {
        self.artifact_dir.join(&self.labels_file)
    }
}

pub fn validate_config(config: &GenreConfig) -> Result<()> {
    if config.genres.is_empty() {
        return Err(GenreError::Configuration("genre list is empty".into()));
    }

    let mut seen = HashSet::new();
    for genre in &config.genres {
        if genre.trim().is_empty() {
            return Err(GenreError::Configuration("genre names must not be blank".into()));
        }
        if !seen.insert(genre.as_str()) {
            return Err(GenreError::Configuration(format!("duplicate genre `{genre}`")));
        }
    }

    for (name, value) in [
        ("test_fraction", config.test_fraction),
        ("validation_fraction", config.validation_fraction),
        ("dropout_keep", config.dropout_keep),
    ] {
        if !(value > 0.0 && value < 1.0) {
            return Err(GenreError::Configuration(format!(
                "{name} must lie in (0, 1), got {value}"
            )));
        }
    }

    if config.epochs == 0 || config.batch_size == 0 {
        return Err(GenreError::Configuration(
            "epochs and batch_size must be positive".into(),
        ));
    }

    if config.learning_rate <= 0.0 {
        return Err(GenreError::Configuration("learning_rate must be positive".into()));
    }

    let spec = &config.spectrogram;
    if spec.n_fft < 2 || spec.hop_length == 0 || spec.n_mels == 0 || spec.top_db <= 0.0 {
        return Err(GenreError::Configuration(
            "spectrogram parameters must be positive (n_fft >= 2)".into(),
        ));
    }

    // The classifier must still have at least one pixel after every conv/pool stage.
    let layers = network::architecture(config.genres.len(), config.dropout_keep);
    network::flattened_width(&layers, config.image_size)?;

    Ok(())
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<GenreConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        GenreError::Configuration(format!("cannot read config {}: {e}", path.display()))
    })?;
    let config: GenreConfig = serde_json::from_str(&content)
        .map_err(|e| GenreError::Configuration(format!("{}: {e}", path.display())))?;
    validate_config(&config)?;
    Ok(config)
}
