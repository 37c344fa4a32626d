//! Music genre recognition from mel spectrogram images.
//!
//! Audio is rendered to a spectrogram picture, a small convolutional network is
//! trained on a `root/<genre>/*.png` tree of such pictures, and the trained
//! weights plus their label mapping are persisted for later prediction.

pub mod config;
pub mod dataset;
pub mod error;
pub mod inference;
pub mod labels;
pub mod load_and_show;
pub mod models;
pub mod network;
pub mod persistence;
pub mod process;
pub mod report;
pub mod spectrogram;
pub mod types;

pub use config::{load_config, validate_config, GenreConfig, ImageSize};
pub use error::{GenreError, Result};
pub use inference::{Prediction, Predictor};
pub use labels::LabelEncoder;
pub use models::{train_model, TrainingHistory, TrainingOutcome};
pub use report::ClassificationReport;
