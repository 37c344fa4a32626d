//! Trained model artifact: weights and label mapping, always handled as a pair.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use burn::{
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::backend::Backend,
};
use log::{info, warn};
use tempfile::TempDir;

use crate::config::{validate_config, GenreConfig};
use crate::error::{GenreError, Result};
use crate::labels::LabelEncoder;
use crate::network::{self, GenreCnn, GenreCnnRecord};

/// Extension the recorder gives the weights file.
pub const MODEL_EXTENSION: &str = "mpk";

fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}

/// Weights file as it appears on disk.
pub fn model_file(config: &GenreConfig) -> PathBuf {
    config.model_path().with_extension(MODEL_EXTENSION)
}

/// Write weights and mapping together, replacing any previous artifact.
///
/// Both files are written into a staging directory next to their final
/// location and then moved into place by [`install`].
pub fn save<B: Backend>(
    model: &GenreCnn<B>,
    encoder: &LabelEncoder,
    config: &GenreConfig,
) -> Result<()> {
    if model.num_classes() != encoder.len() {
        return Err(GenreError::ArtifactMismatch(format!(
            "refusing to save a classifier with {} outputs next to {} genres",
            model.num_classes(),
            encoder.len()
        )));
    }

    let staging = stage(model, encoder, config)?;
    install(staging.path(), config, |from, to| fs::rename(from, to))?;

    info!(
        "Saved model to {} and {} genres to {}",
        model_file(config).display(),
        encoder.len(),
        config.labels_path().display()
    );
    Ok(())
}

fn stage<B: Backend>(
    model: &GenreCnn<B>,
    encoder: &LabelEncoder,
    config: &GenreConfig,
) -> Result<TempDir> {
    fs::create_dir_all(&config.artifact_dir)?;
    let staging = tempfile::Builder::new()
        .prefix(".staging")
        .tempdir_in(&config.artifact_dir)?;

    model
        .clone()
        .save_file(staging.path().join(&config.model_file), &recorder())?;
    fs::write(
        staging.path().join(&config.labels_file),
        serde_json::to_string_pretty(encoder)?,
    )?;
    Ok(staging)
}

/// Move a staged pair from `staging` into the artifact directory.
///
/// The previous mapping is moved aside before the weights are replaced and
/// only put back if the weights never moved. An interrupted or failed swap
/// therefore leaves either the old pair or weights without a mapping, which
/// loads as `ArtifactMissing`; new weights never sit next to old labels.
fn install(
    staging: &Path,
    config: &GenreConfig,
    rename: impl Fn(&Path, &Path) -> io::Result<()>,
) -> Result<()> {
    let staged_model = staging
        .join(&config.model_file)
        .with_extension(MODEL_EXTENSION);
    let staged_labels = staging.join(&config.labels_file);
    let labels = config.labels_path();
    let previous_labels = staging.join(".previous-labels");

    let had_previous = labels.is_file();
    if had_previous {
        rename(&labels, &previous_labels)?;
    }

    if let Err(e) = rename(&staged_model, &model_file(config)) {
        if had_previous {
            if let Err(restore) = rename(&previous_labels, &labels) {
                warn!("Could not restore {}: {restore}", labels.display());
            }
        }
        return Err(e.into());
    }

    rename(&staged_labels, &labels)?;
    Ok(())
}

/// Load the label mapping on its own (it is small and needed for reporting).
pub fn load_labels(config: &GenreConfig) -> Result<LabelEncoder> {
    let path = config.labels_path();
    if !path.is_file() {
        return Err(GenreError::ArtifactMissing { path });
    }
    let classes: Vec<String> = serde_json::from_str(&fs::read_to_string(&path)?)?;
    LabelEncoder::from_classes(classes)
}

/// Load weights and mapping; either one missing is `ArtifactMissing`.
pub fn load<B: Backend>(
    config: &GenreConfig,
    device: &B::Device,
) -> Result<(GenreCnn<B>, LabelEncoder)> {
    validate_config(config)?;

    let weights = model_file(config);
    if !weights.is_file() {
        return Err(GenreError::ArtifactMissing { path: weights });
    }
    let encoder = load_labels(config)?;

    let record: GenreCnnRecord<B> = recorder().load(config.model_path(), device)?;

    if record.num_classes() != encoder.len() {
        return Err(GenreError::ArtifactMismatch(format!(
            "classifier has {} outputs but the label mapping lists {} genres",
            record.num_classes(),
            encoder.len()
        )));
    }

    let expected = network::flattened_width(
        &network::architecture(encoder.len(), config.dropout_keep),
        config.image_size,
    )?;
    if record.feature_width() != expected {
        return Err(GenreError::ArtifactMismatch(format!(
            "weights expect {} features but image size {}x{} yields {expected}",
            record.feature_width(),
            config.image_size.width,
            config.image_size.height
        )));
    }

    let model = GenreCnn::<B>::new(encoder.len(), config, device)?.load_record(record);
    Ok((model, encoder))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImageSize;
    use burn::backend::NdArray;
    use burn::tensor::{Tensor, TensorData};

    type TestBackend = NdArray;

    fn config(dir: &std::path::Path) -> GenreConfig {
        GenreConfig {
            image_size: ImageSize::square(32),
            artifact_dir: dir.join("artifact"),
            ..GenreConfig::default()
        }
    }

    fn sample(device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 4> {
        let values: Vec<f32> = (0..3 * 32 * 32).map(|i| (i % 17) as f32 / 17.0).collect();
        Tensor::from_data(TensorData::new(values, [1, 3, 32, 32]), device)
    }

    #[test]
    fn round_trip_gives_identical_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let device = Default::default();

        let encoder = LabelEncoder::fit(&["jazz", "metal", "pop"]);
        let model = GenreCnn::<TestBackend>::new(encoder.len(), &config, &device).unwrap();
        save(&model, &encoder, &config).unwrap();

        let (loaded, loaded_encoder) = load::<TestBackend>(&config, &device).unwrap();
        assert_eq!(loaded_encoder, encoder);

        let before: Vec<f32> = model.forward_probs(sample(&device)).into_data().iter().collect();
        let after: Vec<f32> = loaded.forward_probs(sample(&device)).into_data().iter().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn nothing_saved_is_artifact_missing() {
        let dir = tempfile::tempdir().unwrap();
        let result = load::<TestBackend>(&config(dir.path()), &Default::default());
        assert!(matches!(result, Err(GenreError::ArtifactMissing { .. })));
    }

    #[test]
    fn weights_without_labels_is_artifact_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let device = Default::default();
        let encoder = LabelEncoder::fit(&["a", "b"]);
        let model = GenreCnn::<TestBackend>::new(2, &config, &device).unwrap();
        save(&model, &encoder, &config).unwrap();

        fs::remove_file(config.labels_path()).unwrap();
        let result = load::<TestBackend>(&config, &device);
        match result {
            Err(GenreError::ArtifactMissing { path }) => assert_eq!(path, config.labels_path()),
            other => panic!("expected ArtifactMissing, got {other:?}"),
        }
    }

    #[test]
    fn mapping_of_wrong_size_is_a_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let device = Default::default();
        let model = GenreCnn::<TestBackend>::new(3, &config, &device).unwrap();
        save(&model, &LabelEncoder::fit(&["a", "b", "c"]), &config).unwrap();

        fs::write(config.labels_path(), r#"["a", "b"]"#).unwrap();
        let result = load::<TestBackend>(&config, &device);
        assert!(matches!(result, Err(GenreError::ArtifactMismatch(_))));
    }

    #[test]
    fn changed_image_size_is_a_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let device = Default::default();
        let model = GenreCnn::<TestBackend>::new(2, &config, &device).unwrap();
        save(&model, &LabelEncoder::fit(&["a", "b"]), &config).unwrap();

        let bigger = GenreConfig {
            image_size: ImageSize::square(64),
            ..config
        };
        let result = load::<TestBackend>(&bigger, &device);
        assert!(matches!(result, Err(GenreError::ArtifactMismatch(_))));
    }

    #[test]
    fn saving_mismatched_pair_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let model = GenreCnn::<TestBackend>::new(2, &config, &Default::default()).unwrap();
        let result = save(&model, &LabelEncoder::fit(&["a", "b", "c"]), &config);
        assert!(matches!(result, Err(GenreError::ArtifactMismatch(_))));
        assert!(!model_file(&config).exists());
    }

    #[test]
    fn staging_directory_is_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let model = GenreCnn::<TestBackend>::new(2, &config, &Default::default()).unwrap();
        save(&model, &LabelEncoder::fit(&["a", "b"]), &config).unwrap();

        let mut entries: Vec<String> = fs::read_dir(&config.artifact_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        entries.sort();
        assert_eq!(entries, vec!["genre_labels.json", "genre_model.mpk"]);
    }

    fn failing_rename(target: PathBuf) -> impl Fn(&Path, &Path) -> io::Result<()> {
        move |from, to| {
            if to == target {
                Err(io::Error::other("disk full"))
            } else {
                fs::rename(from, to)
            }
        }
    }

    #[test]
    fn failed_label_swap_never_pairs_new_weights_with_old_labels() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let device = Default::default();
        let old = GenreCnn::<TestBackend>::new(2, &config, &device).unwrap();
        save(&old, &LabelEncoder::fit(&["a", "b"]), &config).unwrap();

        // same number of genres, so only the names would give the mix-up away
        let new = GenreCnn::<TestBackend>::new(2, &config, &device).unwrap();
        let staging = stage(&new, &LabelEncoder::fit(&["c", "d"]), &config).unwrap();
        let result = install(staging.path(), &config, failing_rename(config.labels_path()));
        assert!(result.is_err());

        match load::<TestBackend>(&config, &device) {
            Err(GenreError::ArtifactMissing { path }) => assert_eq!(path, config.labels_path()),
            Ok((_, encoder)) => panic!("loaded a pair with genres {:?}", encoder.classes()),
            Err(e) => panic!("expected ArtifactMissing, got {e}"),
        }
    }

    #[test]
    fn failed_weight_swap_keeps_previous_pair() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let device = Default::default();
        let old = GenreCnn::<TestBackend>::new(2, &config, &device).unwrap();
        save(&old, &LabelEncoder::fit(&["a", "b"]), &config).unwrap();

        let new = GenreCnn::<TestBackend>::new(2, &config, &device).unwrap();
        let staging = stage(&new, &LabelEncoder::fit(&["c", "d"]), &config).unwrap();
        let result = install(staging.path(), &config, failing_rename(model_file(&config)));
        assert!(result.is_err());

        let (loaded, encoder) = load::<TestBackend>(&config, &device).unwrap();
        assert_eq!(encoder.classes(), ["a", "b"]);
        let before: Vec<f32> = old.forward_probs(sample(&device)).into_data().iter().collect();
        let after: Vec<f32> = loaded.forward_probs(sample(&device)).into_data().iter().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn invalid_config_is_rejected_before_building_the_model() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let device = Default::default();
        let model = GenreCnn::<TestBackend>::new(2, &config, &device).unwrap();
        save(&model, &LabelEncoder::fit(&["a", "b"]), &config).unwrap();

        let broken = GenreConfig {
            dropout_keep: 1.5,
            ..config
        };
        let result = load::<TestBackend>(&broken, &device);
        assert!(matches!(result, Err(GenreError::Configuration(_))));
    }
}
