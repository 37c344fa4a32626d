use std::{f32::consts::PI, fs, path::Path};

use image::{Rgb, RgbImage};
use recognising_genres::{
    inference, persistence, spectrogram, train_model, GenreConfig, GenreError, ImageSize,
    Predictor,
};

/// Flat image with a little per-pixel jitter so samples of one genre differ.
fn write_flat_image(path: &Path, value: u8, jitter: u8) {
    let img = RgbImage::from_fn(32, 32, |x, y| {
        let offset = ((x * 7 + y * 13) % (jitter as u32 + 1)) as u8;
        let v = if value > 127 {
            value - offset
        } else {
            value + offset
        };
        Rgb([v, v, v])
    });
    img.save(path).expect("Failed to write test image");
}

fn small_config(dir: &Path, genres: &[&str]) -> GenreConfig {
    GenreConfig {
        genres: genres.iter().map(|g| g.to_string()).collect(),
        image_size: ImageSize::square(32),
        artifact_dir: dir.join("artifacts"),
        batch_size: 4,
        learning_rate: 2e-3,
        ..GenreConfig::default()
    }
}

#[test]
fn test_train_then_predict_separable_genres() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data");
    for (genre, value) in [("classical", 10u8), ("metal", 245u8)] {
        fs::create_dir_all(data.join(genre)).unwrap();
        for i in 0..5 {
            write_flat_image(&data.join(genre).join(format!("{genre}{i}.png")), value, i);
        }
    }

    let config = GenreConfig {
        epochs: 40,
        ..small_config(dir.path(), &["classical", "metal"])
    };

    let outcome = train_model(&data, &config).expect("Training failed");
    assert_eq!(outcome.history.epochs.len(), 40);
    assert_eq!(outcome.encoder.classes(), ["classical", "metal"]);
    assert_eq!(outcome.report.total, 2);

    assert!(persistence::model_file(&config).is_file());
    assert!(config.labels_path().is_file());

    let p = inference::predict(&data.join("metal").join("metal0.png"), &config).unwrap();
    assert_eq!(p.genre, "metal");
    let p = inference::predict(&data.join("classical").join("classical3.png"), &config).unwrap();
    assert_eq!(p.genre, "classical");
}

#[test]
fn test_missing_genre_folders_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data");
    let all = [
        "blues", "classical", "country", "disco", "hiphop", "jazz", "metal", "pop", "reggae",
        "rock",
    ];
    // no folders for disco, pop or reggae
    let present = ["blues", "classical", "country", "hiphop", "jazz", "metal", "rock"];
    for (k, genre) in present.iter().enumerate() {
        fs::create_dir_all(data.join(genre)).unwrap();
        for i in 0..3 {
            write_flat_image(
                &data.join(genre).join(format!("{i}.png")),
                (k * 30) as u8,
                i,
            );
        }
    }
    // an unreadable file is skipped as well
    fs::write(data.join("rock").join("broken.png"), b"not a png").unwrap();

    let config = GenreConfig {
        epochs: 1,
        ..small_config(dir.path(), &all)
    };
    let outcome = train_model(&data, &config).expect("Training failed");

    assert_eq!(outcome.encoder.len(), 7);
    assert_eq!(outcome.encoder.classes(), present);
    let stored = persistence::load_labels(&config).unwrap();
    assert_eq!(stored.classes(), present);
}

#[test]
fn test_predict_before_training_reports_missing_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("x.png");
    write_flat_image(&image, 100, 0);

    let config = small_config(dir.path(), &["blues", "rock"]);
    match inference::predict(&image, &config) {
        Err(GenreError::ArtifactMissing { path }) => {
            assert_eq!(path, persistence::model_file(&config))
        }
        other => panic!("expected ArtifactMissing, got {other:?}"),
    }
}

#[test]
fn test_empty_dataset_is_missing_data() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_config(dir.path(), &["blues", "rock"]);

    let absent = train_model(&dir.path().join("nowhere"), &config);
    assert!(matches!(absent, Err(GenreError::MissingData(_))));

    fs::create_dir_all(dir.path().join("data").join("blues")).unwrap();
    let empty = train_model(&dir.path().join("data"), &config);
    assert!(matches!(empty, Err(GenreError::MissingData(_))));
}

#[test]
fn test_audio_prediction_through_spectrogram() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data");
    let sample_rate = 22_050;

    // low hum vs. high whistle, rendered through the real converter
    for (genre, freq) in [("blues", 110.0f32), ("pop", 3_520.0f32)] {
        fs::create_dir_all(data.join(genre)).unwrap();
        for i in 0..4 {
            let wav = dir.path().join(format!("{genre}{i}.wav"));
            let spec = hound::WavSpec {
                channels: 1,
                sample_rate,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };
            let mut writer = hound::WavWriter::create(&wav, spec).unwrap();
            let f = freq * (1.0 + i as f32 * 0.05);
            for n in 0..sample_rate / 2 {
                let s = (2.0 * PI * f * n as f32 / sample_rate as f32).sin();
                writer.write_sample((s * 0.5 * i16::MAX as f32) as i16).unwrap();
            }
            writer.finalize().unwrap();

            let config = small_config(dir.path(), &["blues", "pop"]);
            spectrogram::convert(&wav, &data.join(genre).join(format!("{i}.png")), &config)
                .unwrap();
        }
    }

    let config = GenreConfig {
        epochs: 40,
        ..small_config(dir.path(), &["blues", "pop"])
    };
    train_model(&data, &config).unwrap();

    let predictor = Predictor::load(&config).unwrap();
    let p = predictor.predict_audio(&dir.path().join("pop0.wav")).unwrap();
    assert_eq!(p.genre, "pop");
    assert_eq!(p.probabilities.len(), 2);
    let p = predictor.predict_audio(&dir.path().join("blues0.wav")).unwrap();
    assert_eq!(p.genre, "blues");
}
