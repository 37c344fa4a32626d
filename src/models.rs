use std::{collections::BTreeMap, path::Path, time::Instant};

use burn::{
    backend::{Autodiff, NdArray},
    module::{AutodiffModule, Module},
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{backend::Backend, ElementConversion, Tensor, TensorData},
};
use log::{debug, info, warn};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::Serialize;
use statrs::statistics::{Data, Distribution};

use crate::config::{validate_config, GenreConfig, ImageSize};
use crate::dataset::{self, Dataset};
use crate::error::{GenreError, Result};
use crate::labels::LabelEncoder;
use crate::network::{self, categorical_cross_entropy, GenreCnn};
use crate::persistence;
use crate::report::{report, ClassificationReport};

pub type TrainBackend = Autodiff<NdArray>;
pub type InferenceBackend = NdArray;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochMetrics {
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: Option<f64>,
    pub val_accuracy: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochMetrics>,
}

/// Indices into the dataset for each side of a split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StratifiedSplit {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Split sample indices so each class keeps its share in both halves.
///
/// Every class contributes `round(n * test_fraction)` samples to the test side,
/// but always leaves at least one for training.
pub fn stratified_split(labels: &[usize], test_fraction: f64, seed: u64) -> StratifiedSplit {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, &class) in labels.iter().enumerate() {
        by_class.entry(class).or_default().push(i);
    }

    let mut train = Vec::with_capacity(labels.len());
    let mut test = Vec::new();

    for (_, mut indices) in by_class {
        indices.shuffle(&mut rng);
        let n = indices.len();
        let n_test = ((n as f64 * test_fraction).round() as usize).min(n.saturating_sub(1));
        let (test_part, train_part) = indices.split_at(n_test);
        test.extend_from_slice(test_part);
        train.extend_from_slice(train_part);
    }

    train.shuffle(&mut rng);
    test.shuffle(&mut rng);

    StratifiedSplit { train, test }
}

/// Model inputs: pixel intensities scaled to [0, 1], channel-first, plus encoded labels.
pub struct PreparedData {
    pub inputs: Vec<Vec<f32>>,
    pub labels: Vec<usize>,
    pub encoder: LabelEncoder,
    pub image_size: ImageSize,
}

impl PreparedData {
    pub fn from_dataset(dataset: &Dataset, image_size: ImageSize) -> Result<Self> {
        let inputs: Vec<Vec<f32>> = dataset.images().map(|img| img.to_scaled_chw()).collect();
        let names = dataset.labels();
        let encoder = LabelEncoder::fit(&names);
        let labels = encoder.encode_all(&names)?;
        Ok(Self {
            inputs,
            labels,
            encoder,
            image_size,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.encoder.len()
    }

    /// Images `[n, 3, h, w]` and one-hot targets `[n, classes]` for `indices`.
    pub fn batch<B: Backend>(
        &self,
        indices: &[usize],
        device: &B::Device,
    ) -> (Tensor<B, 4>, Tensor<B, 2>) {
        let (h, w) = (
            self.image_size.height as usize,
            self.image_size.width as usize,
        );
        let k = self.num_classes();

        let mut pixels = Vec::with_capacity(indices.len() * 3 * h * w);
        let mut targets = Vec::with_capacity(indices.len() * k);
        for &i in indices {
            pixels.extend_from_slice(&self.inputs[i]);
            targets.extend(self.encoder.one_hot(self.labels[i]));
        }

        let images = Tensor::from_data(TensorData::new(pixels, [indices.len(), 3, h, w]), device);
        let targets = Tensor::from_data(TensorData::new(targets, [indices.len(), k]), device);
        (images, targets)
    }
}

fn predicted_classes<B: Backend>(logits: Tensor<B, 2>) -> Vec<usize> {
    logits
        .argmax(1)
        .into_data()
        .iter::<i64>()
        .map(|i| i as usize)
        .collect()
}

/// Loss, accuracy and per-sample predictions of `model` on a subset.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub loss: f64,
    pub accuracy: f64,
    pub predictions: Vec<usize>,
}

pub fn evaluate<B: Backend>(
    model: &GenreCnn<B>,
    data: &PreparedData,
    indices: &[usize],
    batch_size: usize,
    device: &B::Device,
) -> Evaluation {
    let mut predictions = Vec::with_capacity(indices.len());
    let mut loss_sum = 0.0;

    for chunk in indices.chunks(batch_size.max(1)) {
        let (images, targets) = data.batch::<B>(chunk, device);
        let logits = model.forward(images);
        predictions.extend(predicted_classes(logits.clone()));
        let loss: f64 = categorical_cross_entropy(logits, targets).into_scalar().elem();
        loss_sum += loss * chunk.len() as f64;
    }

    let correct = predictions
        .iter()
        .zip(indices)
        .filter(|&(&p, &i)| p == data.labels[i])
        .count();
    let n = indices.len().max(1) as f64;

    Evaluation {
        loss: loss_sum / n,
        accuracy: correct as f64 / n,
        predictions,
    }
}

/// Fit a fresh classifier on `train` (minus the trailing validation share).
pub fn fit(
    data: &PreparedData,
    train: &[usize],
    config: &GenreConfig,
) -> Result<(GenreCnn<InferenceBackend>, TrainingHistory)> {
    let device = Default::default();
    TrainBackend::seed(config.seed);

    // Validation samples come from the end of the training split, before any shuffling.
    let fit_len = ((train.len() as f64 * (1.0 - config.validation_fraction)).floor() as usize)
        .clamp(1, train.len());
    let (fit_idx, val_idx) = train.split_at(fit_len);

    let layers = network::architecture(data.num_classes(), config.dropout_keep);
    let mut model = GenreCnn::<TrainBackend>::build(&layers, config.image_size, &device)?;
    let mut optimizer = AdamConfig::new().init();

    info!("Classifier layers:");
    for layer in &layers {
        info!("  {layer}");
    }
    info!(
        "{} parameters, {} training / {} validation samples, {} epochs of batch {}",
        model.num_params(),
        fit_idx.len(),
        val_idx.len(),
        config.epochs,
        config.batch_size
    );

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut history = TrainingHistory::default();
    let mut order = fit_idx.to_vec();

    for epoch in 0..config.epochs {
        let start = Instant::now();
        order.shuffle(&mut rng);

        let mut batch_losses = Vec::new();
        let mut correct = 0;

        for batch in order.chunks(config.batch_size) {
            let (images, targets) = data.batch::<TrainBackend>(batch, &device);
            let logits = model.forward(images);

            correct += predicted_classes(logits.clone())
                .iter()
                .zip(batch)
                .filter(|&(&p, &i)| p == data.labels[i])
                .count();

            let loss = categorical_cross_entropy(logits, targets);
            batch_losses.push(loss.clone().into_scalar().elem::<f64>());

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(config.learning_rate, model, grads);
        }

        let train_loss = Data::new(batch_losses).mean().unwrap_or(f64::NAN);
        let train_accuracy = correct as f64 / order.len() as f64;

        let (val_loss, val_accuracy) = if val_idx.is_empty() {
            (None, None)
        } else {
            let valid = model.valid();
            let eval = evaluate(&valid, data, val_idx, config.batch_size, &device);
            (Some(eval.loss), Some(eval.accuracy))
        };

        info!(
            "Epoch {}/{}: loss = {:.4}, acc = {:.3}{}, {:.1}s",
            epoch + 1,
            config.epochs,
            train_loss,
            train_accuracy,
            match (val_loss, val_accuracy) {
                (Some(l), Some(a)) => format!(", val_loss = {l:.4}, val_acc = {a:.3}"),
                _ => String::new(),
            },
            start.elapsed().as_secs_f32()
        );

        history.epochs.push(EpochMetrics {
            train_loss,
            train_accuracy,
            val_loss,
            val_accuracy,
        });
    }

    Ok((model.valid(), history))
}

pub struct TrainingOutcome {
    pub model: GenreCnn<InferenceBackend>,
    pub encoder: LabelEncoder,
    pub history: TrainingHistory,
    pub test_accuracy: f64,
    pub report: ClassificationReport,
}

/// Load, scale, encode, split, fit, persist, evaluate, report.
pub fn train_model(root: &Path, config: &GenreConfig) -> Result<TrainingOutcome> {
    validate_config(config)?;

    let dataset = dataset::load(root, config)?;
    if dataset.is_empty() {
        return Err(GenreError::MissingData(format!(
            "no usable images under {} for genres {:?}",
            root.display(),
            config.genres
        )));
    }

    let data = PreparedData::from_dataset(&dataset, config.image_size)?;
    info!(
        "Dataset: {} images, {} genres {:?}",
        data.inputs.len(),
        data.num_classes(),
        data.encoder.classes()
    );

    let split = stratified_split(&data.labels, config.test_fraction, config.seed);
    debug!("Split: {} train / {} test", split.train.len(), split.test.len());

    let (model, history) = fit(&data, &split.train, config)?;

    persistence::save(&model, &data.encoder, config)?;

    if split.test.is_empty() {
        warn!("Test split is empty; the report below has no rows");
    }
    let device = Default::default();
    let evaluation = evaluate(&model, &data, &split.test, config.batch_size, &device);
    info!("Test accuracy: {:.3}", evaluation.accuracy);

    let y_true: Vec<usize> = split.test.iter().map(|&i| data.labels[i]).collect();
    let report = report(&y_true, &evaluation.predictions, data.encoder.classes())?;

    Ok(TrainingOutcome {
        model,
        encoder: data.encoder,
        history,
        test_accuracy: evaluation.accuracy,
        report,
    })
}
