//! Convolutional genre classifier.
//!
//! The topology is written down as a list of [`LayerSpec`] descriptors and turned
//! into a burn module by [`GenreCnn::build`], so the network definition can be
//! checked without running the training loop.

use std::fmt;

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig,
    },
    tensor::{
        activation::{log_softmax, relu, softmax},
        backend::Backend,
        Tensor,
    },
};

use crate::config::{GenreConfig, ImageSize};
use crate::error::{GenreError, Result};
use crate::types::SpectrogramImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Relu,
    Softmax,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayerSpec {
    Conv2d {
        filters: usize,
        kernel: usize,
        activation: Activation,
    },
    MaxPool2d {
        size: usize,
    },
    Flatten,
    Dense {
        units: usize,
        activation: Activation,
    },
    /// `keep` is the fraction of activations retained while training.
    Dropout {
        keep: f64,
    },
}

impl fmt::Display for LayerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerSpec::Conv2d {
                filters,
                kernel,
                activation,
            } => write!(f, "Conv2d({filters}, {kernel}x{kernel}, {activation:?})"),
            LayerSpec::MaxPool2d { size } => write!(f, "MaxPool2d({size}x{size})"),
            LayerSpec::Flatten => write!(f, "Flatten"),
            LayerSpec::Dense { units, activation } => write!(f, "Dense({units}, {activation:?})"),
            LayerSpec::Dropout { keep } => write!(f, "Dropout(keep {keep})"),
        }
    }
}

/// Three conv/relu/pool stages (32, 64, 128 filters), dense 128, dropout, softmax head.
pub fn architecture(num_classes: usize, dropout_keep: f64) -> Vec<LayerSpec> {
    let mut layers = Vec::new();
    for filters in [32, 64, 128] {
        layers.push(LayerSpec::Conv2d {
            filters,
            kernel: 3,
            activation: Activation::Relu,
        });
        layers.push(LayerSpec::MaxPool2d { size: 2 });
    }
    layers.extend([
        LayerSpec::Flatten,
        LayerSpec::Dense {
            units: 128,
            activation: Activation::Relu,
        },
        LayerSpec::Dropout { keep: dropout_keep },
        LayerSpec::Dense {
            units: num_classes,
            activation: Activation::Softmax,
        },
    ]);
    layers
}

/// Width of the vector produced by the `Flatten` step for an input of `size`.
pub fn flattened_width(layers: &[LayerSpec], size: ImageSize) -> Result<usize> {
    let (mut channels, mut height, mut width) = (
        SpectrogramImage::CHANNELS,
        size.height as usize,
        size.width as usize,
    );

    for layer in layers {
        match *layer {
            LayerSpec::Conv2d {
                filters, kernel, ..
            } => {
                if kernel == 0 || height < kernel || width < kernel {
                    return Err(too_small(size, layer));
                }
                height -= kernel - 1;
                width -= kernel - 1;
                channels = filters;
            }
            LayerSpec::MaxPool2d { size: pool } => {
                if pool == 0 || height < pool || width < pool {
                    return Err(too_small(size, layer));
                }
                height /= pool;
                width /= pool;
            }
            LayerSpec::Flatten => return Ok(channels * height * width),
            _ => {}
        }
    }

    Err(GenreError::Configuration("architecture has no Flatten step".into()))
}

fn too_small(size: ImageSize, layer: &LayerSpec) -> GenreError {
    GenreError::Configuration(format!(
        "image size {}x{} is too small for {layer}",
        size.width, size.height
    ))
}

#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    pool: Option<MaxPool2d>,
}

impl<B: Backend> ConvBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(self.conv.forward(x));
        match &self.pool {
            Some(pool) => pool.forward(x),
            None => x,
        }
    }
}

#[derive(Module, Debug)]
pub struct GenreCnn<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    hidden: Vec<Linear<B>>,
    dropout: Option<Dropout>,
    output: Linear<B>,
}

impl<B: Backend> GenreCnn<B> {
    /// Standard classifier for `num_classes` genres.
    pub fn new(num_classes: usize, config: &GenreConfig, device: &B::Device) -> Result<Self> {
        Self::build(
            &architecture(num_classes, config.dropout_keep),
            config.image_size,
            device,
        )
    }

    /// Turn a descriptor list into a module.
    ///
    /// Accepted shape: `(Conv2d[relu] MaxPool2d?)+ Flatten Dense[relu]* Dropout? Dense[softmax]`.
    pub fn build(layers: &[LayerSpec], size: ImageSize, device: &B::Device) -> Result<Self> {
        let unsupported = |layer: &LayerSpec, why: &str| {
            GenreError::Configuration(format!("unsupported layer {layer}: {why}"))
        };

        let mut blocks: Vec<ConvBlock<B>> = Vec::new();
        let mut hidden = Vec::new();
        let mut dropout = None;
        let mut output = None;

        let mut in_channels = SpectrogramImage::CHANNELS;
        let mut features: Option<usize> = None;

        for layer in layers {
            if output.is_some() {
                return Err(unsupported(layer, "nothing may follow the output layer"));
            }
            match (layer, features) {
                (
                    LayerSpec::Conv2d {
                        filters,
                        kernel,
                        activation: Activation::Relu,
                    },
                    None,
                ) => {
                    blocks.push(ConvBlock {
                        conv: Conv2dConfig::new([in_channels, *filters], [*kernel, *kernel])
                            .init(device),
                        pool: None,
                    });
                    in_channels = *filters;
                }
                (LayerSpec::MaxPool2d { size: pool }, None) => {
                    let block = blocks
                        .last_mut()
                        .filter(|b| b.pool.is_none())
                        .ok_or_else(|| unsupported(layer, "pooling must follow a convolution"))?;
                    block.pool = Some(
                        MaxPool2dConfig::new([*pool, *pool])
                            .with_strides([*pool, *pool])
                            .init(),
                    );
                }
                (LayerSpec::Flatten, None) => {
                    features = Some(flattened_width(layers, size)?);
                }
                (
                    LayerSpec::Dense {
                        units,
                        activation: Activation::Relu,
                    },
                    Some(width),
                ) if dropout.is_none() => {
                    hidden.push(LinearConfig::new(width, *units).init(device));
                    features = Some(*units);
                }
                (LayerSpec::Dropout { keep }, Some(_)) if dropout.is_none() => {
                    if !(*keep > 0.0 && *keep <= 1.0) {
                        return Err(unsupported(layer, "keep must lie in (0, 1]"));
                    }
                    dropout = Some(DropoutConfig::new(1.0 - keep).init());
                }
                (
                    LayerSpec::Dense {
                        units,
                        activation: Activation::Softmax,
                    },
                    Some(width),
                ) => {
                    output = Some(LinearConfig::new(width, *units).init(device));
                }
                _ => return Err(unsupported(layer, "out of place")),
            }
        }

        let output = output.ok_or_else(|| {
            GenreError::Configuration("architecture must end with a softmax Dense layer".into())
        })?;

        Ok(Self {
            blocks,
            hidden,
            dropout,
            output,
        })
    }

    /// Raw scores, shape `[batch, classes]`. Input is `[batch, 3, height, width]` in [0, 1].
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = images;
        for block in &self.blocks {
            x = block.forward(x);
        }

        let mut x: Tensor<B, 2> = x.flatten(1, 3);
        for layer in &self.hidden {
            x = relu(layer.forward(x));
        }
        if let Some(dropout) = &self.dropout {
            x = dropout.forward(x);
        }
        self.output.forward(x)
    }

    /// Probability distribution over genres, shape `[batch, classes]`.
    pub fn forward_probs(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    pub fn num_classes(&self) -> usize {
        self.output.weight.dims()[1]
    }
}

impl<B: Backend> GenreCnnRecord<B> {
    /// Width of the flattened features feeding the first dense layer.
    pub fn feature_width(&self) -> usize {
        match self.hidden.first() {
            Some(layer) => layer.weight.dims()[0],
            None => self.output.weight.dims()[0],
        }
    }

    pub fn num_classes(&self) -> usize {
        self.output.weight.dims()[1]
    }
}

/// Categorical cross-entropy between one-hot `targets` and the softmax of `logits`.
pub fn categorical_cross_entropy<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 2>,
) -> Tensor<B, 1> {
    (targets * log_softmax(logits, 1)).sum_dim(1).mean().neg()
}
