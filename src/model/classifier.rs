//! Transfer-learning classifier built with Burn
//!
//! The classifier is a convolutional feature extractor (the backbone, frozen
//! during training) followed by a small trainable head:
//! global average pooling, dropout, and a dense layer with one output per class.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    tensor::{activation::softmax, backend::Backend, Tensor},
};

/// Configuration for the [`LeafClassifier`]
#[derive(Config, Debug)]
pub struct LeafClassifierConfig {
    /// Number of output classes
    pub num_classes: usize,

    /// Input image side length (square images)
    #[config(default = "224")]
    pub input_size: usize,

    /// Dropout rate in the classification head
    #[config(default = "0.3")]
    pub dropout_rate: f64,

    /// Filters in the first backbone block; doubled in each following block
    #[config(default = "32")]
    pub base_filters: usize,
}

impl LeafClassifierConfig {
    /// Build a freshly initialised classifier
    pub fn init<B: Backend>(&self, device: &B::Device) -> LeafClassifier<B> {
        LeafClassifier {
            backbone: FeatureExtractor::new(self.base_filters, device),
            head: ClassifierHead::new(
                FeatureExtractor::<B>::output_channels(self.base_filters),
                self.num_classes,
                self.dropout_rate,
                device,
            ),
        }
    }
}

/// A CNN block with Conv2d, BatchNorm, ReLU, and MaxPool
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B, 2>,
    pub relu: Relu,
    pub pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);

        Self {
            conv,
            bn: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        let x = self.relu.forward(x);
        self.pool.forward(x)
    }
}

/// Convolutional backbone: four blocks, `base -> 2x -> 4x -> 8x` filters
#[derive(Module, Debug)]
pub struct FeatureExtractor<B: Backend> {
    pub block1: ConvBlock<B>,
    pub block2: ConvBlock<B>,
    pub block3: ConvBlock<B>,
    pub block4: ConvBlock<B>,
}

impl<B: Backend> FeatureExtractor<B> {
    pub fn new(base_filters: usize, device: &B::Device) -> Self {
        let base = base_filters;
        Self {
            block1: ConvBlock::new(3, base, device),
            block2: ConvBlock::new(base, base * 2, device),
            block3: ConvBlock::new(base * 2, base * 4, device),
            block4: ConvBlock::new(base * 4, base * 8, device),
        }
    }

    /// Channels of the feature map produced for a given base filter count
    pub fn output_channels(base_filters: usize) -> usize {
        base_filters * 8
    }

    /// `[batch, 3, H, W]` -> `[batch, 8 * base, H / 16, W / 16]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.block1.forward(x);
        let x = self.block2.forward(x);
        let x = self.block3.forward(x);
        self.block4.forward(x)
    }
}

/// Trainable classification head
#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    pub pool: AdaptiveAvgPool2d,
    pub dropout: Dropout,
    pub fc: Linear<B>,
}

impl<B: Backend> ClassifierHead<B> {
    pub fn new(
        in_features: usize,
        num_classes: usize,
        dropout_rate: f64,
        device: &B::Device,
    ) -> Self {
        Self {
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dropout: DropoutConfig::new(dropout_rate).init(),
            fc: LinearConfig::new(in_features, num_classes).init(device),
        }
    }

    /// Feature map -> logits `[batch, num_classes]`
    pub fn forward(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.pool.forward(features);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);
        let x = self.dropout.forward(x);
        self.fc.forward(x)
    }

    pub fn num_classes(&self) -> usize {
        self.fc.weight.dims()[1]
    }
}

/// Frozen backbone + trainable head
#[derive(Module, Debug)]
pub struct LeafClassifier<B: Backend> {
    pub backbone: FeatureExtractor<B>,
    pub head: ClassifierHead<B>,
}

impl<B: Backend> LeafClassifier<B> {
    /// `[batch, 3, H, W]` -> logits `[batch, num_classes]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let features = self.backbone.forward(images);
        self.head.forward(features)
    }

    /// Forward pass ending in softmax, the classifier's serving output
    pub fn forward_probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    pub fn num_classes(&self) -> usize {
        self.head.num_classes()
    }
}

/// Reorder a channels-last batch `[N, H, W, C]` into Burn's `[N, C, H, W]`
pub fn channels_first<B: Backend>(images: Tensor<B, 4>) -> Tensor<B, 4> {
    images.permute([0, 3, 1, 2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_classifier_output_shape() {
        let device = Default::default();
        let config = LeafClassifierConfig::new(3)
            .with_input_size(32)
            .with_base_filters(4);
        let model = config.init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [2, 3]);
        assert_eq!(model.num_classes(), 3);
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let device = Default::default();
        let model = LeafClassifierConfig::new(5)
            .with_base_filters(2)
            .init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &device);
        let probs = model
            .forward_probabilities(input)
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        assert_eq!(probs.len(), 5);
        let total: f32 = probs.iter().sum();
        assert!((total - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_channels_first_permutation() {
        let device = Default::default();
        let nhwc = Tensor::<TestBackend, 4>::zeros([1, 8, 6, 3], &device);
        assert_eq!(channels_first(nhwc).dims(), [1, 3, 8, 6]);
    }
}
